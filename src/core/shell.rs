//! shell 主入口
//!
//! 定义 Shell 结构和主消息泵
//!
//! Shell 是应用的组合根：加载配置、初始化日志、显式构造调用分发器
//! 并把它交给各能力模块注册，然后创建脚本上下文宿主并驱动消息泵。
//! 原生侧是单线程协作式调度，桥接层自身不产生工作线程；唯一的异步
//! 挂起点是把别的线程发起的工作包装成延迟任务重新投递回泵线程。

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::bridge::dispatcher::InvokeDispatcher;
use crate::config::ShellConfig;
use crate::jsapi::{FileSystemModule, FileWatcherModule};
use crate::scripting::ScriptHost;

use super::error::ShellResult;

/// 延迟任务：在泵线程上对分发器执行一次操作
pub type ShellTask = Box<dyn FnOnce(&mut InvokeDispatcher) + Send>;
pub type TaskSender = Sender<ShellTask>;

/// shell 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Shutdown,
}

/// shell 主结构
///
/// # 生命周期
///
/// 1. **初始化阶段**：加载配置、注册能力模块、创建脚本上下文
/// 2. **运行阶段**：驱动消息泵，分发桥接消息与延迟任务
/// 3. **关闭阶段**：摘除脚本上下文，停止消息泵
pub struct Shell {
    config: ShellConfig,
    dispatcher: InvokeDispatcher,
    host: Rc<ScriptHost>,
    task_tx: TaskSender,
    task_rx: Receiver<ShellTask>,
    running: Arc<AtomicBool>,
    state: ShellState,
}

impl Shell {
    /// 构造 shell 并完成能力模块注册
    pub fn new(config: ShellConfig) -> ShellResult<Self> {
        let mut dispatcher = InvokeDispatcher::new();
        let (task_tx, task_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        FileSystemModule::register_handlers(&mut dispatcher);
        FileWatcherModule::register_handlers(&mut dispatcher, task_tx.clone());

        // 脚本可请求退出，对应窗口全部关闭后的消息循环终止
        let quit_flag = Arc::clone(&running);
        dispatcher.register_fn("shell.quit", move |_req, resp| {
            quit_flag.store(false, Ordering::SeqCst);
            resp.set_success(serde_json::json!({ "quitting": true }).to_string());
            Ok(())
        });

        let host = Rc::new(ScriptHost::new()?);
        dispatcher.attach_sink(host.clone());

        Ok(Self {
            config,
            dispatcher,
            host,
            task_tx,
            task_rx,
            running,
            state: ShellState::Initializing,
        })
    }

    /// 运行 shell：日志、配置、构造、启动脚本、消息泵
    pub fn run() -> ShellResult<()> {
        Self::initialize_logging();

        let config = ShellConfig::load_default()?;
        let mut shell = Shell::new(config)?;
        shell.start()?;
        shell.run_loop();

        tracing::info!(target: "shell", "Shell shutting down");
        Ok(())
    }

    /// 初始化日志系统
    ///
    /// 配置tracing日志框架，设置环境变量过滤器。
    /// 日志级别可以通过`RUST_LOG`环境变量控制。
    fn initialize_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        tracing::info!(target: "shell", "Shell starting");
    }

    /// 执行启动脚本（如有配置）
    pub fn start(&mut self) -> ShellResult<()> {
        if let Some(script_path) = self.config.startup_script.clone() {
            tracing::info!(target: "shell", "Loading startup script: {}", script_path.display());
            let source = std::fs::read_to_string(&script_path)?;
            self.host.eval(&source)?;
        } else {
            tracing::warn!(target: "shell", "No startup script configured");
        }
        Ok(())
    }

    /// 驱动消息泵直到退出请求
    pub fn run_loop(&mut self) {
        self.state = ShellState::Running;
        while self.running.load(Ordering::SeqCst) {
            let processed = self.pump_once();
            if processed == 0 {
                if self.config.startup_script.is_none() {
                    // 无启动脚本也无积压工作，空转没有意义
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.shutdown();
    }

    /// 泵一轮：延迟任务、桥接消息、到期清扫
    pub fn pump_once(&mut self) -> usize {
        let mut processed = 0;

        let tasks: Vec<ShellTask> = self.task_rx.try_iter().collect();
        for task in tasks {
            task(&mut self.dispatcher);
            processed += 1;
        }

        for message in self.host.drain_messages() {
            self.dispatcher
                .handle_invoke(&message.method, &message.data, message.request_id);
            processed += 1;
        }

        self.dispatcher.sweep_expired();
        processed
    }

    /// 关闭 shell
    pub fn shutdown(&mut self) {
        if self.state == ShellState::Shutdown {
            return;
        }
        self.state = ShellState::ShuttingDown;
        self.running.store(false, Ordering::SeqCst);
        self.dispatcher.detach_sink();
        self.state = ShellState::Shutdown;
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// 在脚本上下文中执行一段脚本
    pub fn eval(&self, code: &str) -> ShellResult<()> {
        Ok(self.host.eval(code)?)
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn dispatcher_mut(&mut self) -> &mut InvokeDispatcher {
        &mut self.dispatcher
    }

    /// 延迟任务发送端，交给需要回到泵线程的协作者
    pub fn task_sender(&self) -> TaskSender {
        self.task_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registers_capability_modules() {
        let shell = Shell::new(ShellConfig::default()).unwrap();
        assert!(shell.dispatcher.has_handler("fs.readFile"));
        assert!(shell.dispatcher.has_handler("fs.joinPath"));
        assert!(shell.dispatcher.has_handler("fs.watch"));
        assert!(shell.dispatcher.has_handler("shell.quit"));
        assert_eq!(shell.state(), ShellState::Initializing);
    }

    #[test]
    fn test_pump_routes_script_invoke_to_handler() {
        let mut shell = Shell::new(ShellConfig::default()).unwrap();
        shell.dispatcher_mut().register_fn("echo", |req, resp| {
            resp.set_success(req.data().to_string());
            Ok(())
        });
        shell
            .eval(
                "globalThis.__reply = null; \
                 shell._handleInvokeResponse = function(r) { globalThis.__reply = r; }; \
                 shell.invoke(\"echo\", {value: 42}, 1);",
            )
            .unwrap();

        let processed = shell.pump_once();
        assert_eq!(processed, 1);

        let reply = shell
            .host()
            .eval_to_string("JSON.stringify(globalThis.__reply);")
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["requestId"], 1);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["data"]["value"], 42);
    }

    #[test]
    fn test_quit_request_stops_shell() {
        let mut shell = Shell::new(ShellConfig::default()).unwrap();
        shell.eval("shell.invoke(\"shell.quit\", {});").unwrap();
        assert!(shell.is_running());
        shell.pump_once();
        assert!(!shell.is_running());
    }

    #[test]
    fn test_deferred_task_reaches_dispatcher_on_pump() {
        let mut shell = Shell::new(ShellConfig::default()).unwrap();
        shell
            .eval("globalThis.__calls = []; shell._handleNativeInvoke = function(c) { globalThis.__calls.push(c.method); };")
            .unwrap();

        let tasks = shell.task_sender();
        tasks
            .send(Box::new(|dispatcher| {
                dispatcher.invoke_script("renderer.refresh", "{}", None);
            }))
            .unwrap();
        shell.pump_once();

        let methods = shell
            .host()
            .eval_to_string("JSON.stringify(globalThis.__calls);")
            .unwrap();
        assert_eq!(methods, "[\"renderer.refresh\"]");
    }

    #[test]
    fn test_shutdown_detaches_script_context() {
        let mut shell = Shell::new(ShellConfig::default()).unwrap();
        shell.shutdown();
        assert_eq!(shell.state(), ShellState::Shutdown);
        assert!(!shell.dispatcher.has_script_context());
    }
}
