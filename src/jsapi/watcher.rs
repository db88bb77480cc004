//! 文件监视能力模块
//!
//! `fs.watch` / `fs.unwatch` / `fs.unwatchAll`。notify 的事件回调运行
//! 在它自己的线程上，不允许直接触碰分发器；事件被包装成延迟任务
//! 重新投递到泵线程，再以出站调用 `fs.onFileChanged` 推入脚本上下文。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};

use crate::bridge::dispatcher::InvokeDispatcher;
use crate::bridge::envelope::{ErrorCode, InvokeRequest, InvokeResponse, Param};
use crate::core::error::{ShellError, ShellResult};
use crate::core::shell::TaskSender;

/// 脚本侧接收变更事件的出站方法名
pub const CHANGE_EVENT_METHOD: &str = "fs.onFileChanged";

type WatcherMap = Arc<Mutex<HashMap<String, RecommendedWatcher>>>;

pub struct FileWatcherModule;

impl FileWatcherModule {
    pub fn register_handlers(dispatcher: &mut InvokeDispatcher, tasks: TaskSender) {
        let watchers: WatcherMap = Arc::default();

        let map = Arc::clone(&watchers);
        let task_tx = tasks.clone();
        dispatcher.register_fn("fs.watch", move |req, resp| {
            handle_watch(&map, &task_tx, req, resp)
        });

        let map = Arc::clone(&watchers);
        dispatcher.register_fn("fs.unwatch", move |req, resp| handle_unwatch(&map, req, resp));

        let map = Arc::clone(&watchers);
        dispatcher.register_fn("fs.unwatchAll", move |_req, resp| {
            let mut map = map.lock().unwrap();
            let removed = map.len();
            map.clear();
            resp.set_success(serde_json::json!({ "removed": removed }).to_string());
            Ok(())
        });

        tracing::info!(target: "jsapi", "FileWatcher handlers registered");
    }
}

fn handle_watch(
    watchers: &WatcherMap,
    tasks: &TaskSender,
    request: &InvokeRequest,
    response: &mut InvokeResponse,
) -> ShellResult<()> {
    let path = match request.param_str("path") {
        Param::Found(path) => path,
        _ => {
            response.set_error("Missing required parameter: path", ErrorCode::Client);
            return Ok(());
        }
    };
    if !super::filesystem::is_path_safe(&path) {
        response.set_error("Unsafe path", ErrorCode::Forbidden);
        return Ok(());
    }
    let recursive = request.param_bool("recursive").found_or(false);
    if !Path::new(&path).exists() {
        response.set_error("Path not found", ErrorCode::NotFound);
        return Ok(());
    }

    let task_tx = tasks.clone();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            let kind = event_kind_name(&event.kind);
            for changed in event.paths {
                let payload = serde_json::json!({
                    "path": changed.to_string_lossy(),
                    "event": kind,
                })
                .to_string();
                let _ = task_tx.send(Box::new(move |dispatcher: &mut InvokeDispatcher| {
                    dispatcher.invoke_script(CHANGE_EVENT_METHOD, &payload, None);
                }));
            }
        },
        Config::default(),
    )
    .map_err(|e| ShellError::Watcher(e.to_string()))?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(Path::new(&path), mode)
        .map_err(|e| ShellError::Watcher(e.to_string()))?;

    // 同名重复 watch 覆盖旧监视器，旧的随替换停止
    watchers.lock().unwrap().insert(path.clone(), watcher);
    tracing::info!(target: "jsapi", "Watching path: {} (recursive: {})", path, recursive);

    response.set_success(
        serde_json::json!({ "watching": true, "path": path, "recursive": recursive }).to_string(),
    );
    Ok(())
}

fn handle_unwatch(
    watchers: &WatcherMap,
    request: &InvokeRequest,
    response: &mut InvokeResponse,
) -> ShellResult<()> {
    let path = match request.param_str("path") {
        Param::Found(path) => path,
        _ => {
            response.set_error("Missing required parameter: path", ErrorCode::Client);
            return Ok(());
        }
    };
    let removed = watchers.lock().unwrap().remove(&path).is_some();
    response.set_success(serde_json::json!({ "removed": removed }).to_string());
    Ok(())
}

fn event_kind_name(kind: &notify::EventKind) -> &'static str {
    match kind {
        notify::EventKind::Create(_) => "create",
        notify::EventKind::Modify(_) => "modify",
        notify::EventKind::Remove(_) => "remove",
        notify::EventKind::Access(_) => "access",
        _ => "other",
    }
}
