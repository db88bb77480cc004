//! 脚本上下文宿主
//!
//! 桥接层位于脚本上下文一侧的那一半。持有 QuickJS 运行时与上下文，
//! 向页面脚本暴露唯一入口 `shell.invoke`，把实参经编解码器封送后
//! 通过通道转发给原生侧；应答与原生发起的调用以脚本注入的方式送回
//! 既定接收器。

use std::collections::BTreeMap;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rquickjs::function::Func;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};

use crate::bridge::codec::{self, ScriptValue};
use crate::bridge::dispatcher::ScriptSink;
use crate::bridge::envelope::BridgeMessage;
use crate::core::error::{ScriptError, ScriptResult};

/// 脚本上下文宿主
///
/// 适配器本身不做应答配对：默认 requestId 0 表示“发后不理”，关心
/// 应答的调用方自带 id 并在脚本侧注册监听，这部分记账属于页面脚本
/// 逻辑而不是原生代码。
pub struct ScriptHost {
    #[allow(dead_code)]
    runtime: Runtime,
    context: Context,
    message_rx: Receiver<BridgeMessage>,
}

impl ScriptHost {
    pub fn new() -> ScriptResult<Self> {
        let runtime =
            Runtime::new().map_err(|e| ScriptError::Runtime(format!("{:?}", e)))?;
        let context =
            Context::full(&runtime).map_err(|e| ScriptError::Runtime(format!("{:?}", e)))?;
        let (tx, rx) = unbounded();

        install_bridge(&context, tx)?;

        Ok(Self {
            runtime,
            context,
            message_rx: rx,
        })
    }

    /// 执行一段脚本
    pub fn eval(&self, code: &str) -> ScriptResult<()> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|e| ScriptError::Evaluation(format!("{:?}", e)))
        })
    }

    /// 执行一段脚本并取回字符串结果，测试与诊断用
    pub fn eval_to_string(&self, code: &str) -> ScriptResult<String> {
        self.context.with(|ctx| {
            ctx.eval::<String, _>(code)
                .map_err(|e| ScriptError::Evaluation(format!("{:?}", e)))
        })
    }

    /// 取走脚本侧积压的全部桥接消息
    pub fn drain_messages(&self) -> Vec<BridgeMessage> {
        self.message_rx.try_iter().collect()
    }
}

impl ScriptSink for ScriptHost {
    fn call_receiver(&self, receiver: &str, payload_json: &str) {
        let script = format!(
            "if (globalThis.{receiver}) {{ globalThis.{receiver}({payload_json}); }}"
        );
        self.context.with(|ctx| {
            if let Err(e) = ctx.eval::<(), _>(script.as_str()) {
                tracing::error!(target: "script", "Injected call to {} failed: {:?}", receiver, e);
            }
        });
    }
}

/// 安装 `shell` 全局对象与 console 转发
fn install_bridge(context: &Context, tx: Sender<BridgeMessage>) -> ScriptResult<()> {
    context
        .with(|ctx| -> rquickjs::Result<()> {
            let global = ctx.globals();

            let shell = Object::new(ctx.clone())?;
            shell.set(
                "invoke",
                Func::from(
                    move |ctx: Ctx<'_>, args: Rest<Value<'_>>| -> rquickjs::Result<bool> {
                        invoke_entry(&ctx, &args.0, &tx)
                    },
                ),
            )?;
            global.set("shell", shell)?;

            // console 输出统一汇入 tracing
            let console = Object::new(ctx.clone())?;
            console.set(
                "log",
                Function::new(ctx.clone(), |args: Rest<String>| {
                    tracing::info!(target: "script.console", "{}", args.0.join(" "));
                }),
            )?;
            console.set(
                "warn",
                Function::new(ctx.clone(), |args: Rest<String>| {
                    tracing::warn!(target: "script.console", "{}", args.0.join(" "));
                }),
            )?;
            console.set(
                "error",
                Function::new(ctx.clone(), |args: Rest<String>| {
                    tracing::error!(target: "script.console", "{}", args.0.join(" "));
                }),
            )?;
            global.set("console", console)?;

            Ok(())
        })
        .map_err(|e| ScriptError::InvalidBinding(format!("{:?}", e)))
}

/// `shell.invoke(method, data, requestId?)` 的入口实现
///
/// 参数不合法时抛出脚本侧异常而不是原生故障；发送成功总是返回 true，
/// 不阻塞也不重试。
fn invoke_entry(
    ctx: &Ctx<'_>,
    args: &[Value<'_>],
    tx: &Sender<BridgeMessage>,
) -> rquickjs::Result<bool> {
    if args.len() < 2 {
        return Err(throw_bridge_error(
            ctx,
            "invoke requires at least 2 arguments: method and data",
        ));
    }
    let Some(method) = args[0].as_string() else {
        return Err(throw_bridge_error(ctx, "First argument (method) must be a string"));
    };
    let method = method.to_string()?;

    let data = codec::encode(&js_to_script_value(&args[1])?);
    let request_id = args
        .get(2)
        .and_then(|v| v.as_int())
        .map(i64::from)
        .unwrap_or(0);

    let _ = tx.send(BridgeMessage {
        method,
        data,
        request_id,
    });
    Ok(true)
}

/// 在脚本上下文内抛出带消息的异常
fn throw_bridge_error(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    use rquickjs::IntoJs;
    match message.into_js(ctx) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
    }
}

/// 递归把脚本值转换为编解码器的值类型
///
/// 函数、Symbol 等不可序列化的值退化为 Null。
fn js_to_script_value(value: &Value<'_>) -> rquickjs::Result<ScriptValue> {
    if value.is_null() || value.is_undefined() {
        return Ok(ScriptValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(ScriptValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(ScriptValue::Int(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(ScriptValue::Float(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(ScriptValue::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for i in 0..array.len() {
            if let Ok(item) = array.get::<Value<'_>>(i) {
                items.push(js_to_script_value(&item)?);
            }
        }
        return Ok(ScriptValue::Array(items));
    }
    if let Some(object) = value.as_object() {
        let mut map = BTreeMap::new();
        for prop in object.props::<String, Value<'_>>() {
            let (key, item) = prop?;
            map.insert(key, js_to_script_value(&item)?);
        }
        return Ok(ScriptValue::Object(map));
    }
    Ok(ScriptValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_marshals_arguments() {
        let host = ScriptHost::new().unwrap();
        host.eval("shell.invoke(\"fs.readFile\", {path: \"/tmp/a\", depth: 2}, 5);")
            .unwrap();

        let messages = host.drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].method, "fs.readFile");
        assert_eq!(messages[0].request_id, 5);
        let params = codec::decode(&messages[0].data);
        assert_eq!(params.get("path").and_then(ScriptValue::as_str), Some("/tmp/a"));
        assert_eq!(params.get("depth").and_then(ScriptValue::as_int), Some(2));
    }

    #[test]
    fn test_invoke_defaults_to_fire_and_forget() {
        let host = ScriptHost::new().unwrap();
        host.eval("shell.invoke(\"ping\", null);").unwrap();

        let messages = host.drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].request_id, 0);
        assert_eq!(messages[0].data, "null");
    }

    #[test]
    fn test_invoke_returns_true_on_send() {
        let host = ScriptHost::new().unwrap();
        let result = host
            .eval_to_string("String(shell.invoke(\"ping\", {}));")
            .unwrap();
        assert_eq!(result, "true");
    }

    #[test]
    fn test_invoke_rejects_missing_arguments() {
        let host = ScriptHost::new().unwrap();
        // 异常必须留在脚本上下文内，可被脚本捕获
        let result = host
            .eval_to_string("(function() { try { shell.invoke(\"only-method\"); return \"no-throw\"; } catch (e) { return \"caught\"; } })();")
            .unwrap();
        assert_eq!(result, "caught");
        assert!(host.drain_messages().is_empty());
    }

    #[test]
    fn test_invoke_rejects_non_string_method() {
        let host = ScriptHost::new().unwrap();
        let result = host
            .eval_to_string("(function() { try { shell.invoke(42, {}); return \"no-throw\"; } catch (e) { return \"caught\"; } })();")
            .unwrap();
        assert_eq!(result, "caught");
        assert!(host.drain_messages().is_empty());
    }

    #[test]
    fn test_call_receiver_reaches_script() {
        let host = ScriptHost::new().unwrap();
        host.eval("shell._probe = function(v) { globalThis.__got = v.x; };")
            .unwrap();
        host.call_receiver("shell._probe", "{\"x\":7}");
        let got = host.eval_to_string("String(globalThis.__got);").unwrap();
        assert_eq!(got, "7");
    }

    #[test]
    fn test_call_receiver_missing_hook_is_noop() {
        let host = ScriptHost::new().unwrap();
        host.call_receiver("shell._nothingHere", "{\"x\":1}");
    }

    #[test]
    fn test_nested_values_marshal_recursively() {
        let host = ScriptHost::new().unwrap();
        host.eval("shell.invoke(\"m\", {list: [1, \"two\", {deep: true}], f: 1.5});")
            .unwrap();
        let messages = host.drain_messages();
        let params = codec::decode(&messages[0].data);
        let list = match params.get("list") {
            Some(ScriptValue::Array(items)) => items.clone(),
            other => panic!("expected array, got {:?}", other),
        };
        assert_eq!(list[0], ScriptValue::Int(1));
        assert_eq!(list[1], ScriptValue::String("two".to_string()));
        assert_eq!(list[2].get("deep").and_then(ScriptValue::as_bool), Some(true));
    }
}
