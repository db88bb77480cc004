//! 调用分发器
//!
//! 桥接层的 RPC 引擎。入站方向：接收脚本上下文发来的调用，查表执行
//! 对应的原生处理器并把应答注入回脚本上下文。出站方向：向脚本上下文
//! 发起调用，用进程级单调递增的关联 id 把迟到的应答配对给等待者。
//!
//! 分发器由组合根显式构造并按引用传给各能力模块，不做进程级单例。

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::envelope::{ErrorCode, InvokeRequest, InvokeResponse, OutboundCall, ReplyEnvelope};
use super::registry::{HandlerRegistry, NativeHandler};
use crate::core::error::ShellResult;

/// 应答注入的既定接收器名
pub const RESPONSE_RECEIVER: &str = "shell._handleInvokeResponse";
/// 出站调用注入的既定接收器名
pub const DISPATCH_RECEIVER: &str = "shell._handleNativeInvoke";
/// 脚本侧回传出站应答所用的保留方法名，永远不会进入注册表
pub const RESPONSE_METHOD: &str = "_invokeResponse";

/// 脚本上下文注入接口
///
/// 分发器只负责组装信封，投递由宿主完成：以 JSON 实参调用脚本
/// 上下文内的指定接收器。
pub trait ScriptSink {
    fn call_receiver(&self, receiver: &str, payload_json: &str);
}

/// 出站调用完成回调：`(结果, 是否成功)`
pub type ReplyCallback = Box<dyn FnOnce(&str, bool) + Send>;

/// 出站调用的应答
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptReply {
    pub result: String,
    pub success: bool,
}

/// 基于通道的出站完成句柄
///
/// 让超时与取消成为一等操作：`wait_timeout` 等待应答，
/// `InvokeDispatcher::cancel_pending` 配合 `request_id` 撤销等待。
pub struct ReplyHandle {
    request_id: Option<i64>,
    rx: Receiver<ScriptReply>,
}

impl ReplyHandle {
    /// 分配到的关联 id；没有脚本上下文时为 None
    pub fn request_id(&self) -> Option<i64> {
        self.request_id
    }

    pub fn try_wait(&self) -> Option<ScriptReply> {
        self.rx.try_recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ScriptReply> {
        self.rx.recv_timeout(timeout).ok()
    }
}

struct PendingCall {
    complete: ReplyCallback,
    deadline: Option<Instant>,
}

/// 调用分发器
pub struct InvokeDispatcher {
    registry: HandlerRegistry,
    pending: HashMap<i64, PendingCall>,
    next_request_id: i64,
    sink: Option<Rc<dyn ScriptSink>>,
}

impl Default for InvokeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokeDispatcher {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            pending: HashMap::new(),
            next_request_id: 1,
            sink: None,
        }
    }

    /// 挂接脚本上下文
    pub fn attach_sink(&mut self, sink: Rc<dyn ScriptSink>) {
        self.sink = Some(sink);
    }

    /// 摘除脚本上下文；之后的出站调用立即失败
    pub fn detach_sink(&mut self) {
        self.sink = None;
    }

    pub fn has_script_context(&self) -> bool {
        self.sink.is_some()
    }

    pub fn register_handler(&mut self, method: impl Into<String>, handler: NativeHandler) {
        self.registry.register(method, handler);
    }

    pub fn register_fn<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&InvokeRequest, &mut InvokeResponse) -> ShellResult<()> + Send + 'static,
    {
        self.registry.register_fn(method, handler);
    }

    pub fn unregister_handler(&mut self, method: &str) {
        self.registry.unregister(method);
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.registry.contains(method)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ==================== 入站路径 ====================

    /// 处理脚本上下文发来的一次调用
    ///
    /// 未知方法在任何处理器执行之前就被拒绝（404）；处理器故障被
    /// 捕获并转换为 500 应答，绝不破坏消息循环。无论成败，每次调用
    /// 恰好产生一个应答信封。
    pub fn handle_invoke(&mut self, method: &str, data: &str, request_id: i64) {
        if method == RESPONSE_METHOD {
            self.complete_from_script(data);
            return;
        }

        let mut response = InvokeResponse::new(request_id);
        match self.registry.resolve(method) {
            None => {
                tracing::warn!(target: "bridge", "Invoke of unknown method: {}", method);
                response.set_error(format!("Method not found: {}", method), ErrorCode::NotFound);
            }
            Some(handler) => {
                let request = InvokeRequest::new(method, data, request_id);
                tracing::debug!(target: "bridge", "Dispatching invoke: {} (id {})", method, request_id);
                if let Err(fault) = handler(&request, &mut response) {
                    tracing::error!(target: "bridge", "Handler fault in {}: {}", method, fault);
                    response.set_error(format!("Handler exception: {}", fault), ErrorCode::Internal);
                }
            }
        }
        self.send_response(&response);
    }

    /// 把应答信封投递回脚本上下文
    fn send_response(&self, response: &InvokeResponse) {
        let Some(sink) = &self.sink else {
            tracing::warn!(
                target: "bridge",
                "Dropping response for request {}: no scripting context",
                response.request_id()
            );
            return;
        };
        sink.call_receiver(RESPONSE_RECEIVER, &response.to_json());
    }

    /// 消化脚本侧回传的出站应答
    ///
    /// 未知或已完成的 id 静默丢弃，防御重复与迟到的应答。
    fn complete_from_script(&mut self, data: &str) {
        let envelope = match serde_json::from_str::<ReplyEnvelope>(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(target: "bridge", "Malformed script reply envelope: {}", e);
                return;
            }
        };
        let Some(pending) = self.pending.remove(&envelope.request_id) else {
            tracing::debug!(
                target: "bridge",
                "Dropping reply for unknown request id {}",
                envelope.request_id
            );
            return;
        };
        let result = if envelope.success {
            match envelope.data {
                Some(serde_json::Value::String(s)) => s,
                Some(value) => value.to_string(),
                None => String::new(),
            }
        } else {
            envelope.error.unwrap_or_default()
        };
        (pending.complete)(&result, envelope.success);
    }

    // ==================== 出站路径 ====================

    /// 向脚本上下文发起调用
    ///
    /// 没有脚本上下文时立即以 `("", false)` 完成回调并返回 None，
    /// 出站调用绝不会在缺失目标上无限等待。返回分配到的关联 id。
    pub fn invoke_script(
        &mut self,
        method: &str,
        data: &str,
        callback: Option<ReplyCallback>,
    ) -> Option<i64> {
        self.invoke_script_inner(method, data, callback, None)
    }

    /// 带截止时间的出站调用；到期未应答时以合成失败完成回调
    pub fn invoke_script_with_deadline(
        &mut self,
        method: &str,
        data: &str,
        callback: ReplyCallback,
        deadline: Duration,
    ) -> Option<i64> {
        self.invoke_script_inner(method, data, Some(callback), Some(deadline))
    }

    /// 基于通道的出站调用，应答通过返回的句柄获取
    pub fn invoke_script_awaitable(
        &mut self,
        method: &str,
        data: &str,
        deadline: Option<Duration>,
    ) -> ReplyHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let callback: ReplyCallback = Box::new(move |result: &str, success: bool| {
            let _ = tx.send(ScriptReply {
                result: result.to_string(),
                success,
            });
        });
        let request_id = self.invoke_script_inner(method, data, Some(callback), deadline);
        ReplyHandle { request_id, rx }
    }

    fn invoke_script_inner(
        &mut self,
        method: &str,
        data: &str,
        callback: Option<ReplyCallback>,
        deadline: Option<Duration>,
    ) -> Option<i64> {
        let Some(sink) = self.sink.clone() else {
            if let Some(callback) = callback {
                callback("", false);
            }
            return None;
        };

        let request_id = self.next_request_id();
        let call = OutboundCall {
            method: method.to_string(),
            data: data.to_string(),
            request_id,
        };
        let payload = match serde_json::to_string(&call) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(target: "bridge", "Failed to serialize outbound call: {}", e);
                if let Some(callback) = callback {
                    callback("", false);
                }
                return None;
            }
        };

        if let Some(callback) = callback {
            self.pending.insert(
                request_id,
                PendingCall {
                    complete: callback,
                    deadline: deadline.map(|d| Instant::now() + d),
                },
            );
        }
        tracing::debug!(target: "bridge", "Invoking script: {} (id {})", method, request_id);
        sink.call_receiver(DISPATCH_RECEIVER, &payload);
        Some(request_id)
    }

    /// 撤销一个等待中的出站调用；回调被丢弃且不再触发
    pub fn cancel_pending(&mut self, request_id: i64) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    /// 清扫过期的等待项，以合成失败完成它们的回调
    ///
    /// 由消息泵每轮调用一次。
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.map_or(false, |d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                tracing::warn!(target: "bridge", "Outbound invoke {} timed out", id);
                (pending.complete)("", false);
            }
        }
        expired.len()
    }

    fn next_request_id(&mut self) -> i64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 记录注入调用的测试用接收器
    #[derive(Default)]
    struct MockSink {
        calls: RefCell<Vec<(String, String)>>,
    }

    impl MockSink {
        fn replies(&self) -> Vec<serde_json::Value> {
            self.calls
                .borrow()
                .iter()
                .filter(|(receiver, _)| receiver == RESPONSE_RECEIVER)
                .map(|(_, json)| serde_json::from_str(json).unwrap())
                .collect()
        }

        fn outbound(&self) -> Vec<OutboundCall> {
            self.calls
                .borrow()
                .iter()
                .filter(|(receiver, _)| receiver == DISPATCH_RECEIVER)
                .map(|(_, json)| serde_json::from_str(json).unwrap())
                .collect()
        }
    }

    impl ScriptSink for MockSink {
        fn call_receiver(&self, receiver: &str, payload_json: &str) {
            self.calls
                .borrow_mut()
                .push((receiver.to_string(), payload_json.to_string()));
        }
    }

    fn dispatcher_with_sink() -> (InvokeDispatcher, Rc<MockSink>) {
        let mut dispatcher = InvokeDispatcher::new();
        let sink = Rc::new(MockSink::default());
        dispatcher.attach_sink(sink.clone());
        (dispatcher, sink)
    }

    #[test]
    fn test_exactly_one_reply_with_matching_id() {
        let (mut dispatcher, sink) = dispatcher_with_sink();
        dispatcher.register_fn("echo", |req, resp| {
            resp.set_success(req.data().to_string());
            Ok(())
        });
        dispatcher.handle_invoke("echo", "{\"value\":42}", 11);

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["requestId"], 11);
        assert_eq!(replies[0]["success"], true);
        assert_eq!(replies[0]["data"]["value"], 42);
    }

    #[test]
    fn test_unknown_method_rejected_without_handler_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut dispatcher, sink) = dispatcher_with_sink();
        let counter = Arc::clone(&calls);
        dispatcher.register_fn("known", move |_req, _resp| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.handle_invoke("ghost.call", "{}", 7);

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["requestId"], 7);
        assert_eq!(replies[0]["success"], false);
        assert_eq!(replies[0]["error"], "Method not found: ghost.call");
        assert_eq!(replies[0]["errorCode"], 404);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_fault_becomes_internal_error() {
        let (mut dispatcher, sink) = dispatcher_with_sink();
        dispatcher.register_fn("boom", |_req, _resp| {
            Err(crate::core::error::ShellError::General("kaboom".to_string()))
        });
        dispatcher.handle_invoke("boom", "{}", 5);

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["success"], false);
        assert_eq!(replies[0]["errorCode"], 500);
        let message = replies[0]["error"].as_str().unwrap();
        assert!(message.starts_with("Handler exception:"), "got: {message}");
    }

    #[test]
    fn test_silent_handler_yields_failure_reply() {
        let (mut dispatcher, sink) = dispatcher_with_sink();
        dispatcher.register_fn("mute", |_req, _resp| Ok(()));
        dispatcher.handle_invoke("mute", "{}", 2);

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["success"], false);
    }

    #[test]
    fn test_outbound_without_context_fails_fast() {
        let mut dispatcher = InvokeDispatcher::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = dispatcher.invoke_script(
            "renderer.ping",
            "{}",
            Some(Box::new(move |result, success| {
                assert_eq!(result, "");
                assert!(!success);
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(id, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_outbound_ids_are_monotonic_from_one() {
        let (mut dispatcher, sink) = dispatcher_with_sink();
        let first = dispatcher.invoke_script("a", "{}", None);
        let second = dispatcher.invoke_script("b", "{}", None);
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));

        let outbound = sink.outbound();
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[0].method, "a");
        assert_eq!(outbound[0].request_id, 1);
    }

    #[test]
    fn test_reply_completes_pending_call() {
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let handle = dispatcher.invoke_script_awaitable("renderer.ask", "{}", None);
        let id = handle.request_id().unwrap();
        assert_eq!(dispatcher.pending_count(), 1);

        let reply = format!("{{\"requestId\":{id},\"success\":true,\"data\":\"pong\"}}");
        dispatcher.handle_invoke(RESPONSE_METHOD, &reply, 0);

        assert_eq!(dispatcher.pending_count(), 0);
        let reply = handle.try_wait().unwrap();
        assert!(reply.success);
        assert_eq!(reply.result, "pong");
    }

    #[test]
    fn test_reply_with_structured_data_is_stringified() {
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let handle = dispatcher.invoke_script_awaitable("renderer.ask", "{}", None);
        let id = handle.request_id().unwrap();

        let reply = format!("{{\"requestId\":{id},\"success\":true,\"data\":{{\"n\":1}}}}");
        dispatcher.handle_invoke(RESPONSE_METHOD, &reply, 0);

        let reply = handle.try_wait().unwrap();
        assert_eq!(reply.result, "{\"n\":1}");
    }

    #[test]
    fn test_unknown_reply_id_dropped_silently() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let counter = Arc::clone(&fired);
        dispatcher.invoke_script(
            "renderer.ask",
            "{}",
            Some(Box::new(move |_result, _success| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        dispatcher.handle_invoke(
            RESPONSE_METHOD,
            "{\"requestId\":999,\"success\":true,\"data\":\"late\"}",
            0,
        );

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[test]
    fn test_reply_delivered_at_most_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let counter = Arc::clone(&fired);
        let id = dispatcher
            .invoke_script(
                "renderer.ask",
                "{}",
                Some(Box::new(move |_result, _success| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let reply = format!("{{\"requestId\":{id},\"success\":true,\"data\":\"x\"}}");
        dispatcher.handle_invoke(RESPONSE_METHOD, &reply, 0);
        dispatcher.handle_invoke(RESPONSE_METHOD, &reply, 0);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deadline_expiry_completes_with_synthetic_failure() {
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let handle =
            dispatcher.invoke_script_awaitable("renderer.slow", "{}", Some(Duration::ZERO));
        assert_eq!(dispatcher.pending_count(), 1);

        let swept = dispatcher.sweep_expired();
        assert_eq!(swept, 1);
        assert_eq!(dispatcher.pending_count(), 0);

        let reply = handle.try_wait().unwrap();
        assert!(!reply.success);
        assert_eq!(reply.result, "");
    }

    #[test]
    fn test_cancel_pending_discards_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (mut dispatcher, _sink) = dispatcher_with_sink();
        let counter = Arc::clone(&fired);
        let id = dispatcher
            .invoke_script(
                "renderer.ask",
                "{}",
                Some(Box::new(move |_result, _success| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        assert!(dispatcher.cancel_pending(id));
        assert!(!dispatcher.cancel_pending(id));

        let reply = format!("{{\"requestId\":{id},\"success\":true,\"data\":\"x\"}}");
        dispatcher.handle_invoke(RESPONSE_METHOD, &reply, 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reserved_method_never_hits_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut dispatcher, sink) = dispatcher_with_sink();
        let counter = Arc::clone(&calls);
        dispatcher.register_fn(RESPONSE_METHOD, move |_req, _resp| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.handle_invoke(RESPONSE_METHOD, "{\"requestId\":1,\"success\":true}", 0);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.replies().is_empty());
    }
}
