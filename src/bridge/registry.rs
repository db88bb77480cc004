//! 处理器注册表
//!
//! 进程级的方法名到原生回调的映射表。注册同名方法时后写者胜出，
//! 注销不存在的方法是空操作。每次变更都会发出一条诊断记录，仅用于
//! 观测，不影响分发行为。

use std::collections::HashMap;

use crate::core::error::ShellResult;

use super::envelope::{InvokeRequest, InvokeResponse};

/// 原生处理器
///
/// 处理器通过 `set_success` / `set_error` 报告领域结果；`Err` 返回
/// 通道只用于意外故障，由分发器统一映射为 500 应答。
pub type NativeHandler =
    Box<dyn Fn(&InvokeRequest, &mut InvokeResponse) -> ShellResult<()> + Send>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, NativeHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，覆盖同名旧条目
    pub fn register(&mut self, method: impl Into<String>, handler: NativeHandler) {
        let method = method.into();
        tracing::info!(target: "bridge", "Registered invoke handler: {}", method);
        self.handlers.insert(method, handler);
    }

    /// 便捷注册：自动装箱闭包
    pub fn register_fn<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&InvokeRequest, &mut InvokeResponse) -> ShellResult<()> + Send + 'static,
    {
        self.register(method, Box::new(handler));
    }

    /// 注销处理器；名字不存在时为空操作
    pub fn unregister(&mut self, method: &str) {
        if self.handlers.remove(method).is_some() {
            tracing::info!(target: "bridge", "Unregistered invoke handler: {}", method);
        } else {
            tracing::debug!(target: "bridge", "Unregister of unknown handler: {}", method);
        }
    }

    pub fn resolve(&self, method: &str) -> Option<&NativeHandler> {
        self.handlers.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("echo", |_req, resp| {
            resp.set_success("ok");
            Ok(())
        });
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("ghost").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        let counter = Arc::clone(&first_calls);
        registry.register_fn("dup", move |_req, _resp| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = Arc::clone(&second_calls);
        registry.register_fn("dup", move |_req, _resp| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(registry.len(), 1);

        let request = InvokeRequest::new("dup", "{}", 1);
        let mut response = InvokeResponse::new(1);
        let handler = registry.resolve("dup").unwrap();
        handler(&request, &mut response).unwrap();

        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let mut registry = HandlerRegistry::new();
        registry.unregister("never.registered");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_removes() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("fs.readFile", |_req, _resp| Ok(()));
        registry.unregister("fs.readFile");
        assert!(!registry.contains("fs.readFile"));
    }
}
