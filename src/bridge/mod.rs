//! Invoke Bridge
//!
//! 连接原生宿主与内嵌脚本上下文的双向异步 RPC 层。边界两侧只能
//! 传递序列化消息，不能传递活引用。
//!
//! 数据流：
//!
//! ```text
//! 脚本代码 shell.invoke(method, data, id)
//!     │  适配器经编解码器封送参数
//!     ▼
//! BridgeMessage ──通道──▶ InvokeDispatcher.handle_invoke
//!     │  注册表解析处理器并执行
//!     ▼
//! InvokeResponse ──注入──▶ shell._handleInvokeResponse(envelope)
//! ```
//!
//! 反向路径（原生发起）同构，由分发器担任发起方、适配器担任执行方。

pub mod codec;
pub mod dispatcher;
pub mod envelope;
pub mod registry;

pub use codec::{decode, encode, escape_json, unescape_json, ScriptValue};
pub use dispatcher::{
    InvokeDispatcher, ReplyCallback, ReplyHandle, ScriptReply, ScriptSink, DISPATCH_RECEIVER,
    RESPONSE_METHOD, RESPONSE_RECEIVER,
};
pub use envelope::{
    BridgeMessage, ErrorCode, InvokeRequest, InvokeResponse, OutboundCall, Param, ReplyEnvelope,
};
pub use registry::{HandlerRegistry, NativeHandler};
