//! # Shell Engine
//!
//! A lightweight embedded-scripting desktop application shell built with Rust.
//!
//! ## Features
//!
//! - **Invoke Bridge**: Bidirectional asynchronous RPC between native code and
//!   an embedded scripting context, with correlation ids and reply matching
//! - **Capability Modules**: Named native capabilities (filesystem, file
//!   watching) registered under dotted method names
//! - **Embedded Scripting**: QuickJS context exposing a single `shell.invoke`
//!   entry point to page script
//! - **Configuration**: TOML/JSON config files with environment overrides
//!
//! ## Architecture Design
//!
//! Both sides of the boundary run on their own serialized event queues; only
//! serialized messages cross. The native side is a single-threaded cooperative
//! pump; work originating on other threads is re-posted as deferred tasks.
//!
//! ### Example
//!
//! ```ignore
//! use shell_engine::core::Shell;
//! use shell_engine::config::ShellConfig;
//!
//! fn main() -> shell_engine::core::ShellResult<()> {
//!     let mut shell = Shell::new(ShellConfig::default())?;
//!     shell.eval("shell.invoke(\"fs.exists\", {path: \"/tmp\"}, 1);")?;
//!     shell.pump_once();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Shell composition root and main pump loop
//! - [`bridge`]: The invoke bridge (codec, envelopes, registry, dispatcher)
//! - [`scripting`]: Embedded scripting context host
//! - [`jsapi`]: Capability modules exposed to script
//! - [`config`]: Configuration system

/// Core shell functionality including the composition root and message pump
pub mod core;
/// The invoke bridge connecting native code and the scripting context
pub mod bridge;
/// Embedded scripting context host
pub mod scripting;
/// Capability modules exposed to page script
pub mod jsapi;
/// Configuration system
pub mod config;
