pub mod host;

pub use host::ScriptHost;
