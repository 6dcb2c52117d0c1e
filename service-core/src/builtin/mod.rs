//! Built-in modules bundled with the runtime: the `logger` service every
//! node bootstraps first, and a trivial `echo` service used as the default
//! bootstrap target and in integration tests.

pub mod echo;
pub mod logger;

use std::sync::Arc;

use crate::module::ModuleRegistry;

/// Register the built-in modules ahead of any cpath-driven dynamic lookup.
pub fn register(modules: &ModuleRegistry) {
    modules.register_static("logger", Arc::new(logger::LoggerModule));
    modules.register_static("echo", Arc::new(echo::EchoModule));
}
