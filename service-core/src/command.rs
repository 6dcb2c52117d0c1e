use std::sync::Arc;

use crate::handle::Handle;
use crate::runtime::Runtime;
use crate::service::Service;
use crate::signal;

/// §4.6 text command surface. Every verb accepts and returns text; `None`
/// means "no result / error". Callers own the returned `String` - unlike
/// the original 32-byte scratch-buffer contract, there is nothing to race
/// against a subsequent command on the same service.
pub fn command(runtime: &Arc<Runtime>, service: &Arc<Service>, verb: &str, arg: &str) -> Option<String> {
    match verb {
        "TIMEOUT" => {
            let ticks: u32 = arg.trim().parse().ok()?;
            let session = service.alloc_session();
            runtime.schedule_timeout(service.handle, session, ticks);
            Some(session.to_string())
        }
        "REG" => {
            if arg.is_empty() {
                Some(service.handle.to_string())
            } else {
                runtime.registry.name_handle(service.handle, arg).ok()?;
                Some(service.handle.to_string())
            }
        }
        "QUERY" => runtime
            .registry
            .find_name(arg)
            .map(|h| h.to_string()),
        "NAME" => {
            let (raw_handle, name) = arg.split_once(' ')?;
            let handle = parse_handle(raw_handle)?;
            runtime.registry.name_handle(handle, name).ok()?;
            Some("OK".to_string())
        }
        "EXIT" => {
            runtime.retire(service.handle);
            Some("OK".to_string())
        }
        "KILL" => {
            let target = resolve_target(runtime, arg)?;
            if runtime.retire(target) {
                Some("OK".to_string())
            } else {
                None
            }
        }
        "LAUNCH" => {
            let (module, module_arg) = arg.split_once(' ').unwrap_or((arg, ""));
            let launched = runtime.context_new(module, module_arg).ok()?;
            Some(launched.handle.to_string())
        }
        "GETENV" => runtime.getenv(arg),
        "SETENV" => {
            let (key, value) = arg.split_once('=')?;
            runtime.setenv(key, value);
            Some("OK".to_string())
        }
        "STARTTIME" => Some(runtime.start_time().elapsed().as_secs().to_string()),
        "ABORT" => {
            runtime.begin_shutdown();
            Some("OK".to_string())
        }
        "MONITOR" => {
            let watcher = parse_handle(arg)?;
            service.set_exit_watcher(watcher);
            Some("OK".to_string())
        }
        "STAT" => stat(service, arg),
        "LOGON" => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(arg)
                .ok()?;
            service.set_log_sink(Some(file));
            Some("OK".to_string())
        }
        "LOGOFF" => {
            service.set_log_sink(None);
            Some("OK".to_string())
        }
        "SIGNAL" => {
            let sig: i32 = arg.trim().parse().ok()?;
            signal::deliver(runtime, service.handle, sig).ok()?;
            Some("OK".to_string())
        }
        _ => None,
    }
}

fn stat(service: &Arc<Service>, arg: &str) -> Option<String> {
    match arg {
        "mqlen" => Some(service.mailbox.length().to_string()),
        "endless" => Some(
            if service
                .endless
                .swap(false, std::sync::atomic::Ordering::AcqRel)
            {
                "1"
            } else {
                "0"
            }
            .to_string(),
        ),
        "cpu" => Some(service.cpu_micros().to_string()),
        "time" => Some(service.cpu_micros().to_string()),
        "message" => Some(service.message_count().to_string()),
        _ => None,
    }
}

fn resolve_target(runtime: &Arc<Runtime>, arg: &str) -> Option<Handle> {
    parse_handle(arg).or_else(|| runtime.registry.find_name(arg))
}

fn parse_handle(text: &str) -> Option<Handle> {
    let hex = text.strip_prefix(':')?;
    u32::from_str_radix(hex, 16).ok().map(Handle::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn reg_with_no_arg_returns_own_handle() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.modules.register_static("noop", Arc::new(NoopModule));
        let service = runtime.context_new("noop", "").unwrap();
        let result = command(&runtime, &service, "REG", "").unwrap();
        assert_eq!(result, service.handle.to_string());
    }

    #[test]
    fn setenv_getenv_roundtrip() {
        let runtime = Runtime::new(RuntimeConfig::default());
        runtime.modules.register_static("noop", Arc::new(NoopModule));
        let service = runtime.context_new("noop", "").unwrap();
        assert_eq!(command(&runtime, &service, "SETENV", "k=v"), Some("OK".to_string()));
        assert_eq!(command(&runtime, &service, "GETENV", "k"), Some("v".to_string()));
    }

    struct NoopModule;
    impl crate::module::ServiceModule for NoopModule {
        fn create(&self) -> Box<dyn std::any::Any + Send> {
            Box::new(())
        }
        fn init(
            &self,
            _instance: &mut dyn std::any::Any,
            _service: &crate::service::ServiceHandle,
            _param: &str,
        ) -> crate::error::Result<()> {
            Ok(())
        }
        fn release(&self, _instance: Box<dyn std::any::Any + Send>) {}
        fn signal(&self, _instance: &mut dyn std::any::Any, _signal: i32) {}
    }
}
