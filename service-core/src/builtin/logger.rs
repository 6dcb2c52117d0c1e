use std::any::Any;
use std::fs::File;
use std::io::Write;

use crate::error::Result;
use crate::message::MessageType;
use crate::module::ServiceModule;
use crate::service::ServiceHandle;

/// The node's default log sink (§4.11): every other service's `TIMEOUT`
/// errors, `LAUNCH`/`FAILED launch` events and so on already go through
/// `tracing`; this service exists for *application* text, sent to it the
/// same way any other message is sent. With `RuntimeConfig::logger` unset,
/// lines are folded into the same `tracing` output as the rest of the
/// runtime rather than silently dropped.
#[derive(Debug)]
pub struct LoggerModule;

struct LoggerState {
    file: Option<File>,
}

impl ServiceModule for LoggerModule {
    fn create(&self) -> Box<dyn Any + Send> {
        Box::new(LoggerState { file: None })
    }

    fn init(&self, instance: &mut dyn Any, service: &ServiceHandle, _param: &str) -> Result<()> {
        let state = instance
            .downcast_mut::<LoggerState>()
            .expect("logger instance type mismatch");
        if let Some(runtime) = service.runtime() {
            if let Some(path) = &runtime.config.logger {
                state.file = Some(
                    File::options()
                        .create(true)
                        .append(true)
                        .open(path)?,
                );
            }
        }

        service.set_callback(Box::new(|service, instance, ty, _session, source, payload| {
            if ty != MessageType::Text {
                return false;
            }
            let line = String::from_utf8_lossy(payload);
            let state = instance
                .downcast_mut::<LoggerState>()
                .expect("logger instance type mismatch");
            match state.file.as_mut() {
                Some(file) => {
                    let _ = writeln!(file, "{source} {line}");
                }
                None => tracing::info!(source = %source, "{line}"),
            }
            service.log_line(&line);
            false
        }));
        Ok(())
    }

    fn release(&self, _instance: Box<dyn Any + Send>) {}

    fn signal(&self, _instance: &mut dyn Any, _signal: i32) {}
}
