use std::any::Any;

use crate::error::Result;
use crate::message::MessageType;
use crate::messaging;
use crate::module::ServiceModule;
use crate::service::ServiceHandle;

/// Replies to every `TEXT` message with a `RESPONSE` carrying the same
/// payload back to the sender, same session. Used as the default bootstrap
/// target and by the echo round-trip test scenario.
#[derive(Debug)]
pub struct EchoModule;

impl ServiceModule for EchoModule {
    fn create(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    fn init(&self, _instance: &mut dyn Any, service: &ServiceHandle, _param: &str) -> Result<()> {
        service.set_callback(Box::new(|service, _instance, ty, session, source, payload| {
            if ty != MessageType::Text || source.is_none() {
                return false;
            }
            if let Some(runtime) = service.runtime() {
                let _ = messaging::send(
                    &runtime,
                    service.handle,
                    source,
                    MessageType::Response as u32,
                    session,
                    payload.to_vec(),
                );
            }
            false
        }));
        Ok(())
    }

    fn release(&self, _instance: Box<dyn Any + Send>) {}

    fn signal(&self, _instance: &mut dyn Any, _signal: i32) {}
}
