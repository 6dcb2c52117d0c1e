use crate::error::{Result, RuntimeError};
use crate::handle::Handle;
use crate::message::Message;

/// Cross-node routing hook. `send` consults this whenever a destination's
/// node id differs from the local node; this repository has no cluster
/// protocol of its own (out of scope, §1), so the trait exists purely to
/// keep `send`'s control flow total instead of guessing at an unspecified
/// wire format.
pub trait HarborSink: Send + Sync {
    fn route(&self, dest: Handle, message: Message) -> Result<()>;
}

/// Stub [`HarborSink`] shipped by default: every remote send fails as a
/// lookup failure, which is indistinguishable from "that node is
/// unreachable" to a caller that has no harbor configured.
#[derive(Debug, Default)]
pub struct NullHarbor;

impl HarborSink for NullHarbor {
    fn route(&self, dest: Handle, _message: Message) -> Result<()> {
        Err(RuntimeError::UnknownHandle(dest))
    }
}
