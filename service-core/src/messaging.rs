use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::handle::Handle;
use crate::message::{Message, MessageType, ALLOCSESSION, DONTCOPY, MAX_MESSAGE_SIZE};
use crate::runtime::Runtime;

/// §4.7 `send`: route a message either to a local mailbox or to the harbor
/// sink when the destination's node id differs from ours. `ty` carries both
/// the message type tag (low byte) and the `DONTCOPY`/`ALLOCSESSION` flag
/// bits; flags never survive into the stored [`Message`].
pub fn send(
    runtime: &Arc<Runtime>,
    src: Handle,
    dst: Handle,
    ty: u32,
    session: i64,
    payload: Vec<u8>,
) -> Result<i64> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(RuntimeError::MessageTooLarge {
            size: payload.len(),
        });
    }

    let tag = (ty & 0xff) as u8;
    let message_type =
        MessageType::from_tag(tag).ok_or(RuntimeError::InvalidMessageType(tag))?;

    let src = if src.is_none() {
        Runtime::current_handle()
    } else {
        src
    };

    let session = if ty & ALLOCSESSION != 0 {
        if session != 0 {
            return Err(RuntimeError::InvalidDestination);
        }
        let source_service = runtime
            .registry
            .grab(src)
            .ok_or(RuntimeError::UnknownHandle(src))?;
        let allocated = source_service.alloc_session();
        source_service.release();
        allocated
    } else {
        session
    };

    if dst.is_none() {
        return if payload.is_empty() {
            Ok(session)
        } else {
            Err(RuntimeError::InvalidDestination)
        };
    }

    // `DONTCOPY` only matters in the original pointer-ownership model; here
    // the payload is already an owned `Vec<u8>` moved in by the caller, so
    // the flag is accepted but has no further effect.
    let _ = ty & DONTCOPY;

    if dst.node() != runtime.node_id() && dst.node() != 0 {
        let message = Message::new(src, session, message_type, payload);
        runtime.harbor.route(dst, message)?;
        return Ok(session);
    }

    match runtime.registry.grab(dst) {
        Some(service) => {
            service
                .mailbox
                .push(Message::new(src, session, message_type, payload));
            service.release();
            runtime.wake_one();
            Ok(session)
        }
        None => Err(RuntimeError::UnknownHandle(dst)),
    }
}

/// §4.7 `send_name`: resolve `target` (a `:hex-handle` literal or a bound
/// name) and delegate to [`send`].
pub fn send_name(
    runtime: &Arc<Runtime>,
    src: Handle,
    target: &str,
    ty: u32,
    session: i64,
    payload: Vec<u8>,
) -> Result<i64> {
    let dst = runtime
        .registry
        .find_name(target)
        .ok_or_else(|| RuntimeError::UnknownName(target.to_string()))?;
    send(runtime, src, dst, ty, session, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn send_to_unknown_handle_errors() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let err = send(
            &runtime,
            Handle::NONE,
            Handle::pack(0, 99),
            MessageType::Text as u32,
            0,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownHandle(_)));
    }

    #[test]
    fn self_session_alloc_with_null_dst() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let result = send(
            &runtime,
            Handle::NONE,
            Handle::NONE,
            MessageType::Text as u32,
            7,
            Vec::new(),
        );
        assert_eq!(result.unwrap(), 7);
    }
}
