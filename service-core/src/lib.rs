pub mod builtin;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod harbor;
pub mod mailbox;
pub mod message;
pub mod messaging;
pub mod module;
pub mod monitor;
pub mod orchestrator;
pub mod runqueue;
pub mod runtime;
pub mod service;
pub mod signal;

pub use command::command;
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use handle::{Handle, HandleRegistry};
pub use harbor::{HarborSink, NullHarbor};
pub use mailbox::Mailbox;
pub use message::{Message, MessageType, ALLOCSESSION, DONTCOPY, MAX_MESSAGE_SIZE};
pub use module::{ModuleDescriptor, ModuleRegistry, ServiceModule};
pub use monitor::MonitorSlot;
pub use orchestrator::Orchestrator;
pub use runqueue::RunQueue;
pub use runtime::Runtime;
pub use service::{Service, ServiceHandle, TrapState};
