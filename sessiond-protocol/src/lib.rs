//! sessiond-protocol: Shared message definitions for session management
//!
//! This crate defines the message-level view of the session management
//! protocol spoken between the manager and its clients over a Unix
//! socket, plus the control surface used by desktop components. The
//! manager core never touches wire bytes; the codec here does the
//! framing.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{ClientCodec, CodecError, ServerCodec};
pub use messages::{
    ClientMessage, ControlEvent, ControlReply, ControlRequest, ErrorCode, ServerMessage,
};
pub use types::{
    DialogType, InteractStyle, PropertyValue, RestartStyle, SaveType, ShutdownKind, SmProperty,
};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;
