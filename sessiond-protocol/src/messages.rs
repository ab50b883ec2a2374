//! Client-server message types
//!
//! `ClientMessage` is everything a peer (a session-managed application
//! or a desktop control component) can send to the manager;
//! `ServerMessage` is everything the manager sends back.

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from a peer to the session manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// Register with the session manager
    ///
    /// `previous_id` is the client id obtained from a prior session, if
    /// the client was restarted from saved state. `protocol_version`
    /// must match the manager's [`crate::PROTOCOL_VERSION`].
    RegisterClient {
        previous_id: Option<String>,
        protocol_version: u32,
    },

    /// Ask the manager to initiate a save
    SaveYourselfRequest {
        save_type: SaveType,
        shutdown: bool,
        interact_style: InteractStyle,
        fast: bool,
        /// false: save only this client; true: save the whole session
        global: bool,
    },

    /// Request a second save pass once the rest of the session settled
    SaveYourselfPhase2Request,

    /// Report that the save finished
    SaveYourselfDone { success: bool },

    /// Ask for permission to interact with the user during a save
    InteractRequest { dialog_type: DialogType },

    /// Report that the user interaction finished
    InteractDone { cancel_shutdown: bool },

    /// Set or update session-management properties
    SetProperties { properties: Vec<SmProperty> },

    /// Remove properties by name
    DeleteProperties { names: Vec<String> },

    /// Request the current property set
    GetProperties,

    /// Control-surface request from a desktop component
    Control(ControlRequest),
}

/// Messages sent from the session manager to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    /// Successful registration; carries the (possibly fresh) client id
    RegisterClientReply { client_id: String },

    /// Instruct the client to save its state
    SaveYourself {
        save_type: SaveType,
        shutdown: bool,
        interact_style: InteractStyle,
        fast: bool,
    },

    /// Begin the second save pass
    SaveYourselfPhase2,

    /// The client may interact with the user now
    Interact,

    /// The save the client took part in is complete
    SaveComplete,

    /// The shutdown in progress was cancelled
    ShutdownCancelled,

    /// Terminate now
    Die,

    /// Reply to GetProperties
    PropertiesReply { properties: Vec<SmProperty> },

    /// Protocol-level failure (e.g. unknown previous id)
    Error { code: ErrorCode, message: String },

    /// Control-surface reply
    Control(ControlReply),

    /// Broadcast manager event for subscribed control connections
    Event(ControlEvent),
}

/// Requests on the control surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlRequest {
    /// Name, version and vendor of the manager
    GetInfo,

    /// Object paths of all registered clients
    ListClients,

    /// Current manager state code
    GetState,

    /// Checkpoint the session; empty name means the current session name
    Checkpoint { session_name: String },

    /// End the session with the given power action
    Shutdown { kind: u32, allow_save: bool },

    /// Ask a single idle client to terminate
    TerminateClient { object_path: String },

    /// Start receiving manager events on this connection
    Subscribe,
}

/// Replies on the control surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlReply {
    Info {
        name: String,
        version: String,
        vendor: String,
    },
    Clients {
        object_paths: Vec<String>,
    },
    State {
        state: u32,
    },
    /// Request accepted (checkpoint/shutdown work is posted, not done)
    Ack,
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Manager events pushed to subscribed control connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlEvent {
    StateChanged { old: u32, new: u32 },
    ClientRegistered { object_path: String },
    ShutdownCancelled,
}

/// Error codes carried on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// Client and manager speak different protocol versions
    ProtocolMismatch,
    /// A value in the request was out of range or unknown
    BadValue,
    /// The request is not legal in the current manager state
    BadState,
    /// The operation is not supported by the running configuration
    Unsupported,
    /// The message violated the protocol
    Protocol,
    /// Internal failure
    Internal,
}

impl ClientMessage {
    /// Short name for logging and metrics
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::RegisterClient { .. } => "register_client",
            ClientMessage::SaveYourselfRequest { .. } => "save_yourself_request",
            ClientMessage::SaveYourselfPhase2Request => "save_yourself_phase2_request",
            ClientMessage::SaveYourselfDone { .. } => "save_yourself_done",
            ClientMessage::InteractRequest { .. } => "interact_request",
            ClientMessage::InteractDone { .. } => "interact_done",
            ClientMessage::SetProperties { .. } => "set_properties",
            ClientMessage::DeleteProperties { .. } => "delete_properties",
            ClientMessage::GetProperties => "get_properties",
            ClientMessage::Control(_) => "control",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_are_stable() {
        let msg = ClientMessage::RegisterClient {
            previous_id: None,
            protocol_version: crate::PROTOCOL_VERSION,
        };
        assert_eq!(msg.type_name(), "register_client");

        let msg = ClientMessage::Control(ControlRequest::GetState);
        assert_eq!(msg.type_name(), "control");
    }
}
