//! Client handle for one registered peer
//!
//! Wraps the transport connection, the per-client sub-state, the owned
//! [`Properties`] record and the save-timeout handle.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use sessiond_protocol::ServerMessage;

use crate::properties::Properties;

/// Identifier of one transport connection
pub type ConnId = u64;

/// Per-client sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered, nothing in flight
    Idle,
    /// Performing a save requested by (or for) itself only
    SavingLocal,
    /// Performing a save as part of a global checkpoint/shutdown
    Saving,
    /// Asked for phase-2; parked until the rest of the session settles
    WaitForPhase2,
    /// Asked to interact while another client holds the interact slot
    WaitForInteract,
    /// Currently interacting with the user
    Interacting,
    /// Finished its part of a global save
    SaveDone,
    /// Transport gone
    Disconnected,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientState::Idle => "idle",
            ClientState::SavingLocal => "saving-local",
            ClientState::Saving => "saving",
            ClientState::WaitForPhase2 => "wait-for-phase2",
            ClientState::WaitForInteract => "wait-for-interact",
            ClientState::Interacting => "interacting",
            ClientState::SaveDone => "save-done",
            ClientState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// A registered session-management client
#[derive(Debug)]
pub struct Client {
    conn: ConnId,
    tx: mpsc::UnboundedSender<ServerMessage>,
    state: ClientState,
    properties: Option<Properties>,
    save_timeout: Option<JoinHandle<()>>,
    timeout_seq: u64,
    object_path: String,
}

impl Client {
    pub fn new(conn: ConnId, tx: mpsc::UnboundedSender<ServerMessage>, object_path: String) -> Self {
        Self {
            conn,
            tx,
            state: ClientState::Idle,
            properties: None,
            save_timeout: None,
            timeout_seq: 0,
            object_path,
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// The client id; empty until properties are bound
    pub fn id(&self) -> &str {
        self.properties
            .as_ref()
            .map(|p| p.client_id.as_str())
            .unwrap_or("")
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn set_state(&mut self, state: ClientState) {
        trace!("Client {} {} -> {}", self.id(), self.state, state);
        self.state = state;
    }

    pub fn properties(&self) -> Option<&Properties> {
        self.properties.as_ref()
    }

    pub fn properties_mut(&mut self) -> Option<&mut Properties> {
        self.properties.as_mut()
    }

    /// Bind a properties record to this client (ownership transfer)
    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = Some(properties);
    }

    /// Take the properties record out of this client (ownership transfer)
    pub fn steal_properties(&mut self) -> Option<Properties> {
        self.properties.take()
    }

    /// Queue a message for the peer; a gone receiver is not an error,
    /// the disconnect will arrive on its own.
    pub fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            trace!("Client {} outbound channel closed", self.id());
        }
    }

    /// Store a new save-timeout handle, cancelling any prior one
    pub fn arm_save_timeout(&mut self, handle: JoinHandle<()>) {
        self.cancel_save_timeout();
        self.save_timeout = Some(handle);
    }

    /// Bump and return the timeout sequence; stale timeout events carry
    /// an older value and are dropped.
    pub fn next_timeout_seq(&mut self) -> u64 {
        self.timeout_seq += 1;
        self.timeout_seq
    }

    pub fn timeout_seq(&self) -> u64 {
        self.timeout_seq
    }

    pub fn has_save_timeout(&self) -> bool {
        self.save_timeout.is_some()
    }

    pub fn cancel_save_timeout(&mut self) {
        if let Some(handle) = self.save_timeout.take() {
            handle.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel_save_timeout();
    }
}
