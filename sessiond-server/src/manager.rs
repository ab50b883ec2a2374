//! The manager state machine
//!
//! Single owner of the global session state: the five queues, the
//! per-client protocol orchestration (save-yourself, interact,
//! phase-2, die) and the control surface. Everything runs on one task
//! draining one event queue; handlers execute to completion before the
//! next event is looked at.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sessiond_protocol::{
    ClientMessage, ControlReply, ControlRequest, DialogType, ErrorCode, InteractStyle,
    RestartStyle, SaveType, ServerMessage, ShutdownKind, PROTOCOL_VERSION,
};
use sessiond_utils::hostname;

use crate::client::{Client, ClientState, ConnId};
use crate::config::AppConfig;
use crate::events::ManagerEvent;
use crate::hooks::Collaborators;
use crate::properties::Properties;
use crate::session_store::{FailsafeClient, SessionStore};
use crate::startup::run_command_sync;

/// Object path of the manager on the control surface
pub const OBJECT_PATH: &str = "/org/xfce/SessionManager";

/// How often an Immediately client may crash before it is parked for
/// the next login instead
pub const MAX_RESTART_ATTEMPTS: u32 = 10;

/// Global manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Launching the restored (or failsafe) session
    Startup,
    /// Session is up, nothing in flight
    Idle,
    /// A global save without shutdown is in progress
    Checkpoint,
    /// A global save leading to shutdown is in progress
    Shutdown,
    /// Die has been sent; waiting for clients to disconnect
    ShutdownPhase2,
}

impl ManagerState {
    /// Numeric code exposed on the control surface
    pub fn code(self) -> u32 {
        match self {
            ManagerState::Startup => 0,
            ManagerState::Idle => 1,
            ManagerState::Checkpoint => 2,
            ManagerState::Shutdown => 3,
            ManagerState::ShutdownPhase2 => 4,
        }
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ManagerState::Startup => "startup",
            ManagerState::Idle => "idle",
            ManagerState::Checkpoint => "checkpoint",
            ManagerState::Shutdown => "shutdown",
            ManagerState::ShutdownPhase2 => "shutdown-phase2",
        };
        f.write_str(name)
    }
}

/// Outcome of loading the persisted session at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A prior session was loaded into the pending queue
    Loaded,
    /// No prior session; the failsafe session will run
    Failsafe,
    /// The chooser asked to log out without starting a session
    ChooserLogout,
    /// Neither a session nor a failsafe definition could be found
    NoSession,
}

/// Events drained by the manager task
#[derive(Debug)]
pub enum ManagerMsg {
    /// A transport connection was accepted
    Connected {
        conn: ConnId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    },
    /// A decoded message arrived on a connection
    Request { conn: ConnId, msg: ClientMessage },
    /// A connection went away
    Disconnected { conn: ConnId },
    /// A client's save timeout expired
    SaveTimeout { conn: ConnId, seq: u64 },
    /// A launched entry never registered
    StartupTimeout { client_id: String },
    /// Clients did not disconnect after Die in time
    DieTimeout,
    /// Posted by main once the loop is up
    BeginStartup,
    /// Posted checkpoint work (after the control reply went out)
    BeginCheckpoint,
    /// Posted shutdown work (after the control reply went out)
    BeginShutdown {
        kind: ShutdownKind,
        allow_save: bool,
    },
}

/// Outbound side of one transport connection
pub(crate) struct ConnHandle {
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub subscribed: bool,
}

/// The session manager
pub struct Manager {
    pub(crate) state: ManagerState,
    pub(crate) shutdown_kind: ShutdownKind,
    pub(crate) session_name: String,
    pub(crate) checkpoint_session_name: Option<String>,
    pub(crate) failsafe_mode: bool,
    pub(crate) config: AppConfig,
    pub(crate) store: SessionStore,
    pub(crate) hooks: Collaborators,

    pub(crate) pending_properties: VecDeque<Properties>,
    pub(crate) starting_properties: VecDeque<Properties>,
    pub(crate) restart_properties: VecDeque<Properties>,
    pub(crate) running_clients: Vec<Client>,
    pub(crate) failsafe_clients: VecDeque<FailsafeClient>,

    pub(crate) conns: HashMap<ConnId, ConnHandle>,
    pub(crate) client_counter: u64,
    pub(crate) die_timeout: Option<JoinHandle<()>>,
    pub(crate) self_tx: mpsc::UnboundedSender<ManagerMsg>,
    pub(crate) events: broadcast::Sender<ManagerEvent>,
    pub(crate) quit: bool,
}

impl Manager {
    pub fn new(
        config: AppConfig,
        store: SessionStore,
        hooks: Collaborators,
        self_tx: mpsc::UnboundedSender<ManagerMsg>,
    ) -> Self {
        let (events, _) = crate::events::channel();
        Self {
            state: ManagerState::Startup,
            shutdown_kind: ShutdownKind::Logout,
            session_name: config.general.session_name.clone(),
            checkpoint_session_name: None,
            failsafe_mode: true,
            config,
            store,
            hooks,
            pending_properties: VecDeque::new(),
            starting_properties: VecDeque::new(),
            restart_properties: VecDeque::new(),
            running_clients: Vec::new(),
            failsafe_clients: VecDeque::new(),
            conns: HashMap::new(),
            client_counter: 0,
            die_timeout: None,
            self_tx,
            events,
            quit: false,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Watch manager events (state changes, registrations, cancels)
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Populate the pending queue from the persisted session, falling
    /// back to the failsafe session from the settings keyfile.
    pub fn load(&mut self, settings: &crate::keyfile::KeyFile) -> LoadOutcome {
        use crate::hooks::ChooserAction;

        let mut load_session = true;

        if self.store.exists() {
            if self.config.general.chooser_always_display {
                let sessions = self.store.sessions().unwrap_or_default();
                if sessions.len() > 1 {
                    match self.hooks.chooser.choose(&sessions, &self.session_name) {
                        ChooserAction::Logout => return LoadOutcome::ChooserLogout,
                        ChooserAction::Load(name) => self.session_name = name,
                        ChooserAction::UseNew(name) => {
                            self.session_name = name;
                            load_session = false;
                        }
                    }
                }
            }

            if load_session {
                match self.store.load_session(&self.session_name) {
                    Ok(records) => self.pending_properties.extend(records),
                    Err(e) => warn!("Unable to load session: {}", e),
                }
            }
        }

        if !self.pending_properties.is_empty() {
            if let Ok(file) = self.store.open() {
                self.hooks.legacy.load(&file);
            }
            self.failsafe_mode = false;
            return LoadOutcome::Loaded;
        }

        let screens = self.hooks.workspaces.screen_count();
        let failsafe = SessionStore::load_failsafe(settings, screens);
        if failsafe.is_empty() {
            return LoadOutcome::NoSession;
        }
        self.failsafe_clients.extend(failsafe);
        self.failsafe_mode = true;
        LoadOutcome::Failsafe
    }

    /// Drain the event queue until the session ends
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerMsg>) -> ShutdownKind {
        while let Some(msg) = rx.recv().await {
            self.dispatch(msg);
            if self.quit {
                break;
            }
        }
        self.shutdown_kind
    }

    /// Handle one event to completion
    pub(crate) fn dispatch(&mut self, msg: ManagerMsg) {
        match msg {
            ManagerMsg::Connected { conn, tx } => self.handle_connected(conn, tx),
            ManagerMsg::Request { conn, msg } => self.handle_request(conn, msg),
            ManagerMsg::Disconnected { conn } => self.handle_disconnected(conn),
            ManagerMsg::SaveTimeout { conn, seq } => self.handle_save_timeout(conn, seq),
            ManagerMsg::StartupTimeout { client_id } => self.handle_failed_client(&client_id),
            ManagerMsg::DieTimeout => self.handle_die_timeout(),
            ManagerMsg::BeginStartup => self.startup_begin(),
            ManagerMsg::BeginCheckpoint => self.save_yourself_global(
                SaveType::Both,
                false,
                InteractStyle::None,
                false,
                ShutdownKind::Ask,
                true,
            ),
            ManagerMsg::BeginShutdown { kind, allow_save } => self.save_yourself_global(
                SaveType::Both,
                true,
                InteractStyle::Any,
                false,
                kind,
                allow_save,
            ),
        }
    }

    // ==================== connections ====================

    fn handle_connected(&mut self, conn: ConnId, tx: mpsc::UnboundedSender<ServerMessage>) {
        if !matches!(self.state, ManagerState::Startup | ManagerState::Idle) {
            warn!(
                "Refusing connection {} while in {} state",
                conn, self.state
            );
            drop(tx);
            return;
        }
        self.conns.insert(
            conn,
            ConnHandle {
                tx,
                subscribed: false,
            },
        );
    }

    fn handle_disconnected(&mut self, conn: ConnId) {
        self.conns.remove(&conn);
        if let Some(idx) = self.client_index(conn) {
            self.close_connection(idx, false);
        }
    }

    fn handle_request(&mut self, conn: ConnId, msg: ClientMessage) {
        debug!("Connection {}: {}", conn, msg.type_name());
        match msg {
            ClientMessage::RegisterClient {
                previous_id,
                protocol_version,
            } => self.register_client(conn, previous_id, protocol_version),
            ClientMessage::Control(request) => self.handle_control(conn, request),
            other => {
                let Some(idx) = self.client_index(conn) else {
                    warn!(
                        "Connection {} sent {} before registering, dropping it",
                        conn,
                        other.type_name()
                    );
                    self.conns.remove(&conn);
                    return;
                };
                match other {
                    ClientMessage::SaveYourselfRequest {
                        save_type,
                        shutdown,
                        interact_style,
                        fast,
                        global,
                    } => self.save_yourself_request(
                        idx,
                        save_type,
                        shutdown,
                        interact_style,
                        fast,
                        global,
                    ),
                    ClientMessage::SaveYourselfPhase2Request => {
                        self.save_yourself_phase2_request(idx)
                    }
                    ClientMessage::SaveYourselfDone { success } => {
                        self.save_yourself_done(idx, success)
                    }
                    ClientMessage::InteractRequest { dialog_type } => {
                        self.interact_request(idx, dialog_type)
                    }
                    ClientMessage::InteractDone { cancel_shutdown } => {
                        self.interact_done(idx, cancel_shutdown)
                    }
                    ClientMessage::SetProperties { properties } => {
                        if let Some(record) = self.running_clients[idx].properties_mut() {
                            for property in properties {
                                record.apply(property);
                            }
                        }
                    }
                    ClientMessage::DeleteProperties { names } => {
                        if let Some(record) = self.running_clients[idx].properties_mut() {
                            for name in names {
                                record.remove(&name);
                            }
                        }
                    }
                    ClientMessage::GetProperties => {
                        let client = &self.running_clients[idx];
                        let properties = client
                            .properties()
                            .map(|p| p.to_properties())
                            .unwrap_or_default();
                        client.send(ServerMessage::PropertiesReply { properties });
                    }
                    ClientMessage::RegisterClient { .. } | ClientMessage::Control(_) => {
                        unreachable!("handled above")
                    }
                }
            }
        }
    }

    pub(crate) fn client_index(&self, conn: ConnId) -> Option<usize> {
        self.running_clients.iter().position(|c| c.conn() == conn)
    }

    // ==================== registration ====================

    fn register_client(&mut self, conn: ConnId, previous_id: Option<String>, protocol_version: u32) {
        if self.client_index(conn).is_some() {
            warn!("Connection {} registered twice, dropping it", conn);
            self.conns.remove(&conn);
            return;
        }
        let Some(handle) = self.conns.get(&conn) else {
            return;
        };
        let tx = handle.tx.clone();

        if protocol_version != PROTOCOL_VERSION {
            warn!(
                "Connection {} speaks protocol version {} (expected {}), dropping it",
                conn, protocol_version, PROTOCOL_VERSION
            );
            let _ = tx.send(ServerMessage::Error {
                code: ErrorCode::ProtocolMismatch,
                message: format!(
                    "protocol version mismatch: client={}, server={}",
                    protocol_version, PROTOCOL_VERSION
                ),
            });
            self.conns.remove(&conn);
            return;
        }

        let mut matched = false;
        let properties = match &previous_id {
            Some(prev) => {
                let found = remove_by_id(&mut self.starting_properties, prev)
                    .or_else(|| remove_by_id(&mut self.pending_properties, prev));
                match found {
                    Some(mut properties) => {
                        properties.cancel_startup_timeout();
                        matched = true;
                        properties
                    }
                    None => {
                        debug!(
                            "Connection {} registered with unknown previous id {}",
                            conn, prev
                        );
                        let _ = tx.send(ServerMessage::Error {
                            code: ErrorCode::BadValue,
                            message: format!("unknown previous id {}", prev),
                        });
                        return;
                    }
                }
            }
            None => Properties::new(generate_client_id(), hostname()),
        };

        self.client_counter += 1;
        let object_path = format!("{}/Client{}", OBJECT_PATH, self.client_counter);
        let mut client = Client::new(conn, tx, object_path.clone());
        client.set_properties(properties);

        info!(
            "Client {} registered ({})",
            client.id(),
            if matched { "restored" } else { "new" }
        );
        client.send(ServerMessage::RegisterClientReply {
            client_id: client.id().to_string(),
        });

        self.running_clients.push(client);
        self.notify(ManagerEvent::ClientRegistered { object_path });

        if previous_id.is_none() {
            // Brand-new clients are asked for an initial local save so
            // they pick up a discardable state right away
            let idx = self.running_clients.len() - 1;
            let client = &mut self.running_clients[idx];
            client.send(ServerMessage::SaveYourself {
                save_type: SaveType::Local,
                shutdown: false,
                interact_style: InteractStyle::None,
                fast: false,
            });
            client.set_state(ClientState::SavingLocal);
            self.start_save_timeout(idx);
        }

        // Advance startup only for registrations that consumed a
        // launched entry (or in failsafe mode, where nothing ever
        // matches); an unrelated fresh client must not skip a batch.
        if (self.failsafe_mode || matched)
            && self.state == ManagerState::Startup
            && self.starting_properties.is_empty()
        {
            self.session_continue();
        }
    }

    // ==================== save yourself ====================

    fn save_yourself_request(
        &mut self,
        idx: usize,
        save_type: SaveType,
        shutdown: bool,
        interact_style: InteractStyle,
        fast: bool,
        global: bool,
    ) {
        if self.running_clients[idx].state() != ClientState::Idle {
            warn!(
                "Client {} requested save yourself while not idle, dropping it",
                self.running_clients[idx].id()
            );
            self.close_connection(idx, true);
            return;
        }
        if self.state != ManagerState::Idle {
            warn!(
                "Client {} requested save yourself while manager is in {} state, dropping it",
                self.running_clients[idx].id(),
                self.state
            );
            self.close_connection(idx, true);
            return;
        }

        if !global {
            // Local checkpoint; shutdown makes no sense here and is
            // ignored
            let client = &mut self.running_clients[idx];
            client.send(ServerMessage::SaveYourself {
                save_type,
                shutdown: false,
                interact_style,
                fast,
            });
            client.set_state(ClientState::SavingLocal);
            self.start_save_timeout(idx);
        } else {
            self.save_yourself_global(
                save_type,
                shutdown,
                interact_style,
                fast,
                ShutdownKind::Ask,
                true,
            );
        }
    }

    pub(crate) fn save_yourself_global(
        &mut self,
        save_type: SaveType,
        shutdown: bool,
        interact_style: InteractStyle,
        fast: bool,
        kind: ShutdownKind,
        allow_save: bool,
    ) {
        let mut shutdown_save = allow_save;

        if shutdown {
            if !fast && kind == ShutdownKind::Ask {
                match self.hooks.dialog.ask(&self.session_name) {
                    Some((chosen, save)) => {
                        self.shutdown_kind = chosen;
                        shutdown_save = save;
                    }
                    None => return,
                }
            }
            if kind != ShutdownKind::Ask {
                self.shutdown_kind = kind;
            }

            // Flush dirty pages in the background before clients start
            // writing their state
            start_shutdown_sync();
        }

        if !shutdown || shutdown_save {
            self.set_state(if shutdown {
                ManagerState::Shutdown
            } else {
                ManagerState::Checkpoint
            });

            // Legacy applications persist first
            self.hooks.legacy.perform_session_save();

            for idx in 0..self.running_clients.len() {
                // xterm's session management is broken; never poll it
                let skip = self.running_clients[idx]
                    .properties()
                    .and_then(|p| p.program.as_deref())
                    .map(|program| program.eq_ignore_ascii_case("xterm"))
                    .unwrap_or(false);
                if skip {
                    continue;
                }

                {
                    let client = &mut self.running_clients[idx];
                    if client.state() != ClientState::SavingLocal {
                        client.send(ServerMessage::SaveYourself {
                            save_type,
                            shutdown,
                            interact_style,
                            fast,
                        });
                    }
                    client.set_state(ClientState::Saving);
                }
                self.start_save_timeout(idx);
            }

            // A session with no eligible saver completes right away
            if !self.check_clients_saving() {
                self.complete_saveyourself();
            }
        } else {
            // Shutdown without saving
            self.perform_shutdown();
        }
    }

    fn save_yourself_phase2_request(&mut self, idx: usize) {
        if !matches!(
            self.state,
            ManagerState::Checkpoint | ManagerState::Shutdown
        ) {
            // Outside a global save this is a local affair
            let client = &mut self.running_clients[idx];
            client.send(ServerMessage::SaveYourselfPhase2);
            client.set_state(ClientState::SavingLocal);
            self.start_save_timeout(idx);
        } else {
            let client = &mut self.running_clients[idx];
            client.set_state(ClientState::WaitForPhase2);
            client.cancel_save_timeout();

            if !self.check_clients_saving() {
                self.maybe_enter_phase2();
            }
        }
    }

    fn save_yourself_done(&mut self, idx: usize, _success: bool) {
        let state = self.running_clients[idx].state();
        if state != ClientState::Saving && state != ClientState::SavingLocal {
            warn!(
                "Client {} sent save yourself done while in {} state, dropping it",
                self.running_clients[idx].id(),
                state
            );
            self.close_connection(idx, true);
            return;
        }

        // Client responded in time
        self.running_clients[idx].cancel_save_timeout();

        if state == ClientState::SavingLocal {
            let client = &mut self.running_clients[idx];
            client.set_state(ClientState::Idle);
            client.send(ServerMessage::SaveComplete);
        } else if !matches!(
            self.state,
            ManagerState::Checkpoint | ManagerState::Shutdown
        ) {
            warn!(
                "Client {} sent save yourself done outside a global save, dropping it",
                self.running_clients[idx].id()
            );
            self.close_connection(idx, true);
        } else {
            self.running_clients[idx].set_state(ClientState::SaveDone);
            self.complete_saveyourself();
        }
    }

    pub(crate) fn check_clients_saving(&self) -> bool {
        self.running_clients
            .iter()
            .any(|c| c.state() == ClientState::Saving)
    }

    pub(crate) fn maybe_enter_phase2(&mut self) -> bool {
        let mut entered = false;
        for idx in 0..self.running_clients.len() {
            if self.running_clients[idx].state() == ClientState::WaitForPhase2 {
                entered = true;
                {
                    let client = &mut self.running_clients[idx];
                    client.send(ServerMessage::SaveYourselfPhase2);
                    client.set_state(ClientState::Saving);
                    info!("Client {} enters save yourself phase 2", client.id());
                }
                self.start_save_timeout(idx);
            }
        }
        entered
    }

    pub(crate) fn complete_saveyourself(&mut self) {
        // Still saving, or phase-2 newly entered: not done in this run
        if self.check_clients_saving() || self.maybe_enter_phase2() {
            return;
        }

        info!("Save yourself finished, storing session data");
        self.store_session();

        if self.state == ManagerState::Checkpoint {
            self.set_state(ManagerState::Idle);
            for client in &mut self.running_clients {
                client.set_state(ClientState::Idle);
                client.send(ServerMessage::SaveComplete);
            }
        } else {
            self.perform_shutdown();
        }
    }

    fn store_session(&mut self) {
        let name = if self.state == ManagerState::Checkpoint {
            self.checkpoint_session_name
                .clone()
                .unwrap_or_else(|| self.session_name.clone())
        } else {
            self.session_name.clone()
        };

        let workspaces = self.hooks.workspaces.active_workspaces();

        let mut records: Vec<&Properties> = Vec::new();
        for properties in &self.restart_properties {
            records.push(properties);
        }
        for client in &self.running_clients {
            if let Some(properties) = client.properties() {
                if properties.is_valid() && properties.restart_style_hint != RestartStyle::Never {
                    records.push(properties);
                }
            }
        }

        if let Err(e) = self
            .store
            .store(&name, &records, &workspaces, self.hooks.legacy.as_mut())
        {
            warn!("Unable to store session data: {}", e);
        }

        self.checkpoint_session_name = None;
    }

    pub(crate) fn perform_shutdown(&mut self) {
        self.set_state(ManagerState::ShutdownPhase2);

        for client in &self.running_clients {
            client.send(ServerMessage::Die);
        }

        // Anyway clients that quit earlier still get their shutdown
        // command run
        for properties in &self.restart_properties {
            if properties.restart_style_hint == RestartStyle::Anyway {
                if let Some(command) = &properties.shutdown_command {
                    info!(
                        "Client {} quit already, running shutdown command",
                        properties.client_id
                    );
                    run_command_sync(
                        command,
                        &properties.environment,
                        properties.current_directory.as_deref(),
                    );
                }
            }
        }

        // Give clients a grace period to close their connections
        let tx = self.self_tx.clone();
        let ms = self.config.timeouts.die_timeout_ms;
        self.die_timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let _ = tx.send(ManagerMsg::DieTimeout);
        }));
    }

    // ==================== interact ====================

    fn interact_request(&mut self, idx: usize, _dialog_type: DialogType) {
        if self.running_clients[idx].state() != ClientState::Saving {
            warn!(
                "Client {} requested interact while not saving, dropping it",
                self.running_clients[idx].id()
            );
            self.close_connection(idx, true);
            return;
        }
        if !matches!(
            self.state,
            ManagerState::Checkpoint | ManagerState::Shutdown
        ) {
            warn!(
                "Client {} requested interact while manager is in {} state, dropping it",
                self.running_clients[idx].id(),
                self.state
            );
            self.close_connection(idx, true);
            return;
        }

        let someone_interacting = self
            .running_clients
            .iter()
            .any(|c| c.state() == ClientState::Interacting);
        if someone_interacting {
            self.running_clients[idx].set_state(ClientState::WaitForInteract);
        } else {
            self.start_interact(idx);
        }
    }

    fn start_interact(&mut self, idx: usize) {
        let client = &mut self.running_clients[idx];
        client.send(ServerMessage::Interact);
        client.set_state(ClientState::Interacting);
        // The save timeout is suspended while the user has the floor
        client.cancel_save_timeout();
    }

    fn interact_done(&mut self, idx: usize, cancel_shutdown: bool) {
        if self.running_clients[idx].state() != ClientState::Interacting {
            warn!(
                "Client {} sent interact done while not interacting, dropping it",
                self.running_clients[idx].id()
            );
            self.close_connection(idx, true);
            return;
        }
        if !matches!(
            self.state,
            ManagerState::Checkpoint | ManagerState::Shutdown
        ) {
            warn!(
                "Client {} sent interact done while manager is in {} state, dropping it",
                self.running_clients[idx].id(),
                self.state
            );
            self.close_connection(idx, true);
            return;
        }

        self.running_clients[idx].set_state(ClientState::Saving);

        if cancel_shutdown && self.state == ManagerState::Shutdown {
            // The user cancelled; the save continues as a checkpoint
            self.set_state(ManagerState::Checkpoint);

            for i in 0..self.running_clients.len() {
                if self.running_clients[i].state() != ClientState::WaitForInteract {
                    continue;
                }
                let client = &mut self.running_clients[i];
                client.set_state(ClientState::Saving);
                client.send(ServerMessage::ShutdownCancelled);
                self.notify(ManagerEvent::ShutdownCancelled);
            }
        } else {
            // Let the next client interact
            if let Some(next) = self
                .running_clients
                .iter()
                .position(|c| c.state() == ClientState::WaitForInteract)
            {
                self.start_interact(next);
            }
        }

        self.start_save_timeout(idx);
    }

    // ==================== disconnect & timeouts ====================

    /// Close a registered client's connection and sort its properties
    /// into the right place
    pub(crate) fn close_connection(&mut self, idx: usize, cleanup: bool) {
        let conn = self.running_clients[idx].conn();
        {
            let client = &mut self.running_clients[idx];
            client.set_state(ClientState::Disconnected);
            client.cancel_save_timeout();
        }
        if cleanup {
            self.conns.remove(&conn);
        }

        match self.state {
            ManagerState::ShutdownPhase2 => {
                if self
                    .running_clients
                    .iter()
                    .all(|c| c.state() == ClientState::Disconnected)
                {
                    // All clients finished the die phase in time
                    if let Some(handle) = self.die_timeout.take() {
                        handle.abort();
                    }
                    self.quit = true;
                }
            }
            ManagerState::Shutdown | ManagerState::Checkpoint => {
                let client = self.running_clients.remove(idx);
                warn!(
                    "Client {} disconnected during a global save",
                    client.id()
                );
                drop(client);
                self.complete_saveyourself();
            }
            _ => {
                let mut client = self.running_clients.remove(idx);
                if let Some(mut properties) = client.steal_properties() {
                    if properties.is_valid() {
                        match properties.restart_style_hint {
                            RestartStyle::Anyway => {
                                self.restart_properties.push_back(properties);
                            }
                            RestartStyle::Immediately => {
                                properties.restart_attempts += 1;
                                if properties.restart_attempts > MAX_RESTART_ATTEMPTS {
                                    warn!(
                                        "Client {} reached {} restart attempts, rescheduling it for the next login",
                                        properties.client_id, properties.restart_attempts
                                    );
                                    self.restart_properties.push_back(properties);
                                } else {
                                    // No in-session relaunch; the state
                                    // the client saved is obsolete now
                                    self.maybe_run_discard(&properties);
                                }
                            }
                            _ => self.maybe_run_discard(&properties),
                        }
                    }
                }
            }
        }
    }

    fn maybe_run_discard(&self, properties: &Properties) {
        if self.state == ManagerState::Idle && self.config.shutdown.run_discard_on_exit {
            if let Some(command) = &properties.discard_command {
                info!(
                    "Client {} exited while idle, running discard command",
                    properties.client_id
                );
                run_command_sync(
                    command,
                    &properties.environment,
                    properties.current_directory.as_deref(),
                );
            }
        }
    }

    fn handle_save_timeout(&mut self, conn: ConnId, seq: u64) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        let client = &self.running_clients[idx];
        if client.timeout_seq() != seq || !client.has_save_timeout() {
            // Raced with a cancel or a re-arm
            return;
        }
        warn!(
            "Client {} hit the save timeout, dropping it",
            client.id()
        );
        self.close_connection(idx, true);
    }

    fn handle_die_timeout(&mut self) {
        if self.state == ManagerState::ShutdownPhase2 {
            warn!("Die timeout expired with clients still connected");
            self.die_timeout = None;
            self.quit = true;
        }
    }

    pub(crate) fn start_save_timeout(&mut self, idx: usize) {
        let conn = self.running_clients[idx].conn();
        let seq = self.running_clients[idx].next_timeout_seq();
        let tx = self.self_tx.clone();
        let ms = self.config.timeouts.save_timeout_ms;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let _ = tx.send(ManagerMsg::SaveTimeout { conn, seq });
        });
        self.running_clients[idx].arm_save_timeout(handle);
    }

    // ==================== control surface ====================

    fn handle_control(&mut self, conn: ConnId, request: ControlRequest) {
        let reply = match request {
            ControlRequest::GetInfo => ControlReply::Info {
                name: "sessiond".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                vendor: "sessiond".into(),
            },
            ControlRequest::ListClients => ControlReply::Clients {
                object_paths: self
                    .running_clients
                    .iter()
                    .map(|c| c.object_path().to_string())
                    .collect(),
            },
            ControlRequest::GetState => ControlReply::State {
                state: self.state.code(),
            },
            ControlRequest::Checkpoint { session_name } => {
                if self.state != ManagerState::Idle {
                    ControlReply::Error {
                        code: ErrorCode::BadState,
                        message: "session manager must be idle to checkpoint".into(),
                    }
                } else {
                    self.checkpoint_session_name = if session_name.is_empty() {
                        None
                    } else {
                        Some(session_name)
                    };
                    // Posted so the reply reaches the caller first
                    let _ = self.self_tx.send(ManagerMsg::BeginCheckpoint);
                    ControlReply::Ack
                }
            }
            ControlRequest::Shutdown { kind, allow_save } => {
                if self.state != ManagerState::Idle {
                    ControlReply::Error {
                        code: ErrorCode::BadState,
                        message: "session manager must be idle to shut down".into(),
                    }
                } else {
                    match ShutdownKind::from_code(kind) {
                        Some(ShutdownKind::Suspend) | Some(ShutdownKind::Hibernate) => {
                            ControlReply::Error {
                                code: ErrorCode::Unsupported,
                                message: "suspend and hibernate are not supported".into(),
                            }
                        }
                        None => ControlReply::Error {
                            code: ErrorCode::BadValue,
                            message: format!("invalid shutdown type \"{}\"", kind),
                        },
                        Some(kind) => {
                            let _ = self
                                .self_tx
                                .send(ManagerMsg::BeginShutdown { kind, allow_save });
                            ControlReply::Ack
                        }
                    }
                }
            }
            ControlRequest::TerminateClient { object_path } => {
                match self
                    .running_clients
                    .iter()
                    .position(|c| c.object_path() == object_path)
                {
                    None => ControlReply::Error {
                        code: ErrorCode::BadValue,
                        message: format!("no client at {}", object_path),
                    },
                    Some(idx) => {
                        if self.state != ManagerState::Idle
                            || self.running_clients[idx].state() != ClientState::Idle
                        {
                            ControlReply::Error {
                                code: ErrorCode::BadState,
                                message: "can only terminate clients when idle".into(),
                            }
                        } else {
                            self.running_clients[idx].send(ServerMessage::Die);
                            ControlReply::Ack
                        }
                    }
                }
            }
            ControlRequest::Subscribe => {
                if let Some(handle) = self.conns.get_mut(&conn) {
                    handle.subscribed = true;
                }
                ControlReply::Ack
            }
        };

        if let Some(handle) = self.conns.get(&conn) {
            let _ = handle.tx.send(ServerMessage::Control(reply));
        }
    }

    // ==================== state & events ====================

    /// The one place the global state changes; always emits the event
    pub(crate) fn set_state(&mut self, state: ManagerState) {
        if state == self.state {
            return;
        }
        let old = self.state;
        self.state = state;
        info!("Manager state {} -> {}", old, state);
        self.notify(ManagerEvent::StateChanged { old, new: state });
    }

    pub(crate) fn notify(&self, event: ManagerEvent) {
        let _ = self.events.send(event.clone());

        let wire = event.to_control_event();
        for handle in self.conns.values().filter(|h| h.subscribed) {
            let _ = handle.tx.send(ServerMessage::Event(wire.clone()));
        }
    }
}

fn remove_by_id(queue: &mut VecDeque<Properties>, client_id: &str) -> Option<Properties> {
    let pos = queue.iter().position(|p| p.client_id == client_id)?;
    queue.remove(pos)
}

/// Generate a fresh client id: protocol-conformant prefix plus a
/// network/time/pid/random tail
fn generate_client_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!(
        "1{:08x}{:08x}{:04x}{:04x}",
        fastrand::u32(..),
        secs as u32,
        std::process::id() as u16,
        fastrand::u16(..)
    )
}

#[cfg(target_os = "linux")]
fn start_shutdown_sync() {
    // Idle I/O priority keeps the session responsive while dirty pages
    // drain; completion is not awaited
    let spawned = tokio::process::Command::new("ionice")
        .args(["-c", "3", "sync"])
        .spawn()
        .or_else(|_| tokio::process::Command::new("sync").spawn());
    if let Err(e) = spawned {
        debug!("Unable to start background sync: {}", e);
    }
}

#[cfg(not(target_os = "linux"))]
fn start_shutdown_sync() {}
