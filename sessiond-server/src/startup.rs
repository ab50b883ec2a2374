//! Startup orchestration
//!
//! Launches the pending queue in priority batches: everything sharing
//! the lowest priority value starts together, and the next batch goes
//! out once every launched entry either registered or timed out. When
//! both queues drain the manager enters the idle state.

use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};

use sessiond_utils::{Result, SessiondError};

use crate::manager::{Manager, ManagerMsg, ManagerState};
use crate::properties::Properties;

impl Manager {
    /// Kick off the session: failsafe launches everything at once,
    /// a restored session goes out in priority batches.
    pub(crate) fn startup_begin(&mut self) {
        // Foreign desktop services first, in both modes
        self.hooks.legacy.foreign_startup(&self.config.compat);

        if self.failsafe_mode {
            let steps = self.failsafe_clients.len();
            let session_name = self.session_name.clone();
            self.hooks.splash.start(&session_name, steps);

            while let Some(failsafe) = self.failsafe_clients.pop_front() {
                let label = failsafe.command.first().cloned().unwrap_or_default();
                self.hooks.splash.next(&label);
                if let Err(e) = spawn_detached(&failsafe.command, &[], None) {
                    warn!("Unable to launch failsafe client {}: {}", label, e);
                }
            }

            self.signal_startup_done();
            return;
        }

        // Stable sort keeps the file order within one priority
        let mut entries: Vec<Properties> = self.pending_properties.drain(..).collect();
        entries.sort_by_key(|p| p.priority);
        self.pending_properties.extend(entries);

        let steps = self.pending_properties.len();
        let session_name = self.session_name.clone();
        self.hooks.splash.start(&session_name, steps);

        self.session_continue();
    }

    /// Called whenever the starting queue may have drained; starts the
    /// next priority batch or finishes startup.
    pub(crate) fn session_continue(&mut self) {
        while self.state == ManagerState::Startup && self.starting_properties.is_empty() {
            if self.pending_properties.is_empty() {
                self.signal_startup_done();
                return;
            }
            self.start_next_batch();
        }
    }

    fn start_next_batch(&mut self) {
        let Some(priority) = self.pending_properties.front().map(|p| p.priority) else {
            return;
        };
        debug!("Starting clients with priority {}", priority);

        while let Some(properties) = self.pending_properties.pop_front() {
            if properties.priority != priority {
                self.pending_properties.push_front(properties);
                break;
            }
            self.launch_entry(properties);
        }
    }

    fn launch_entry(&mut self, mut properties: Properties) {
        let Some(command) = properties.restart_command.clone() else {
            warn!(
                "Client {} has no restart command, dropping it",
                properties.client_id
            );
            return;
        };

        let label = properties
            .program
            .clone()
            .or_else(|| command.first().cloned())
            .unwrap_or_default();
        self.hooks.splash.next(&label);

        match spawn_detached(
            &command,
            &properties.environment,
            properties.current_directory.as_deref(),
        ) {
            Ok(()) => {
                info!("Launched {} ({})", label, properties.client_id);

                let client_id = properties.client_id.clone();
                let tx = self.self_tx.clone();
                let ms = self.config.timeouts.startup_timeout_ms;
                properties.startup_timeout = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = tx.send(ManagerMsg::StartupTimeout { client_id });
                }));

                self.starting_properties.push_back(properties);
            }
            Err(e) => {
                warn!("Unable to launch {}: {}", label, e);
                if let Some(discard) = &properties.discard_command {
                    run_command_sync(
                        discard,
                        &properties.environment,
                        properties.current_directory.as_deref(),
                    );
                }
            }
        }
    }

    /// A launched entry never registered: run its discard command,
    /// drop it, and keep the startup moving.
    pub(crate) fn handle_failed_client(&mut self, client_id: &str) {
        let Some(pos) = self
            .starting_properties
            .iter()
            .position(|p| p.client_id == client_id)
        else {
            return;
        };
        let Some(mut properties) = self.starting_properties.remove(pos) else {
            return;
        };

        properties.cancel_startup_timeout();
        warn!("Client {} failed to start", properties.client_id);

        if let Some(discard) = &properties.discard_command {
            info!(
                "Running discard command for failed client {}",
                properties.client_id
            );
            run_command_sync(
                discard,
                &properties.environment,
                properties.current_directory.as_deref(),
            );
        }
        drop(properties);

        if self.starting_properties.is_empty() {
            self.session_continue();
        }
    }

    fn signal_startup_done(&mut self) {
        info!("Startup finished, entering idle state");
        self.set_state(ManagerState::Idle);
        self.hooks.splash.finish();

        if !self.failsafe_mode {
            // Workspaces need the window manager, which is up by now
            let session_name = self.session_name.clone();
            for (screen, workspace) in self.store.load_workspaces(&session_name) {
                self.hooks.workspaces.restore(screen, workspace);
            }

            self.hooks.legacy.startup();
        }
    }
}

/// Spawn an argv and let it run on its own; the child is reaped in the
/// background when it exits.
pub(crate) fn spawn_detached(
    command: &[String],
    environment: &[String],
    current_directory: Option<&str>,
) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| SessiondError::spawn("empty command"))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for pair in environment {
        if let Some((name, value)) = pair.split_once('=') {
            cmd.env(name, value);
        }
    }
    if let Some(dir) = current_directory {
        cmd.current_dir(dir);
    }

    cmd.spawn()
        .map(drop)
        .map_err(|e| SessiondError::spawn(format!("{}: {}", program, e)))
}

/// Run a short maintenance command (discard/shutdown) and wait for it.
/// Blocking the loop here is tolerated; nothing is in flight when
/// these run.
pub(crate) fn run_command_sync(
    command: &[String],
    environment: &[String],
    current_directory: Option<&str>,
) {
    let Some((program, args)) = command.split_first() else {
        return;
    };

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for pair in environment {
        if let Some((name, value)) = pair.split_once('=') {
            cmd.env(name, value);
        }
    }
    if let Some(dir) = current_directory {
        cmd.current_dir(dir);
    }

    match cmd.status() {
        Ok(status) if !status.success() => {
            warn!("Command {} exited with {}", program, status);
        }
        Err(e) => warn!("Unable to run {}: {}", program, e),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::hooks::Collaborators;
    use crate::session_store::{FailsafeClient, SessionStore};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn manager() -> (Manager, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = Manager::new(AppConfig::default(), store, Collaborators::default(), tx);
        (manager, dir)
    }

    fn entry(id: &str, priority: u8) -> Properties {
        let mut p = Properties::new(id, "localhost");
        p.restart_command = Some(vec!["sh".into(), "-c".into(), "exit 0".into()]);
        p.priority = priority;
        p
    }

    #[tokio::test]
    async fn test_batches_follow_priority_order() {
        let (mut manager, _dir) = manager();
        manager.failsafe_mode = false;
        manager.pending_properties.push_back(entry("1app", 50));
        manager.pending_properties.push_back(entry("1wm", 15));
        manager.pending_properties.push_back(entry("1panel", 15));

        manager.startup_begin();

        // The two priority-15 entries launched together
        assert_eq!(manager.starting_properties.len(), 2);
        assert!(manager
            .starting_properties
            .iter()
            .all(|p| p.priority == 15));
        assert_eq!(manager.pending_properties.len(), 1);
        assert_eq!(manager.state(), ManagerState::Startup);

        // Both register (simulated): the next batch goes out
        manager.starting_properties.clear();
        manager.session_continue();
        assert_eq!(manager.starting_properties.len(), 1);
        assert_eq!(manager.starting_properties[0].client_id, "1app");
        assert!(manager.pending_properties.is_empty());

        // Last one registers too: startup is done
        manager.starting_properties.clear();
        manager.session_continue();
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_launch_failure_drops_entry_and_continues() {
        let (mut manager, _dir) = manager();
        manager.failsafe_mode = false;
        let mut bad = entry("1bad", 10);
        bad.restart_command = Some(vec!["/nonexistent/binary".into()]);
        manager.pending_properties.push_back(bad);

        manager.startup_begin();

        assert!(manager.starting_properties.is_empty());
        assert!(manager.pending_properties.is_empty());
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_startup_timeout_discards_entry() {
        let (mut manager, _dir) = manager();
        manager.failsafe_mode = false;
        manager.starting_properties.push_back(entry("1slow", 50));

        manager.handle_failed_client("1slow");

        assert!(manager.starting_properties.is_empty());
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_startup_timeout_for_registered_client_is_ignored() {
        let (mut manager, _dir) = manager();
        manager.failsafe_mode = false;
        manager.starting_properties.push_back(entry("1other", 50));

        manager.handle_failed_client("1gone");

        assert_eq!(manager.starting_properties.len(), 1);
        assert_eq!(manager.state(), ManagerState::Startup);
    }

    #[tokio::test]
    async fn test_failsafe_startup_launches_everything_and_idles() {
        let (mut manager, _dir) = manager();
        manager.failsafe_mode = true;
        manager.failsafe_clients.push_back(FailsafeClient {
            command: vec!["sh".into(), "-c".into(), "exit 0".into()],
            screen: 0,
        });

        manager.startup_begin();

        assert!(manager.failsafe_clients.is_empty());
        assert!(manager.starting_properties.is_empty());
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_foreign_startup_receives_compat_flags() {
        use crate::config::CompatConfig;
        use crate::hooks::LegacyTracker;
        use crate::keyfile::KeyFile;
        use std::sync::{Arc, Mutex};

        struct RecordingLegacy {
            seen: Arc<Mutex<Option<(bool, bool)>>>,
        }

        impl LegacyTracker for RecordingLegacy {
            fn load(&mut self, _file: &KeyFile) {}
            fn foreign_startup(&mut self, compat: &CompatConfig) {
                *self.seen.lock().unwrap() = Some((compat.launch_gnome, compat.launch_kde));
            }
            fn startup(&mut self) {}
            fn perform_session_save(&mut self) {}
            fn store(&mut self, _file: &mut KeyFile) {}
        }

        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut config = AppConfig::default();
        config.compat.launch_kde = true;

        let seen = Arc::new(Mutex::new(None));
        let mut hooks = Collaborators::default();
        hooks.legacy = Box::new(RecordingLegacy { seen: seen.clone() });

        let mut manager = Manager::new(config, store, hooks, tx);
        manager.failsafe_mode = false;

        manager.startup_begin();

        assert_eq!(*seen.lock().unwrap(), Some((false, true)));
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[test]
    fn test_run_command_sync_tolerates_failure() {
        run_command_sync(
            &["sh".into(), "-c".into(), "exit 1".into()],
            &["SESSIOND_TEST=1".into()],
            None,
        );
        run_command_sync(&["/nonexistent/binary".into()], &[], None);
        run_command_sync(&[], &[], None);
    }

    #[test]
    fn test_spawn_detached_empty_command_errors() {
        assert!(spawn_detached(&[], &[], None).is_err());
    }
}
