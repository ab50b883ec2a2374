//! Session file reading and writing
//!
//! One keyfile per display holds every named session as a
//! `Session: <name>` group: a `Count`, numbered `ClientN_*` records,
//! per-screen active-workspace hints and a last-access timestamp. The
//! failsafe session lives in the system settings keyfile instead.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use sessiond_utils::Result;

use crate::hooks::{LegacyTracker, SessionEntry};
use crate::keyfile::KeyFile;
use crate::properties::Properties;

/// Prefix of all session group names
const SESSION_GROUP_PREFIX: &str = "Session: ";

/// An argv launched when no prior session exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailsafeClient {
    pub command: Vec<String>,
    /// Target screen index
    pub screen: usize,
}

/// Accessor for the persisted per-display session file
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open the raw keyfile (for collaborators that read extra groups)
    pub fn open(&self) -> Result<KeyFile> {
        KeyFile::load(&self.path)
    }

    /// All named sessions in the file with their last-access stamps
    pub fn sessions(&self) -> Result<Vec<SessionEntry>> {
        let file = self.open()?;
        let entries = file
            .group_names()
            .iter()
            .filter_map(|g| g.strip_prefix(SESSION_GROUP_PREFIX))
            .map(|name| SessionEntry {
                name: name.to_string(),
                last_access: file
                    .get_int(&format!("{}{}", SESSION_GROUP_PREFIX, name), "LastAccess")
                    .unwrap_or(0),
            })
            .collect();
        Ok(entries)
    }

    /// Load the client records of a named session
    ///
    /// Records that cannot identify or relaunch their client are
    /// dropped.
    pub fn load_session(&self, name: &str) -> Result<Vec<Properties>> {
        let file = self.open()?;
        let group = format!("{}{}", SESSION_GROUP_PREFIX, name);

        let count = file.get_int(&group, "Count").unwrap_or(0);
        let mut records = Vec::new();

        for n in 0..count {
            let prefix = format!("Client{}_", n);
            match Properties::load(&file, &group, &prefix) {
                Some(properties) if properties.is_valid() => records.push(properties),
                Some(properties) => {
                    debug!(
                        "Dropping invalid session record {} ({})",
                        prefix, properties.client_id
                    );
                }
                None => debug!("Dropping empty session record {}", prefix),
            }
        }

        Ok(records)
    }

    /// Per-screen active-workspace hints of a named session
    pub fn load_workspaces(&self, name: &str) -> Vec<(usize, i32)> {
        let Ok(file) = self.open() else {
            return Vec::new();
        };
        let group = format!("{}{}", SESSION_GROUP_PREFIX, name);

        let mut hints = Vec::new();
        let mut screen = 0usize;
        loop {
            let key = format!("Screen{}_ActiveWorkspace", screen);
            match file.get_int(&group, &key) {
                Some(ws) => hints.push((screen, ws as i32)),
                None => break,
            }
            screen += 1;
        }
        hints
    }

    /// Load the failsafe session from the settings keyfile
    ///
    /// A `PerScreen` entry expands to one client per screen.
    pub fn load_failsafe(settings: &KeyFile, screen_count: usize) -> Vec<FailsafeClient> {
        const GROUP: &str = "Failsafe Session";

        let mut clients = Vec::new();
        if !settings.has_group(GROUP) {
            return clients;
        }

        let count = settings.get_int(GROUP, "Count").unwrap_or(0);
        for i in 0..count {
            let Some(command) = settings.get_list(GROUP, &format!("Client{}_Command", i)) else {
                continue;
            };
            if command.is_empty() {
                continue;
            }

            let per_screen = settings
                .get_bool(GROUP, &format!("Client{}_PerScreen", i))
                .unwrap_or(false);

            if per_screen {
                for screen in 0..screen_count {
                    clients.push(FailsafeClient {
                        command: command.clone(),
                        screen,
                    });
                }
            } else {
                clients.push(FailsafeClient { command, screen: 0 });
            }
        }

        clients
    }

    /// Rewrite a named session group with the given records
    ///
    /// The prior file is kept as a `.bak` hard link. Other groups in
    /// the file are preserved.
    pub fn store(
        &self,
        session_name: &str,
        records: &[&Properties],
        workspaces: &[i32],
        legacy: &mut dyn LegacyTracker,
    ) -> Result<()> {
        let mut file = if self.exists() {
            self.backup();
            self.open().unwrap_or_else(|e| {
                warn!("Discarding unreadable session file: {}", e);
                KeyFile::new()
            })
        } else {
            KeyFile::new()
        };

        let group = format!("{}{}", SESSION_GROUP_PREFIX, session_name);
        file.delete_group(&group);

        let mut count = 0i64;
        for properties in records {
            properties.store(&mut file, &group, &format!("Client{}_", count));
            count += 1;
        }
        file.set_int(&group, "Count", count);

        legacy.store(&mut file);

        for (screen, workspace) in workspaces.iter().enumerate() {
            file.set_int(
                &group,
                &format!("Screen{}_ActiveWorkspace", screen),
                *workspace as i64,
            );
        }

        file.set_int(&group, "LastAccess", unix_now());

        file.save(&self.path)
    }

    /// Hard-link the current file to `<path>.bak`, replacing any prior
    /// backup. Not atomic; a valid prior file stays recoverable.
    fn backup(&self) {
        let mut backup = self.path.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);

        let _ = std::fs::remove_file(&backup);
        if let Err(e) = std::fs::hard_link(&self.path, &backup) {
            warn!("Unable to back up session file: {}", e);
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullLegacy;
    use sessiond_protocol::RestartStyle;
    use tempfile::tempdir;

    fn props(id: &str, command: &str, priority: u8) -> Properties {
        let mut p = Properties::new(id, "localhost");
        p.program = Some(command.to_string());
        p.restart_command = Some(vec![command.to_string()]);
        p.priority = priority;
        p
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));

        let a = props("1aaa", "xedit", 20);
        let mut b = props("1bbb", "xclock", 50);
        b.environment = vec!["LANG=C".into()];
        b.restart_style_hint = RestartStyle::Anyway;

        store
            .store("Default", &[&a, &b], &[2, 0], &mut NullLegacy)
            .unwrap();

        let loaded = store.load_session("Default").unwrap();
        assert_eq!(loaded, vec![a, b]);

        // Second store+load yields the same set (round-trip property)
        let refs: Vec<&Properties> = loaded.iter().collect();
        store
            .store("Default", &refs, &[2, 0], &mut NullLegacy)
            .unwrap();
        let reloaded = store.load_session("Default").unwrap();
        assert_eq!(reloaded, loaded);
    }

    #[test]
    fn test_count_matches_records_written() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));

        let a = props("1aaa", "xedit", 20);
        let b = props("1bbb", "xclock", 50);
        store
            .store("Default", &[&a, &b], &[], &mut NullLegacy)
            .unwrap();

        let file = store.open().unwrap();
        assert_eq!(file.get_int("Session: Default", "Count"), Some(2));
        assert!(file.get("Session: Default", "Client0_ClientId").is_some());
        assert!(file.get("Session: Default", "Client1_ClientId").is_some());
        assert!(file.get("Session: Default", "Client2_ClientId").is_none());
    }

    #[test]
    fn test_invalid_records_are_dropped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(
            &path,
            "[Session: Default]\nCount=2\nClient0_ClientId=1aaa\nClient0_RestartCommand=xedit\nClient1_ClientId=1bbb\n",
        )
        .unwrap();

        let store = SessionStore::new(path);
        let loaded = store.load_session("Default").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].client_id, "1aaa");
    }

    #[test]
    fn test_backup_created_on_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session");
        let store = SessionStore::new(&path);

        let a = props("1aaa", "xedit", 20);
        store.store("Default", &[&a], &[], &mut NullLegacy).unwrap();
        assert!(!dir.path().join("session.bak").exists());

        store.store("Default", &[&a], &[], &mut NullLegacy).unwrap();
        assert!(dir.path().join("session.bak").exists());
    }

    #[test]
    fn test_store_preserves_other_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, "[Session: Other]\nCount=0\n[Custom]\nKey=1\n").unwrap();

        let store = SessionStore::new(&path);
        let a = props("1aaa", "xedit", 20);
        store.store("Default", &[&a], &[], &mut NullLegacy).unwrap();

        let file = store.open().unwrap();
        assert!(file.has_group("Session: Other"));
        assert!(file.has_group("Custom"));
        assert!(file.has_group("Session: Default"));
    }

    #[test]
    fn test_sessions_listing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(
            &path,
            "[Session: Default]\nCount=0\nLastAccess=100\n[Session: Work]\nCount=0\nLastAccess=200\n",
        )
        .unwrap();

        let store = SessionStore::new(path);
        let sessions = store.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "Default");
        assert_eq!(sessions[0].last_access, 100);
        assert_eq!(sessions[1].name, "Work");
    }

    #[test]
    fn test_workspace_hints() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        let a = props("1aaa", "xedit", 20);
        store
            .store("Default", &[&a], &[3, 1], &mut NullLegacy)
            .unwrap();

        assert_eq!(store.load_workspaces("Default"), vec![(0, 3), (1, 1)]);
    }

    #[test]
    fn test_failsafe_per_screen_expansion() {
        let settings = KeyFile::parse(
            "[Failsafe Session]\nCount=2\nClient0_Command=xterm\nClient0_PerScreen=true\nClient1_Command=xclock\n",
        );

        let clients = SessionStore::load_failsafe(&settings, 2);
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0].command, vec!["xterm".to_string()]);
        assert_eq!(clients[0].screen, 0);
        assert_eq!(clients[1].screen, 1);
        assert_eq!(clients[2].command, vec!["xclock".to_string()]);
    }

    #[test]
    fn test_failsafe_missing_group() {
        let settings = KeyFile::parse("[General]\nSessionName=Default\n");
        assert!(SessionStore::load_failsafe(&settings, 1).is_empty());
    }
}
