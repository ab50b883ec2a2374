//! Collaborator interfaces
//!
//! The manager talks to the rest of the desktop through these traits:
//! the splash screen, the session chooser, the legacy (non-protocol)
//! application tracker, the shutdown confirmation dialog and the
//! workspace tracker. Null implementations keep the daemon functional
//! headless; real desktops plug their own in at construction time.

use sessiond_protocol::ShutdownKind;

use crate::config::CompatConfig;
use crate::keyfile::KeyFile;

/// Splash screen shown while the session starts
pub trait Splash: Send {
    /// The session is about to start `steps` launches
    fn start(&mut self, session_name: &str, steps: usize);
    /// One launch has been issued
    fn next(&mut self, program: &str);
    /// Startup finished; tear the splash down
    fn finish(&mut self) {}
}

/// No-op splash
#[derive(Debug, Default)]
pub struct NullSplash;

impl Splash for NullSplash {
    fn start(&mut self, _session_name: &str, _steps: usize) {}
    fn next(&mut self, _program: &str) {}
}

/// One selectable session, as shown by the chooser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    /// Unix timestamp of the last checkpoint
    pub last_access: i64,
}

/// Outcome of the session chooser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChooserAction {
    /// Load the named session
    Load(String),
    /// Start a fresh session under the given name
    UseNew(String),
    /// Do not start a session at all
    Logout,
}

/// Session chooser shown when several sessions exist
pub trait SessionChooser: Send {
    fn choose(&mut self, sessions: &[SessionEntry], current: &str) -> ChooserAction;
}

/// Chooser that always loads the current session
#[derive(Debug, Default)]
pub struct NullChooser;

impl SessionChooser for NullChooser {
    fn choose(&mut self, _sessions: &[SessionEntry], current: &str) -> ChooserAction {
        ChooserAction::Load(current.to_string())
    }
}

/// Tracker for legacy applications that do not speak the session
/// management protocol
pub trait LegacyTracker: Send {
    /// Read tracked applications from the session file
    fn load(&mut self, file: &KeyFile);
    /// Bring up foreign desktop services (GNOME/KDE compatibility)
    /// before the session's own clients launch
    fn foreign_startup(&mut self, compat: &CompatConfig);
    /// Launch tracked applications once startup completed
    fn startup(&mut self);
    /// Persist tracked application state; runs before protocol clients
    /// are polled in a global save
    fn perform_session_save(&mut self);
    /// Contribute tracked records to the session file being written
    fn store(&mut self, file: &mut KeyFile);
}

/// No-op legacy tracker
#[derive(Debug, Default)]
pub struct NullLegacy;

impl LegacyTracker for NullLegacy {
    fn load(&mut self, _file: &KeyFile) {}
    fn foreign_startup(&mut self, _compat: &CompatConfig) {}
    fn startup(&mut self) {}
    fn perform_session_save(&mut self) {}
    fn store(&mut self, _file: &mut KeyFile) {}
}

/// Blocking shutdown confirmation dialog
pub trait ShutdownDialog: Send {
    /// Ask the user what to do; None means cancelled
    fn ask(&mut self, session_name: &str) -> Option<(ShutdownKind, bool)>;
}

/// Dialog stand-in that always answers "log out, with save"
#[derive(Debug, Default)]
pub struct AutoLogoutDialog;

impl ShutdownDialog for AutoLogoutDialog {
    fn ask(&mut self, _session_name: &str) -> Option<(ShutdownKind, bool)> {
        Some((ShutdownKind::Logout, true))
    }
}

/// Per-screen workspace tracking
pub trait WorkspaceTracker: Send {
    /// Active workspace number per screen, indexed by screen
    fn active_workspaces(&self) -> Vec<i32>;
    /// Re-activate a workspace on a screen
    fn restore(&mut self, screen: usize, workspace: i32);
    /// Number of screens on the display
    fn screen_count(&self) -> usize;
}

/// Workspace tracker for a headless or single-screen setup
#[derive(Debug, Default)]
pub struct NullWorkspaces;

impl WorkspaceTracker for NullWorkspaces {
    fn active_workspaces(&self) -> Vec<i32> {
        Vec::new()
    }
    fn restore(&mut self, _screen: usize, _workspace: i32) {}
    fn screen_count(&self) -> usize {
        1
    }
}

/// The full collaborator set handed to the manager
pub struct Collaborators {
    pub splash: Box<dyn Splash>,
    pub chooser: Box<dyn SessionChooser>,
    pub legacy: Box<dyn LegacyTracker>,
    pub dialog: Box<dyn ShutdownDialog>,
    pub workspaces: Box<dyn WorkspaceTracker>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            splash: Box::new(NullSplash),
            chooser: Box::new(NullChooser),
            legacy: Box::new(NullLegacy),
            dialog: Box::new(AutoLogoutDialog),
            workspaces: Box::new(NullWorkspaces),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_chooser_loads_current() {
        let mut chooser = NullChooser;
        let sessions = vec![SessionEntry {
            name: "Default".into(),
            last_access: 0,
        }];
        assert_eq!(
            chooser.choose(&sessions, "Default"),
            ChooserAction::Load("Default".into())
        );
    }

    #[test]
    fn test_auto_dialog_answers_logout() {
        let mut dialog = AutoLogoutDialog;
        assert_eq!(dialog.ask("Default"), Some((ShutdownKind::Logout, true)));
    }
}
