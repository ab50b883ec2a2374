//! Shared data types for the session management protocol

use serde::{Deserialize, Serialize};

/// Scope of a SaveYourself request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SaveType {
    /// Save state visible to other clients (e.g. files on disk)
    Global,
    /// Save internal state needed to restart at the same point
    Local,
    /// Both of the above
    Both,
}

impl SaveType {
    /// Protocol code as carried in session files
    pub fn code(self) -> u8 {
        match self {
            SaveType::Global => 0,
            SaveType::Local => 1,
            SaveType::Both => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SaveType::Global),
            1 => Some(SaveType::Local),
            2 => Some(SaveType::Both),
            _ => None,
        }
    }
}

/// How a client may interact with the user during a save
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InteractStyle {
    /// No interaction allowed
    None,
    /// May interact to report errors only
    Errors,
    /// May interact for any purpose
    Any,
}

/// Dialog kind declared in an Interact request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DialogType {
    Error,
    Normal,
}

/// Per-client directive on whether to relaunch after exit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RestartStyle {
    /// Restart on next login only if still running at save time
    #[default]
    IfRunning,
    /// Restart on next login even if it exited meanwhile
    Anyway,
    /// Relaunch whenever it exits within the session
    Immediately,
    /// Never restart
    Never,
}

impl RestartStyle {
    /// Numeric hint value as carried in session files
    pub fn code(self) -> u8 {
        match self {
            RestartStyle::IfRunning => 0,
            RestartStyle::Anyway => 1,
            RestartStyle::Immediately => 2,
            RestartStyle::Never => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RestartStyle::IfRunning),
            1 => Some(RestartStyle::Anyway),
            2 => Some(RestartStyle::Immediately),
            3 => Some(RestartStyle::Never),
            _ => None,
        }
    }
}

/// The power action resolved at the end of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ShutdownKind {
    /// Prompt the user for the action
    Ask,
    /// End the session, no power action
    #[default]
    Logout,
    /// Power the machine off
    Halt,
    /// Reboot the machine
    Reboot,
    /// Suspend to RAM
    Suspend,
    /// Suspend to disk
    Hibernate,
}

impl ShutdownKind {
    pub fn code(self) -> u32 {
        match self {
            ShutdownKind::Ask => 0,
            ShutdownKind::Logout => 1,
            ShutdownKind::Halt => 2,
            ShutdownKind::Reboot => 3,
            ShutdownKind::Suspend => 4,
            ShutdownKind::Hibernate => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ShutdownKind::Ask),
            1 => Some(ShutdownKind::Logout),
            2 => Some(ShutdownKind::Halt),
            3 => Some(ShutdownKind::Reboot),
            4 => Some(ShutdownKind::Suspend),
            5 => Some(ShutdownKind::Hibernate),
            _ => None,
        }
    }
}

/// Well-known session-management property names
pub mod prop {
    pub const CLONE_COMMAND: &str = "CloneCommand";
    pub const CURRENT_DIRECTORY: &str = "CurrentDirectory";
    pub const DISCARD_COMMAND: &str = "DiscardCommand";
    pub const ENVIRONMENT: &str = "Environment";
    pub const PROCESS_ID: &str = "ProcessID";
    pub const PROGRAM: &str = "Program";
    pub const RESTART_COMMAND: &str = "RestartCommand";
    pub const RESTART_STYLE_HINT: &str = "RestartStyleHint";
    pub const SHUTDOWN_COMMAND: &str = "ShutdownCommand";
    pub const USER_ID: &str = "UserID";
    /// Launch-order priority extension (lower starts earlier)
    pub const PRIORITY: &str = "_GSM_Priority";
}

/// A typed property value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    TextList(Vec<String>),
    Card8(u8),
}

/// A named session-management property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmProperty {
    pub name: String,
    pub value: PropertyValue,
}

impl SmProperty {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Text(value.into()),
        }
    }

    pub fn list(name: impl Into<String>, value: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::TextList(value),
        }
    }

    pub fn card8(name: impl Into<String>, value: u8) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Card8(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_style_codes_roundtrip() {
        for style in [
            RestartStyle::IfRunning,
            RestartStyle::Anyway,
            RestartStyle::Immediately,
            RestartStyle::Never,
        ] {
            assert_eq!(RestartStyle::from_code(style.code()), Some(style));
        }
        assert_eq!(RestartStyle::from_code(42), None);
    }

    #[test]
    fn test_shutdown_kind_codes_roundtrip() {
        for kind in [
            ShutdownKind::Ask,
            ShutdownKind::Logout,
            ShutdownKind::Halt,
            ShutdownKind::Reboot,
            ShutdownKind::Suspend,
            ShutdownKind::Hibernate,
        ] {
            assert_eq!(ShutdownKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ShutdownKind::from_code(6), None);
    }

    #[test]
    fn test_property_constructors() {
        let p = SmProperty::list(prop::RESTART_COMMAND, vec!["app".into(), "-f".into()]);
        assert_eq!(p.name, "RestartCommand");
        assert!(matches!(p.value, PropertyValue::TextList(ref v) if v.len() == 2));
    }
}
