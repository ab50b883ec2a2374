//! Per-client session-management properties
//!
//! A [`Properties`] record is the durable identity of one managed
//! client: what to run to bring it back, where, and with which
//! environment. Records are owned by exactly one place at a time (a
//! manager queue or a live client handle); they move, they are never
//! shared.

use tokio::task::JoinHandle;
use tracing::debug;

use sessiond_protocol::types::{prop, PropertyValue, RestartStyle, SmProperty};

use crate::keyfile::KeyFile;

/// Default launch priority; lower launches earlier
pub const DEFAULT_PRIORITY: u8 = 50;

/// Durable per-client record plus restart bookkeeping
#[derive(Debug, Default)]
pub struct Properties {
    pub client_id: String,
    pub hostname: String,
    pub program: Option<String>,
    pub current_directory: Option<String>,
    /// Ordered `NAME=value` pairs
    pub environment: Vec<String>,
    pub restart_command: Option<Vec<String>>,
    pub clone_command: Option<Vec<String>>,
    pub discard_command: Option<Vec<String>>,
    pub shutdown_command: Option<Vec<String>>,
    pub restart_style_hint: RestartStyle,
    pub user_id: Option<String>,
    pub process_id: Option<String>,
    pub priority: u8,
    /// Crash counter for Immediately clients; never persisted
    pub restart_attempts: u32,
    /// Armed while a launch is awaiting registration
    pub startup_timeout: Option<JoinHandle<()>>,
}

impl Properties {
    pub fn new(client_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: hostname.into(),
            priority: DEFAULT_PRIORITY,
            ..Default::default()
        }
    }

    /// A record is persistable when it can identify and relaunch its client
    pub fn is_valid(&self) -> bool {
        !self.client_id.is_empty()
            && self
                .restart_command
                .as_ref()
                .map(|c| !c.is_empty())
                .unwrap_or(false)
    }

    /// Cancel a pending startup timeout, if armed
    pub fn cancel_startup_timeout(&mut self) {
        if let Some(handle) = self.startup_timeout.take() {
            handle.abort();
        }
    }

    /// Merge one named property into the record
    pub fn apply(&mut self, property: SmProperty) {
        let SmProperty { name, value } = property;
        match (name.as_str(), value) {
            (prop::PROGRAM, PropertyValue::Text(v)) => self.program = Some(v),
            (prop::CURRENT_DIRECTORY, PropertyValue::Text(v)) => self.current_directory = Some(v),
            (prop::ENVIRONMENT, PropertyValue::TextList(v)) => self.environment = v,
            (prop::RESTART_COMMAND, PropertyValue::TextList(v)) => self.restart_command = Some(v),
            (prop::CLONE_COMMAND, PropertyValue::TextList(v)) => self.clone_command = Some(v),
            (prop::DISCARD_COMMAND, PropertyValue::TextList(v)) => self.discard_command = Some(v),
            (prop::SHUTDOWN_COMMAND, PropertyValue::TextList(v)) => self.shutdown_command = Some(v),
            (prop::RESTART_STYLE_HINT, PropertyValue::Card8(v)) => {
                self.restart_style_hint = RestartStyle::from_code(v).unwrap_or_default();
            }
            (prop::USER_ID, PropertyValue::Text(v)) => self.user_id = Some(v),
            (prop::PROCESS_ID, PropertyValue::Text(v)) => self.process_id = Some(v),
            (prop::PRIORITY, PropertyValue::Card8(v)) => self.priority = v,
            (name, value) => {
                debug!("Ignoring property {} with unexpected value {:?}", name, value);
            }
        }
    }

    /// Remove a named property; returns whether anything changed
    pub fn remove(&mut self, name: &str) -> bool {
        match name {
            prop::PROGRAM => self.program.take().is_some(),
            prop::CURRENT_DIRECTORY => self.current_directory.take().is_some(),
            prop::ENVIRONMENT => !std::mem::take(&mut self.environment).is_empty(),
            prop::RESTART_COMMAND => self.restart_command.take().is_some(),
            prop::CLONE_COMMAND => self.clone_command.take().is_some(),
            prop::DISCARD_COMMAND => self.discard_command.take().is_some(),
            prop::SHUTDOWN_COMMAND => self.shutdown_command.take().is_some(),
            prop::USER_ID => self.user_id.take().is_some(),
            prop::PROCESS_ID => self.process_id.take().is_some(),
            prop::RESTART_STYLE_HINT => {
                let changed = self.restart_style_hint != RestartStyle::default();
                self.restart_style_hint = RestartStyle::default();
                changed
            }
            prop::PRIORITY => {
                let changed = self.priority != DEFAULT_PRIORITY;
                self.priority = DEFAULT_PRIORITY;
                changed
            }
            _ => false,
        }
    }

    /// Current property set as named values, for GetProperties
    pub fn to_properties(&self) -> Vec<SmProperty> {
        let mut out = Vec::new();
        if let Some(v) = &self.program {
            out.push(SmProperty::text(prop::PROGRAM, v.clone()));
        }
        if let Some(v) = &self.current_directory {
            out.push(SmProperty::text(prop::CURRENT_DIRECTORY, v.clone()));
        }
        if !self.environment.is_empty() {
            out.push(SmProperty::list(prop::ENVIRONMENT, self.environment.clone()));
        }
        if let Some(v) = &self.restart_command {
            out.push(SmProperty::list(prop::RESTART_COMMAND, v.clone()));
        }
        if let Some(v) = &self.clone_command {
            out.push(SmProperty::list(prop::CLONE_COMMAND, v.clone()));
        }
        if let Some(v) = &self.discard_command {
            out.push(SmProperty::list(prop::DISCARD_COMMAND, v.clone()));
        }
        if let Some(v) = &self.shutdown_command {
            out.push(SmProperty::list(prop::SHUTDOWN_COMMAND, v.clone()));
        }
        out.push(SmProperty::card8(
            prop::RESTART_STYLE_HINT,
            self.restart_style_hint.code(),
        ));
        if let Some(v) = &self.user_id {
            out.push(SmProperty::text(prop::USER_ID, v.clone()));
        }
        if let Some(v) = &self.process_id {
            out.push(SmProperty::text(prop::PROCESS_ID, v.clone()));
        }
        out.push(SmProperty::card8(prop::PRIORITY, self.priority));
        out
    }

    /// Read a `Client<N>_` record from a session group
    ///
    /// Returns None when the record has no client id at all.
    pub fn load(file: &KeyFile, group: &str, prefix: &str) -> Option<Self> {
        let key = |name: &str| format!("{}{}", prefix, name);

        let client_id = file.get(group, &key("ClientId"))?.to_string();
        let mut properties = Properties::new(
            client_id,
            file.get(group, &key("Hostname")).unwrap_or_default(),
        );

        properties.program = file.get(group, &key("Program")).map(String::from);
        properties.current_directory =
            file.get(group, &key("CurrentDirectory")).map(String::from);
        properties.environment = file.get_list(group, &key("Environment")).unwrap_or_default();
        properties.restart_command = file.get_list(group, &key("RestartCommand"));
        properties.clone_command = file.get_list(group, &key("CloneCommand"));
        properties.discard_command = file.get_list(group, &key("DiscardCommand"));
        properties.shutdown_command = file.get_list(group, &key("ShutdownCommand"));
        properties.restart_style_hint = file
            .get_int(group, &key("RestartStyleHint"))
            .and_then(|v| u8::try_from(v).ok())
            .and_then(RestartStyle::from_code)
            .unwrap_or_default();
        properties.user_id = file.get(group, &key("UserId")).map(String::from);
        properties.process_id = file.get(group, &key("ProcessId")).map(String::from);
        properties.priority = file
            .get_int(group, &key("Priority"))
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(DEFAULT_PRIORITY);

        Some(properties)
    }

    /// Write this record into a session group under `Client<N>_` keys
    pub fn store(&self, file: &mut KeyFile, group: &str, prefix: &str) {
        let key = |name: &str| format!("{}{}", prefix, name);

        file.set(group, &key("ClientId"), &self.client_id);
        file.set(group, &key("Hostname"), &self.hostname);
        if let Some(v) = &self.program {
            file.set(group, &key("Program"), v);
        }
        if let Some(v) = &self.current_directory {
            file.set(group, &key("CurrentDirectory"), v);
        }
        if !self.environment.is_empty() {
            file.set_list(group, &key("Environment"), &self.environment);
        }
        if let Some(v) = &self.restart_command {
            file.set_list(group, &key("RestartCommand"), v);
        }
        if let Some(v) = &self.clone_command {
            file.set_list(group, &key("CloneCommand"), v);
        }
        if let Some(v) = &self.discard_command {
            file.set_list(group, &key("DiscardCommand"), v);
        }
        if let Some(v) = &self.shutdown_command {
            file.set_list(group, &key("ShutdownCommand"), v);
        }
        file.set_int(
            group,
            &key("RestartStyleHint"),
            self.restart_style_hint.code() as i64,
        );
        if let Some(v) = &self.user_id {
            file.set(group, &key("UserId"), v);
        }
        if let Some(v) = &self.process_id {
            file.set(group, &key("ProcessId"), v);
        }
        file.set_int(group, &key("Priority"), self.priority as i64);
    }
}

impl PartialEq for Properties {
    /// Field-wise equality over the persisted fields; transient
    /// bookkeeping (restart attempts, startup timeout) is excluded.
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id
            && self.hostname == other.hostname
            && self.program == other.program
            && self.current_directory == other.current_directory
            && self.environment == other.environment
            && self.restart_command == other.restart_command
            && self.clone_command == other.clone_command
            && self.discard_command == other.discard_command
            && self.shutdown_command == other.shutdown_command
            && self.restart_style_hint == other.restart_style_hint
            && self.user_id == other.user_id
            && self.process_id == other.process_id
            && self.priority == other.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Properties {
        let mut p = Properties::new("1abc", "localhost");
        p.program = Some("xedit".into());
        p.restart_command = Some(vec!["xedit".into(), "notes.txt".into()]);
        p.environment = vec!["LANG=C".into(), "TERM=xterm".into()];
        p.restart_style_hint = RestartStyle::Anyway;
        p.priority = 30;
        p
    }

    #[test]
    fn test_is_valid_requires_restart_command() {
        let mut p = Properties::new("1abc", "localhost");
        assert!(!p.is_valid());

        p.restart_command = Some(vec!["xedit".into()]);
        assert!(p.is_valid());

        p.restart_command = Some(vec![]);
        assert!(!p.is_valid());
    }

    #[test]
    fn test_apply_and_remove() {
        let mut p = Properties::new("1abc", "localhost");

        p.apply(SmProperty::text(prop::PROGRAM, "xedit"));
        p.apply(SmProperty::list(prop::RESTART_COMMAND, vec!["xedit".into()]));
        p.apply(SmProperty::card8(
            prop::RESTART_STYLE_HINT,
            RestartStyle::Immediately.code(),
        ));
        p.apply(SmProperty::card8(prop::PRIORITY, 10));

        assert_eq!(p.program.as_deref(), Some("xedit"));
        assert_eq!(p.restart_style_hint, RestartStyle::Immediately);
        assert_eq!(p.priority, 10);

        assert!(p.remove(prop::PROGRAM));
        assert!(!p.remove(prop::PROGRAM));
        assert!(p.remove(prop::PRIORITY));
        assert_eq!(p.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_apply_ignores_mistyped_value() {
        let mut p = Properties::new("1abc", "localhost");
        // RestartCommand must be a list; a text value is dropped
        p.apply(SmProperty::text(prop::RESTART_COMMAND, "xedit"));
        assert!(p.restart_command.is_none());
    }

    #[test]
    fn test_store_load_roundtrip() {
        let p = sample();
        let mut kf = KeyFile::new();
        p.store(&mut kf, "Session: Default", "Client0_");

        let loaded = Properties::load(&kf, "Session: Default", "Client0_").unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_load_missing_client_id() {
        let kf = KeyFile::parse("[Session: Default]\nClient0_Program=xedit\n");
        assert!(Properties::load(&kf, "Session: Default", "Client0_").is_none());
    }

    #[test]
    fn test_to_properties_lists_set_fields() {
        let p = sample();
        let props = p.to_properties();
        assert!(props.iter().any(|sp| sp.name == prop::PROGRAM));
        assert!(props.iter().any(|sp| sp.name == prop::RESTART_COMMAND));
        // Unset optional fields are not reported
        assert!(!props.iter().any(|sp| sp.name == prop::DISCARD_COMMAND));
    }
}
