//! Configuration schema structs

use serde::{Deserialize, Serialize};

use crate::keyfile::KeyFile;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub timeouts: TimeoutConfig,
    pub compat: CompatConfig,
    pub shutdown: ShutdownConfig,
}

/// General session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name of the session to load and store
    pub session_name: String,
    /// Show the chooser whenever more than one session exists
    pub chooser_always_display: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            session_name: "Default".into(),
            chooser_always_display: false,
        }
    }
}

/// Protocol timeouts, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a client may spend answering a SaveYourself
    pub save_timeout_ms: u64,
    /// How long to wait for clients to disconnect after Die
    pub die_timeout_ms: u64,
    /// How long a launched client may take to register
    pub startup_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            save_timeout_ms: 120_000,
            die_timeout_ms: 750,
            startup_timeout_ms: 30_000,
        }
    }
}

/// Foreign desktop compatibility startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatConfig {
    pub launch_gnome: bool,
    pub launch_kde: bool,
}

/// Shutdown/exit behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Run a client's discard command when it exits while the session
    /// is idle
    pub run_discard_on_exit: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            run_discard_on_exit: true,
        }
    }
}

impl AppConfig {
    /// Overlay settings from the keyfile found along XDG_CONFIG_DIRS
    ///
    /// The keyfile uses the legacy group layout: `General/SessionName`,
    /// `Chooser/AlwaysDisplay`, `Compatibility/LaunchGnome|LaunchKDE`.
    pub fn merge_settings(&mut self, settings: &KeyFile) {
        if let Some(name) = settings.get("General", "SessionName") {
            if !name.is_empty() {
                self.general.session_name = name.to_string();
            }
        }
        if let Some(display) = settings.get_bool("Chooser", "AlwaysDisplay") {
            self.general.chooser_always_display = display;
        }
        if let Some(gnome) = settings.get_bool("Compatibility", "LaunchGnome") {
            self.compat.launch_gnome = gnome;
        }
        if let Some(kde) = settings.get_bool("Compatibility", "LaunchKDE") {
            self.compat.launch_kde = kde;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.general.session_name, "Default");
        assert!(!config.general.chooser_always_display);
        assert_eq!(config.timeouts.save_timeout_ms, 120_000);
        assert_eq!(config.timeouts.die_timeout_ms, 750);
        assert!(config.shutdown.run_discard_on_exit);
    }

    #[test]
    fn test_merge_settings() {
        let mut config = AppConfig::default();
        let settings = KeyFile::parse(
            "[General]\nSessionName=Work\n[Chooser]\nAlwaysDisplay=true\n[Compatibility]\nLaunchKDE=true\n",
        );

        config.merge_settings(&settings);
        assert_eq!(config.general.session_name, "Work");
        assert!(config.general.chooser_always_display);
        assert!(config.compat.launch_kde);
        assert!(!config.compat.launch_gnome);
    }

    #[test]
    fn test_merge_ignores_empty_session_name() {
        let mut config = AppConfig::default();
        let settings = KeyFile::parse("[General]\nSessionName=\n");
        config.merge_settings(&settings);
        assert_eq!(config.general.session_name, "Default");
    }
}
