//! Path utilities for sessiond
//!
//! Handles XDG Base Directory specification compliance for config,
//! state, cache, and runtime directories, plus the per-display
//! session file location.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "sessiond";

/// Get project directories (cached)
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the Unix socket path for session-management connections
///
/// Location: `$XDG_RUNTIME_DIR/sessiond/sessiond.sock` or `/tmp/sessiond-$UID/sessiond.sock`
pub fn socket_path() -> PathBuf {
    runtime_dir().join("sessiond.sock")
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/sessiond` or `/tmp/sessiond-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join(APP_NAME)
    } else {
        // Fallback to /tmp with UID for security
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
    }
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/sessiond` or `~/.config/sessiond`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/sessiond/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/sessiond` or `~/.local/state/sessiond`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the cache directory (holds the persisted sessions)
///
/// Location: `$XDG_CACHE_HOME/sessiond` or `~/.cache/sessiond`
pub fn cache_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.cache_dir().to_path_buf())
        .unwrap_or_else(fallback_cache_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/sessiond/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Get the PID file path
///
/// Location: `$XDG_RUNTIME_DIR/sessiond/sessiond.pid`
pub fn pid_file() -> PathBuf {
    runtime_dir().join("sessiond.pid")
}

/// Get the session file path for a display
///
/// Location: `$XDG_CACHE_HOME/sessiond/sessions/sessiond-<display>`.
/// Windows hosts cannot have a colon in a filename, so the display
/// name has `:` rewritten to `#` there.
pub fn session_file_path(display_name: &str) -> PathBuf {
    let display_name = if cfg!(windows) {
        display_name.replace(':', "#")
    } else {
        display_name.to_owned()
    };

    cache_dir()
        .join("sessions")
        .join(format!("{}-{}", APP_NAME, display_name))
}

/// Locate the settings keyfile (`sessiond/sessiond.rc`)
///
/// Searched in `$XDG_CONFIG_HOME` first, then along `$XDG_CONFIG_DIRS`
/// (defaulting to `/etc/xdg`). Returns the first existing file.
pub fn settings_file() -> Option<PathBuf> {
    let user = config_dir().join("sessiond.rc");
    if user.is_file() {
        return Some(user);
    }

    let dirs = std::env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".into());
    for dir in dirs.split(':').filter(|d| !d.is_empty()) {
        let candidate = PathBuf::from(dir).join(APP_NAME).join("sessiond.rc");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}

/// Get the local host name, as reported by gethostname(2)
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid, writable buffer of the length we pass
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    } else {
        "localhost".into()
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &PathBuf) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Ensure all required directories exist
pub fn ensure_all_dirs() -> std::io::Result<()> {
    ensure_dir(&runtime_dir())?;
    ensure_dir(&config_dir())?;
    ensure_dir(&state_dir())?;
    ensure_dir(&cache_dir().join("sessions"))?;
    ensure_dir(&log_dir())?;
    Ok(())
}

// Fallback implementations when ProjectDirs is unavailable

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}

fn fallback_cache_dir() -> PathBuf {
    home_dir().join(".cache").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path() {
        let path = socket_path();
        assert!(path.to_string_lossy().contains("sessiond.sock"));
    }

    #[test]
    fn test_session_file_path_contains_display() {
        let path = session_file_path(":0.0");
        let s = path.to_string_lossy().into_owned();
        assert!(s.contains("sessions"));
        #[cfg(not(windows))]
        assert!(s.ends_with("sessiond-:0.0"));
        #[cfg(windows)]
        assert!(s.ends_with("sessiond-#0.0"));
    }

    #[test]
    fn test_hostname_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_paths_are_absolute() {
        let paths = [
            socket_path(),
            config_dir(),
            config_file(),
            state_dir(),
            cache_dir(),
            log_dir(),
            pid_file(),
        ];

        for path in paths {
            let path_str = path.to_string_lossy();
            assert!(
                path_str.starts_with('/') || path_str.starts_with('~'),
                "Path should be absolute: {:?}",
                path
            );
        }
    }
}
