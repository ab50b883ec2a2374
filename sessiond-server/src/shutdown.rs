//! Shutdown driver
//!
//! Resolves the user-facing shutdown choice into an invocation of the
//! external power backend. Backends are probed in order; logout needs
//! no backend at all.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use sessiond_protocol::ShutdownKind;
use sessiond_utils::{Result, SessiondError};

/// One way of asking the system for a power action
pub trait PowerBackend: Send {
    fn name(&self) -> &'static str;
    fn supports(&self, kind: ShutdownKind) -> bool;
    fn send(&self, kind: ShutdownKind) -> Result<()>;
}

/// systemd-logind backend, driven through systemctl
pub struct SystemdBackend {
    systemctl: Option<PathBuf>,
}

impl SystemdBackend {
    pub fn new() -> Self {
        Self {
            systemctl: find_in_path("systemctl"),
        }
    }
}

impl Default for SystemdBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerBackend for SystemdBackend {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn supports(&self, kind: ShutdownKind) -> bool {
        self.systemctl.is_some()
            && matches!(
                kind,
                ShutdownKind::Halt
                    | ShutdownKind::Reboot
                    | ShutdownKind::Suspend
                    | ShutdownKind::Hibernate
            )
    }

    fn send(&self, kind: ShutdownKind) -> Result<()> {
        let systemctl = self
            .systemctl
            .as_ref()
            .ok_or_else(|| SessiondError::unsupported("systemctl not found"))?;

        let verb = match kind {
            ShutdownKind::Halt => "poweroff",
            ShutdownKind::Reboot => "reboot",
            ShutdownKind::Suspend => "suspend",
            ShutdownKind::Hibernate => "hibernate",
            _ => return Err(SessiondError::unsupported("no power action required")),
        };

        run_quiet(Command::new(systemctl).arg(verb), self.name())
    }
}

/// Privileged helper backend through sudo
pub struct SudoBackend {
    sudo: Option<PathBuf>,
}

impl SudoBackend {
    pub fn new() -> Self {
        Self {
            sudo: find_in_path("sudo"),
        }
    }
}

impl Default for SudoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerBackend for SudoBackend {
    fn name(&self) -> &'static str {
        "sudo"
    }

    fn supports(&self, kind: ShutdownKind) -> bool {
        self.sudo.is_some() && matches!(kind, ShutdownKind::Halt | ShutdownKind::Reboot)
    }

    fn send(&self, kind: ShutdownKind) -> Result<()> {
        let sudo = self
            .sudo
            .as_ref()
            .ok_or_else(|| SessiondError::unsupported("sudo not found"))?;

        let args: &[&str] = match kind {
            ShutdownKind::Halt => &["-n", "shutdown", "-h", "now"],
            ShutdownKind::Reboot => &["-n", "shutdown", "-r", "now"],
            _ => return Err(SessiondError::unsupported("no power action required")),
        };

        run_quiet(Command::new(sudo).args(args), self.name())
    }
}

/// The driver: first backend that claims support wins
pub struct ShutdownDriver {
    backends: Vec<Box<dyn PowerBackend>>,
}

impl ShutdownDriver {
    /// Build the default chain: systemd first, sudo helper fallback
    pub fn new() -> Self {
        Self::with_backends(vec![
            Box::new(SystemdBackend::new()),
            Box::new(SudoBackend::new()),
        ])
    }

    pub fn with_backends(backends: Vec<Box<dyn PowerBackend>>) -> Self {
        Self { backends }
    }

    /// Whether any backend can perform the action
    pub fn supports(&self, kind: ShutdownKind) -> bool {
        match kind {
            ShutdownKind::Ask | ShutdownKind::Logout => true,
            kind => self.backends.iter().any(|b| b.supports(kind)),
        }
    }

    /// Perform the power action; logout is a no-op here
    pub fn execute(&self, kind: ShutdownKind) -> Result<()> {
        match kind {
            ShutdownKind::Ask | ShutdownKind::Logout => Ok(()),
            kind => {
                for backend in &self.backends {
                    if backend.supports(kind) {
                        info!("Performing {:?} via {}", kind, backend.name());
                        return backend.send(kind);
                    }
                }
                Err(SessiondError::unsupported(format!(
                    "no backend supports {:?}",
                    kind
                )))
            }
        }
    }
}

impl Default for ShutdownDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn run_quiet(command: &mut Command, backend: &str) -> Result<()> {
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| SessiondError::spawn(format!("{}: {}", backend, e)))?;

    if status.success() {
        Ok(())
    } else {
        warn!("{} backend exited with {}", backend, status);
        Err(SessiondError::unsupported(format!(
            "{} backend refused the request",
            backend
        )))
    }
}

/// Search PATH for an executable, like the shell would
fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FakeBackend {
        name: &'static str,
        supported: Vec<ShutdownKind>,
        calls: Arc<Mutex<Vec<(&'static str, ShutdownKind)>>>,
    }

    impl PowerBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, kind: ShutdownKind) -> bool {
            self.supported.contains(&kind)
        }

        fn send(&self, kind: ShutdownKind) -> Result<()> {
            self.calls.lock().unwrap().push((self.name, kind));
            Ok(())
        }
    }

    fn driver_with(
        backends: Vec<(&'static str, Vec<ShutdownKind>)>,
    ) -> (ShutdownDriver, Arc<Mutex<Vec<(&'static str, ShutdownKind)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let boxed = backends
            .into_iter()
            .map(|(name, supported)| {
                Box::new(FakeBackend {
                    name,
                    supported,
                    calls: calls.clone(),
                }) as Box<dyn PowerBackend>
            })
            .collect();
        (ShutdownDriver::with_backends(boxed), calls)
    }

    #[test]
    fn test_logout_needs_no_backend() {
        let (driver, calls) = driver_with(vec![]);
        assert!(driver.supports(ShutdownKind::Logout));
        driver.execute(ShutdownKind::Logout).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_supporting_backend_wins() {
        let (driver, calls) = driver_with(vec![
            ("first", vec![ShutdownKind::Reboot]),
            ("second", vec![ShutdownKind::Reboot, ShutdownKind::Halt]),
        ]);

        driver.execute(ShutdownKind::Reboot).unwrap();
        driver.execute(ShutdownKind::Halt).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![("first", ShutdownKind::Reboot), ("second", ShutdownKind::Halt)]
        );
    }

    #[test]
    fn test_unsupported_kind_errors() {
        let (driver, _calls) = driver_with(vec![("first", vec![ShutdownKind::Halt])]);
        assert!(!driver.supports(ShutdownKind::Suspend));
        let result = driver.execute(ShutdownKind::Suspend);
        assert!(matches!(result, Err(SessiondError::Unsupported(_))));
    }
}
