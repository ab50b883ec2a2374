//! Manager event notifications
//!
//! In-process observers (and the control surface) watch the manager
//! through a broadcast channel of typed events.

use tokio::sync::broadcast;

use sessiond_protocol::ControlEvent;

use crate::manager::ManagerState;

/// Events emitted by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    StateChanged {
        old: ManagerState,
        new: ManagerState,
    },
    ClientRegistered {
        object_path: String,
    },
    ShutdownCancelled,
}

impl ManagerEvent {
    /// Wire representation for subscribed control connections
    pub fn to_control_event(&self) -> ControlEvent {
        match self {
            ManagerEvent::StateChanged { old, new } => ControlEvent::StateChanged {
                old: old.code(),
                new: new.code(),
            },
            ManagerEvent::ClientRegistered { object_path } => ControlEvent::ClientRegistered {
                object_path: object_path.clone(),
            },
            ManagerEvent::ShutdownCancelled => ControlEvent::ShutdownCancelled,
        }
    }
}

/// Create the manager event channel
pub fn channel() -> (broadcast::Sender<ManagerEvent>, broadcast::Receiver<ManagerEvent>) {
    broadcast::channel(64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_maps_to_codes() {
        let event = ManagerEvent::StateChanged {
            old: ManagerState::Startup,
            new: ManagerState::Idle,
        };
        assert_eq!(
            event.to_control_event(),
            ControlEvent::StateChanged { old: 0, new: 1 }
        );
    }
}
