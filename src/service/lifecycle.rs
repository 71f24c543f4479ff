//! Service lifecycle state machine

use crate::{Error, Result};

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states. Valid transitions:
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///               |                                  ^
///               +------------ (start failed) ------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Starting,
            2 => ServiceState::Running,
            3 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        }
    }

    fn can_become(self, to: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder of the current [`ServiceState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ServiceState::Stopped as u8),
        }
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Move from `from` to `to`. Fails if the edge is not allowed or the
    /// current state is not `from`.
    pub fn transition(&self, from: ServiceState, to: ServiceState) -> Result<()> {
        if !from.can_become(to) {
            return Err(Error::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| Error::InvalidTransition {
                from: ServiceState::from_u8(actual).as_str(),
                to: to.as_str(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ServiceState::Stopped);
        lifecycle.transition(ServiceState::Stopped, ServiceState::Starting).unwrap();
        lifecycle.transition(ServiceState::Starting, ServiceState::Running).unwrap();
        assert!(lifecycle.is_running());
        lifecycle.transition(ServiceState::Running, ServiceState::Stopping).unwrap();
        lifecycle.transition(ServiceState::Stopping, ServiceState::Stopped).unwrap();
        assert_eq!(lifecycle.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_rejects_invalid_edges() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle
            .transition(ServiceState::Stopped, ServiceState::Running)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: "stopped", to: "running" }
        ));
        assert_eq!(lifecycle.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_rejects_stale_source_state() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(ServiceState::Stopped, ServiceState::Starting).unwrap();
        // a second starter loses the race
        let err = lifecycle
            .transition(ServiceState::Stopped, ServiceState::Starting)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: "starting", to: "starting" }
        ));
        lifecycle.transition(ServiceState::Starting, ServiceState::Stopped).unwrap();
    }
}
