//! Backend link state.
//!
//! The transport drives every transition; the coordinator only reads the
//! current value to decide whether a remote operation may be attempted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Lost,
}

impl ConnectionState {
    /// Whether `self -> next` is one of the permitted edges.
    ///
    /// `Connecting -> Lost` covers a failed connection attempt.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Connected) | (Connecting, Lost) | (Connected, Lost) | (Lost, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Guarded holder for the process-wide connection state.
#[derive(Clone, Debug, Default)]
pub struct ConnectionMonitor {
    state: ConnectionState,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Fail fast with `Disconnected` unless the link is usable.
    pub fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::Disconnected)
        }
    }

    /// Apply a transition reported by the transport.
    ///
    /// Returns `Ok(false)` when the state is unchanged (duplicate report).
    pub fn transition(&mut self, next: ConnectionState) -> Result<bool> {
        if next == self.state {
            return Ok(false);
        }
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::info!("Connection state {} -> {}", self.state, next);
        self.state = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_connecting_and_gates_operations() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(monitor.state(), ConnectionState::Connecting);
        assert!(matches!(
            monitor.require_connected(),
            Err(AppError::Disconnected)
        ));
    }

    #[test]
    fn follows_reconnect_cycle() {
        let mut monitor = ConnectionMonitor::new();
        assert!(monitor.transition(ConnectionState::Connected).unwrap());
        assert!(monitor.require_connected().is_ok());
        assert!(monitor.transition(ConnectionState::Lost).unwrap());
        assert!(monitor.transition(ConnectionState::Connecting).unwrap());
        assert!(monitor.transition(ConnectionState::Connected).unwrap());
    }

    #[test]
    fn rejects_skipped_transitions() {
        let mut monitor = ConnectionMonitor::new();
        monitor.transition(ConnectionState::Connected).unwrap();
        monitor.transition(ConnectionState::Lost).unwrap();
        let err = monitor.transition(ConnectionState::Connected).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(monitor.state(), ConnectionState::Lost);
    }

    #[test]
    fn duplicate_report_is_a_no_op() {
        let mut monitor = ConnectionMonitor::new();
        assert!(!monitor.transition(ConnectionState::Connecting).unwrap());
    }
}
