//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token the control plane assigns to a negotiated exec session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new(42);
        assert_eq!(format!("{}", id), "exec-42");
    }

    #[test]
    fn test_session_id_equality() {
        assert_eq!(SessionId::new(1), SessionId::from(1));
        assert_ne!(SessionId::new(1), SessionId::new(2));
    }
}
