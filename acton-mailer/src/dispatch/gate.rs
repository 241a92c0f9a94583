//! Signing identity gate

use parking_lot::RwLock;

use crate::message::SigningIdentity;

/// Tracks whether a signing identity has been established
///
/// Read on every `send` from caller tasks; written only after the message
/// builder accepted new identity material.
#[derive(Debug, Default)]
pub struct SigningGate {
    identity: RwLock<Option<SigningIdentity>>,
}

impl SigningGate {
    /// Create an unset gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate with `identity`, replacing any previous one
    pub fn set(&self, identity: SigningIdentity) {
        *self.identity.write() = Some(identity);
    }

    /// Whether an identity has been established
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.identity.read().is_some()
    }

    /// The current identity
    #[must_use]
    pub fn identity(&self) -> Option<SigningIdentity> {
        self.identity.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_unset() {
        let gate = SigningGate::new();
        assert!(!gate.is_set());
        assert!(gate.identity().is_none());
    }

    #[test]
    fn test_set_replaces_identity() {
        let gate = SigningGate::new();
        gate.set(SigningIdentity::new("AAAA"));
        gate.set(SigningIdentity::new("BBBB"));

        assert!(gate.is_set());
        assert_eq!(gate.identity(), Some(SigningIdentity::new("BBBB")));
    }
}
