use crate::error::{Result, SessionError};

const MAX_VERSION_LEN: usize = 32;

/// Progress of the hello exchange on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Our hello is out; the peer's has not arrived.
    #[default]
    AwaitingHello,
    /// Versions matched.
    Complete { remote_version: String },
    /// Versions differ; the session must not proceed.
    Failed(String),
}

impl HandshakeState {
    /// Apply the peer's announced version.
    pub fn receive_hello(&mut self, local: &str, remote: &str) -> Result<()> {
        match validate_version(local, remote) {
            Ok(()) => {
                *self = HandshakeState::Complete {
                    remote_version: remote.to_string(),
                };
                Ok(())
            }
            Err(err) => {
                *self = HandshakeState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, HandshakeState::Complete { .. })
    }

    pub fn remote_version(&self) -> Option<&str> {
        match self {
            HandshakeState::Complete { remote_version } => Some(remote_version),
            _ => None,
        }
    }
}

/// Versions must match exactly; there is no compatibility range.
pub fn validate_version(local: &str, remote: &str) -> Result<()> {
    if remote.is_empty() || remote.len() > MAX_VERSION_LEN {
        return Err(SessionError::Protocol(format!(
            "invalid protocol version length: {}",
            remote.len()
        )));
    }
    if local != remote {
        return Err(SessionError::VersionMismatch {
            local: local.to_string(),
            remote: remote.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_versions_complete() {
        let mut state = HandshakeState::default();
        state.receive_hello("1.1.0", "1.1.0").unwrap();
        assert!(state.is_complete());
        assert_eq!(state.remote_version(), Some("1.1.0"));
    }

    #[test]
    fn mismatch_is_reported_with_both_versions() {
        let mut state = HandshakeState::default();
        let err = state.receive_hello("1.1.0", "1.0.5").unwrap_err();

        assert_eq!(
            err.to_string(),
            "version mismatch: local '1.1.0', remote '1.0.5'"
        );
        assert_eq!(
            state,
            HandshakeState::Failed("version mismatch: local '1.1.0', remote '1.0.5'".into())
        );
        assert!(state.remote_version().is_none());
    }

    #[test]
    fn compatible_looking_versions_still_mismatch() {
        assert!(validate_version("1.1.0", "1.1").is_err());
        assert!(validate_version("1.1.0", "1.1.0 ").is_err());
    }

    #[test]
    fn empty_or_oversized_version_is_protocol_error() {
        assert!(matches!(
            validate_version("1.1.0", ""),
            Err(SessionError::Protocol(_))
        ));
        let long = "9".repeat(MAX_VERSION_LEN + 1);
        assert!(matches!(
            validate_version("1.1.0", &long),
            Err(SessionError::Protocol(_))
        ));
    }
}
