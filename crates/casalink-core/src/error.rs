use casalink_proto::FailureKind;
use thiserror::Error;

/// Top-level error type for the `casalink-core` crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A failure surfaced by the protocol layer.
    #[error(transparent)]
    Protocol(#[from] casalink_proto::Error),

    /// The structure document could not be parsed or referenced a
    /// malformed identifier.
    #[error("structure document invalid: {detail}")]
    StructureInvalid { detail: String },

    /// No control with the given id or name is registered.
    #[error("control not found: {identifier}")]
    ControlNotFound { identifier: String },

    /// `start` was called on an already running client.
    #[error("client already started")]
    AlreadyStarted,
}

impl CoreError {
    /// Collapse into the reconnect policy's failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Protocol(e) => e.classify(),
            Self::StructureInvalid { .. } | Self::ControlNotFound { .. } | Self::AlreadyStarted => {
                FailureKind::Configuration
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_keep_their_classification() {
        let err = CoreError::from(casalink_proto::Error::AuthCredential {
            message: "bad password".into(),
        });
        assert_eq!(err.failure_kind(), FailureKind::AuthCredential);
    }

    #[test]
    fn structure_failures_are_configuration() {
        let err = CoreError::StructureInvalid {
            detail: "not json".into(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Configuration);
    }
}
