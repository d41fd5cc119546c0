//! Error taxonomy shared across the device, handshake, pump, and supervisor
//! layers, with the exit-code mapping `main` applies to the final result.

use thiserror::Error;

/// The kinds of failure this bridge can surface, per the error-handling design.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("device {spec} unavailable: {reason}")]
    DeviceUnavailable { spec: String, reason: String },

    #[error("device {spec} misconfigured: {reason}")]
    DeviceMisconfigured { spec: String, reason: String },

    #[error("device I/O error: {0}")]
    DeviceIoError(#[from] std::io::Error),

    #[error("remote {host}:{port} unreachable: {reason}")]
    RemoteUnreachable {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("handshake timed out waiting for {expected}")]
    HandshakeTimeout { expected: String },

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("inactivity timeout after {secs}s")]
    InactivityTimeout { secs: u64 },

    #[error("carrier lost")]
    CarrierLost,

    #[error("cancelled")]
    Cancelled,
}

impl BridgeError {
    /// Map a terminal error to the process exit code defined in the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::ConfigInvalid(_) => 1,
            BridgeError::DeviceUnavailable { .. } | BridgeError::DeviceMisconfigured { .. } => 2,
            BridgeError::AuthFailed(_) | BridgeError::HandshakeRejected(_) => 3,
            BridgeError::RemoteUnreachable { .. }
            | BridgeError::HandshakeTimeout { .. }
            | BridgeError::DeviceIoError(_)
            | BridgeError::InactivityTimeout { .. }
            | BridgeError::CarrierLost => 4,
            BridgeError::Cancelled => 130,
        }
    }
}

/// Whether an error from a connect/handshake attempt should be retried under
/// the supervisor's backoff policy (only meaningful when `emulate_modem=false`;
/// when emulating, these instead become local result codes — see `supervisor.rs`).
pub fn is_retryable(err: &BridgeError) -> bool {
    matches!(
        err,
        BridgeError::RemoteUnreachable { .. }
            | BridgeError::HandshakeTimeout { .. }
            | BridgeError::HandshakeRejected(_)
            | BridgeError::AuthFailed(_)
    )
}

pub type Result<T> = std::result::Result<T, BridgeError>;
