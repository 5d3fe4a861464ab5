//! Error types for the cogniton network

use crate::network::NetworkState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Malformed cogniton definition, raised by `Network::add`.
    #[error("invalid configuration for cogniton \"{unit}\": {reason}")]
    Config { unit: String, reason: String },

    #[error("can't add cogniton \"{0}\" since the network already has another cogniton with the same id")]
    DuplicateId(String),

    #[error("cogniton \"{unit}\" has no pacemaker with rate {rate}ms")]
    UnknownPacemaker { unit: String, rate: u64 },

    #[error("invalid network configuration: {0}")]
    InvalidNetworkConfig(&'static str),

    #[error("no tokio runtime available to arm pacemakers")]
    NoRuntime,

    #[error("can't {operation} while network is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: NetworkState,
    },
}

impl NetworkError {
    pub(crate) fn config(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}
