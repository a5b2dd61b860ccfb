use intellivent_keystore::KeyStoreError;
use intellivent_proto::ProtoError;
use intellivent_proto::ble::Feature;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting kept failing until the configured attempt ceiling
    #[error("{address} unavailable after {attempts} connection attempts: {source}")]
    TransportUnavailable {
        address: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("characteristic {0} ({uuid}) not found", uuid = .0.uuid())]
    CharacteristicNotFound(Feature),
    #[error(transparent)]
    MalformedRecord(ProtoError),
    #[error("invalid auth code: {0}")]
    InvalidAuthCode(String),
    #[error("stored credential is tampered or corrupt")]
    TamperedOrCorrupt,
    #[error("not connected")]
    NotConnected,
    /// A characteristic read or write failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(KeyStoreError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::InvalidAuthCode(reason) => Error::InvalidAuthCode(reason),
            malformed @ ProtoError::MalformedRecord { .. } => Error::MalformedRecord(malformed),
        }
    }
}

impl From<KeyStoreError> for Error {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::TamperedOrCorrupt => Error::TamperedOrCorrupt,
            other => Error::Storage(other),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}
