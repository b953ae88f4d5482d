//! Typed failure surface of the client.
//!
//! Transport and per-frame parse problems never appear here: they close the
//! offending socket and the reconnect path takes over.

use thiserror::Error;

use arus_common::crypto::CryptoError;
use arus_common::identity::IdentityError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Destination identity string failed checksum recomputation.
    #[error("invalid checksum: {identity}")]
    InvalidChecksum { identity: String },

    /// Malformed caller input: seed, index, energy amount, admin key.
    #[error("illegal argument `{field}`: {reason}")]
    IllegalArgument { field: &'static str, reason: String },

    /// Transfer amount exceeds the locally known balance.
    #[error("insufficient energy: requested {requested}, available {available}")]
    InsufficientEnergy { requested: u64, available: u64 },

    /// All collected responses arrived and no pair matched.
    #[error("no agreement among {count} responses")]
    InvalidResponses { count: usize },

    /// The store refused an atomic batch; in-memory state was not changed.
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] StoreError),

    /// A persisted record or imported blob failed signature verification.
    #[error("signature verification failed: {context}")]
    SignatureVerificationFailed { context: &'static str },

    /// An imported receipt blob is structurally broken.
    #[error("malformed receipt: {0}")]
    MalformedReceipt(&'static str),

    /// Operation requires `launch()` first.
    #[error("client is not launched")]
    NotLaunched,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Failures of the embedded key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),

    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lmdb::Error> for StoreError {
    fn from(e: lmdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
