//! # Arus Common Crate
//!
//! Shared primitives untuk arus ledger client.
//!
//! ## Modules
//! - `constants`: committee sizes, wire version, protocol limits
//! - `crypto`: XOF hashing + pluggable signature schemes
//! - `identity`: seed handling, shifted hex, identity derivation & checksums
//! - `timestamp`: monotonic request timestamps
//!
//! ## Identity Derivation
//! ```text
//! seed (55 huruf) ──> preimage bytes ──> odometer(index) ──> xof(·, 32)
//!                                                               │
//!                                 private key <─────────────────┘
//!                                      │
//!                  public key ──> xof(·, 3) checksum ──> identity (70 chars)
//! ```

pub mod constants;
pub mod crypto;
pub mod identity;
pub mod timestamp;

pub use crypto::{CryptoError, Ed25519Scheme, SignatureScheme};
pub use identity::{IdentityError, IdentityKeys};
pub use timestamp::MonotonicClock;
