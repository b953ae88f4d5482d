//! # Arus Proto Crate
//!
//! Wire protocol untuk arus ledger client: little-endian framing, packed
//! record layouts, dan vote bitfield codec.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────┬──────────────┬──────────┬──────────────────────────┐
//! │ u32 size │ u16 version  │ u16 kind │ payload (size - 8 bytes) │
//! └──────────┴──────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! Kind-0 payloads carry an inner sub-header:
//!
//! ```text
//! ┌─────────────┬───────────┬───────────────┬──────────────┐
//! │ u8 sub-kind │ 7 padding │ u64 timestamp │ body         │
//! └─────────────┴───────────┴───────────────┴──────────────┘
//! ```
//!
//! Semua integer little-endian. Response timestamps echo the request
//! timestamp and are the matching key for reply correlation.

pub mod framing;
pub mod records;
pub mod votes;

pub use framing::{
    encode_frame, encode_sub_request, parse_sub_frame, Frame, FrameIter, RequestKind, SubFrame,
    SubKind, WireError, HEADER_LENGTH, MAX_FRAME_LENGTH, SUB_HEADER_LENGTH,
};
pub use records::{
    ComputerStateRecord, StatusSlab, TransferRecord, COMPUTER_STATE_LENGTH,
    COMPUTER_STATE_SIGNED_LENGTH, STATUS_BITFIELD_LENGTH, STATUS_SIGNED_LENGTH,
    STATUS_SLAB_LENGTH, TRANSFER_LENGTH, TRANSFER_UNSIGNED_LENGTH,
};
pub use votes::{count_processed, decode_votes, set_vote, vote_at, VoteStatus};
