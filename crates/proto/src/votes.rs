//! Vote bitfield codec.
//!
//! A reporting computor packs one two-bit vote per reported computor,
//! four votes per byte, most-significant pair first: vote `j` lives in
//! byte `j / 4`, bits `(6 - 2*(j%4))..=(7 - 2*(j%4))`.

use arus_common::constants::NUMBER_OF_COMPUTORS;

use crate::records::STATUS_BITFIELD_LENGTH;

/// Two-bit transfer status vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoteStatus {
    Unseen = 0,
    Seen = 1,
    Processed = 2,
    Reserved = 3,
}

impl From<u8> for VoteStatus {
    fn from(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Unseen,
            1 => Self::Seen,
            2 => Self::Processed,
            _ => Self::Reserved,
        }
    }
}

/// Read vote `j` out of a packed bitfield.
pub fn vote_at(bitfield: &[u8; STATUS_BITFIELD_LENGTH], j: usize) -> VoteStatus {
    debug_assert!(j < NUMBER_OF_COMPUTORS);
    let shift = 6 - 2 * (j % 4);
    VoteStatus::from(bitfield[j / 4] >> shift)
}

/// Write vote `j` into a packed bitfield.
pub fn set_vote(bitfield: &mut [u8; STATUS_BITFIELD_LENGTH], j: usize, vote: VoteStatus) {
    debug_assert!(j < NUMBER_OF_COMPUTORS);
    let shift = 6 - 2 * (j % 4);
    let byte = &mut bitfield[j / 4];
    *byte = (*byte & !(0b11 << shift)) | ((vote as u8) << shift);
}

/// Decode all 676 votes.
pub fn decode_votes(bitfield: &[u8; STATUS_BITFIELD_LENGTH]) -> Vec<VoteStatus> {
    (0..NUMBER_OF_COMPUTORS).map(|j| vote_at(bitfield, j)).collect()
}

/// Number of `Processed` votes a reporter's bitfield carries.
pub fn count_processed(bitfield: &[u8; STATUS_BITFIELD_LENGTH]) -> usize {
    (0..NUMBER_OF_COMPUTORS)
        .filter(|&j| vote_at(bitfield, j) == VoteStatus::Processed)
        .count()
}
