//! Partition selection by conversation.

use sha2::{Digest, Sha256};

/// Deterministic partition for a conversation id.
///
/// Uses the first four bytes of the SHA-256 digest as a big-endian integer so
/// the mapping is stable across processes and releases.
pub fn partition_for(conversation_id: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(conversation_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partitions.max(1)
}
