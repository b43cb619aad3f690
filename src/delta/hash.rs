//! Jenkins one-at-a-time hash over a directory entry's `(parent_ino, name)`.
//!
//! This crate does not use the hash as the authoritative key for the
//! dirent index (see [`crate::delta::index`] for why), but it is kept as a
//! cheap, order-independent fingerprint used when comparing directory
//! snapshots and in tests, matching the hash the on-storage format assumes
//! implementations provide.

use crate::ids::Ino;

/// Hash `name` seeded with `parent_ino`, folding the 32-bit result in on
/// itself (XOR of the high and low half) to spread bits before truncation
/// to a smaller table, if a caller wants one.
pub fn dirent_hash(parent_ino: Ino, name: &str) -> u32 {
    let mut hash: u32 = jenkins_one_at_a_time(&parent_ino.to_le_bytes());
    hash = hash.wrapping_add(jenkins_one_at_a_time(name.as_bytes()));
    (hash >> 16) ^ (hash & 0xffff)
}

fn jenkins_one_at_a_time(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(dirent_hash(1, "a.txt"), dirent_hash(1, "a.txt"));
    }

    #[test]
    fn differs_by_parent() {
        assert_ne!(dirent_hash(1, "a.txt"), dirent_hash(2, "a.txt"));
    }

    #[test]
    fn differs_by_name() {
        assert_ne!(dirent_hash(1, "a.txt"), dirent_hash(1, "b.txt"));
    }
}
