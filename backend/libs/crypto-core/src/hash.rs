use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Separator placed between canonical ids before hashing.
pub const PARTICIPANT_SEPARATOR: &str = ":";

/// Compute SHA256 hash of input bytes
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Order-independent digest of a participant set, hex encoded.
///
/// Ids are rendered in their lowercase hyphenated form, sorted and
/// de-duplicated before hashing, so `[a, b]`, `[b, a]` and `[a, b, a]`
/// all produce the same value.
pub fn hash_participants(ids: &[Uuid]) -> String {
    let mut canonical: Vec<String> = ids.iter().map(|id| id.hyphenated().to_string()).collect();
    canonical.sort();
    canonical.dedup();
    hex::encode(sha256(canonical.join(PARTICIPANT_SEPARATOR).as_bytes()))
}
