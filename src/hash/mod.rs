// Hashing module: BLAKE3 content hashes, DCT perceptual hashes, persistent cache

pub mod cache;
pub mod index;
pub mod perceptual;

use std::io::Read;
use crate::constants::{HASH_ALGORITHM, HASH_CHUNK_SIZE};
use crate::error::{Result, SyncError};

pub use cache::{CacheEntry, HashCache};
pub use index::HashIndex;
pub use perceptual::PerceptualHash;

/// Compute full BLAKE3 hash of an entire stream
/// Format: "blake3:full:<hex>"
pub fn compute_exact_hash<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)
            .map_err(|e| SyncError::HashComputationFailed(format!("Failed to read: {}", e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format_hash(hasher.finalize()))
}

/// Compute full BLAKE3 hash from an in-memory byte slice.
/// Used when the bytes are already loaded for perceptual hashing.
pub fn compute_exact_hash_from_bytes(data: &[u8]) -> String {
    format_hash(blake3::hash(data))
}

fn format_hash(hash: blake3::Hash) -> String {
    format!("{}:full:{}", HASH_ALGORITHM, hash.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_exact_hash_prefix() {
        let hash = compute_exact_hash(&mut Cursor::new(b"Hello, World!")).unwrap();
        assert!(hash.starts_with("blake3:full:"));
    }

    #[test]
    fn test_stream_and_bytes_agree() {
        // Larger than one chunk so the streaming loop runs more than once
        let data = vec![0x5Au8; HASH_CHUNK_SIZE * 2 + 17];
        let streamed = compute_exact_hash(&mut Cursor::new(&data)).unwrap();
        assert_eq!(streamed, compute_exact_hash_from_bytes(&data));
    }

    #[test]
    fn test_single_byte_change_alters_hash() {
        let mut data = b"identical prefix".to_vec();
        let before = compute_exact_hash_from_bytes(&data);
        data[0] ^= 0xFF;
        assert_ne!(before, compute_exact_hash_from_bytes(&data));
    }
}
