//! File hashing utilities

use anyhow::Result;
use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use crate::utils::config::HashingConsts;

/// Hash a file with blake3. Uses memory-mapped I/O for files above threshold, chunked reading otherwise.
pub fn hash_file(path: &Path, size: u64) -> Result<[u8; 32]> {
    let file = File::open(path)?;
    let mut hasher = Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        // Memory-mapped I/O for large files (Blake3 already uses SIMD internally)
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        use std::io::Read;
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(*hasher.finalize().as_bytes())
}

/// True only when both hashes are present and equal. A missing side never counts as a match.
pub fn hash_matches(current: &Option<[u8; 32]>, stored: &Option<[u8; 32]>) -> bool {
    matches!((current, stored), (Some(a), Some(b)) if a == b)
}

/// Convert a stored BLOB into a hash; anything but 32 bytes is treated as absent.
pub fn hash_from_blob(blob: Option<Vec<u8>>) -> Option<[u8; 32]> {
    blob.and_then(|v| <[u8; 32]>::try_from(v.as_slice()).ok())
}
