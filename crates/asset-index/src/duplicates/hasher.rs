use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Content hashing seam. Implementations run on the blocking pool.
pub trait ContentHasher: Send + Sync {
    /// Hash the file at `path`, whose size at stat time was `size` bytes.
    fn hash_file(&self, path: &Path, size: u64) -> io::Result<String>;
}

/// SHA-256 rendered as 64 lowercase hex characters. Files larger than the threshold are
/// streamed in fixed chunks so peak memory stays bounded.
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    stream_threshold: u64,
}

impl Sha256Hasher {
    #[must_use]
    pub const fn new(stream_threshold: u64) -> Self {
        Self { stream_threshold }
    }

    #[must_use]
    pub const fn uses_streaming(&self, size: u64) -> bool {
        size > self.stream_threshold
    }

    #[must_use]
    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex_encode_lower(&Sha256::digest(bytes))
    }

    fn hash_buffered(path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(Self::hash_bytes(&bytes))
    }

    fn hash_streaming(path: &Path) -> io::Result<String> {
        let mut reader = BufReader::with_capacity(STREAM_CHUNK_BYTES, File::open(path)?);
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(hex_encode_lower(&hasher.finalize()))
    }
}

impl ContentHasher for Sha256Hasher {
    fn hash_file(&self, path: &Path, size: u64) -> io::Result<String> {
        if self.uses_streaming(size) {
            Self::hash_streaming(path)
        } else {
            Self::hash_buffered(path)
        }
    }
}

fn hex_encode_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_and_buffered_agree() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();
        let size = content.len() as u64;

        let streaming = Sha256Hasher::new(1024);
        let buffered = Sha256Hasher::new(u64::MAX);
        assert!(streaming.uses_streaming(size));
        assert!(!buffered.uses_streaming(size));

        let a = streaming.hash_file(&path, size).unwrap();
        let b = buffered.hash_file(&path, size).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(a, Sha256Hasher::hash_bytes(&content));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            Sha256Hasher::hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let hasher = Sha256Hasher::new(10);
        assert!(hasher.hash_file(&tmp.path().join("nope"), 0).is_err());
        assert!(hasher.hash_file(&tmp.path().join("nope"), 100).is_err());
    }
}
