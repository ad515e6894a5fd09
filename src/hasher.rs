use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};
use crate::FingerprintKind;

const CHUNK_SIZE: usize = 64 * 1024;

/// Default boundary window for quick fingerprints, split evenly front/back.
pub const DEFAULT_QUICK_WINDOW: u64 = 1024 * 1024;

/// Files larger than this use a quick fingerprint in smart mode.
pub const DEFAULT_SMART_THRESHOLD_MB: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Md5,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "md5" => Ok(HashAlgorithm::Md5),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(Error::InvalidArgument(format!(
                "unknown hash algorithm '{}' (expected sha256, md5 or blake3)",
                other
            ))),
        }
    }
}

/// Which part of a file a fingerprint is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    #[default]
    Full,
    Quick,
    Smart,
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMode::Full => write!(f, "full"),
            HashMode::Quick => write!(f, "quick"),
            HashMode::Smart => write!(f, "smart"),
        }
    }
}

impl FromStr for HashMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(HashMode::Full),
            "quick" => Ok(HashMode::Quick),
            "smart" => Ok(HashMode::Smart),
            other => Err(Error::InvalidArgument(format!(
                "unknown hash mode '{}' (expected full, quick or smart)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub kind: FingerprintKind,
}

enum Digest {
    Sha256(Sha256),
    Md5(md5::Context),
    Blake3(Box<blake3::Hasher>),
}

impl Digest {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Digest::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => Digest::Md5(md5::Context::new()),
            HashAlgorithm::Blake3 => Digest::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Digest::Sha256(h) => h.update(data),
            Digest::Md5(h) => h.consume(data),
            Digest::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self) -> String {
        match self {
            Digest::Sha256(h) => hex::encode(h.finalize()),
            Digest::Md5(h) => hex::encode(h.finalize().0),
            Digest::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Content fingerprinting with a fixed algorithm and strategy.
///
/// A `Hasher` holds no mutable state, so one instance is shared by every
/// hashing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hasher {
    pub algorithm: HashAlgorithm,
    pub mode: HashMode,
    /// Bytes covered by a quick fingerprint; half from the front, half from the back.
    pub quick_window: u64,
    /// Files strictly larger than this many bytes get a quick fingerprint in smart mode.
    pub smart_threshold: u64,
}

impl Default for Hasher {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            mode: HashMode::default(),
            quick_window: DEFAULT_QUICK_WINDOW,
            smart_threshold: DEFAULT_SMART_THRESHOLD_MB * 1024 * 1024,
        }
    }
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm, mode: HashMode) -> Self {
        Self {
            algorithm,
            mode,
            ..Self::default()
        }
    }

    pub fn with_quick_window(mut self, bytes: u64) -> Self {
        self.quick_window = bytes;
        self
    }

    pub fn with_smart_threshold_mb(mut self, mb: u64) -> Self {
        self.smart_threshold = mb * 1024 * 1024;
        self
    }

    /// Fingerprint `path` according to the configured mode.
    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint> {
        let size = fs::metadata(path).map_err(|e| Error::io(path, e))?.len();
        self.fingerprint_sized(path, size)
    }

    /// Same as [`Hasher::fingerprint`] when the caller already stat'ed the file.
    pub fn fingerprint_sized(&self, path: &Path, size: u64) -> Result<Fingerprint> {
        match self.mode {
            HashMode::Full => self.full(path),
            HashMode::Quick => self.quick(path, size),
            HashMode::Smart if size > self.smart_threshold => self.quick(path, size),
            HashMode::Smart => self.full(path),
        }
    }

    /// The fingerprint kind this hasher produces for a file of `size` bytes.
    pub fn kind_for(&self, size: u64) -> FingerprintKind {
        let quick = match self.mode {
            HashMode::Full => false,
            HashMode::Quick => true,
            HashMode::Smart => size > self.smart_threshold,
        };
        if quick && size > self.quick_window {
            FingerprintKind::Quick
        } else {
            FingerprintKind::Full
        }
    }

    /// Stream the whole file through the digest in 64 KiB chunks.
    pub fn full(&self, path: &Path) -> Result<Fingerprint> {
        let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
        let mut digest = Digest::new(self.algorithm);
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).map_err(|e| Error::io(path, e))?;
            if bytes_read == 0 {
                break;
            }
            digest.update(&buffer[..bytes_read]);
        }

        Ok(Fingerprint {
            digest: digest.finish(),
            kind: FingerprintKind::Full,
        })
    }

    /// Digest the decimal size, then the first and last half-window bytes.
    /// Files that fit in the window get a full fingerprint.
    pub fn quick(&self, path: &Path, size: u64) -> Result<Fingerprint> {
        if size <= self.quick_window {
            return self.full(path);
        }

        let half = (self.quick_window / 2) as usize;
        let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
        let mut digest = Digest::new(self.algorithm);
        digest.update(size.to_string().as_bytes());

        let mut buffer = vec![0; half];
        file.read_exact(&mut buffer).map_err(|e| Error::io(path, e))?;
        digest.update(&buffer);

        file.seek(SeekFrom::End(-(half as i64)))
            .map_err(|e| Error::io(path, e))?;
        file.read_exact(&mut buffer).map_err(|e| Error::io(path, e))?;
        digest.update(&buffer);

        Ok(Fingerprint {
            digest: digest.finish(),
            kind: FingerprintKind::Quick,
        })
    }
}

/// Anything the scanner can ask for a file's fingerprint. [`Hasher`] is the
/// standard source; wrappers must return what the configured `Hasher` would,
/// since cache validity is judged against it.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint_sized(&self, path: &Path, size: u64) -> Result<Fingerprint>;
}

impl Fingerprinter for Hasher {
    fn fingerprint_sized(&self, path: &Path, size: u64) -> Result<Fingerprint> {
        Hasher::fingerprint_sized(self, path, size)
    }
}

/// Confirm two files have identical content: sizes first, then full digests.
pub fn verify_identical(a: &Path, b: &Path, algorithm: HashAlgorithm) -> Result<bool> {
    let size_a = fs::metadata(a).map_err(|e| Error::io(a, e))?.len();
    let size_b = fs::metadata(b).map_err(|e| Error::io(b, e))?.len();
    if size_a != size_b {
        return Ok(false);
    }

    let hasher = Hasher::new(algorithm, HashMode::Full);
    Ok(hasher.full(a)?.digest == hasher.full(b)?.digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_known_digests() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, "abc").unwrap();

        let sha = Hasher::new(HashAlgorithm::Sha256, HashMode::Full);
        assert_eq!(
            sha.fingerprint(&path).unwrap().digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let md5 = Hasher::new(HashAlgorithm::Md5, HashMode::Full);
        assert_eq!(
            md5.fingerprint(&path).unwrap().digest,
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_full_hash_spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut content = vec![7u8; CHUNK_SIZE * 3 + 11];
        fs::write(&a, &content).unwrap();
        *content.last_mut().unwrap() = 8;
        fs::write(&b, &content).unwrap();

        let hasher = Hasher::default();
        assert_ne!(
            hasher.fingerprint(&a).unwrap().digest,
            hasher.fingerprint(&b).unwrap().digest
        );
    }

    #[test]
    fn test_quick_small_file_equals_full() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.txt");
        fs::write(&path, "hello world").unwrap();

        let quick = Hasher::new(HashAlgorithm::Sha256, HashMode::Quick);
        let full = Hasher::new(HashAlgorithm::Sha256, HashMode::Full);
        let q = quick.fingerprint(&path).unwrap();
        assert_eq!(q.kind, FingerprintKind::Full);
        assert_eq!(q.digest, full.fingerprint(&path).unwrap().digest);
    }

    #[test]
    fn test_quick_ignores_middle_bytes() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut content = vec![1u8; 64];
        fs::write(&a, &content).unwrap();
        content[32] = 9;
        fs::write(&b, &content).unwrap();

        let quick = Hasher::new(HashAlgorithm::Sha256, HashMode::Quick).with_quick_window(16);
        let fa = quick.fingerprint(&a).unwrap();
        let fb = quick.fingerprint(&b).unwrap();
        assert_eq!(fa.kind, FingerprintKind::Quick);
        assert_eq!(fa.digest, fb.digest);

        // a full comparison tells them apart
        assert!(!verify_identical(&a, &b, HashAlgorithm::Sha256).unwrap());
    }

    #[test]
    fn test_quick_includes_size() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, vec![1u8; 64]).unwrap();
        fs::write(&b, vec![1u8; 65]).unwrap();

        let quick = Hasher::new(HashAlgorithm::Sha256, HashMode::Quick).with_quick_window(16);
        assert_ne!(
            quick.fingerprint(&a).unwrap().digest,
            quick.fingerprint(&b).unwrap().digest
        );
    }

    #[test]
    fn test_smart_mode_switches_on_threshold() {
        let hasher = Hasher {
            algorithm: HashAlgorithm::Blake3,
            mode: HashMode::Smart,
            quick_window: 16,
            smart_threshold: 100,
        };
        assert_eq!(hasher.kind_for(100), FingerprintKind::Full);
        assert_eq!(hasher.kind_for(101), FingerprintKind::Quick);

        let dir = tempdir().unwrap();
        let large = dir.path().join("large.bin");
        fs::write(&large, vec![0u8; 200]).unwrap();
        assert_eq!(hasher.fingerprint(&large).unwrap().kind, FingerprintKind::Quick);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Hasher::default()
            .fingerprint(&dir.path().join("nope"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("smart".parse::<HashMode>().unwrap(), HashMode::Smart);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }
}
