// ==============================================================================
// validator.rs - Source File Inspection
// ==============================================================================
// Description: Magic number detection and fingerprinting of input files
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Gzip member header (RFC 1952); BGZF files share it
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// What an ingestion run records about each source artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub size_bytes: u64,
    pub gzip: bool,
    /// Only computed on request; costs a full pass over the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Read up to `len` leading bytes (shorter for tiny files)
pub fn read_magic_number(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

pub fn verify_magic_number(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() <= actual.len()
        && expected.iter().zip(actual.iter()).all(|(e, a)| e == a)
}

pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let magic = read_magic_number(path, GZIP_MAGIC.len())?;
    Ok(verify_magic_number(&GZIP_MAGIC, &magic))
}

pub fn inspect_source(path: &Path, compute_hash: bool) -> io::Result<SourceFingerprint> {
    let size_bytes = std::fs::metadata(path)?.len();
    let gzip = is_gzip(path)?;

    let looks_compressed = path
        .file_name()
        .map(|name| name.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false);
    if looks_compressed && !gzip {
        warn!(
            "{} has a .gz suffix but no gzip header; reading as plain text",
            path.display()
        );
    }

    let sha256 = if compute_hash {
        let hash = compute_sha256(path)?;
        debug!("SHA-256 of {}: {}", path.display(), hash);
        Some(hash)
    } else {
        None
    };

    Ok(SourceFingerprint {
        size_bytes,
        gzip,
        sha256,
    })
}

fn compute_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_verify_magic_number() {
        assert!(verify_magic_number(&GZIP_MAGIC, &[0x1f, 0x8b, 0x08, 0x00]));
        assert!(!verify_magic_number(&GZIP_MAGIC, b"mo"));
        assert!(!verify_magic_number(&GZIP_MAGIC, &[0x1f]));
    }

    #[test]
    fn test_inspect_gzip_file() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"molecular_trait_id\tchromosome\n").unwrap();
        let bytes = encoder.finish().unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let fingerprint = inspect_source(file.path(), true).unwrap();
        assert!(fingerprint.gzip);
        assert_eq!(fingerprint.size_bytes, bytes.len() as u64);
        assert_eq!(fingerprint.sha256.as_ref().map(|h| h.len()), Some(64));
    }

    #[test]
    fn test_inspect_plain_file_without_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let fingerprint = inspect_source(file.path(), false).unwrap();
        assert!(!fingerprint.gzip);
        assert_eq!(fingerprint.size_bytes, 3);
        assert!(fingerprint.sha256.is_none());
    }

    #[test]
    fn test_sha256_known_value() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        assert_eq!(
            compute_sha256(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_file_is_not_gzip() {
        let file = NamedTempFile::new().unwrap();
        assert!(!is_gzip(file.path()).unwrap());
    }
}
