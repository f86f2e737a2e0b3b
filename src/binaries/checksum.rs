//! Artifact digests for provisioning integrity checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use crate::errors::Result;

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

fn digest_path<D: Digest>(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl ChecksumAlgorithm {
    /// Lowercase hex digest of the file at `path`, read in chunks.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        match self {
            ChecksumAlgorithm::Sha256 => digest_path::<Sha256>(path),
            ChecksumAlgorithm::Sha512 => digest_path::<Sha512>(path),
        }
    }
}

/// Case-insensitive hex comparison.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
