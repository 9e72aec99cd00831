//! Deterministic artifact summary used by the processing stage.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Byte-frequency statistics only look at this many leading bytes.
/// Fixed for output compatibility; do not make configurable.
pub const SUMMARY_PREFIX_LEN: usize = 1000;

/// Pure function of the artifact bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDigest {
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the whole content
    pub checksum: String,
    /// Distinct byte values in the summary prefix
    pub unique_bytes: usize,
    /// Most frequent byte value in the summary prefix
    pub most_common_byte: u8,
}

pub fn checksum(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

pub fn summarize(content: &[u8]) -> ArtifactDigest {
    let prefix = &content[..content.len().min(SUMMARY_PREFIX_LEN)];
    let (unique_bytes, most_common_byte) = byte_frequency(prefix);

    ArtifactDigest {
        file_size: content.len() as u64,
        checksum: checksum(content),
        unique_bytes,
        most_common_byte,
    }
}

/// Distinct byte count and most frequent byte. Ties go to the value seen
/// first; an empty slice yields `(0, 0)`.
fn byte_frequency(prefix: &[u8]) -> (usize, u8) {
    let mut counts = [0u32; 256];
    let mut first_seen = Vec::new();

    for &byte in prefix {
        if counts[byte as usize] == 0 {
            first_seen.push(byte);
        }
        counts[byte as usize] += 1;
    }

    let mut most_common = 0u8;
    let mut best = 0u32;
    for &byte in &first_seen {
        if counts[byte as usize] > best {
            best = counts[byte as usize];
            most_common = byte;
        }
    }

    (first_seen.len(), most_common)
}
