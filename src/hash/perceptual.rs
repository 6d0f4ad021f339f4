// Perceptual hashing: DCT-preprocessed mean hash over a square grid.
// Visually similar rasters land at a small Hamming distance.

use std::fmt;
use img_hash::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

use crate::constants::PERCEPTUAL_SCHEME;
use crate::error::{Result, SyncError};

/// Fixed-length bit signature of an image.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PerceptualHash(Vec<u8>);

impl PerceptualHash {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bit_len(&self) -> u32 {
        self.0.len() as u32 * 8
    }

    pub fn distance(&self, other: &PerceptualHash) -> Option<u32> {
        if self.0.len() != other.0.len() {
            return None;
        }
        Some(
            self.0.iter()
                .zip(other.0.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }

    /// 1.0 for identical signatures, 0.0 when every bit differs.
    /// Hashes of different lengths are incomparable and score 0.0.
    pub fn similarity(&self, other: &PerceptualHash) -> f64 {
        match self.distance(other) {
            Some(_) if self.0.is_empty() => 0.0,
            Some(d) => 1.0 - (d as f64 / self.bit_len() as f64),
            None => 0.0,
        }
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()
            .map(Self)
    }
}

impl fmt::Debug for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerceptualHash({})", self.to_hex())
    }
}

impl From<PerceptualHash> for String {
    fn from(hash: PerceptualHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for PerceptualHash {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        PerceptualHash::from_hex(&value).ok_or_else(|| format!("invalid perceptual hash {:?}", value))
    }
}

/// Cache tag for hashes produced with a given grid size.
pub fn scheme_tag(hash_size: u32) -> String {
    format!("{}:{}", PERCEPTUAL_SCHEME, hash_size)
}

/// Decode an encoded raster (JPEG, PNG, GIF, BMP, TIFF, WebP) and hash it.
pub fn compute_perceptual_hash(data: &[u8], hash_size: u32) -> Result<PerceptualHash> {
    let img = image::load_from_memory(data)
        .map_err(|e| SyncError::HashComputationFailed(format!("Failed to decode image: {}", e)))?;
    Ok(hash_image(&img, hash_size))
}

pub(crate) fn hash_image(img: &image::DynamicImage, hash_size: u32) -> PerceptualHash {
    let hasher = HasherConfig::new()
        .hash_size(hash_size, hash_size)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher();

    PerceptualHash(hasher.hash_image(img).as_bytes().to_vec())
}
