// Sidecar Sync Constants
// Bump HASH_CACHE_SCHEMA_VERSION whenever the stored hash format changes.

pub const APP_NAME: &str = "sidecar-sync";

// Hashing
pub const HASH_ALGORITHM: &str = "blake3";
pub const HASH_CHUNK_SIZE: usize = 1_048_576; // 1MB
pub const PERCEPTUAL_SCHEME: &str = "dct_mean";
pub const DEFAULT_PERCEPTUAL_HASH_SIZE: u32 = 8;
pub const MIN_PERCEPTUAL_HASH_SIZE: u32 = 4;
pub const MAX_PERCEPTUAL_HASH_SIZE: u32 = 32;

// Hash cache
pub const HASH_CACHE_FILENAME: &str = "hash_cache.db";
pub const HASH_CACHE_SCHEMA_VERSION: u32 = 1;

// Matching
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.98;
pub const SIMILARITY_TIE_EPSILON: f64 = 1e-9;
pub const DEFAULT_DUPLICATE_SUFFIX_PATTERNS: [&str; 1] = [r"\s*\(\d+\)$"];

// Confidence reported per match layer (perceptual is scaled by similarity)
pub const CONFIDENCE_EXACT_NAME: f64 = 1.0;
pub const CONFIDENCE_NORMALIZED_NAME: f64 = 0.95;
pub const CONFIDENCE_EXACT_HASH: f64 = 0.9;
pub const CONFIDENCE_PERCEPTUAL_SCALE: f64 = 0.85;

// Merge tolerances
pub const GPS_EPSILON_DEGREES: f64 = 1e-6;

// Concurrency
pub const MAX_DEFAULT_WORKERS: usize = 8;

// External tool
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
pub const TOOL_POLL_INTERVAL_MS: u64 = 25;
pub const EXIFTOOL_ENV_KEY: &str = "SIDECAR_SYNC_EXIFTOOL_PATH";

// Sidecars
pub const SIDECAR_EXTENSION: &str = "json";
// Exporters truncate long names, so every prefix of the full marker is accepted.
pub const SIDECAR_MARKER: &str = ".supplemental-metadata";
pub const SIDECAR_MARKER_MIN_LEN: usize = 6; // ".suppl"

// Report
pub const REPORT_TMP_PREFIX: &str = ".tmp_";

// Video extensions
pub const VIDEO_EXTENSIONS: [&str; 8] = [
    "mp4", "mov", "avi", "mkv", "wmv", "m4v", "3gp", "mts",
];

// Image extensions
pub const IMAGE_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "heic", "heif", "tif", "tiff", "bmp", "gif", "webp",
];

// Image extensions the decoder can rasterize for perceptual hashing
pub const PERCEPTUAL_EXTENSIONS: [&str; 8] = [
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp",
];
