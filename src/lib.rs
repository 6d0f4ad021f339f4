// Sidecar Sync - Library Entry Point
//
// Matches media in a sidecar-carrying export (source) to a re-exported
// library (target) and merges sidecar metadata into the target files.

pub mod constants;
pub mod error;
pub mod config;
pub mod tools;
pub mod tree;
pub mod hash;
pub mod fingerprint;
pub mod sidecar;
pub mod metadata;
pub mod matcher;
pub mod dupes;
pub mod resolver;
pub mod engine;

pub use config::SyncConfig;
pub use engine::{write_report, CancelToken, SyncEngine, SyncReport};
pub use error::{Result, SyncError};
