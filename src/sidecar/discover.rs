// Sidecar discovery and sidecar -> media pairing for the source tree

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::constants::{SIDECAR_EXTENSION, SIDECAR_MARKER, SIDECAR_MARKER_MIN_LEN};
use crate::error::{Result, SyncError};
use crate::tree::{is_media_file, is_sidecar_candidate, FileTree};
use super::SidecarMetadata;

/// One source asset: a media file, its sidecar, or both.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub media: Option<PathBuf>,
    pub sidecar_path: Option<PathBuf>,
    pub sidecar: Option<SidecarMetadata>,
}

impl SourceAsset {
    /// Path identifying this asset in reports.
    pub fn path(&self) -> &Path {
        self.media
            .as_deref()
            .or(self.sidecar_path.as_deref())
            .unwrap_or_else(|| Path::new(""))
    }
}

#[derive(Debug, Default)]
pub struct SourceScan {
    pub assets: Vec<SourceAsset>,
    /// Sidecars that could not be read or parsed; their media is treated as sidecar-less.
    pub failures: Vec<(PathBuf, SyncError)>,
}

/// Every JSON file under `dir` with its raw contents. Unreadable files are reported, not fatal.
pub fn list_sidecars(tree: &dyn FileTree, dir: &Path) -> Result<Vec<(PathBuf, Result<String>)>> {
    Ok(tree
        .list(dir)?
        .into_iter()
        .filter(|p| is_sidecar_candidate(p))
        .map(|p| {
            let raw = tree.read_to_string(&p);
            (p, raw)
        })
        .collect())
}

/// Walk the source tree, parse sidecars and pair each with its media file.
pub fn scan_source(tree: &dyn FileTree, dir: &Path, creation_time_fallback: bool) -> Result<SourceScan> {
    let mut unpaired: BTreeSet<PathBuf> = tree
        .list(dir)?
        .into_iter()
        .filter(|p| is_media_file(p))
        .collect();

    let mut scan = SourceScan::default();

    for (sidecar_path, raw) in list_sidecars(tree, dir)? {
        let parsed = raw.and_then(|raw| SidecarMetadata::parse(&raw, creation_time_fallback));
        let sidecar = match parsed {
            Ok(sidecar) => sidecar,
            Err(e) => {
                log::warn!("Ignoring sidecar {}: {}", sidecar_path.display(), e);
                scan.failures.push((sidecar_path, e));
                continue;
            }
        };

        let media = find_media_for_sidecar(&sidecar_path, &sidecar, &unpaired);
        if let Some(media) = &media {
            unpaired.remove(media);
        } else {
            log::debug!("Sidecar without media file: {}", sidecar_path.display());
        }

        scan.assets.push(SourceAsset {
            media,
            sidecar_path: Some(sidecar_path),
            sidecar: Some(sidecar),
        });
    }

    scan.assets.extend(unpaired.into_iter().map(|media| SourceAsset {
        media: Some(media),
        sidecar_path: None,
        sidecar: None,
    }));
    scan.assets.sort_by(|a, b| a.path().cmp(b.path()));

    Ok(scan)
}

/// Candidate media names derived from a sidecar file name, best first.
///
/// `IMG_1.jpg.supplemental-metadata.json` -> `IMG_1.jpg`
/// `IMG_1.jpg.suppl.json`                 -> `IMG_1.jpg` (truncated marker)
/// `IMG_1.jpg(2).json`                    -> `IMG_1(2).jpg` (displaced counter)
fn media_name_from_sidecar(sidecar_name: &str) -> Option<String> {
    let suffix = format!(".{}", SIDECAR_EXTENSION);
    let stem_len = sidecar_name.len().checked_sub(suffix.len())?;
    if !sidecar_name.get(stem_len..)?.eq_ignore_ascii_case(&suffix) {
        return None;
    }
    let mut base = sidecar_name.get(..stem_len)?.to_string();

    // Displaced counter: "(N)" after the media extension
    let mut counter = None;
    if base.ends_with(')') {
        if let Some(open) = base.rfind('(') {
            let digits = &base[open + 1..base.len() - 1];
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                counter = Some(base[open..].to_string());
                base.truncate(open);
            }
        }
    }

    if let Some(dot) = base.rfind('.') {
        let tail = &base[dot..];
        if tail.len() >= SIDECAR_MARKER_MIN_LEN && SIDECAR_MARKER.starts_with(tail.to_lowercase().as_str()) {
            base.truncate(dot);
        }
    }

    match counter {
        Some(counter) => match base.rfind('.') {
            Some(dot) => Some(format!("{}{}{}", &base[..dot], counter, &base[dot..])),
            None => Some(format!("{}{}", base, counter)),
        },
        None => Some(base),
    }
}

fn find_media_for_sidecar(sidecar_path: &Path, sidecar: &SidecarMetadata, unpaired: &BTreeSet<PathBuf>) -> Option<PathBuf> {
    let dir = sidecar_path.parent()?;
    let sidecar_name = sidecar_path.file_name()?.to_string_lossy().to_string();
    let derived = media_name_from_sidecar(&sidecar_name)?;

    // Media files in the same directory, keyed by lowercase name
    let siblings: BTreeMap<String, &PathBuf> = unpaired
        .iter()
        .filter(|p| p.parent() == Some(dir))
        .filter_map(|p| Some((p.file_name()?.to_string_lossy().to_lowercase(), p)))
        .collect();

    for name in [derived.as_str(), sidecar.original_filename.as_str()] {
        if let Some(path) = siblings.get(&name.to_lowercase()) {
            return Some((*path).clone());
        }
    }

    // "IMG_1.json": any single sibling whose stem is "IMG_1"
    let stem_matches: Vec<&PathBuf> = siblings
        .values()
        .copied()
        .filter(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().eq_ignore_ascii_case(&derived))
                .unwrap_or(false)
        })
        .collect();
    match stem_matches.as_slice() {
        [only] => Some((*only).clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::LocalFileTree;
    use tempfile::TempDir;

    fn sidecar_json(title: &str) -> String {
        format!(r#"{{"title": "{}", "photoTakenTime": {{"timestamp": "1622541600"}}}}"#, title)
    }

    #[test]
    fn test_media_name_from_sidecar() {
        assert_eq!(media_name_from_sidecar("IMG_1.jpg.json").as_deref(), Some("IMG_1.jpg"));
        assert_eq!(media_name_from_sidecar("IMG_1.jpg.supplemental-metadata.json").as_deref(), Some("IMG_1.jpg"));
        assert_eq!(media_name_from_sidecar("IMG_1.jpg.suppl.json").as_deref(), Some("IMG_1.jpg"));
        assert_eq!(media_name_from_sidecar("IMG_1.jpg(2).json").as_deref(), Some("IMG_1(2).jpg"));
        assert_eq!(media_name_from_sidecar("IMG_1.JSON").as_deref(), Some("IMG_1"));
        assert_eq!(media_name_from_sidecar("IMG_1.jpg"), None);
        assert_eq!(media_name_from_sidecar("json"), None);
    }

    #[test]
    fn test_media_name_keeps_non_ascii_names_intact() {
        // "İ" grows by a byte when lowercased
        assert_eq!(media_name_from_sidecar("İstanbul.jpg.json").as_deref(), Some("İstanbul.jpg"));
        assert_eq!(media_name_from_sidecar("ÖRNEK.JPG.Json").as_deref(), Some("ÖRNEK.JPG"));
    }

    #[test]
    fn test_scan_pairs_sidecars_with_media() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("IMG_1.jpg"), b"one").unwrap();
        std::fs::write(root.join("IMG_1.jpg.supplemental-metadata.json"), sidecar_json("IMG_1.jpg")).unwrap();
        std::fs::write(root.join("IMG_1(1).jpg"), b"one-dup").unwrap();
        std::fs::write(root.join("IMG_1.jpg(1).json"), sidecar_json("IMG_1.jpg")).unwrap();
        std::fs::write(root.join("VID_2.mp4"), b"video").unwrap();

        let scan = scan_source(&LocalFileTree, root, false).unwrap();
        assert!(scan.failures.is_empty());
        assert_eq!(scan.assets.len(), 3);

        let by_media = |name: &str| {
            scan.assets
                .iter()
                .find(|a| a.media.as_deref() == Some(root.join(name).as_path()))
                .unwrap()
        };
        assert_eq!(
            by_media("IMG_1.jpg").sidecar_path.as_deref(),
            Some(root.join("IMG_1.jpg.supplemental-metadata.json").as_path())
        );
        assert_eq!(
            by_media("IMG_1(1).jpg").sidecar_path.as_deref(),
            Some(root.join("IMG_1.jpg(1).json").as_path())
        );
        assert!(by_media("VID_2.mp4").sidecar.is_none());
    }

    #[test]
    fn test_stem_only_sidecar_and_orphan_sidecar() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("IMG_7.heic"), b"heic").unwrap();
        std::fs::write(root.join("IMG_7.json"), sidecar_json("IMG_7.HEIC")).unwrap();
        std::fs::write(root.join("IMG_9.json"), sidecar_json("IMG_9.jpg")).unwrap();

        let scan = scan_source(&LocalFileTree, root, false).unwrap();
        assert_eq!(scan.assets.len(), 2);

        let orphan = scan.assets.iter().find(|a| a.media.is_none()).unwrap();
        assert_eq!(orphan.sidecar.as_ref().unwrap().original_filename, "IMG_9.jpg");

        let paired = scan.assets.iter().find(|a| a.media.is_some()).unwrap();
        assert_eq!(paired.media.as_deref(), Some(root.join("IMG_7.heic").as_path()));
    }

    #[test]
    fn test_malformed_sidecar_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("IMG_3.jpg"), b"three").unwrap();
        std::fs::write(root.join("IMG_3.jpg.json"), b"{ broken").unwrap();

        let scan = scan_source(&LocalFileTree, root, false).unwrap();
        assert_eq!(scan.failures.len(), 1);
        assert!(matches!(scan.failures[0].1, SyncError::MalformedSidecar(_)));
        assert_eq!(scan.assets.len(), 1);
        assert!(scan.assets[0].sidecar.is_none());
    }
}
