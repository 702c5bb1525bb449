use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::state::FileState;
use log::{debug, warn};

/// Video file extensions eligible for re-encoding (matched case-insensitively)
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "wmv", "flv", "m4v"];

/// Path components that mark a trash/recycle area; nothing under these is
/// ever indexed as a source file.
const TRASH_COMPONENTS: &[&str] = &[".Trash", ".Trashes", ".trash", "$RECYCLE.BIN", ".recycle"];

/// Rebuild a job's file index from disk.
///
/// Produces a brand-new index (full replacement), so files removed from disk
/// since the last scan vanish from tracking and totals shrink accordingly.
/// An entry is carried over as `compressed` only if the same path was already
/// marked completed in `existing`. Members of `existing_outputs` are never
/// indexed, which keeps a job from re-encoding its own output.
///
/// Traversal errors are swallowed per-entry; scanning never fails the job.
pub fn scan_folder(
    root: &Path,
    recursive: bool,
    existing: &BTreeMap<PathBuf, FileState>,
    existing_outputs: &BTreeSet<PathBuf>,
) -> BTreeMap<PathBuf, FileState> {
    let mut index = BTreeMap::new();

    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker.into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }

        if in_trash_area(path) {
            debug!("Skipping trash-area entry: {}", path.display());
            continue;
        }

        if existing_outputs.contains(path) {
            debug!("Skipping produced output: {}", path.display());
            continue;
        }

        if !has_video_extension(path) {
            continue;
        }

        // In-flight temp outputs from an interrupted run are never sources
        if is_temp_output(path) {
            debug!("Skipping temp output: {}", path.display());
            continue;
        }

        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                continue;
            }
        };

        let compressed = existing.get(path).map(|f| f.compressed).unwrap_or(false);
        index.insert(
            path.to_path_buf(),
            FileState {
                original_bytes: size,
                compressed,
            },
        );
    }

    debug!(
        "Scan of {} complete: {} files indexed",
        root.display(),
        index.len()
    );
    index
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn in_trash_area(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(is_trash_component)
            .unwrap_or(false)
    })
}

/// Exact trash directory names, plus the per-user `.Trash-<uid>` form used
/// on removable volumes. Names that merely share a prefix (a user folder
/// called `.trash-exports`, say) are ordinary directories.
fn is_trash_component(name: &str) -> bool {
    TRASH_COMPONENTS.contains(&name)
        || name
            .strip_prefix(".Trash-")
            .map(|uid| !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
}

/// Matches the `<stem>.temp.<ext>` naming used for in-place encode outputs
pub fn is_temp_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with(".temp"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, bytes: usize) {
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn filters_to_video_extensions_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);
        touch(&dir.path().join("b.MKV"), 20);
        touch(&dir.path().join("notes.txt"), 5);
        touch(&dir.path().join("noext"), 5);

        let index = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(index.len(), 2);
        assert_eq!(index[&dir.path().join("a.mp4")].original_bytes, 10);
        assert_eq!(index[&dir.path().join("b.MKV")].original_bytes, 20);
    }

    #[test]
    fn non_recursive_scan_stays_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top.mp4"), 1);
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/nested.mp4"), 1);

        let flat = scan_folder(dir.path(), false, &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(flat.len(), 1);

        let deep = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn produced_outputs_and_trash_areas_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("clip.mp4"), 10);
        touch(&dir.path().join("clip_small.mp4"), 4);
        fs::create_dir(dir.path().join(".Trash")).unwrap();
        touch(&dir.path().join(".Trash/old.mp4"), 10);

        let mut outputs = BTreeSet::new();
        outputs.insert(dir.path().join("clip_small.mp4"));

        let index = scan_folder(dir.path(), true, &BTreeMap::new(), &outputs);
        assert_eq!(index.len(), 1);
        assert!(index.contains_key(&dir.path().join("clip.mp4")));
    }

    #[test]
    fn trash_matching_is_exact_not_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".trash-exports")).unwrap();
        touch(&dir.path().join(".trash-exports/keep.mp4"), 10);
        fs::create_dir(dir.path().join(".Trash-1000")).unwrap();
        touch(&dir.path().join(".Trash-1000/old.mp4"), 10);

        let index = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        // The per-user trash is excluded; the prefix-alike folder is not
        assert_eq!(index.len(), 1);
        assert!(index.contains_key(&dir.path().join(".trash-exports/keep.mp4")));
    }

    #[test]
    fn temp_outputs_are_never_indexed() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("clip.mp4"), 10);
        touch(&dir.path().join("clip.temp.mp4"), 3);

        let index = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(index.len(), 1);
        assert!(index.contains_key(&dir.path().join("clip.mp4")));
    }

    #[test]
    fn rescan_preserves_compressed_flags_and_drops_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);
        touch(&dir.path().join("b.mp4"), 20);

        let mut first = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        first.get_mut(&dir.path().join("a.mp4")).unwrap().compressed = true;

        // b.mp4 disappears before the rescan
        fs::remove_file(dir.path().join("b.mp4")).unwrap();

        let second = scan_folder(dir.path(), true, &first, &BTreeSet::new());
        assert_eq!(second.len(), 1);
        assert!(second[&dir.path().join("a.mp4")].compressed);
    }

    #[test]
    fn rescan_of_unchanged_tree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);
        touch(&dir.path().join("b.mov"), 20);

        let first = scan_folder(dir.path(), true, &BTreeMap::new(), &BTreeSet::new());
        let second = scan_folder(dir.path(), true, &first, &BTreeSet::new());
        assert_eq!(first, second);
    }

    #[test]
    fn scanning_a_missing_root_yields_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let index = scan_folder(&gone, true, &BTreeMap::new(), &BTreeSet::new());
        assert!(index.is_empty());
    }
}
