use std::path::Path;
use log::{error, info, warn};
use crate::state::{FolderJob, Options};
use crate::trash::Trash;

/// Finalize a successful encode.
///
/// Invoked only after the transcoder reports success. The original file is
/// never disposed of before the new output has been verified to exist and,
/// in in-place mode, taken its place; every failure along the way leaves a
/// recoverable, recorded state and lets processing continue.
pub fn commit_encode(
    job: &mut FolderJob,
    source: &Path,
    output: &Path,
    options: &Options,
    trash: &dyn Trash,
) {
    // The output must exist before the original is touched
    if !output.exists() {
        let msg = format!("encode output missing at commit: {}", output.display());
        error!("{}", msg);
        job.error_message = Some(msg);
        if let Some(entry) = job.file_index.get_mut(source) {
            entry.compressed = true;
        }
        return;
    }

    // Authoritative original size at this exact moment; it may differ from
    // the scan-time size if the file was modified concurrently.
    let original_bytes = std::fs::metadata(source).map(|m| m.len()).ok();
    let entry = job.file_index.entry(source.to_path_buf()).or_default();
    if let Some(bytes) = original_bytes {
        entry.original_bytes = bytes;
    }
    entry.compressed = true;

    // Size guard: an encode that grew the file is discarded by overwriting
    // the output's bytes with the original's, preserving the space-saving
    // guarantee at the cost of that file no longer being a real encode.
    if let (Ok(out_meta), Some(orig_bytes)) = (std::fs::metadata(output), original_bytes) {
        if out_meta.len() > orig_bytes {
            warn!(
                "Encode regressed ({} > {} bytes), keeping original bytes for: {}",
                out_meta.len(),
                orig_bytes,
                source.display()
            );
            if let Err(e) = std::fs::copy(source, output) {
                warn!("Size guard copy failed for {}: {}", source.display(), e);
            }
        }
    }

    if options.suffix.is_empty() {
        // In-place: move the original aside via the trash (recoverable until
        // the rename lands), then rename the temp output onto its path.
        if !trash.trash(source) {
            warn!(
                "Could not trash original before replace: {}",
                source.display()
            );
        }
        match std::fs::rename(output, source) {
            Ok(()) => {
                job.compressed_paths.insert(source.to_path_buf());
                info!("Replaced in place: {}", source.display());
            }
            Err(e) => {
                let msg = format!(
                    "failed to move {} onto {}: {}",
                    output.display(),
                    source.display(),
                    e
                );
                error!("{}", msg);
                job.error_message = Some(msg);
                // Record the temp path so the output is not silently lost
                job.compressed_paths.insert(output.to_path_buf());
            }
        }
    } else {
        job.compressed_paths.insert(output.to_path_buf());
        if !options.keep_original && !trash.trash(source) {
            warn!(
                "Could not trash original after suffix commit: {}",
                source.display()
            );
        }
        info!("Committed suffixed output: {}", output.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use crate::state::FileState;

    /// Deletes on trash, recording every call
    struct RecordingTrash {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl RecordingTrash {
        fn new() -> Self {
            RecordingTrash {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Trash for RecordingTrash {
        fn trash(&self, path: &Path) -> bool {
            self.calls.lock().unwrap().push(path.to_path_buf());
            fs::remove_file(path).is_ok()
        }
    }

    fn job_for(dir: &Path) -> FolderJob {
        FolderJob::new(dir.to_path_buf(), true)
    }

    fn options(suffix: &str, keep_original: bool) -> Options {
        Options {
            suffix: suffix.to_string(),
            keep_original,
            selected_folders: Vec::new(),
        }
    }

    #[test]
    fn in_place_commit_replaces_original_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let temp = dir.path().join("clip.temp.mp4");
        fs::write(&source, vec![1u8; 100]).unwrap();
        fs::write(&temp, vec![2u8; 40]).unwrap();

        let mut job = job_for(dir.path());
        job.file_index.insert(
            source.clone(),
            FileState {
                original_bytes: 100,
                compressed: false,
            },
        );

        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &temp, &options("", false), &trash);

        // The original path now holds the re-encoded bytes, no temp remains
        assert_eq!(fs::read(&source).unwrap(), vec![2u8; 40]);
        assert!(!temp.exists());
        assert_eq!(trash.calls(), vec![source.clone()]);
        assert!(job.compressed_paths.contains(&source));
        assert!(job.file_index[&source].compressed);
        assert_eq!(job.file_index[&source].original_bytes, 100);
    }

    #[test]
    fn suffix_commit_keeps_original_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let output = dir.path().join("clip_small.mp4");
        fs::write(&source, vec![1u8; 100]).unwrap();
        fs::write(&output, vec![2u8; 40]).unwrap();

        let mut job = job_for(dir.path());
        job.file_index.insert(
            source.clone(),
            FileState {
                original_bytes: 100,
                compressed: false,
            },
        );

        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &output, &options("_small", true), &trash);

        assert_eq!(fs::read(&source).unwrap(), vec![1u8; 100]);
        assert!(output.exists());
        assert!(trash.calls().is_empty());
        assert!(job.compressed_paths.contains(&output));
    }

    #[test]
    fn suffix_commit_trashes_original_when_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let output = dir.path().join("clip_small.mp4");
        fs::write(&source, vec![1u8; 100]).unwrap();
        fs::write(&output, vec![2u8; 40]).unwrap();

        let mut job = job_for(dir.path());
        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &output, &options("_small", false), &trash);

        assert!(!source.exists());
        assert!(output.exists());
        assert_eq!(trash.calls(), vec![source]);
    }

    #[test]
    fn in_place_rename_failure_records_the_temp_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let temp = dir.path().join("clip.temp.mp4");
        // A non-empty directory squatting on the source path makes the
        // rename fail on every platform, regardless of privileges.
        fs::create_dir(&source).unwrap();
        fs::write(source.join("occupant"), b"x").unwrap();
        fs::write(&temp, vec![2u8; 40]).unwrap();

        let mut job = job_for(dir.path());
        job.file_index.insert(
            source.clone(),
            FileState {
                original_bytes: 100,
                compressed: false,
            },
        );

        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &temp, &options("", false), &trash);

        // The output survives at its temp path and is recorded there, so
        // nothing is silently lost; the failure is captured for display.
        assert!(temp.exists());
        assert!(job.compressed_paths.contains(&temp));
        assert!(!job.compressed_paths.contains(&source));
        assert!(job.error_message.is_some());
        assert!(job.file_index[&source].compressed);
    }

    #[test]
    fn size_guard_keeps_original_bytes_when_encode_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let output = dir.path().join("clip_small.mp4");
        fs::write(&source, vec![1u8; 50]).unwrap();
        // Encoder produced something bigger than the original
        fs::write(&output, vec![2u8; 200]).unwrap();

        let mut job = job_for(dir.path());
        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &output, &options("_small", true), &trash);

        // Committed output's bytes equal the original's exactly
        assert_eq!(fs::read(&output).unwrap(), vec![1u8; 50]);
    }

    #[test]
    fn size_guard_applies_before_in_place_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let temp = dir.path().join("clip.temp.mp4");
        fs::write(&source, vec![1u8; 50]).unwrap();
        fs::write(&temp, vec![2u8; 200]).unwrap();

        let mut job = job_for(dir.path());
        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &temp, &options("", false), &trash);

        assert_eq!(fs::read(&source).unwrap(), vec![1u8; 50]);
        assert!(!temp.exists());
    }

    #[test]
    fn commit_re_stats_the_original_at_commit_time() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let output = dir.path().join("clip_small.mp4");
        // The file grew since the scan recorded 10 bytes
        fs::write(&source, vec![1u8; 80]).unwrap();
        fs::write(&output, vec![2u8; 40]).unwrap();

        let mut job = job_for(dir.path());
        job.file_index.insert(
            source.clone(),
            FileState {
                original_bytes: 10,
                compressed: false,
            },
        );

        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &output, &options("_small", true), &trash);
        assert_eq!(job.file_index[&source].original_bytes, 80);
    }

    #[test]
    fn missing_output_never_touches_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let gone = dir.path().join("clip.temp.mp4");
        fs::write(&source, vec![1u8; 100]).unwrap();

        let mut job = job_for(dir.path());
        job.file_index.insert(
            source.clone(),
            FileState {
                original_bytes: 100,
                compressed: false,
            },
        );

        let trash = RecordingTrash::new();
        commit_encode(&mut job, &source, &gone, &options("", false), &trash);

        // Original untouched and recoverable; the failure is recorded
        assert_eq!(fs::read(&source).unwrap(), vec![1u8; 100]);
        assert!(trash.calls().is_empty());
        assert!(job.error_message.is_some());
        // Entry is still marked done so the queue keeps moving
        assert!(job.file_index[&source].compressed);
    }
}
