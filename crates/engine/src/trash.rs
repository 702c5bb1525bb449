use std::path::Path;
use log::warn;

/// Best-effort disposal of a file. Failure is reported, never fatal: the
/// commit engine logs it and proceeds with its fallback behavior.
pub trait Trash: Send + Sync {
    fn trash(&self, path: &Path) -> bool;
}

/// Sends files to the operating system trash/recycle area
pub struct SystemTrash;

impl Trash for SystemTrash {
    fn trash(&self, path: &Path) -> bool {
        match trash::delete(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to trash {}: {}", path.display(), e);
                false
            }
        }
    }
}

/// Leaves files untouched; for dry runs and tests
pub struct NullTrash;

impl Trash for NullTrash {
    fn trash(&self, _path: &Path) -> bool {
        true
    }
}
