use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-file record: size observed at the last scan and whether the file has
/// been encoded and committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileState {
    pub original_bytes: u64,
    pub compressed: bool,
}

/// Lifecycle of a folder job across runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// One tracked root folder with its file inventory.
///
/// Totals are always derived from `file_index`, never stored, so a crash or
/// rescan can never leave them out of sync with the inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderJob {
    pub display_name: String,
    pub folder_path: PathBuf,
    pub recursive: bool,
    pub status: JobStatus,
    /// Authoritative inventory as of the last scan, replaced wholesale on rescan
    pub file_index: BTreeMap<PathBuf, FileState>,
    /// File being (or last being) processed
    pub current_file: Option<PathBuf>,
    /// Most recent failure detail, for display
    pub error_message: Option<String>,
    /// Outputs this job has produced; excluded from future scans
    pub compressed_paths: BTreeSet<PathBuf>,
}

impl FolderJob {
    pub fn new(folder_path: PathBuf, recursive: bool) -> Self {
        let display_name = folder_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| folder_path.to_string_lossy().into_owned());
        FolderJob {
            display_name,
            folder_path,
            recursive,
            ..Default::default()
        }
    }

    /// Sum of scanned sizes over the whole inventory
    pub fn total_bytes(&self) -> u64 {
        self.file_index.values().map(|f| f.original_bytes).sum()
    }

    /// Sum of scanned sizes over committed entries; never exceeds `total_bytes`
    pub fn processed_bytes(&self) -> u64 {
        self.file_index
            .values()
            .filter(|f| f.compressed)
            .map(|f| f.original_bytes)
            .sum()
    }
}

/// Global options persisted alongside the jobs.
///
/// An empty `suffix` selects in-place mode; a non-empty suffix writes a
/// sibling output named `<stem><suffix>.mp4`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub suffix: String,
    pub keep_original: bool,
    pub selected_folders: Vec<PathBuf>,
}

/// The persisted document: single source of truth for jobs and options.
///
/// Every field defaults so documents written by older or newer versions load
/// without error; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub jobs: BTreeMap<PathBuf, FolderJob>,
    pub options: Options,
}

/// Durable load/save interface for the state document.
///
/// Saves are issued synchronously after every mutation that must survive a
/// crash; the single worker guarantees writes never overlap.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<StateDocument>;
    fn save(&self, doc: &StateDocument) -> Result<()>;
}

/// JSON-file backed store. A missing file yields the default document; saves
/// go through a sibling temp file and a rename so a crash mid-write never
/// leaves a torn document behind.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: PathBuf) -> Self {
        JsonStateStore { path }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let doc: StateDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        Ok(doc)
    }

    fn save(&self, doc: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory: {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(doc).context("Failed to serialize state")?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "Failed to move state file into place: {} -> {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<StateDocument>,
}

impl MemoryStateStore {
    pub fn new(doc: StateDocument) -> Self {
        MemoryStateStore {
            inner: Mutex::new(doc),
        }
    }

    pub fn snapshot(&self) -> StateDocument {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateDocument> {
        Ok(self.snapshot())
    }

    fn save(&self, doc: &StateDocument) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = doc.clone();
        Ok(())
    }
}

/// Look up a job by its folder path, creating it if absent
pub fn ensure_job<'a>(
    doc: &'a mut StateDocument,
    folder: &Path,
    recursive: bool,
) -> &'a mut FolderJob {
    doc.jobs
        .entry(folder.to_path_buf())
        .or_insert_with(|| FolderJob::new(folder.to_path_buf(), recursive))
}
