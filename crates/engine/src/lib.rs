pub mod commit;
pub mod config;
pub mod notify;
pub mod orchestrator;
pub mod scan;
pub mod state;
pub mod transcode;
pub mod trash;

pub use config::EngineConfig;
pub use notify::{LogNotifier, Notifier, NullNotifier};
pub use orchestrator::Orchestrator;
pub use state::{FileState, FolderJob, JobStatus, JsonStateStore, Options, StateDocument, StateStore};
pub use transcode::{EncodeHandle, EncodeOutcome, EncodeRequest, FfmpegTranscoder, NamingMode, Transcoder};
pub use trash::{NullTrash, SystemTrash, Trash};
