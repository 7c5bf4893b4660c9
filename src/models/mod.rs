pub mod events;
pub mod execution;
pub mod extraction;
pub mod script;
pub mod upload;

pub use events::ServerEvent;
pub use execution::{ExecutionJob, ExecutionStatus};
pub use extraction::{ArchiveInfo, ExtractedFile, ExtractionProgress, ExtractionResult};
pub use script::{ScriptDescriptor, ScriptPhase, ScriptResult, ScriptSet, ScriptType};
pub use upload::{ChecksumRequest, ScriptExecutionRequest, UploadMetadata};
