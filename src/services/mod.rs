mod connection_manager;
mod encryption_service;
mod execution_service;
mod extraction_service;
mod notifier;
mod script_locator;
mod upload_service;
mod validation_service;

pub use connection_manager::ConnectionManager;
pub use encryption_service::EncryptionService;
pub use execution_service::ExecutionService;
pub use extraction_service::{ExtractionService, is_supported_archive};
pub use notifier::{ClientRegistry, NotificationSink};
pub use script_locator::ScriptLocator;
pub use upload_service::UploadService;
pub use validation_service::ValidationService;
