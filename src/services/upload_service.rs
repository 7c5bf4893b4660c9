use crate::error::{AppError, Result};
use crate::models::UploadMetadata;
use crate::paths::ScratchLayout;
use crate::services::{EncryptionService, ValidationService};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

struct UploadSession {
    file_name: String,
    file_size: u64,
    file_path: PathBuf,
    file: Option<fs::File>,
    start_time: DateTime<Utc>,
    bytes_received: u64,
}

/// A verified, fully assembled upload.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub file_name: String,
    pub file_path: PathBuf,
    pub checksum: String,
    pub bytes_received: u64,
}

/// Owns one upload session per connection and assembles decrypted chunks on disk.
#[derive(Clone)]
pub struct UploadService {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>>,
    validation: ValidationService,
    encryption: EncryptionService,
    layout: ScratchLayout,
}

impl UploadService {
    pub fn new(
        validation: ValidationService,
        encryption: EncryptionService,
        layout: ScratchLayout,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            validation,
            encryption,
            layout,
        }
    }

    pub fn layout(&self) -> &ScratchLayout {
        &self.layout
    }

    pub async fn start_upload(
        &self,
        connection_id: &str,
        metadata: &UploadMetadata,
    ) -> Result<String> {
        let safe_name = self.validation.validate_upload(metadata)?;

        // A repeated start replaces the previous session.
        self.discard_session(connection_id).await;

        let upload_dir = self.layout.upload_dir();
        fs::create_dir_all(&upload_dir).await?;
        let file_path = self.layout.upload_path(connection_id, &safe_name);
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await?;

        let session = UploadSession {
            file_name: metadata.file_name.clone(),
            file_size: metadata.file_size,
            file_path: file_path.clone(),
            file: Some(file),
            start_time: Utc::now(),
            bytes_received: 0,
        };
        self.sessions
            .write()
            .await
            .insert(connection_id.to_string(), Arc::new(Mutex::new(session)));

        tracing::info!(
            "Upload started for {}: {} ({} bytes) -> {}",
            connection_id,
            metadata.file_name,
            metadata.file_size,
            file_path.display()
        );
        Ok(format!("Server ready to receive: {}", metadata.file_name))
    }

    /// Decrypts and appends one chunk. Any failure tears the session down.
    pub async fn process_chunk(&self, connection_id: &str, encrypted: &[u8]) -> Result<u64> {
        match self.append_chunk(connection_id, encrypted).await {
            Ok(received) => Ok(received),
            Err(err) => {
                tracing::warn!("Chunk rejected for {}: {}", connection_id, err);
                self.cleanup(connection_id).await;
                Err(err)
            }
        }
    }

    async fn append_chunk(&self, connection_id: &str, encrypted: &[u8]) -> Result<u64> {
        let session = self
            .sessions
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or(AppError::NoActiveSession)?;
        let mut session = session.lock().await;

        let plaintext = self.encryption.decrypt(connection_id, encrypted)?;
        let received = session.bytes_received + plaintext.len() as u64;
        if received > session.file_size {
            return Err(AppError::Validation(format!(
                "Received {} bytes, more than the declared {} bytes",
                received, session.file_size
            )));
        }

        let file = session
            .file
            .as_mut()
            .ok_or_else(|| AppError::Execution("File handle is not available".to_string()))?;
        file.write_all(&plaintext).await?;
        session.bytes_received = received;
        Ok(received)
    }

    pub async fn end_upload(
        &self,
        connection_id: &str,
        expected_checksum: &str,
    ) -> Result<CompletedUpload> {
        let session = self
            .sessions
            .write()
            .await
            .remove(connection_id)
            .ok_or(AppError::NoActiveSession)?;
        let mut session = session.lock().await;

        match self.finish_session(&mut session, expected_checksum).await {
            Ok(checksum) => {
                let elapsed = Utc::now() - session.start_time;
                tracing::info!(
                    "Upload completed for {}: {} bytes in {} ms",
                    connection_id,
                    session.bytes_received,
                    elapsed.num_milliseconds()
                );
                Ok(CompletedUpload {
                    file_name: session.file_name.clone(),
                    file_path: session.file_path.clone(),
                    checksum,
                    bytes_received: session.bytes_received,
                })
            }
            Err(err) => {
                tracing::warn!("Upload failed for {}: {}", connection_id, err);
                remove_partial_file(&session.file_path).await;
                self.encryption.remove_key(connection_id);
                Err(err)
            }
        }
    }

    async fn finish_session(
        &self,
        session: &mut UploadSession,
        expected_checksum: &str,
    ) -> Result<String> {
        if let Some(mut file) = session.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        let validation = self.validation.clone();
        let path = session.file_path.clone();
        let expected = expected_checksum.to_string();
        tokio::task::spawn_blocking(move || validation.verify_checksum(&path, &expected))
            .await
            .map_err(|e| AppError::Execution(format!("Checksum task failed: {}", e)))?
    }

    /// Closes any open handle, deletes any partial file and forgets the key. Idempotent.
    pub async fn cleanup(&self, connection_id: &str) {
        self.discard_session(connection_id).await;
        self.encryption.remove_key(connection_id);
    }

    pub async fn bytes_received(&self, connection_id: &str) -> Option<u64> {
        let session = self.sessions.read().await.get(connection_id).cloned()?;
        let received = session.lock().await.bytes_received;
        Some(received)
    }

    async fn discard_session(&self, connection_id: &str) {
        let removed = self.sessions.write().await.remove(connection_id);
        if let Some(session) = removed {
            let mut session = session.lock().await;
            drop(session.file.take());
            remove_partial_file(&session.file_path).await;
            tracing::debug!("Discarded upload session for {}", connection_id);
        }
    }
}

async fn remove_partial_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("Failed to delete file {}: {}", path.display(), err),
    }
}
