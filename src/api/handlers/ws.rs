use crate::api::dto::rpc::ClientRequest;
use crate::api::routes::AppState;
use crate::models::{ChecksumRequest, ScriptExecutionRequest, ServerEvent};
use crate::services::{NotificationSink, is_supported_archive};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const WELCOME: &str = "Connection established. You are the only client connected.";

pub async fn hub(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    if let Err(err) = state.connections.try_register(&connection_id) {
        tracing::warn!("Rejecting connection {}: {}", connection_id, err);
        let rejection = ServerEvent::message(state.connections.rejection_message());
        if let Ok(text) = serde_json::to_string(&rejection) {
            let _ = sender.send(Message::Text(text.into())).await;
        }
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let mut events = state.clients.register(&connection_id);
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!("Failed to encode {} event: {}", event.name(), err);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut session = HubSession::new(connection_id.clone(), state.clone());
    session.reply(WELCOME);

    // One reader per socket: chunks are applied in the order they arrive.
    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!("Socket error for {}: {}", connection_id, err);
                break;
            }
        };
        match message {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(bytes) => {
                session
                    .dispatch(ClientRequest::UploadChunk(bytes.to_vec()))
                    .await
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    disconnect(&state, &connection_id).await;
    let _ = writer.await;
}

/// Tears down per-connection state. Running jobs are left alone.
async fn disconnect(state: &AppState, connection_id: &str) {
    if let Some(received) = state.upload_service.bytes_received(connection_id).await {
        tracing::info!(
            "Discarding unfinished upload for {} after {} bytes",
            connection_id,
            received
        );
    }
    state.upload_service.cleanup(connection_id).await;
    state.extraction_service.cleanup(connection_id).await;
    state.connections.unregister(connection_id);
    state.clients.unregister(connection_id);
}

/// Per-socket dispatcher for hub calls.
struct HubSession {
    connection_id: String,
    state: AppState,
    uploads: HashMap<String, PathBuf>,
}

impl HubSession {
    fn new(connection_id: String, state: AppState) -> Self {
        Self {
            connection_id,
            state,
            uploads: HashMap::new(),
        }
    }

    fn reply(&self, text: impl Into<String>) {
        self.push(ServerEvent::message(text));
    }

    fn push(&self, event: ServerEvent) {
        self.state.clients.notify(&self.connection_id, event);
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => {
                tracing::debug!("Malformed request from {}: {}", self.connection_id, err);
                self.reply(format!("Error: Invalid request: {}", err));
            }
        }
    }

    async fn dispatch(&mut self, request: ClientRequest) {
        if let Err(err) = self.state.connections.ensure_active(&self.connection_id) {
            self.reply(format!("Error: {}", err));
            return;
        }

        let id = self.connection_id.clone();
        match request {
            ClientRequest::SendMessage(text) => {
                tracing::info!("Message from {}: {}", id, text);
                self.reply(format!("Echo: {}", text));
            }
            ClientRequest::StartUpload(metadata) => {
                match self.state.upload_service.start_upload(&id, &metadata).await {
                    Ok(message) => self.reply(message),
                    Err(err) => self.reply(format!("Upload start failed: {}", err)),
                }
            }
            ClientRequest::SetEncryptionKey(key) => {
                if let Err(err) = self.state.encryption_service.set_key_base64(&id, &key) {
                    self.reply(format!("Encryption key setup failed: {}", err));
                }
            }
            ClientRequest::UploadChunk(bytes) => {
                if let Err(err) = self.state.upload_service.process_chunk(&id, &bytes).await {
                    self.reply(format!("Chunk processing failed: {}", err));
                }
            }
            ClientRequest::EndUpload(checksum) => self.end_upload(checksum).await,
            ClientRequest::GetArchiveInfo(file_name) => self.archive_info(&file_name).await,
            ClientRequest::GetExtractionProgress => {
                match self.state.extraction_service.progress(&id) {
                    Some(progress) => self.push(ServerEvent::ExtractionProgress(progress)),
                    None => self.reply("No extraction in progress"),
                }
            }
            ClientRequest::StartScriptExecution(request) => self.start_execution(request),
            ClientRequest::CancelExecution(execution_id) => {
                if self.state.execution_service.cancel(&execution_id).await {
                    self.reply(format!("Execution {} cancelled", execution_id));
                } else {
                    self.reply(format!("Execution {} is not running", execution_id));
                }
            }
            ClientRequest::GetExecutionStatus(execution_id) => {
                let status = self.state.execution_service.get_status(&execution_id).await;
                self.reply(format!("Execution {} status: {:?}", execution_id, status));
            }
            ClientRequest::GetConnectionStatus => {
                self.reply(format!(
                    "Connection Status: {}/{} active connections",
                    self.state.connections.active_count(),
                    self.state.connections.max_connections()
                ));
            }
        }
    }

    async fn end_upload(&mut self, checksum: ChecksumRequest) {
        let completed = match self
            .state
            .upload_service
            .end_upload(&self.connection_id, &checksum.checksum_value)
            .await
        {
            Ok(completed) => completed,
            Err(err) => {
                self.reply(format!("Upload completion failed: {}", err));
                return;
            }
        };

        tracing::info!(
            "Upload {} assembled for {}: {} bytes",
            completed.file_name,
            self.connection_id,
            completed.bytes_received
        );
        self.reply(format!(
            "Upload completed successfully. Server checksum: {}",
            completed.checksum
        ));
        self.uploads
            .insert(completed.file_name.clone(), completed.file_path.clone());

        if is_supported_archive(&completed.file_name) {
            spawn_extraction(
                self.state.clone(),
                self.connection_id.clone(),
                completed.file_path,
            );
        }
    }

    /// Accepts either the name the client uploaded or the stored file name.
    async fn archive_info(&self, file_name: &str) {
        let path = self.uploads.get(file_name).cloned().unwrap_or_else(|| {
            self.state
                .upload_service
                .layout()
                .upload_path(&self.connection_id, file_name)
        });
        if !path.is_file() {
            self.reply("Error: File not found");
            return;
        }

        match self.state.extraction_service.archive_info(&path).await {
            Ok(info) => self.push(ServerEvent::ArchiveInfo(info)),
            Err(err) => self.reply(format!("Failed to get archive info: {}", err)),
        }
    }

    fn start_execution(&self, request: ScriptExecutionRequest) {
        let extracted_path = match self.resolve_extracted_path(request.extracted_path.as_deref()) {
            Ok(path) => path,
            Err(reason) => {
                self.reply(format!("Failed to start execution: {}", reason));
                return;
            }
        };

        tracing::info!(
            "Starting script execution for {}/{} in {}",
            request.version,
            request.os,
            extracted_path.display()
        );
        self.reply(format!(
            "Script execution started for {} on {}",
            request.version, request.os
        ));

        let service = self.state.execution_service.clone();
        let connection_id = self.connection_id.clone();
        tokio::spawn(async move {
            service
                .execute(&request.version, &request.os, &extracted_path, &connection_id)
                .await;
        });
    }

    /// Relative paths are taken from the latest extraction root.
    fn resolve_extracted_path(&self, requested: Option<&str>) -> Result<PathBuf, &'static str> {
        let latest = self
            .state
            .extraction_service
            .latest_extraction(&self.connection_id);

        let Some(requested) = requested.filter(|path| !path.trim().is_empty()) else {
            return latest.ok_or("No extracted bundle available");
        };

        let locator = self.state.execution_service.locator();
        if !locator.validate_script_path(requested) {
            return Err("Invalid extracted path");
        }

        let requested = PathBuf::from(requested);
        if requested.is_absolute() {
            return Ok(requested);
        }
        let base = latest.unwrap_or_else(|| {
            self.state
                .upload_service
                .layout()
                .connection_extract_dir(&self.connection_id)
        });
        Ok(base.join(requested))
    }
}

fn spawn_extraction(state: AppState, connection_id: String, archive_path: PathBuf) {
    tokio::spawn(async move {
        let extraction = state.extraction_service.clone();
        let task = extraction.extract(&archive_path, &connection_id);
        tokio::pin!(task);

        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut task => break result,
                _ = ticker.tick() => {
                    if let Some(progress) = extraction.progress(&connection_id) {
                        state
                            .clients
                            .notify(&connection_id, ServerEvent::ExtractionProgress(progress));
                    }
                }
            }
        };

        let message = if result.success {
            format!(
                "Extraction completed: {} files extracted to {}",
                result.file_count, result.extraction_path
            )
        } else {
            format!(
                "Extraction failed: {}",
                result.error_message.unwrap_or_default()
            )
        };
        state
            .clients
            .notify(&connection_id, ServerEvent::message(message));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::UploadMetadata;
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(state: &AppState, id: &str) -> (HubSession, UnboundedReceiver<ServerEvent>) {
        state.connections.try_register(id).unwrap();
        let rx = state.clients.register(id);
        (HubSession::new(id.to_string(), state.clone()), rx)
    }

    fn test_state(root: &std::path::Path) -> AppState {
        AppState::from_config(&Config {
            temp_root: root.to_path_buf(),
            ..Config::default()
        })
    }

    async fn next_message(rx: &mut UnboundedReceiver<ServerEvent>) -> String {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let ServerEvent::ReceiveMessage(text) = event {
                return text;
            }
        }
    }

    fn zip_bytes() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("python3.11/linux/installation.sh", options)
            .unwrap();
        writer.write_all(b"echo installed\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn echoes_and_reports_connection_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (mut session, mut rx) = connect(&state, "c1");

        session
            .handle_text(r#"{"method":"sendMessage","params":"hi"}"#)
            .await;
        assert_eq!(next_message(&mut rx).await, "Echo: hi");

        session
            .handle_text(r#"{"method":"getConnectionStatus"}"#)
            .await;
        assert_eq!(
            next_message(&mut rx).await,
            "Connection Status: 1/1 active connections"
        );

        session.handle_text("not json").await;
        assert!(next_message(&mut rx).await.starts_with("Error: Invalid request"));
    }

    #[tokio::test]
    async fn unadmitted_session_calls_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (_first, _rx) = connect(&state, "first");

        assert!(state.connections.try_register("second").is_err());
        let mut rx = state.clients.register("second");
        let mut session = HubSession::new("second".to_string(), state.clone());
        session
            .dispatch(ClientRequest::SendMessage("hi".to_string()))
            .await;
        assert!(next_message(&mut rx).await.starts_with("Error: Connection not authorized"));
        assert!(state.connections.is_active("first"));
    }

    async fn next_text<S>(socket: &mut S) -> String
    where
        S: futures_util::Stream<
                Item = Result<
                    tokio_tungstenite::tungstenite::Message,
                    tokio_tungstenite::tungstenite::Error,
                >,
            > + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let tokio_tungstenite::tungstenite::Message::Text(text) = frame {
                return text.as_str().to_string();
            }
        }
    }

    #[tokio::test]
    async fn second_socket_is_rejected_while_first_stays_usable() {
        use tokio_tungstenite::tungstenite::Message as ClientMessage;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = crate::api::create_router(state.clone(), None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        let url = format!("ws://{}/hub", addr);

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert!(next_text(&mut first).await.contains(WELCOME));

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let rejection = next_text(&mut second).await;
        assert!(
            rejection.contains("Connection rejected: Only 1 client(s) allowed at a time"),
            "{}",
            rejection
        );
        let closing = tokio::time::timeout(Duration::from_secs(10), second.next())
            .await
            .unwrap();
        assert!(
            matches!(closing, None | Some(Ok(ClientMessage::Close(_))) | Some(Err(_))),
            "{:?}",
            closing
        );

        first
            .send(ClientMessage::Text(
                r#"{"method":"sendMessage","params":"hi"}"#.into(),
            ))
            .await
            .unwrap();
        assert!(next_text(&mut first).await.contains("Echo: hi"));
        assert_eq!(state.connections.active_count(), 1);
    }

    #[tokio::test]
    async fn upload_then_extract_then_execute() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (mut session, mut rx) = connect(&state, "c1");

        let key = [9u8; 32];
        let payload = zip_bytes();
        session
            .dispatch(ClientRequest::SetEncryptionKey(BASE64.encode(key)))
            .await;
        session
            .dispatch(ClientRequest::StartUpload(UploadMetadata {
                file_name: "bundle.zip".to_string(),
                file_size: payload.len() as u64,
            }))
            .await;
        assert_eq!(next_message(&mut rx).await, "Server ready to receive: bundle.zip");

        let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
        for (i, chunk) in payload.chunks(64).enumerate() {
            let nonce = [i as u8; 12];
            let mut frame = nonce.to_vec();
            frame.extend(cipher.encrypt(Nonce::from_slice(&nonce), chunk).unwrap());
            session.dispatch(ClientRequest::UploadChunk(frame)).await;
        }

        let checksum = hex::encode(Sha256::digest(&payload));
        session
            .dispatch(ClientRequest::EndUpload(ChecksumRequest {
                checksum_value: checksum.to_uppercase(),
            }))
            .await;
        assert_eq!(
            next_message(&mut rx).await,
            format!("Upload completed successfully. Server checksum: {}", checksum)
        );
        assert!(next_message(&mut rx).await.starts_with("Extraction completed: 1 files"));
        assert!(state.extraction_service.latest_extraction("c1").is_some());

        session
            .dispatch(ClientRequest::GetArchiveInfo("bundle.zip".to_string()))
            .await;
        let info = loop {
            match rx.recv().await.unwrap() {
                ServerEvent::ArchiveInfo(info) => break info,
                _ => continue,
            }
        };
        assert_eq!(info.archive_type, "Zip");

        session
            .dispatch(ClientRequest::StartScriptExecution(ScriptExecutionRequest {
                version: "python3.11".to_string(),
                os: "linux".to_string(),
                extracted_path: None,
            }))
            .await;
        assert_eq!(
            next_message(&mut rx).await,
            "Script execution started for python3.11 on linux"
        );

        #[cfg(unix)]
        {
            let completed = loop {
                let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                if let ServerEvent::ExecutionCompleted { success, .. } = event {
                    break success;
                }
            };
            assert!(completed);
        }
    }

    #[tokio::test]
    async fn bad_checksum_deletes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (mut session, mut rx) = connect(&state, "c1");

        session
            .dispatch(ClientRequest::GetArchiveInfo("bundle.zip".to_string()))
            .await;
        assert_eq!(next_message(&mut rx).await, "Error: File not found");

        let key = [3u8; 32];
        let payload = zip_bytes();
        session
            .dispatch(ClientRequest::SetEncryptionKey(BASE64.encode(key)))
            .await;
        session
            .dispatch(ClientRequest::StartUpload(UploadMetadata {
                file_name: "bundle.zip".to_string(),
                file_size: payload.len() as u64,
            }))
            .await;
        next_message(&mut rx).await;

        let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
        let nonce = [0u8; 12];
        let mut frame = nonce.to_vec();
        frame.extend(cipher.encrypt(Nonce::from_slice(&nonce), payload.as_slice()).unwrap());
        session.dispatch(ClientRequest::UploadChunk(frame)).await;

        session
            .dispatch(ClientRequest::EndUpload(ChecksumRequest {
                checksum_value: "00".repeat(32),
            }))
            .await;
        assert_eq!(
            next_message(&mut rx).await,
            "Upload completion failed: Checksum validation failed"
        );
        let leftovers = std::fs::read_dir(state.upload_service.layout().upload_dir())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn rejects_extracted_path_outside_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (session, mut rx) = connect(&state, "c1");

        session.start_execution(ScriptExecutionRequest {
            version: "python3.11".to_string(),
            os: "linux".to_string(),
            extracted_path: Some("/etc".to_string()),
        });
        assert_eq!(
            next_message(&mut rx).await,
            "Failed to start execution: Invalid extracted path"
        );

        session.start_execution(ScriptExecutionRequest {
            version: "python3.11".to_string(),
            os: "linux".to_string(),
            extracted_path: None,
        });
        assert_eq!(
            next_message(&mut rx).await,
            "Failed to start execution: No extracted bundle available"
        );
    }

    #[tokio::test]
    async fn disconnect_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (session, _rx) = connect(&state, "c1");
        state
            .upload_service
            .start_upload(
                "c1",
                &UploadMetadata {
                    file_name: "bundle.zip".to_string(),
                    file_size: 10,
                },
            )
            .await
            .unwrap();
        drop(session);

        disconnect(&state, "c1").await;
        disconnect(&state, "c1").await;
        disconnect(&state, "never-connected").await;

        assert!(!state.connections.is_active("c1"));
        let leftovers = std::fs::read_dir(state.upload_service.layout().upload_dir())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }
}
