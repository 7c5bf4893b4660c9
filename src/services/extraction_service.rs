use crate::error::{AppError, Result};
use crate::models::{ArchiveInfo, ExtractedFile, ExtractionProgress, ExtractionResult};
use crate::paths::ScratchLayout;
use crate::services::validation_service::split_extension;
use bzip2::read::BzDecoder;
use chrono::Utc;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use xz2::read::XzDecoder;

const SUPPORTED_EXTENSIONS: [&str; 8] = ["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz"];

const SEVEN_ZIP_AES_METHOD: &[u8] = sevenz_rust::SevenZMethod::ID_AES256SHA256;

type SharedProgress = Arc<Mutex<ExtractionProgress>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Gzip,
    Bzip2,
    Xz,
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let kind = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Self::TarBz2
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Self::TarXz
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".7z") {
            Self::SevenZip
        } else if lower.ends_with(".rar") {
            Self::Rar
        } else if lower.ends_with(".gz") {
            Self::Gzip
        } else if lower.ends_with(".bz2") {
            Self::Bzip2
        } else if lower.ends_with(".xz") {
            Self::Xz
        } else {
            return None;
        };
        Some(kind)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Zip => "Zip",
            Self::Tar => "Tar",
            Self::TarGz => "Tar.GZip",
            Self::TarBz2 => "Tar.BZip2",
            Self::TarXz => "Tar.Xz",
            Self::Gzip => "GZip",
            Self::Bzip2 => "BZip2",
            Self::Xz => "Xz",
            Self::SevenZip => "SevenZip",
            Self::Rar => "Rar",
        }
    }

    fn is_tar(self) -> bool {
        matches!(self, Self::Tar | Self::TarGz | Self::TarBz2 | Self::TarXz)
    }
}

pub fn is_supported_archive(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    if name.to_ascii_lowercase().ends_with(".tar.gz") {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Unpacks uploaded archives into per-connection extraction roots.
#[derive(Clone)]
pub struct ExtractionService {
    layout: ScratchLayout,
    progress: Arc<RwLock<HashMap<String, SharedProgress>>>,
    latest: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl ExtractionService {
    pub fn new(layout: ScratchLayout) -> Self {
        Self {
            layout,
            progress: Arc::new(RwLock::new(HashMap::new())),
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn extract(&self, archive_path: &Path, connection_id: &str) -> ExtractionResult {
        let started = Instant::now();
        let extraction_path = self.extraction_path_for(connection_id, archive_path);
        let mut result = ExtractionResult {
            extraction_path: extraction_path.to_string_lossy().to_string(),
            ..Default::default()
        };

        let progress: SharedProgress = Arc::new(Mutex::new(ExtractionProgress::default()));
        self.progress
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connection_id.to_string(), progress.clone());

        let archive = archive_path.to_path_buf();
        let root = extraction_path.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<Vec<ExtractedFile>> {
            extract_blocking(&archive, &root, &progress)?;
            collect_files(&root)
        })
        .await
        .map_err(|e| AppError::Archive(format!("Extraction task failed: {}", e)))
        .and_then(|inner| inner);

        self.progress
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(connection_id);

        match outcome {
            Ok(files) => {
                result.success = true;
                result.file_count = files.iter().filter(|f| !f.is_directory).count();
                result.total_size = files.iter().map(|f| f.size).sum();
                result.files = files;
                self.latest
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(connection_id.to_string(), extraction_path.clone());
                tracing::info!(
                    "Extracted {} files from {} into {}",
                    result.file_count,
                    archive_path.display(),
                    extraction_path.display()
                );
            }
            Err(err) => {
                tracing::error!("Extraction of {} failed: {}", archive_path.display(), err);
                result.success = false;
                result.error_message = Some(err.to_string());
            }
        }

        result.duration = started.elapsed();
        result
    }

    pub fn progress(&self, connection_id: &str) -> Option<ExtractionProgress> {
        let map = self
            .progress
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let shared = map.get(connection_id)?;
        let snapshot = shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Some(snapshot)
    }

    /// Root of the most recent successful extraction for this connection.
    pub fn latest_extraction(&self, connection_id: &str) -> Option<PathBuf> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(connection_id)
            .cloned()
    }

    pub async fn archive_info(&self, archive_path: &Path) -> Result<ArchiveInfo> {
        let path = archive_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_archive_info(&path))
            .await
            .map_err(|e| AppError::Archive(format!("Archive info task failed: {}", e)))?
    }

    pub fn extraction_path_for(&self, connection_id: &str, archive_path: &Path) -> PathBuf {
        let file_name = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let (stem, _) = split_extension(&file_name);
        let timestamp = Utc::now().timestamp_micros();
        self.layout
            .connection_extract_dir(connection_id)
            .join(format!("{}_{}", timestamp, stem))
    }

    /// Best effort: failures are logged, never raised.
    pub async fn cleanup(&self, connection_id: &str) {
        self.latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(connection_id);

        let dir = self.layout.connection_extract_dir(connection_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!("Removed extraction folder for connection: {}", connection_id),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("Failed to remove {}: {}", dir.display(), err),
        }
    }
}

fn extract_blocking(archive_path: &Path, root: &Path, progress: &SharedProgress) -> Result<()> {
    if !archive_path.is_file() {
        return Err(AppError::Archive(format!(
            "Archive file not found: {}",
            archive_path.display()
        )));
    }
    let name = archive_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = ArchiveKind::detect(&name)
        .ok_or_else(|| AppError::Archive(format!("Unsupported archive type: {}", name)))?;

    fs::create_dir_all(root)?;
    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive_path, root, progress),
        _ => GeneralArchive::open(archive_path, kind)?.extract_to(root, progress),
    }
}

/// Two passes over the gzip stream: count entries, then re-stream and write them.
fn extract_tar_gz(archive_path: &Path, root: &Path, progress: &SharedProgress) -> Result<()> {
    let open = || -> Result<tar::Archive<GzDecoder<fs::File>>> {
        Ok(tar::Archive::new(GzDecoder::new(fs::File::open(archive_path)?)))
    };

    let mut counter = open()?;
    let mut total_entries = 0;
    let mut total_bytes = 0;
    for entry in counter.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        if !entry.header().entry_type().is_dir() {
            total_entries += 1;
            total_bytes += entry.size();
        }
    }
    with_progress(progress, |p| {
        p.total_entries = total_entries;
        p.total_bytes = total_bytes;
    });

    let mut archive = open()?;
    write_tar_entries(&mut archive, root, progress)
}

fn write_tar_entries<R: Read>(
    archive: &mut tar::Archive<R>,
    root: &Path,
    progress: &SharedProgress,
) -> Result<()> {
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let entry_type = entry.header().entry_type();
        let relative = entry.path().map_err(archive_err)?.into_owned();
        let Some(destination) = safe_join(root, &relative)? else {
            if entry_type.is_dir() {
                continue;
            }
            return Err(AppError::Archive("Empty file path in archive".to_string()));
        };

        if entry_type.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if !entry_type.is_file() && entry_type != tar::EntryType::Continuous {
            tracing::debug!("Skipping non-regular tar entry {}", relative.display());
            continue;
        }

        let modified = entry
            .header()
            .mtime()
            .ok()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        let mode = entry.header().mode().ok();
        let size = write_entry(&mut entry, &destination, modified, mode)?;
        let name = relative.to_string_lossy();
        with_progress(progress, |p| p.record_entry(&name, size));
    }
    Ok(())
}

struct EntryMeta {
    name: String,
    size: u64,
    is_dir: bool,
    encrypted: bool,
}

/// Any non-tar.gz format, opened with its entry listing known up front.
struct GeneralArchive {
    path: PathBuf,
    kind: ArchiveKind,
    entries: Vec<EntryMeta>,
    sealed: bool,
}

impl GeneralArchive {
    fn open(path: &Path, kind: ArchiveKind) -> Result<Self> {
        let mut sealed = false;
        let entries = match kind {
            ArchiveKind::Zip => list_zip(path)?,
            ArchiveKind::SevenZip => list_seven_zip(path)?.unwrap_or_else(|| {
                sealed = true;
                Vec::new()
            }),
            kind if kind.is_tar() => list_tar(open_tar(path, kind)?)?,
            ArchiveKind::Gzip | ArchiveKind::Bzip2 | ArchiveKind::Xz => {
                let mut reader = open_stream(path, kind)?;
                let size = io::copy(&mut reader, &mut io::sink()).map_err(archive_err)?;
                vec![EntryMeta {
                    name: single_stream_name(path),
                    size,
                    is_dir: false,
                    encrypted: false,
                }]
            }
            _ => {
                return Err(AppError::Archive(format!(
                    "{} archives are not supported",
                    kind.label().to_uppercase()
                )));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            entries,
            sealed,
        })
    }

    fn file_entries(&self) -> impl Iterator<Item = &EntryMeta> {
        self.entries.iter().filter(|entry| !entry.is_dir)
    }

    fn info(&self) -> Result<ArchiveInfo> {
        Ok(ArchiveInfo {
            archive_type: self.kind.label().to_string(),
            compressed_size: fs::metadata(&self.path)?.len(),
            uncompressed_size: self.file_entries().map(|entry| entry.size).sum(),
            entry_count: self.entries.len() as u64,
            is_password_protected: self.sealed || self.entries.iter().any(|entry| entry.encrypted),
            file_list: self.file_entries().map(|entry| entry.name.clone()).collect(),
        })
    }

    fn extract_to(&self, root: &Path, progress: &SharedProgress) -> Result<()> {
        with_progress(progress, |p| {
            p.total_entries = self.file_entries().count() as u64;
            p.total_bytes = self.file_entries().map(|entry| entry.size).sum();
        });

        match self.kind {
            ArchiveKind::Zip => extract_zip(&self.path, root, progress),
            ArchiveKind::SevenZip => extract_seven_zip(&self.path, root, progress),
            kind if kind.is_tar() => {
                let mut archive = open_tar(&self.path, kind)?;
                write_tar_entries(&mut archive, root, progress)
            }
            kind => {
                let name = single_stream_name(&self.path);
                let destination = file_destination(root, Path::new(&name))?;
                let mut reader = open_stream(&self.path, kind)?;
                let size = write_entry(&mut reader, &destination, None, None)?;
                with_progress(progress, |p| p.record_entry(&name, size));
                Ok(())
            }
        }
    }
}

fn read_archive_info(path: &Path) -> Result<ArchiveInfo> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = ArchiveKind::detect(&name)
        .ok_or_else(|| AppError::Archive(format!("Unsupported archive type: {}", name)))?;
    GeneralArchive::open(path, kind)?.info()
}

fn open_stream(path: &Path, kind: ArchiveKind) -> Result<Box<dyn Read>> {
    let file = fs::File::open(path)?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz | ArchiveKind::Gzip => Box::new(GzDecoder::new(file)),
        ArchiveKind::TarBz2 | ArchiveKind::Bzip2 => Box::new(BzDecoder::new(file)),
        ArchiveKind::TarXz | ArchiveKind::Xz => Box::new(XzDecoder::new(file)),
        other => {
            return Err(AppError::Archive(format!(
                "{} is not a stream format",
                other.label()
            )));
        }
    };
    Ok(reader)
}

fn open_tar(path: &Path, kind: ArchiveKind) -> Result<tar::Archive<Box<dyn Read>>> {
    Ok(tar::Archive::new(open_stream(path, kind)?))
}

fn list_tar<R: Read>(mut archive: tar::Archive<R>) -> Result<Vec<EntryMeta>> {
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        entries.push(EntryMeta {
            name: entry.path().map_err(archive_err)?.to_string_lossy().to_string(),
            size: entry.size(),
            is_dir: entry.header().entry_type().is_dir(),
            encrypted: false,
        });
    }
    Ok(entries)
}

fn list_zip(path: &Path) -> Result<Vec<EntryMeta>> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path)?)
        .map_err(|e| AppError::Archive(format!("Invalid zip archive: {}", e)))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index_raw(i)
            .map_err(|e| AppError::Archive(format!("Failed to read archive: {}", e)))?;
        entries.push(EntryMeta {
            name: file.name().to_string(),
            size: file.size(),
            is_dir: file.is_dir(),
            encrypted: file.encrypted(),
        });
    }
    Ok(entries)
}

fn extract_zip(path: &Path, root: &Path, progress: &SharedProgress) -> Result<()> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path)?)
        .map_err(|e| AppError::Archive(format!("Invalid zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| AppError::Archive(format!("Failed to read archive: {}", e)))?;

        let Some(relative_path) = file.enclosed_name() else {
            return Err(AppError::Archive(format!(
                "Invalid file path in archive: {}",
                file.name()
            )));
        };
        let destination = root.join(relative_path);

        if file.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }

        let modified = file.last_modified().and_then(zip_time);
        let mode = file.unix_mode();
        let name = file.name().to_string();
        let size = write_entry(&mut file, &destination, modified, mode)?;
        with_progress(progress, |p| p.record_entry(&name, size));
    }

    Ok(())
}

fn zip_time(value: zip::DateTime) -> Option<SystemTime> {
    let naive = chrono::NaiveDate::from_ymd_opt(
        value.year().into(),
        value.month().into(),
        value.day().into(),
    )?
    .and_hms_opt(
        value.hour().into(),
        value.minute().into(),
        value.second().into(),
    )?;
    Some(naive.and_utc().into())
}

/// `None` when the headers themselves are encrypted and nothing can be listed.
fn list_seven_zip(path: &Path) -> Result<Option<Vec<EntryMeta>>> {
    let reader = match sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()) {
        Ok(reader) => reader,
        Err(sevenz_rust::Error::PasswordRequired | sevenz_rust::Error::MaybeBadPassword(_)) => {
            return Ok(None);
        }
        Err(e) => return Err(AppError::Archive(format!("Invalid 7z archive: {}", e))),
    };

    let archive = reader.archive();
    let encrypted = archive
        .folders
        .iter()
        .flat_map(|folder| folder.coders.iter())
        .any(|coder| coder.decompression_method_id() == SEVEN_ZIP_AES_METHOD);
    let entries = archive
        .files
        .iter()
        .map(|entry| EntryMeta {
            name: entry.name().to_string(),
            size: entry.size(),
            is_dir: entry.is_directory(),
            encrypted: encrypted && entry.has_stream(),
        })
        .collect();
    Ok(Some(entries))
}

fn extract_seven_zip(path: &Path, root: &Path, progress: &SharedProgress) -> Result<()> {
    let mut reader = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())
        .map_err(|e| AppError::Archive(format!("Invalid 7z archive: {}", e)))?;

    let mut failure: Option<AppError> = None;
    reader
        .for_each_entries(|entry, data| {
            let relative = PathBuf::from(entry.name());
            let written = if entry.is_directory() {
                safe_join(root, &relative).and_then(|destination| {
                    if let Some(destination) = destination {
                        fs::create_dir_all(&destination)?;
                    }
                    Ok(None)
                })
            } else {
                let modified = entry
                    .has_last_modified_date
                    .then(|| SystemTime::from(entry.last_modified_date()));
                file_destination(root, &relative)
                    .and_then(|destination| write_entry(data, &destination, modified, None))
                    .map(Some)
            };
            match written {
                Ok(Some(size)) => {
                    with_progress(progress, |p| p.record_entry(entry.name(), size));
                    Ok(true)
                }
                Ok(None) => Ok(true),
                Err(err) => {
                    failure = Some(err);
                    Ok(false)
                }
            }
        })
        .map_err(|e| AppError::Archive(format!("Failed to read 7z archive: {}", e)))?;

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Writes one entry through a temp file so an existing file is replaced atomically.
fn write_entry<R: Read + ?Sized>(
    reader: &mut R,
    destination: &Path,
    modified: Option<SystemTime>,
    mode: Option<u32>,
) -> Result<u64> {
    let parent = destination
        .parent()
        .ok_or_else(|| AppError::Archive(format!("Invalid entry path {}", destination.display())))?;
    fs::create_dir_all(parent)?;

    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    let size = io::copy(reader, staged.as_file_mut()).map_err(archive_err)?;
    if let Some(modified) = modified {
        staged.as_file().set_modified(modified)?;
    }
    staged.persist(destination).map_err(|e| e.error)?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(destination, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(size)
}

/// Joins an archive-relative path onto `root`, refusing anything that would escape it.
///
/// Returns `None` when the path names the root itself (`./`, or an empty name).
fn safe_join(root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::Archive(format!(
                    "Invalid file path in archive: {}",
                    relative.display()
                )));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(root.join(clean)))
}

fn file_destination(root: &Path, relative: &Path) -> Result<PathBuf> {
    safe_join(root, relative)?
        .ok_or_else(|| AppError::Archive("Empty file path in archive".to_string()))
}

fn single_stream_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(at) if at > 0 => name[..at].to_string(),
        _ => format!("{}.out", name),
    }
}

fn collect_files(root: &Path) -> Result<Vec<ExtractedFile>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| AppError::Archive(e.to_string()))?;
        let metadata = entry.metadata().map_err(|e| AppError::Archive(e.to_string()))?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        files.push(ExtractedFile {
            file_name: entry.file_name().to_string_lossy().to_string(),
            relative_path: relative.to_string_lossy().to_string(),
            full_path: entry.path().to_string_lossy().to_string(),
            size: if metadata.is_file() { metadata.len() } else { 0 },
            is_directory: metadata.is_dir(),
        });
    }
    Ok(files)
}

fn with_progress(progress: &SharedProgress, update: impl FnOnce(&mut ExtractionProgress)) {
    let mut guard = progress
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    update(&mut guard);
}

fn archive_err(err: io::Error) -> AppError {
    AppError::Archive(err.to_string())
}
