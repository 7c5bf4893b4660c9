use crate::error::{AppError, Result};
use crate::models::UploadMetadata;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

pub const ALLOWED_EXTENSIONS: [&str; 10] = [
    ".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz", ".tgz", ".tar.gz", ".tar.bz2",
];

/// Suffixes kept together when a file name is rewritten.
const COMPOUND_EXTENSIONS: [&str; 3] = [".tar.gz", ".tar.bz2", ".tar.xz"];

const RESERVED_CHARS: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '/', '\\'];
const MAX_NAME_LEN: usize = 255;
const FALLBACK_STEM: &str = "upload";

fn is_invalid_char(c: char) -> bool {
    c.is_control() || RESERVED_CHARS.contains(&c)
}

/// Splits `name` into stem and extension, keeping compound tar suffixes whole.
pub fn split_extension(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    for compound in COMPOUND_EXTENSIONS {
        if lower.ends_with(compound) {
            let at = name.len() - compound.len();
            return name.split_at(at);
        }
    }
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(at) => name.split_at(at),
    }
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Filename, size and checksum policy for uploads.
#[derive(Clone)]
pub struct ValidationService {
    max_file_size: u64,
}

impl ValidationService {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn validate_name(&self, name: &str) -> bool {
        if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
            return false;
        }
        if name.chars().any(is_invalid_char) {
            return false;
        }
        let lower = name.to_ascii_lowercase();
        ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    }

    pub fn validate_size(&self, size: u64) -> bool {
        size > 0 && size <= self.max_file_size
    }

    pub fn generate_safe_name(&self, original: &str) -> String {
        let (stem, extension) = split_extension(original);
        let extension: String = extension.chars().filter(|c| !is_invalid_char(*c)).collect();
        let mut safe_stem: String = stem.chars().filter(|c| !is_invalid_char(*c)).collect();
        if safe_stem.trim().is_empty() {
            safe_stem = FALLBACK_STEM.to_string();
        }
        format!("{}_{}{}", safe_stem, uuid::Uuid::new_v4().simple(), extension)
    }

    /// Returns the generated safe file name when the upload is acceptable.
    pub fn validate_upload(&self, metadata: &UploadMetadata) -> Result<String> {
        if !self.validate_name(&metadata.file_name) {
            return Err(AppError::Validation(
                "Invalid file name or unsupported file type".to_string(),
            ));
        }
        if !self.validate_size(metadata.file_size) {
            return Err(AppError::Validation(format!(
                "File size exceeds maximum allowed size of {}MB",
                self.max_file_size / (1024 * 1024)
            )));
        }
        Ok(self.generate_safe_name(&metadata.file_name))
    }

    pub fn validate_checksum(&self, path: &Path, expected_hex: &str) -> bool {
        match self.verify_checksum(path, expected_hex) {
            Ok(_) => true,
            Err(AppError::ChecksumMismatch) => false,
            Err(e) => {
                tracing::warn!("Failed to hash {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Returns the lowercase server-side digest when it matches `expected_hex`.
    pub fn verify_checksum(&self, path: &Path, expected_hex: &str) -> Result<String> {
        if expected_hex.trim().is_empty() {
            return Err(AppError::ChecksumMismatch);
        }
        let actual = file_sha256(path)?;
        if actual.eq_ignore_ascii_case(expected_hex.trim()) {
            Ok(actual)
        } else {
            Err(AppError::ChecksumMismatch)
        }
    }
}
