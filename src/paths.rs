use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

const BIN_DIR: &str = "bin";
const CONF_DIR: &str = "conf";
const SCRATCH_DIR: &str = "Warp";
const COMPRESS_DIR: &str = "Compress";
const EXTRACT_DIR: &str = "Extract";
const HOME_ENV: &str = "WARP_BOOTSTRAP_HOME";

pub fn install_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if home.trim().is_empty() {
            return Err(AppError::Execution(
                "WARP_BOOTSTRAP_HOME is set but empty".to_string(),
            ));
        }
        return Ok(PathBuf::from(home));
    }

    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path
        .parent()
        .ok_or_else(|| AppError::Execution("Failed to resolve executable directory".to_string()))?;

    if exe_dir.file_name().and_then(|name| name.to_str()) == Some(BIN_DIR) {
        let root = exe_dir.parent().ok_or_else(|| {
            AppError::Execution("Failed to resolve install root from bin".to_string())
        })?;
        return Ok(root.to_path_buf());
    }

    Ok(exe_dir.to_path_buf())
}

pub fn conf_dir() -> Result<PathBuf> {
    Ok(install_root()?.join(CONF_DIR))
}

/// Scratch area layout under the process-wide temp root.
#[derive(Debug, Clone)]
pub struct ScratchLayout {
    temp_root: PathBuf,
}

impl ScratchLayout {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// `{temp}/Warp/Compress`, where assembled uploads live.
    pub fn upload_dir(&self) -> PathBuf {
        self.temp_root.join(SCRATCH_DIR).join(COMPRESS_DIR)
    }

    /// `{temp}/Warp/Extract`, parent of every per-connection extraction root.
    pub fn extract_dir(&self) -> PathBuf {
        self.temp_root.join(SCRATCH_DIR).join(EXTRACT_DIR)
    }

    pub fn upload_path(&self, connection_id: &str, file_name: &str) -> PathBuf {
        self.upload_dir()
            .join(format!("{}_{}", connection_id, file_name))
    }

    pub fn connection_extract_dir(&self, connection_id: &str) -> PathBuf {
        self.extract_dir().join(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_path_is_namespaced_by_connection() {
        let layout = ScratchLayout::new("/tmp/root");
        assert_eq!(
            layout.upload_path("conn", "bundle.zip"),
            PathBuf::from("/tmp/root/Warp/Compress/conn_bundle.zip")
        );
        assert_eq!(
            layout.connection_extract_dir("conn"),
            PathBuf::from("/tmp/root/Warp/Extract/conn")
        );
    }
}
