use crate::models::{ScriptDescriptor, ScriptPhase, ScriptSet, ScriptType};
use std::path::{Component, Path, PathBuf};

const VERSION_PREFIX: &str = "python";

/// Maps `(base, version, os)` onto the vendor layout `{version}/{os}/{phase}.{ext}`.
#[derive(Debug, Clone)]
pub struct ScriptLocator {
    temp_root: PathBuf,
}

impl ScriptLocator {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    fn script_file_name(os: &str, phase: ScriptPhase) -> Option<String> {
        let extension = match os {
            "windows" => "bat",
            "linux" => "sh",
            _ => return None,
        };
        Some(format!("{}.{}", phase.file_stem(), extension))
    }

    pub fn locate(&self, base_path: &Path, version: &str, os: &str) -> ScriptSet {
        let os_key = os.to_ascii_lowercase();
        let script_dir = base_path.join(version).join(&os_key);
        let mut set = ScriptSet::default();

        if !script_dir.is_dir() {
            tracing::warn!("Script directory not found: {}", script_dir.display());
        }

        for phase in ScriptPhase::ORDERED {
            let Some(file_name) = Self::script_file_name(&os_key, phase) else {
                continue;
            };
            *set.slot_mut(phase) = Some(describe(script_dir.join(file_name), phase));
        }

        tracing::info!(
            "Found {} scripts for {}/{}",
            set.ordered_scripts().len(),
            version,
            os
        );
        set
    }

    /// Rejects traversal, home-relative tokens, and absolute paths outside the temp root.
    pub fn validate_script_path(&self, path: &str) -> bool {
        if path.trim().is_empty() || path.contains("..") || path.contains('~') || path.contains('\0')
        {
            return false;
        }

        let candidate = Path::new(path);
        if candidate.is_absolute() && !candidate.starts_with(&self.temp_root) {
            return false;
        }

        !candidate
            .components()
            .any(|component| matches!(component, Component::ParentDir))
    }

    /// Version directories directly under `base_path`, e.g. `python3.11`.
    pub fn available_versions(&self, base_path: &Path) -> Vec<String> {
        let mut versions: Vec<String> = child_dir_names(base_path)
            .into_iter()
            .filter(|name| name.to_ascii_lowercase().starts_with(VERSION_PREFIX))
            .collect();
        versions.sort();
        versions
    }

    pub fn supported_os(&self, base_path: &Path, version: &str) -> Vec<String> {
        let mut systems = child_dir_names(&base_path.join(version));
        systems.sort();
        systems
    }
}

fn describe(path: PathBuf, phase: ScriptPhase) -> ScriptDescriptor {
    let exists = path.is_file();
    let script_type = ScriptType::from_path(&path);
    let is_executable = match script_type {
        ScriptType::Batch | ScriptType::PowerShell => exists,
        ScriptType::Shell => exists && has_exec_bit(&path),
        ScriptType::Unknown => false,
    };
    ScriptDescriptor {
        name: phase.file_stem().to_string(),
        path,
        script_type,
        phase,
        exists,
        is_executable,
    }
}

#[cfg(unix)]
fn has_exec_bit(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn has_exec_bit(path: &Path) -> bool {
    path.is_file()
}

fn child_dir_names(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("Cannot list {}: {}", dir.display(), err);
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout(root: &Path, os: &str, files: &[&str]) {
        let dir = root.join("python3.11").join(os);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file), "exit 0\n").unwrap();
        }
    }

    #[test]
    fn locates_linux_scripts_in_phase_order() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path(), "linux", &["post-installation.sh", "installation.sh"]);
        let locator = ScriptLocator::new(dir.path());

        let set = locator.locate(dir.path(), "python3.11", "Linux");
        assert!(set.is_valid());
        let pre = set.pre_installation.as_ref().unwrap();
        assert!(!pre.exists);
        assert_eq!(pre.script_type, ScriptType::Shell);

        let names: Vec<_> = set.ordered_scripts().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["installation", "post-installation"]);
    }

    #[test]
    fn windows_uses_batch_files() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path(), "windows", &["installation.bat"]);
        let locator = ScriptLocator::new(dir.path());

        let set = locator.locate(dir.path(), "python3.11", "WINDOWS");
        let install = set.installation.unwrap();
        assert!(install.exists);
        assert!(install.is_executable);
        assert_eq!(install.script_type, ScriptType::Batch);
        assert!(install.path.ends_with("python3.11/windows/installation.bat"));
    }

    #[test]
    fn missing_install_script_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path(), "linux", &["pre-installation.sh"]);
        let set = ScriptLocator::new(dir.path()).locate(dir.path(), "python3.11", "linux");
        assert!(!set.is_valid());

        let set = ScriptLocator::new(dir.path()).locate(dir.path(), "python3.11", "macos");
        assert!(set.ordered_scripts().is_empty());
        assert!(!set.is_valid());
    }

    #[test]
    fn validates_script_paths() {
        let locator = ScriptLocator::new("/tmp");
        assert!(locator.validate_script_path("/tmp/Warp/Extract/c1/1_bundle"));
        assert!(locator.validate_script_path("bundle/python3.11"));
        assert!(!locator.validate_script_path("/tmp/Warp/../../etc"));
        assert!(!locator.validate_script_path("~/scripts"));
        assert!(!locator.validate_script_path("/etc/scripts"));
        assert!(!locator.validate_script_path(""));
    }

    #[test]
    fn lists_versions_and_systems() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path(), "linux", &[]);
        layout(dir.path(), "windows", &[]);
        fs::create_dir_all(dir.path().join("Python3.12")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        let locator = ScriptLocator::new(dir.path());

        assert_eq!(
            locator.available_versions(dir.path()),
            vec!["Python3.12".to_string(), "python3.11".to_string()]
        );
        assert_eq!(
            locator.supported_os(dir.path(), "python3.11"),
            vec!["linux".to_string(), "windows".to_string()]
        );
    }
}
