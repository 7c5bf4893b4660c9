use super::extraction::duration_secs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScriptType {
    Batch,
    PowerShell,
    Shell,
    Unknown,
}

impl ScriptType {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("bat") | Some("cmd") => Self::Batch,
            Some("ps1") => Self::PowerShell,
            Some("sh") => Self::Shell,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScriptPhase {
    PreInstallation,
    Installation,
    PostInstallation,
}

impl ScriptPhase {
    pub const ORDERED: [ScriptPhase; 3] = [
        ScriptPhase::PreInstallation,
        ScriptPhase::Installation,
        ScriptPhase::PostInstallation,
    ];

    /// File stem used by the vendor layout, e.g. `pre-installation`.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::PreInstallation => "pre-installation",
            Self::Installation => "installation",
            Self::PostInstallation => "post-installation",
        }
    }
}

/// A phase script as found on disk. Never mutated after discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub script_type: ScriptType,
    pub phase: ScriptPhase,
    pub exists: bool,
    pub is_executable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSet {
    pub pre_installation: Option<ScriptDescriptor>,
    pub installation: Option<ScriptDescriptor>,
    pub post_installation: Option<ScriptDescriptor>,
}

impl ScriptSet {
    pub fn is_valid(&self) -> bool {
        self.installation.as_ref().is_some_and(|script| script.exists)
    }

    /// Existing scripts in pre -> install -> post order.
    pub fn ordered_scripts(&self) -> Vec<&ScriptDescriptor> {
        [
            &self.pre_installation,
            &self.installation,
            &self.post_installation,
        ]
        .into_iter()
        .flatten()
        .filter(|script| script.exists)
        .collect()
    }

    pub fn slot_mut(&mut self, phase: ScriptPhase) -> &mut Option<ScriptDescriptor> {
        match phase {
            ScriptPhase::PreInstallation => &mut self.pre_installation,
            ScriptPhase::Installation => &mut self.installation,
            ScriptPhase::PostInstallation => &mut self.post_installation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResult {
    pub script_name: String,
    pub phase: ScriptPhase,
    pub exit_code: i32,
    pub output: String,
    pub error_output: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl ScriptResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(phase: ScriptPhase, exists: bool) -> ScriptDescriptor {
        ScriptDescriptor {
            path: PathBuf::from(format!("{}.sh", phase.file_stem())),
            name: phase.file_stem().to_string(),
            script_type: ScriptType::Shell,
            phase,
            exists,
            is_executable: exists,
        }
    }

    #[test]
    fn script_type_from_extension() {
        assert_eq!(ScriptType::from_path(Path::new("a/INSTALL.BAT")), ScriptType::Batch);
        assert_eq!(ScriptType::from_path(Path::new("a/setup.ps1")), ScriptType::PowerShell);
        assert_eq!(ScriptType::from_path(Path::new("a/setup.sh")), ScriptType::Shell);
        assert_eq!(ScriptType::from_path(Path::new("a/setup")), ScriptType::Unknown);
    }

    #[test]
    fn set_requires_installation() {
        let set = ScriptSet {
            pre_installation: Some(descriptor(ScriptPhase::PreInstallation, true)),
            installation: Some(descriptor(ScriptPhase::Installation, false)),
            post_installation: None,
        };
        assert!(!set.is_valid());
    }

    #[test]
    fn ordered_scripts_skip_missing() {
        let set = ScriptSet {
            pre_installation: Some(descriptor(ScriptPhase::PreInstallation, false)),
            installation: Some(descriptor(ScriptPhase::Installation, true)),
            post_installation: Some(descriptor(ScriptPhase::PostInstallation, true)),
        };
        let phases: Vec<_> = set.ordered_scripts().iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![ScriptPhase::Installation, ScriptPhase::PostInstallation]
        );
    }
}
