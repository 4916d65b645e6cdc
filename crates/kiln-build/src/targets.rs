//! Build units, targets, and the records the pipeline produces
use crate::error::{BuildError, KilnResult};
use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default target triple, matching contract workspaces compiled to wasm
pub const DEFAULT_TRIPLE: &str = "wasm32-unknown-unknown";

/// Target triple and profile handed to the toolchain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Target triple (e.g. `wasm32-unknown-unknown`)
    pub triple: String,
    /// Optimization profile
    pub profile: Profile,
}

impl BuildTarget {
    /// Create a new build target
    pub fn new(triple: impl Into<String>, profile: Profile) -> Self {
        Self {
            triple: triple.into(),
            profile,
        }
    }

    /// Whether the triple targets WebAssembly
    pub fn is_wasm(&self) -> bool {
        self.triple.starts_with("wasm32") || self.triple.starts_with("wasm64")
    }

    /// Whether the triple targets Windows
    pub fn is_windows(&self) -> bool {
        self.triple.contains("-windows")
    }

    /// Artifact file name the toolchain produces for a unit on this target
    pub fn artifact_filename(&self, unit_name: &str) -> String {
        if self.is_wasm() {
            format!("{}.wasm", unit_name.replace('-', "_"))
        } else if self.is_windows() {
            format!("{}.exe", unit_name)
        } else {
            unit_name.to_string()
        }
    }

    /// Directory holding this target's artifacts: `<target_dir>/<triple>/<profile>`
    pub fn output_dir(&self, target_dir: &Path) -> PathBuf {
        target_dir
            .join(&self.triple)
            .join(self.profile.output_dir_name())
    }

    /// Validate the target configuration
    pub fn validate(&self) -> KilnResult<()> {
        let triple = self.triple.trim();
        if triple.is_empty() {
            return Err(BuildError::InvalidConfig(
                "target triple cannot be empty".to_string(),
            ));
        }
        if triple.contains(['/', '\\']) || triple.contains(char::is_whitespace) {
            return Err(BuildError::InvalidConfig(format!(
                "invalid target triple '{}'",
                self.triple
            )));
        }
        Ok(())
    }
}

impl Default for BuildTarget {
    fn default() -> Self {
        Self::new(DEFAULT_TRIPLE, Profile::Release)
    }
}

impl std::fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.triple, self.profile)
    }
}

/// One compilable unit of the workspace and the artifact it must produce
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildUnit {
    /// Unit (package) name passed to the toolchain
    pub name: String,
    /// Expected artifact file name in the toolchain output directory
    pub artifact: String,
}

impl BuildUnit {
    /// Create a unit with an explicit artifact file name
    pub fn new(name: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
        }
    }

    /// Create a unit whose artifact name follows the target's naming convention
    pub fn for_target(name: impl Into<String>, target: &BuildTarget) -> Self {
        let name = name.into();
        let artifact = target.artifact_filename(&name);
        Self { name, artifact }
    }

    /// Validate the unit configuration
    pub fn validate(&self) -> KilnResult<()> {
        if self.name.trim().is_empty() {
            return Err(BuildError::InvalidConfig(
                "unit name cannot be empty".to_string(),
            ));
        }
        if self.name.contains(['/', '\\']) || self.name.contains(char::is_whitespace) {
            return Err(BuildError::InvalidConfig(format!(
                "invalid unit name '{}'",
                self.name
            )));
        }
        if !is_plain_file_name(&self.artifact) {
            return Err(BuildError::InvalidConfig(format!(
                "artifact '{}' for unit '{}' must be a plain file name",
                self.artifact, self.name
            )));
        }
        Ok(())
    }
}

/// True when `name` names a file directly inside a directory
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Validate a unit set: non-empty, each unit valid, no duplicate names or artifacts
pub fn validate_units(units: &[BuildUnit]) -> KilnResult<()> {
    if units.is_empty() {
        return Err(BuildError::InvalidConfig(
            "no build units configured".to_string(),
        ));
    }

    for (idx, unit) in units.iter().enumerate() {
        unit.validate()?;
        let earlier = &units[..idx];
        if earlier.iter().any(|u| u.name == unit.name) {
            return Err(BuildError::InvalidConfig(format!(
                "duplicate unit '{}'",
                unit.name
            )));
        }
        if let Some(other) = earlier.iter().find(|u| u.artifact == unit.artifact) {
            return Err(BuildError::InvalidConfig(format!(
                "units '{}' and '{}' both produce '{}'",
                other.name, unit.name, unit.artifact
            )));
        }
    }

    Ok(())
}

/// Exit status recorded for one unit of a batched toolchain run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Unit name
    pub unit: String,
    /// Exit code of the toolchain invocation that built the unit
    pub exit_code: Option<i32>,
}

/// Outcome of one toolchain invocation covering every unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// Whether the toolchain exited successfully
    pub success: bool,
    /// Per-unit exit status
    pub units: Vec<UnitStatus>,
    /// Captured toolchain stdout
    pub stdout: String,
    /// Captured toolchain stderr
    pub stderr: String,
    /// Wall-clock duration of the invocation
    pub duration: Duration,
}

impl BuildResult {
    /// Build a result sharing one exit code across every unit
    pub fn from_exit(
        units: &[BuildUnit],
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            success: exit_code == Some(0),
            units: units
                .iter()
                .map(|u| UnitStatus {
                    unit: u.name.clone(),
                    exit_code,
                })
                .collect(),
            stdout,
            stderr,
            duration,
        }
    }

    /// Exit code of the invocation
    pub fn exit_code(&self) -> Option<i32> {
        self.units.first().and_then(|s| s.exit_code)
    }

    /// Diagnostic text reported by the toolchain
    ///
    /// Compilers write diagnostics to stderr; stdout is used when stderr is empty.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Turn a failed result into the matching error
    pub fn into_checked(self) -> KilnResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(BuildError::BuildFailed {
                exit_code: self.exit_code(),
                diagnostics: self.diagnostics().to_string(),
            })
        }
    }
}

/// Artifact published into the publish directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    /// Unit that produced the artifact
    pub unit: String,
    /// Path in the toolchain output directory
    pub source: PathBuf,
    /// Final path in the publish directory
    pub destination: PathBuf,
    /// Byte size at copy time
    pub size: u64,
    /// Hex SHA-256 of the staged bytes
    pub sha256: String,
}
