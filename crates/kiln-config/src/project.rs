//! Project Configuration (kiln.toml)
//!
//! Handles the `kiln.toml` file at the workspace root: build target, toolchain
//! settings, and the units to build and stage.

use crate::{ConfigError, ConfigResult};
use kiln_build::targets::is_plain_file_name;
use kiln_build::Profile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Project configuration from kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Build configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// Toolchain configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<ToolchainSection>,

    /// Units to build, in staging order
    #[serde(default, rename = "unit")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitSpec>,
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BuildSection {
    /// Target triple (default: "wasm32-unknown-unknown")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Profile name (default: "release")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Publish directory (default: "res")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_dir: Option<PathBuf>,

    /// Toolchain output root (default: "target")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,
}

/// `[toolchain]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolchainSection {
    /// Toolchain program (default: "cargo")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Extra arguments placed before the unit list
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Time budget for one toolchain run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra environment for the toolchain
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// One `[[unit]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    /// Unit (package) name
    pub name: String,

    /// Artifact file name; derived from the name and target when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl UnitSpec {
    /// Unit with a derived artifact name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: None,
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(build) = &self.build {
            if let Some(target) = &build.target {
                if target.trim().is_empty() || target.contains(char::is_whitespace) {
                    return Err(ConfigError::invalid(
                        "build.target",
                        format!("invalid target triple '{}'", target),
                    ));
                }
            }
            if let Some(profile) = &build.profile {
                Profile::from_str(profile)
                    .map_err(|e| ConfigError::invalid("build.profile", e.to_string()))?;
            }
        }

        if let Some(toolchain) = &self.toolchain {
            if toolchain.program.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::invalid(
                    "toolchain.program",
                    "program cannot be empty",
                ));
            }
            if toolchain.timeout_secs == Some(0) {
                return Err(ConfigError::invalid(
                    "toolchain.timeout-secs",
                    "timeout must be greater than zero",
                ));
            }
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            validate_unit(unit)?;
            if !seen.insert(unit.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate unit '{}'",
                    unit.name
                )));
            }
        }

        Ok(())
    }

    /// Configured target triple, if any
    pub fn target(&self) -> Option<&str> {
        self.build.as_ref().and_then(|b| b.target.as_deref())
    }

    /// Configured profile name, if any
    pub fn profile(&self) -> Option<&str> {
        self.build.as_ref().and_then(|b| b.profile.as_deref())
    }

    /// Replace the unit list with `names`, in that order
    ///
    /// Units already configured keep their explicit artifact names.
    pub fn select_units(&mut self, names: Vec<String>) {
        let configured = std::mem::take(&mut self.units);
        self.units = names
            .into_iter()
            .map(|name| {
                configured
                    .iter()
                    .find(|u| u.name == name)
                    .cloned()
                    .unwrap_or_else(|| UnitSpec::named(name))
            })
            .collect();
    }

    /// Mutable `[build]` section, created on first use
    pub fn build_mut(&mut self) -> &mut BuildSection {
        self.build.get_or_insert_with(BuildSection::default)
    }

    /// Mutable `[toolchain]` section, created on first use
    pub fn toolchain_mut(&mut self) -> &mut ToolchainSection {
        self.toolchain.get_or_insert_with(ToolchainSection::default)
    }
}

fn validate_unit(unit: &UnitSpec) -> ConfigResult<()> {
    if unit.name.trim().is_empty() {
        return Err(ConfigError::invalid("unit.name", "name cannot be empty"));
    }
    if unit.name.contains(['/', '\\']) || unit.name.contains(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "unit.name",
            format!("invalid unit name '{}'", unit.name),
        ));
    }
    if let Some(artifact) = &unit.artifact {
        if !is_plain_file_name(artifact) {
            return Err(ConfigError::invalid(
                format!("unit '{}'", unit.name),
                format!("artifact '{}' must be a plain file name", artifact),
            ));
        }
    }
    Ok(())
}
