//! Build profile management
//!
//! A profile selects the toolchain's optimization settings and, as a side
//! effect, the directory the toolchain writes artifacts into. Cargo's naming
//! is followed: `release` builds land in `release/`, `dev` builds in `debug/`,
//! custom profiles in a directory named after the profile.

use crate::error::{BuildError, KilnResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Build profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Optimized build (default)
    Release,
    /// Unoptimized build with debug info
    Debug,
    /// Custom profile declared in the workspace manifest
    Custom(String),
}

impl Profile {
    /// Parse profile from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> KilnResult<Self> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "release" => Ok(Self::Release),
            "debug" | "dev" => Ok(Self::Debug),
            "" => Err(BuildError::InvalidConfig(
                "profile name cannot be empty".to_string(),
            )),
            _ if !is_valid_custom_name(trimmed) => Err(BuildError::InvalidConfig(format!(
                "invalid profile name '{}': only letters, digits, '-' and '_' are allowed",
                trimmed
            ))),
            _ => Ok(Self::Custom(trimmed.to_string())),
        }
    }

    /// Get profile name
    pub fn name(&self) -> &str {
        match self {
            Self::Release => "release",
            Self::Debug => "debug",
            Self::Custom(name) => name,
        }
    }

    /// Check if this is a built-in profile
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Release | Self::Debug)
    }

    /// Directory component the toolchain writes this profile's artifacts to
    ///
    /// Cargo's built-in `test` and `bench` profiles share the `debug` and
    /// `release` directories.
    pub fn output_dir_name(&self) -> &str {
        match self {
            Self::Custom(name) if name == "test" => "debug",
            Self::Custom(name) if name == "bench" => "release",
            _ => self.name(),
        }
    }

    /// Toolchain arguments selecting this profile
    pub fn toolchain_args(&self) -> Vec<String> {
        match self {
            Self::Release => vec!["--release".to_string()],
            Self::Debug => Vec::new(),
            Self::Custom(name) => vec!["--profile".to_string(), name.clone()],
        }
    }
}

fn is_valid_custom_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[allow(clippy::derivable_impls)]
impl Default for Profile {
    fn default() -> Self {
        Self::Release
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Profile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Profile::from_str(&s).map_err(serde::de::Error::custom)
    }
}
