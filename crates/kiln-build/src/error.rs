//! Pipeline error types
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type KilnResult<T> = Result<T, BuildError>;

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Toolchain could not be run or reported failure
    Toolchain,
    /// Artifacts could not be located or published
    Staging,
    /// Pipeline inputs were rejected before anything ran
    Configuration,
}

impl FailureStage {
    /// Process exit code reported for failures in this stage
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Toolchain => 1,
            Self::Staging => 2,
            Self::Configuration => 3,
        }
    }

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toolchain => "toolchain",
            Self::Staging => "staging",
            Self::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Toolchain not found: '{program}' could not be executed")]
    ToolchainNotFound { program: PathBuf },

    #[error("Build failed (exit code {})\n{diagnostics}", display_exit_code(.exit_code))]
    BuildFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Toolchain did not finish within {after:?} and was killed")]
    Timeout { after: Duration },

    #[error("Artifact missing for unit '{unit}': expected non-empty file at {path}")]
    ArtifactMissing { unit: String, path: PathBuf },

    #[error("Destination not writable: {path}: {error}")]
    DestinationNotWritable {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Partial write for unit '{unit}': expected {expected} bytes, wrote {written}")]
    PartialWrite {
        unit: String,
        expected: u64,
        written: u64,
    },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none, terminated by signal".to_string(), |c| c.to_string())
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }

    /// Create an artifact missing error
    pub fn artifact_missing(unit: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::ArtifactMissing {
            unit: unit.into(),
            path: path.into(),
        }
    }

    /// Create a destination not writable error
    pub fn not_writable(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::DestinationNotWritable {
            path: path.into(),
            error,
        }
    }

    /// Stage of the pipeline that produced this error
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::ToolchainNotFound { .. } | Self::BuildFailed { .. } | Self::Timeout { .. } => {
                FailureStage::Toolchain
            }
            Self::ArtifactMissing { .. }
            | Self::DestinationNotWritable { .. }
            | Self::PartialWrite { .. }
            | Self::Io { .. } => FailureStage::Staging,
            Self::InvalidConfig(_) => FailureStage::Configuration,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }
}
