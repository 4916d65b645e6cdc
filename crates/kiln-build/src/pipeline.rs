//! Build-and-stage orchestration
use crate::error::KilnResult;
use crate::stager::ArtifactStager;
use crate::targets::{validate_units, BuildResult, BuildTarget, BuildUnit, StagedArtifact};
use crate::toolchain::{CargoToolchain, Toolchain, DEFAULT_PROGRAM};

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, info_span};

/// Environment variable overriding the toolchain output root
pub const TARGET_DIR_ENV: &str = "CARGO_TARGET_DIR";

/// Default publish directory, relative to the workspace root
pub const DEFAULT_PUBLISH_DIR: &str = "res";

/// Pipeline configuration, fixed for the lifetime of one run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workspace root; relative paths are resolved against it
    pub workspace_root: PathBuf,
    /// Toolchain output root
    pub target_dir: PathBuf,
    /// Directory artifacts are published into
    pub publish_dir: PathBuf,
    /// Units to build and stage
    pub units: Vec<BuildUnit>,
    /// Target triple and profile
    pub target: BuildTarget,
    /// Toolchain program
    pub program: PathBuf,
    /// Extra toolchain arguments
    pub toolchain_args: Vec<String>,
    /// Extra toolchain environment
    pub env_vars: BTreeMap<String, String>,
    /// Optional toolchain time budget
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Configuration with defaults for the workspace at `workspace_root`
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            target_dir: workspace_root.join("target"),
            publish_dir: workspace_root.join(DEFAULT_PUBLISH_DIR),
            workspace_root,
            units: Vec::new(),
            target: BuildTarget::default(),
            program: PathBuf::from(DEFAULT_PROGRAM),
            toolchain_args: Vec::new(),
            env_vars: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Defaults plus the `CARGO_TARGET_DIR` override from the environment
    pub fn from_env(workspace_root: impl Into<PathBuf>) -> Self {
        let config = Self::new(workspace_root);
        match std::env::var_os(TARGET_DIR_ENV) {
            Some(dir) if !dir.is_empty() => config.with_target_dir(PathBuf::from(dir)),
            _ => config,
        }
    }

    /// Set the toolchain output root (relative paths resolve against the workspace)
    pub fn with_target_dir(mut self, target_dir: impl AsRef<Path>) -> Self {
        self.target_dir = self.resolve(target_dir.as_ref());
        self
    }

    /// Set the publish directory (relative paths resolve against the workspace)
    pub fn with_publish_dir(mut self, publish_dir: impl AsRef<Path>) -> Self {
        self.publish_dir = self.resolve(publish_dir.as_ref());
        self
    }

    /// Set the units
    pub fn with_units(mut self, units: Vec<BuildUnit>) -> Self {
        self.units = units;
        self
    }

    /// Set the target
    pub fn with_target(mut self, target: BuildTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the toolchain program
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set extra toolchain arguments
    pub fn with_toolchain_args(mut self, args: Vec<String>) -> Self {
        self.toolchain_args = args;
        self
    }

    /// Set extra toolchain environment
    pub fn with_env(mut self, env_vars: BTreeMap<String, String>) -> Self {
        self.env_vars = env_vars;
        self
    }

    /// Set the toolchain time budget
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory the toolchain writes this target's artifacts to
    pub fn output_dir(&self) -> PathBuf {
        self.target.output_dir(&self.target_dir)
    }

    /// Process-backed toolchain described by this configuration
    pub fn toolchain(&self) -> CargoToolchain {
        CargoToolchain::new(&self.workspace_root, &self.target_dir)
            .with_program(&self.program)
            .with_args(self.toolchain_args.clone())
            .with_env(self.env_vars.clone())
            .with_timeout(self.timeout)
    }

    /// Validate units and target
    pub fn validate(&self) -> KilnResult<()> {
        validate_units(&self.units)?;
        self.target.validate()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

/// Timing for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Time spent in the toolchain
    pub compile_time: Duration,
    /// Time spent staging
    pub staging_time: Duration,
    /// Total run time
    pub total_time: Duration,
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Target that was built
    pub target: BuildTarget,
    /// Toolchain outcome
    pub build: BuildResult,
    /// Published artifacts, in unit order
    pub staged: Vec<StagedArtifact>,
    /// Publish directory
    pub publish_dir: PathBuf,
    /// Timing
    pub stats: PipelineStats,
}

impl PipelineReport {
    /// Summary suitable for machine consumers
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "target": self.target.triple,
            "profile": self.target.profile.name(),
            "publish_dir": self.publish_dir.display().to_string(),
            "compile_time": self.stats.compile_time.as_secs_f64(),
            "staging_time": self.stats.staging_time.as_secs_f64(),
            "total_time": self.stats.total_time.as_secs_f64(),
            "artifacts": self.staged.iter().map(|a| serde_json::json!({
                "unit": a.unit,
                "source": a.source.display().to_string(),
                "destination": a.destination.display().to_string(),
                "size": a.size,
                "sha256": a.sha256,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Build-and-stage pipeline
pub struct Pipeline<T: Toolchain = CargoToolchain> {
    config: PipelineConfig,
    toolchain: T,
}

impl Pipeline<CargoToolchain> {
    /// Create a pipeline driving the configured toolchain program
    pub fn new(config: PipelineConfig) -> Self {
        let toolchain = config.toolchain();
        Self { config, toolchain }
    }
}

impl<T: Toolchain> Pipeline<T> {
    /// Create a pipeline driving a custom toolchain
    pub fn with_toolchain(config: PipelineConfig, toolchain: T) -> Self {
        Self { config, toolchain }
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Toolchain driving the build
    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Build every unit, then stage every artifact
    ///
    /// Fails fast: a toolchain failure returns before the publish directory
    /// is touched, and a missing artifact returns before any artifact is copied.
    pub fn run(&self) -> KilnResult<PipelineReport> {
        let config = &self.config;
        config.validate()?;

        let span = info_span!("pipeline", target = %config.target, units = config.units.len());
        let _guard = span.enter();
        let run_start = Instant::now();

        let compile_start = Instant::now();
        let build = self.toolchain.build(&config.units, &config.target)?;
        let compile_time = compile_start.elapsed();

        let staging_start = Instant::now();
        let output_dir = config.output_dir();
        let stager = ArtifactStager::new(&config.publish_dir);
        let located = stager.locate(&config.units, &output_dir)?;
        stager.sweep()?;
        let staged = stager.publish(&located)?;
        let staging_time = staging_start.elapsed();

        let total_time = run_start.elapsed();
        info!(
            artifacts = staged.len(),
            total_ms = total_time.as_millis() as u64,
            "pipeline completed"
        );

        Ok(PipelineReport {
            target: config.target.clone(),
            build,
            staged,
            publish_dir: config.publish_dir.clone(),
            stats: PipelineStats {
                compile_time,
                staging_time,
                total_time,
            },
        })
    }
}
