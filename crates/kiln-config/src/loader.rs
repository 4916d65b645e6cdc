//! Configuration Loader
//!
//! Finds `kiln.toml`, applies environment overrides, and resolves the result
//! into a [`PipelineConfig`].

use crate::project::ProjectConfig;
use crate::{ConfigError, ConfigResult};
use kiln_build::{BuildTarget, BuildUnit, PipelineConfig, Profile, DEFAULT_TRIPLE, TARGET_DIR_ENV};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Project configuration file name
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Configuration loader
///
/// Merges configuration with the following precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Project config (./kiln.toml) - overrides defaults
/// 3. Environment variables (KILN_*, CARGO_TARGET_DIR) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Skip environment overrides
    ignore_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration with environment overrides applied
    pub project: ProjectConfig,

    /// Project root directory (where kiln.toml was found)
    pub project_root: Option<PathBuf>,

    /// Directory the search started from
    pub start_dir: PathBuf,

    /// Toolchain program picked up from the environment when kiln.toml names none
    pub fallback_program: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that ignores the process environment
    pub fn without_env() -> Self {
        Self { ignore_env: true }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find kiln.toml. Without one the
    /// defaults apply and the start directory is the workspace root.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project) = find_project_config(start_dir)?;
        self.finish(project, project_root, start_dir.to_path_buf())
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let project = ProjectConfig::load_from_file(config_path)?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        let start_dir = project_root.clone().unwrap_or_default();
        self.finish(project, project_root, start_dir)
    }

    fn finish(
        &self,
        project: ProjectConfig,
        project_root: Option<PathBuf>,
        start_dir: PathBuf,
    ) -> ConfigResult<Config> {
        let (project, fallback_program) = if self.ignore_env {
            (project, None)
        } else {
            let project = apply_env_overrides(project)?;
            (project, env_path("CARGO"))
        };

        Ok(Config {
            project,
            project_root,
            start_dir,
            fallback_program,
        })
    }
}

/// Find project configuration by walking up the directory tree
fn find_project_config(start_dir: &Path) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);

        if config_path.is_file() {
            debug!(path = %config_path.display(), "loading project config");
            let project = ProjectConfig::load_from_file(&config_path)?;
            return Ok((Some(current), project));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Ok((None, ProjectConfig::default())),
        }
    }
}

/// Apply environment variable overrides to project config
fn apply_env_overrides(mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
    if let Some(target) = env_string("KILN_TARGET") {
        config.build_mut().target = Some(target);
    }

    if let Some(profile) = env_string("KILN_PROFILE") {
        config.build_mut().profile = Some(profile);
    }

    if let Some(dir) = env_path("KILN_PUBLISH_DIR") {
        config.build_mut().publish_dir = Some(dir);
    }

    if let Some(dir) = env_path(TARGET_DIR_ENV) {
        config.build_mut().target_dir = Some(dir);
    }

    if let Some(units) = env_string("KILN_UNITS") {
        config.select_units(parse_unit_list(&units));
    }

    if let Some(program) = env_path("KILN_CARGO") {
        config.toolchain_mut().program = Some(program);
    }

    config.validate()?;
    Ok(config)
}

/// Split a comma separated unit list, dropping blanks
pub fn parse_unit_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has kiln.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Workspace root the toolchain runs in
    pub fn workspace_root(&self) -> &Path {
        self.project_root().unwrap_or(&self.start_dir)
    }

    /// Effective build target
    pub fn target(&self) -> ConfigResult<BuildTarget> {
        let profile = match self.project.profile() {
            Some(name) => Profile::from_str(name)
                .map_err(|e| ConfigError::invalid("build.profile", e.to_string()))?,
            None => Profile::default(),
        };
        let triple = self.project.target().unwrap_or(DEFAULT_TRIPLE);
        Ok(BuildTarget::new(triple, profile))
    }

    /// Units resolved against `target`
    pub fn units(&self, target: &BuildTarget) -> Vec<BuildUnit> {
        self.project
            .units
            .iter()
            .map(|unit| match &unit.artifact {
                Some(artifact) => BuildUnit::new(&unit.name, artifact),
                None => BuildUnit::for_target(&unit.name, target),
            })
            .collect()
    }

    /// Resolve into a pipeline configuration
    ///
    /// Units may still be empty here; the caller can add them from the
    /// command line before the pipeline validates the set.
    pub fn pipeline_config(&self) -> ConfigResult<PipelineConfig> {
        let target = self.target()?;
        let units = self.units(&target);
        let mut config = PipelineConfig::new(self.workspace_root())
            .with_target(target)
            .with_units(units);

        if let Some(build) = &self.project.build {
            if let Some(dir) = &build.publish_dir {
                config = config.with_publish_dir(dir);
            }
            if let Some(dir) = &build.target_dir {
                config = config.with_target_dir(dir);
            }
        }

        let toolchain = self.project.toolchain.clone().unwrap_or_default();
        if let Some(program) = toolchain.program.or_else(|| self.fallback_program.clone()) {
            config = config.with_program(program);
        }

        Ok(config
            .with_toolchain_args(toolchain.args)
            .with_env(toolchain.env)
            .with_timeout(toolchain.timeout_secs.map(Duration::from_secs)))
    }
}
