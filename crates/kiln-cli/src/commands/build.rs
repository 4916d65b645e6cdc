//! Build command - compile every unit, then publish the artifacts

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_build::{Pipeline, PipelineConfig, PipelineReport, Profile};
use kiln_config::{parse_unit_list, ConfigLoader};
use std::path::PathBuf;
use std::time::Duration;

/// Build command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Target triple (default: wasm32-unknown-unknown)
    #[arg(long, value_name = "TRIPLE")]
    pub target: Option<String>,
    /// Build profile (release, debug, or a custom profile)
    #[arg(long, conflicts_with = "release")]
    pub profile: Option<String>,
    /// Build in release mode (shorthand for --profile=release)
    #[arg(long)]
    pub release: bool,
    /// Units to build, comma separated (default: [[unit]] entries in kiln.toml)
    #[arg(long, value_name = "UNIT,...")]
    pub units: Option<String>,
    /// Directory to publish artifacts into (default: res)
    #[arg(long, value_name = "DIR")]
    pub publish_dir: Option<PathBuf>,
    /// Toolchain output root (default: target, or $CARGO_TARGET_DIR)
    #[arg(long, value_name = "DIR")]
    pub target_dir: Option<PathBuf>,
    /// Workspace directory (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    pub manifest_dir: Option<PathBuf>,
    /// Kill the toolchain if it runs longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// JSON output
    #[arg(long)]
    pub json: bool,
    /// Verbose output
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    pub verbose: bool,
    /// Quiet output (errors only)
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Resolve `kiln.toml`, the environment, and the flags into a pipeline configuration
pub fn resolve_config(args: &BuildArgs) -> Result<PipelineConfig> {
    let start_dir = match &args.manifest_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let mut config = ConfigLoader::new().load_from_directory(&start_dir)?;
    let project = &mut config.project;

    if let Some(target) = &args.target {
        project.build_mut().target = Some(target.clone());
    }
    if let Some(profile) = determine_profile(args)? {
        project.build_mut().profile = Some(profile.name().to_string());
    }
    if let Some(dir) = &args.publish_dir {
        project.build_mut().publish_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.target_dir {
        project.build_mut().target_dir = Some(dir.clone());
    }
    if let Some(units) = &args.units {
        project.select_units(parse_unit_list(units));
    }
    if let Some(secs) = args.timeout {
        project.toolchain_mut().timeout_secs = Some(secs);
    }
    project.validate()?;

    let pipeline = config.pipeline_config()?;
    tracing::debug!(
        workspace = %pipeline.workspace_root.display(),
        target_dir = %pipeline.target_dir.display(),
        publish_dir = %pipeline.publish_dir.display(),
        "resolved pipeline configuration"
    );
    Ok(pipeline)
}

/// Run the build command
pub fn run(args: BuildArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let show_progress = !args.json && !args.quiet;

    let spinner = show_progress.then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.green} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(format!(
            "Building {} unit(s) for {}",
            config.units.len(),
            config.target
        ));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let result = Pipeline::new(config).run();

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else if !args.quiet {
        print_report(&report, args.verbose);
    }

    Ok(())
}

/// Determine build profile from arguments
fn determine_profile(args: &BuildArgs) -> Result<Option<Profile>> {
    if args.release {
        Ok(Some(Profile::Release))
    } else if let Some(ref profile_name) = args.profile {
        Profile::from_str(profile_name)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid profile: {}", e))
    } else {
        Ok(None)
    }
}

fn print_report(report: &PipelineReport, verbose: bool) {
    if verbose && !report.build.stderr.trim().is_empty() {
        eprint!("{}", report.build.stderr);
    }

    println!(
        "{:>12} {} in {:.2}s",
        "Finished".green().bold(),
        report.target,
        report.stats.total_time.as_secs_f64()
    );
    for artifact in &report.staged {
        println!(
            "{:>12} {} -> {} ({})",
            "Staged".green().bold(),
            artifact.unit,
            artifact.destination.display(),
            format_size(artifact.size)
        );
        if verbose {
            println!("{:>12} sha256 {}", "", artifact.sha256.dimmed());
        }
    }
    if verbose {
        println!(
            "{:>12} compile {:.2}s, staging {:.2}s",
            "Timing".cyan().bold(),
            report.stats.compile_time.as_secs_f64(),
            report.stats.staging_time.as_secs_f64()
        );
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KIB {
        format!("{} B", bytes)
    } else if size < KIB * KIB {
        format!("{:.1} KiB", size / KIB)
    } else {
        format!("{:.1} MiB", size / (KIB * KIB))
    }
}
