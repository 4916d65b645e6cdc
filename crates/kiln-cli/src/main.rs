use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use kiln_build::{BuildError, FailureStage};
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::build::BuildArgs;

/// Build workspace units and publish their artifacts.
///
/// Kiln compiles every configured unit with one toolchain call, checks that
/// each expected artifact exists, then publishes all of them into the publish
/// directory atomically. Running `kiln` with no subcommand is `kiln build`.
///
/// EXAMPLES:
///     kiln                              Build and stage every unit in kiln.toml
///     kiln --units kt,ft                Build and stage selected units
///     kiln --profile debug --publish-dir out
///     kiln units                        Show what would be staged
///
/// EXIT CODES:
///     0  success
///     1  toolchain failed (not found, build error, timeout)
///     2  staging failed (missing artifact, unwritable destination)
///     3  configuration error
///
/// ENVIRONMENT VARIABLES:
///     CARGO_TARGET_DIR  Toolchain output root (default: <workspace>/target)
///     KILN_TARGET       Target triple
///     KILN_PROFILE      Build profile
///     KILN_UNITS        Comma separated units
///     KILN_PUBLISH_DIR  Publish directory
///     KILN_CARGO        Toolchain program (default: $CARGO, then cargo)
///     KILN_JSON         Set to '1' for JSON output by default
///     KILN_LOG          Log filter (e.g. 'debug', 'kiln_build=trace')
///     KILN_NO_COLOR     Set to disable colored output
///     NO_COLOR          Set to disable colored output
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    build: BuildArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every unit and publish the artifacts (default)
    ///
    /// EXAMPLES:
    ///     kiln build                        Release build for wasm32-unknown-unknown
    ///     kiln build --target x86_64-unknown-linux-gnu --profile debug
    ///     kiln build --timeout 600 --json
    #[command(visible_alias = "b")]
    Build(BuildArgs),

    /// List resolved units and their artifact paths without building
    Units(BuildArgs),

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     kiln completions bash > ~/.bash_completions/kiln.bash
    ///     kiln completions zsh > ~/.zfunc/_kiln
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors share the configuration exit code; 2 means staging failed
            let code = if e.use_stderr() {
                FailureStage::Configuration.exit_code()
            } else {
                0
            };
            let _ = e.print();
            process::exit(code);
        }
    };
    let cli_config = config::Config::from_env();

    if cli_config.no_color {
        colored::control::set_override(false);
    }

    let mut args = match &cli.command {
        Some(Commands::Build(args)) | Some(Commands::Units(args)) => args.clone(),
        _ => cli.build.clone(),
    };
    // Command-line flag overrides environment variable
    args.json = args.json || cli_config.default_json;
    init_logging(&cli_config, &args);

    let json = args.json;
    let result = match cli.command {
        None | Some(Commands::Build(_)) => commands::build::run(args),
        Some(Commands::Units(_)) => commands::units::run(args),
        Some(Commands::Completions { shell }) => completions(shell),
    };

    if let Err(err) = result {
        let code = exit_code(&err);
        report_error(&err, code, json);
        process::exit(code);
    }
}

fn completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn init_logging(cli_config: &config::Config, args: &BuildArgs) {
    let filter = cli_config.effective_log_filter(args.verbose, args.quiet);
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Exit code for a failed command
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BuildError>() {
        Some(build_err) => build_err.exit_code(),
        None => FailureStage::Configuration.exit_code(),
    }
}

fn failure_stage(err: &anyhow::Error) -> FailureStage {
    err.downcast_ref::<BuildError>()
        .map(BuildError::stage)
        .unwrap_or(FailureStage::Configuration)
}

fn report_error(err: &anyhow::Error, code: i32, json: bool) {
    if json {
        let mut value = serde_json::json!({
            "success": false,
            "stage": failure_stage(err).name(),
            "exit_code": code,
            "error": format!("{:#}", err),
        });
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::BuildFailed { diagnostics, .. }) => {
                value["diagnostics"] = serde_json::Value::from(diagnostics.as_str());
            }
            Some(BuildError::ArtifactMissing { unit, path }) => {
                value["unit"] = serde_json::Value::from(unit.as_str());
                value["path"] = serde_json::Value::from(path.display().to_string());
            }
            _ => {}
        }
        println!("{}", value);
        return;
    }

    eprintln!("{} {:#}", "error:".red().bold(), err);
}
