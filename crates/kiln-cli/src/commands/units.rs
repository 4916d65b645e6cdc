//! Units command - show what a build would stage, without building

use super::build::{resolve_config, BuildArgs};
use anyhow::Result;
use colored::Colorize;
use kiln_build::{validate_units, PipelineConfig};

/// Run the units command
pub fn run(args: BuildArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    validate_units(&config.units)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&units_json(&config))?);
        return Ok(());
    }

    println!(
        "{} units for {}",
        config.units.len().to_string().bold(),
        config.target
    );
    let output_dir = config.output_dir();
    for unit in &config.units {
        println!(
            "  {:<24} {} -> {}",
            unit.name.cyan(),
            output_dir.join(&unit.artifact).display(),
            config.publish_dir.join(&unit.artifact).display()
        );
    }

    Ok(())
}

fn units_json(config: &PipelineConfig) -> serde_json::Value {
    let output_dir = config.output_dir();
    serde_json::json!({
        "target": config.target.triple,
        "profile": config.target.profile.name(),
        "publish_dir": config.publish_dir.display().to_string(),
        "units": config.units.iter().map(|unit| serde_json::json!({
            "name": unit.name,
            "artifact": unit.artifact,
            "source": output_dir.join(&unit.artifact).display().to_string(),
            "destination": config.publish_dir.join(&unit.artifact).display().to_string(),
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_build::BuildUnit;

    #[test]
    fn test_units_json_lists_paths() {
        let config = PipelineConfig::new("/ws").with_units(vec![BuildUnit::new("kt", "kt.wasm")]);
        let json = units_json(&config);

        assert_eq!(json["target"], "wasm32-unknown-unknown");
        assert_eq!(json["units"][0]["name"], "kt");
        assert_eq!(
            json["units"][0]["source"],
            "/ws/target/wasm32-unknown-unknown/release/kt.wasm"
        );
        assert_eq!(json["units"][0]["destination"], "/ws/res/kt.wasm");
    }
}
