//! CLI configuration via environment variables
//!
//! Output preferences that apply to every command. Pipeline settings live in
//! `kiln.toml` and are handled by `kiln-config`.

use std::env;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "KILN_LOG";

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (KILN_JSON=1)
    pub default_json: bool,
    /// Disable colored output (KILN_NO_COLOR=1 or NO_COLOR=1)
    pub no_color: bool,
    /// Log filter directives (KILN_LOG=debug)
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("KILN_JSON")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            no_color: env::var_os("KILN_NO_COLOR").is_some() || env::var_os("NO_COLOR").is_some(),
            log_filter: env::var(LOG_ENV).ok().filter(|v| !v.trim().is_empty()),
        }
    }

    /// Log filter to install: `KILN_LOG` wins, then the verbosity flags
    pub fn effective_log_filter(&self, verbose: bool, quiet: bool) -> String {
        if let Some(filter) = &self.log_filter {
            return filter.clone();
        }
        if verbose {
            "warn,kiln=debug,kiln_build=debug,kiln_config=debug".to_string()
        } else if quiet {
            "error".to_string()
        } else {
            "warn".to_string()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "json"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(log_filter: Option<&str>) -> Config {
        Config {
            default_json: false,
            no_color: false,
            log_filter: log_filter.map(str::to_string),
        }
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" json "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_log_filter_defaults_to_warn() {
        assert_eq!(config(None).effective_log_filter(false, false), "warn");
        assert_eq!(config(None).effective_log_filter(false, true), "error");
        assert!(config(None)
            .effective_log_filter(true, false)
            .contains("kiln_build=debug"));
    }

    #[test]
    fn test_log_env_wins_over_flags() {
        let config = config(Some("trace"));
        assert_eq!(config.effective_log_filter(false, true), "trace");
        assert_eq!(config.effective_log_filter(true, false), "trace");
    }
}
