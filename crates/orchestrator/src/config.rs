//! Orchestrator configuration loading

use anyhow::{Context, Result};
use orchestrator_lib::OrchestratorSettings;
use std::path::Path;

/// Environment variables are `ORCHESTRATOR_<KEY>`, e.g. `ORCHESTRATOR_BATCH_SIZE`
const ENV_PREFIX: &str = "ORCHESTRATOR";

/// Load settings from an optional file, overridden by the environment
pub fn load(path: Option<&Path>) -> Result<OrchestratorSettings> {
    load_with(path, environment())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_with(path: Option<&Path>, env: config::Environment) -> Result<OrchestratorSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(env)
        .build()
        .context("Failed to read orchestrator configuration")?;

    let settings: OrchestratorSettings = config
        .try_deserialize()
        .context("Invalid orchestrator configuration")?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_load_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
failure_threshold = 3
batch_size = 25
currency = "EUR"

[[pricing]]
kind = "discount"
percent = 15.0

[[budgets]]
id = "platform"
amount = 5000.0
start = "2024-01-01T00:00:00Z"
end = "2024-04-01T00:00:00Z"
thresholds = [0.5, 1.0]
"#
        )
        .unwrap();

        let settings = load_with(Some(file.path()), env(&[])).unwrap();
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.currency, "EUR");
        assert_eq!(settings.pricing.len(), 1);
        assert_eq!(settings.budgets[0].thresholds, vec![0.5, 1.0]);
        assert_eq!(settings.max_attempts, 3);
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "batch_size = 25\nmax_attempts = 4").unwrap();

        let settings = load_with(
            Some(file.path()),
            env(&[
                ("ORCHESTRATOR_BATCH_SIZE", "30"),
                ("ORCHESTRATOR_CURRENCY", "EUR"),
                ("UNRELATED_BATCH_SIZE", "99"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.batch_size, 30);
        assert_eq!(settings.currency, "EUR");
        assert_eq!(settings.max_attempts, 4);
    }

    #[test]
    fn test_invalid_environment_value_rejected() {
        assert!(load_with(None, env(&[("ORCHESTRATOR_BATCH_SIZE", "500")])).is_err());
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "batch_size = 500").unwrap();
        assert!(load_with(Some(file.path()), env(&[])).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/orchestrator.toml"))).is_err());
    }
}
