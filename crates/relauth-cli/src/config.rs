use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use relauth_core::engine::EngineConfig;
use relauth_core::schema::SchemaLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub schema_limits: SchemaLimitsSection,
    pub lookup: LookupSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_depth: usize,
    pub max_concurrent_branches: usize,
    pub max_concurrent_reads: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaLimitsSection {
    pub max_entities: usize,
    pub max_relations_per_entity: usize,
    pub max_permissions_per_entity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupSection {
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            max_depth: defaults.max_depth,
            max_concurrent_branches: defaults.max_concurrent_branches,
            max_concurrent_reads: defaults.max_concurrent_reads,
            timeout_ms: None,
        }
    }
}

impl Default for SchemaLimitsSection {
    fn default() -> Self {
        let defaults = SchemaLimits::default();
        Self {
            max_entities: defaults.max_entities,
            max_relations_per_entity: defaults.max_relations_per_entity,
            max_permissions_per_entity: defaults.max_permissions_per_entity,
        }
    }
}

impl Default for LookupSection {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file if given, then `RELAUTH_*` variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::ReadFile(path.display().to_string(), e.to_string())
                })?;
                Self::from_toml(&contents)?
            }
            None => AppConfig::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseToml(e.to_string()))
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("RELAUTH_ENGINE_MAX_DEPTH")
            && let Ok(n) = v.parse()
        {
            self.engine.max_depth = n;
        }
        if let Some(v) = var("RELAUTH_ENGINE_MAX_CONCURRENT_BRANCHES")
            && let Ok(n) = v.parse()
        {
            self.engine.max_concurrent_branches = n;
        }
        if let Some(v) = var("RELAUTH_ENGINE_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.engine.timeout_ms = Some(ms);
        }
        if let Some(v) = var("RELAUTH_LOOKUP_PAGE_SIZE")
            && let Ok(n) = v.parse()
        {
            self.lookup.page_size = n;
        }
        if let Some(v) = var("RELAUTH_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = var("RELAUTH_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_depth == 0 {
            return Err(ConfigError::Validation(
                "engine.max_depth must be non-zero".to_string(),
            ));
        }
        if self.engine.max_concurrent_branches == 0 {
            return Err(ConfigError::Validation(
                "engine.max_concurrent_branches must be non-zero".to_string(),
            ));
        }
        if self.lookup.page_size == 0 {
            return Err(ConfigError::Validation(
                "lookup.page_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.engine.max_depth,
            max_concurrent_branches: self.engine.max_concurrent_branches,
            max_concurrent_reads: self.engine.max_concurrent_reads,
            timeout: self.engine.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn to_schema_limits(&self) -> SchemaLimits {
        SchemaLimits {
            max_entities: self.schema_limits.max_entities,
            max_relations_per_entity: self.schema_limits.max_relations_per_entity,
            max_permissions_per_entity: self.schema_limits.max_permissions_per_entity,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_config_has_sensible_values() {
        let config = AppConfig::default();

        assert_eq!(config.engine.max_depth, 6);
        assert_eq!(config.engine.max_concurrent_branches, 10);
        assert_eq!(config.engine.timeout_ms, None);
        assert_eq!(config.schema_limits.max_entities, 50);
        assert_eq!(config.lookup.page_size, 100);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relauth.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[engine]
max_depth = 10
timeout_ms = 250

[schema_limits]
max_entities = 5

[lookup]
page_size = 20

[log]
format = "pretty"
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.engine.max_depth, 10);
        assert_eq!(config.engine.max_concurrent_branches, 10);
        assert_eq!(config.schema_limits.max_entities, 5);
        assert_eq!(config.lookup.page_size, 20);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.to_engine_config().timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/relauth.toml")));

        assert!(matches!(
            result,
            Err(ConfigError::ReadFile(ref path, _)) if path.contains("relauth.toml")
        ));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result = AppConfig::from_toml("[engine\nmax_depth = ");

        assert!(matches!(result, Err(ConfigError::ParseToml(_))));
    }

    #[test]
    fn env_vars_override_toml() {
        let mut config = AppConfig::from_toml("[engine]\nmax_depth = 9\n").unwrap();

        config.apply_env_overrides(env(&[
            ("RELAUTH_ENGINE_MAX_DEPTH", "12"),
            ("RELAUTH_ENGINE_MAX_CONCURRENT_BRANCHES", "4"),
            ("RELAUTH_ENGINE_TIMEOUT_MS", "1500"),
            ("RELAUTH_LOOKUP_PAGE_SIZE", "7"),
            ("RELAUTH_LOG_LEVEL", "trace"),
            ("RELAUTH_LOG_FORMAT", "pretty"),
        ]));

        assert_eq!(config.engine.max_depth, 12);
        assert_eq!(config.engine.max_concurrent_branches, 4);
        assert_eq!(config.engine.timeout_ms, Some(1500));
        assert_eq!(config.lookup.page_size, 7);
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let mut config = AppConfig::default();

        config.apply_env_overrides(env(&[
            ("RELAUTH_ENGINE_MAX_DEPTH", "deep"),
            ("RELAUTH_LOG_FORMAT", "xml"),
        ]));

        assert_eq!(config.engine.max_depth, 6);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn validation_rejects_zero_max_depth() {
        let mut config = AppConfig::default();
        config.engine.max_depth = 0;

        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("max_depth"))
        );
    }

    #[test]
    fn validation_rejects_zero_branches() {
        let mut config = AppConfig::default();
        config.engine.max_concurrent_branches = 0;

        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("branches"))
        );
    }

    #[test]
    fn validation_rejects_zero_page_size() {
        let mut config = AppConfig::default();
        config.lookup.page_size = 0;

        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("page_size"))
        );
    }

    #[test]
    fn schema_limits_convert_to_core() {
        let mut config = AppConfig::default();
        config.schema_limits.max_relations_per_entity = 3;

        let limits = config.to_schema_limits();

        assert_eq!(limits.max_relations_per_entity, 3);
        assert_eq!(limits.max_entities, 50);
    }
}
