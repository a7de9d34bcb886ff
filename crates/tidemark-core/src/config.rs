//! Process configuration: optional TOML file overlaid by environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;
use tidemark_bucket::S3Config;

use crate::entities::{builtin_entities, EntityDefinition};
use crate::query::QueryPlan;
use crate::watermark::WatermarkStrategy;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("entity '{0}' is not built in; custom entities need folder, strategy, full_sql and delta_sql")]
    IncompleteEntity(String),
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Per-entity adjustments under `[entities.<name>]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityOverride {
    pub enabled: Option<bool>,
    pub folder: Option<String>,
    pub strategy: Option<WatermarkStrategy>,
    pub full_sql: Option<String>,
    pub delta_sql: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: S3Config,
    /// IANA zone deciding the calendar day, and therefore the object year, of a run.
    pub timezone: String,
    pub entities: BTreeMap<String, EntityOverride>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: S3Config::default(),
            timezone: "UTC".to_string(),
            entities: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Reads `path` when given, then overlays the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies environment-style overrides through `lookup`. Empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(url) = lookup("DATABASE_URL").or_else(|| lookup("TIDEMARK_DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(raw) = lookup("TIDEMARK_MAX_CONNECTIONS") {
            self.database.max_connections =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "TIDEMARK_MAX_CONNECTIONS".to_string(),
                    message: format!("'{raw}' is not a positive integer"),
                })?;
        }
        if let Some(timezone) = lookup("TIDEMARK_TIMEZONE") {
            self.timezone = timezone;
        }
        self.storage = self.storage.with_overrides(lookup);

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.storage.bucket.is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }
        self.timezone()?;
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL (or TIDEMARK_DATABASE_URL)"))
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Calendar day of `now` in the configured timezone.
    pub fn run_date(&self, now: DateTime<Utc>) -> Result<NaiveDate, ConfigError> {
        Ok(now.with_timezone(&self.timezone()?).date_naive())
    }

    /// Built-in catalog with overrides applied, plus any fully specified custom entities.
    /// Disabled entities are dropped; catalog order is kept and custom entities follow.
    pub fn resolve_entities(&self) -> Result<Vec<EntityDefinition>, ConfigError> {
        let mut resolved = Vec::new();

        for builtin in builtin_entities() {
            match self.entities.get(&builtin.name) {
                Some(overrides) => {
                    if overrides.enabled == Some(false) {
                        continue;
                    }
                    resolved.push(apply_override(builtin.clone(), overrides)?);
                }
                None => resolved.push(builtin.clone()),
            }
        }

        for (name, overrides) in &self.entities {
            if builtin_entities().iter().any(|entity| &entity.name == name) {
                continue;
            }
            if overrides.enabled == Some(false) {
                continue;
            }
            resolved.push(custom_entity(name, overrides)?);
        }

        Ok(resolved)
    }

    /// Resolved entities restricted to `names`, in the order given. Empty `names` selects all.
    pub fn select_entities(&self, names: &[String]) -> Result<Vec<EntityDefinition>, ConfigError> {
        let resolved = self.resolve_entities()?;
        if names.is_empty() {
            return Ok(resolved);
        }

        names
            .iter()
            .map(|name| {
                resolved
                    .iter()
                    .find(|entity| &entity.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownEntity(name.clone()))
            })
            .collect()
    }
}

fn apply_override(
    mut entity: EntityDefinition,
    overrides: &EntityOverride,
) -> Result<EntityDefinition, ConfigError> {
    if let Some(folder) = &overrides.folder {
        entity.folder = folder.clone();
    }
    if let Some(strategy) = &overrides.strategy {
        entity.strategy = strategy.clone();
    }
    if let Some(sql) = &overrides.full_sql {
        entity.full_load = QueryPlan::single(sql.clone());
    }
    if let Some(sql) = &overrides.delta_sql {
        entity.delta_load = QueryPlan::single(sql.clone());
    }
    validate_entity(&entity)?;
    Ok(entity)
}

fn custom_entity(name: &str, overrides: &EntityOverride) -> Result<EntityDefinition, ConfigError> {
    let (Some(folder), Some(strategy), Some(full_sql), Some(delta_sql)) = (
        &overrides.folder,
        &overrides.strategy,
        &overrides.full_sql,
        &overrides.delta_sql,
    ) else {
        return Err(ConfigError::IncompleteEntity(name.to_string()));
    };

    let entity = EntityDefinition {
        name: name.to_string(),
        folder: folder.clone(),
        strategy: strategy.clone(),
        full_load: QueryPlan::single(full_sql.clone()),
        delta_load: QueryPlan::single(delta_sql.clone()),
    };
    validate_entity(&entity)?;
    Ok(entity)
}

fn validate_entity(entity: &EntityDefinition) -> Result<(), ConfigError> {
    if entity.folder.trim().is_empty() || entity.folder.contains('/') {
        return Err(ConfigError::InvalidValue {
            field: format!("entities.{}.folder", entity.name),
            message: "must be a non-empty name without '/'".to_string(),
        });
    }
    if entity.strategy.column().trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("entities.{}.strategy.column", entity.name),
            message: "must name a column".to_string(),
        });
    }
    Ok(())
}
