use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;
use tracing::debug;

const BASE_FILE: &str = "config/Backfill.toml";
const ENV_PREFIX: &str = "BACKFILL_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging `config/Backfill.toml` and
    /// `BACKFILL_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or fail validation.
    pub fn load() -> Result<AppConfig> {
        Self::extract(Self::base_figment(Path::new(BASE_FILE)))
    }

    /// Loads configuration with a profile overlay `config/Backfill.<profile>.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or fail validation.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let figment = Figment::new()
            .merge(Toml::file(BASE_FILE))
            .merge(Toml::file(format!("config/Backfill.{profile}.toml")))
            .merge(Self::env());
        Self::extract(figment)
    }

    /// Loads configuration from an explicit file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        Self::extract(Self::base_figment(path))
    }

    fn base_figment(path: &Path) -> Figment {
        Figment::new().merge(Toml::file(path)).merge(Self::env())
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<AppConfig> {
        let config: AppConfig = figment
            .extract()
            .context("failed to parse backfill configuration")?;
        config.validate().context("invalid backfill configuration")?;
        debug!(
            sources = config.sources.len(),
            joins = config.joins.len(),
            output_dir = %config.output_dir.display(),
            "Configuration loaded"
        );
        Ok(config)
    }
}
