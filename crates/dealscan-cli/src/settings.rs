use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use dealscan_core::EngineConfig;
use serde::Deserialize;

/// Layered CLI settings: optional settings file, then `DEALSCAN_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rule pack directory, used when `--rules-dir` is not given.
    pub rules_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Settings {
    const ENV_PREFIX: &'static str = "DEALSCAN";

    /// Load settings. Nested keys use a double underscore, e.g.
    /// `DEALSCAN_ENGINE__CONTEXT_WINDOW=40`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().with_context(|| match path {
            Some(path) => format!("failed to read settings from {}", path.display()),
            None => "failed to read settings from environment".to_string(),
        })?;
        let settings: Settings = config
            .try_deserialize()
            .context("invalid dealscan settings")?;
        settings
            .engine
            .validate()
            .context("invalid engine settings")?;
        Ok(settings)
    }

    /// Resolve the rule pack directory: explicit flag, then settings, then `./rules`.
    pub fn resolve_rules_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.rules_dir.clone())
            .unwrap_or_else(|| PathBuf::from("./rules"))
    }
}
