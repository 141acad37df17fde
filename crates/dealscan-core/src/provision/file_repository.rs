use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProvisionRule, RuleRepository};

/// On-disk layout of one rule-pack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulePackFile {
    /// Default section stamped onto provisions that do not name their own.
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub provisions: Vec<ProvisionRule>,
}

/// Loads provision rules from `*.yaml`, `*.yml` and `*.json` files under a directory.
///
/// Files are read in lexicographic file-name order so pack order is stable.
pub struct FileRuleRepository {
    base_path: PathBuf,
    cache: OnceCell<Vec<ProvisionRule>>,
}

impl FileRuleRepository {
    /// Create a repository rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn pack_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.base_path).with_context(|| {
            format!(
                "failed to read rule pack directory {}",
                self.base_path.display()
            )
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list {}", self.base_path.display()))?
                .path();
            if path.is_file() && PackFormat::from_path(&path).is_some() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    fn load_file(&self, path: &Path, seen: &mut HashSet<String>) -> Result<Vec<ProvisionRule>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read rule file at {}", path.display()))?;
        let pack: RulePackFile = match PackFormat::from_path(path) {
            Some(PackFormat::Json) => serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON rule file at {}", path.display()))?,
            _ => serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid YAML rule file at {}", path.display()))?,
        };

        let mut rules = Vec::with_capacity(pack.provisions.len());
        for mut rule in pack.provisions {
            if !seen.insert(rule.id.clone()) {
                return Err(anyhow!(
                    "duplicate rule id `{}` in {}",
                    rule.id,
                    path.display()
                ));
            }
            if rule.section.is_empty() {
                rule.section = pack.section.clone();
            }
            rule.validate()
                .with_context(|| format!("invalid rule `{}` in {}", rule.id, path.display()))?;
            rules.push(rule);
        }
        debug!(file = %path.display(), rules = rules.len(), "rule file loaded");
        Ok(rules)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackFormat {
    Yaml,
    Json,
}

impl PackFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl RuleRepository for FileRuleRepository {
    async fn load_rules(&self) -> Result<Vec<ProvisionRule>> {
        let rules = self.cache.get_or_try_init(|| {
            let mut seen = HashSet::new();
            let mut rules = Vec::new();
            for path in self.pack_files()? {
                rules.extend(self.load_file(&path, &mut seen)?);
            }
            Ok::<_, anyhow::Error>(rules)
        })?;
        Ok(rules.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<ProvisionRule>> {
        let rules = self.load_rules().await?;
        Ok(rules.into_iter().find(|rule| rule.id == rule_id))
    }
}
