//! YAML configuration.
//!
//! Maps the `config.yaml` the operator writes: the accounts to audit (name,
//! 12-digit id, path to the IAM snapshot) and exactly one datasource section.
//! Presence of `elasticsearch` selects that backend; otherwise Athena.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub athena: Option<AthenaConfig>,
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_account_id")]
    pub id: String,
    pub iam: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AthenaConfig {
    pub s3_bucket: String,
    pub path: String,
    #[serde(default)]
    pub output_s3_bucket: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub timestamp_field: Option<String>,
}

/// Account ids are 12-digit numbers; YAML authors write them quoted or not.
fn deserialize_account_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(u64),
        Text(String),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Number(id) => id.to_string(),
        IdRepr::Text(id) => id,
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Could not load yaml from config file {}", path.display()))?;
        if config.athena.is_none() && config.elasticsearch.is_none() {
            bail!(
                "Config file {} must contain an athena or elasticsearch section",
                path.display()
            );
        }
        Ok(config)
    }

    /// Find an account by name or by 12-digit id.
    pub fn account(&self, name_or_id: &str) -> Result<&AccountConfig> {
        let account = self
            .accounts
            .iter()
            .find(|account| account.name == name_or_id || account.id == name_or_id)
            .with_context(|| format!("Account name {} not found in config", name_or_id))?;

        if account.id.len() != 12 || !account.id.bytes().all(|b| b.is_ascii_digit()) {
            bail!("{} is not a 12-digit account id", account.id);
        }

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_YAML: &str = "
accounts:
  - name: prod
    id: 111111111111
    iam: prod.json
  - name: dev
    id: \"222222222222\"
    iam: dev.json
athena:
  s3_bucket: my-trail-bucket
  path: logs
";

    #[test]
    fn account_id_accepts_number_or_string() {
        let config: Config = serde_yaml::from_str(CONFIG_YAML).unwrap();

        assert_eq!(config.account("prod").unwrap().id, "111111111111");
        assert_eq!(config.account("222222222222").unwrap().name, "dev");
    }

    #[test]
    fn invalid_account_ids_are_rejected() {
        let config: Config = serde_yaml::from_str(
            "
accounts:
  - name: broken
    id: 1234
    iam: broken.json
athena:
  s3_bucket: bucket
  path: logs
",
        )
        .unwrap();

        assert!(config.account("broken").is_err());
        assert!(config.account("missing").is_err());
    }
}
