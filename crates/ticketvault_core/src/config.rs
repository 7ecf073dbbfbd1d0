use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICKETS_FOLDER: &str = "tickets";
pub const CONFIG_FILENAME: &str = ".ticketvault.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct VaultConfig {
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub format: FormatSection,
    #[serde(default)]
    pub tags: TagSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TrackerSection {
    pub url: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct VaultSection {
    pub root: Option<PathBuf>,
    pub tickets_folder: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FormatSection {
    #[serde(default = "default_true")]
    pub include_comments: bool,
    #[serde(default = "default_true")]
    pub include_attachments: bool,
    #[serde(default = "default_true")]
    pub include_links: bool,
    /// 0 means no limit.
    #[serde(default)]
    pub max_description_length: usize,
    pub comment_style: Option<String>,
    pub metadata_style: Option<String>,
}

impl Default for FormatSection {
    fn default() -> Self {
        Self {
            include_comments: true,
            include_attachments: true,
            include_links: true,
            max_description_length: 0,
            comment_style: None,
            metadata_style: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TagSection {
    #[serde(default)]
    pub status: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: BTreeMap<String, String>,
    #[serde(default, rename = "type")]
    pub issue_type: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl VaultConfig {
    /// Tracker base URL: env `JIRA_URL` > config.
    pub fn tracker_url(&self) -> Option<String> {
        env_or(&self.tracker.url, "JIRA_URL")
    }

    /// Account email: env `JIRA_EMAIL` > config.
    pub fn tracker_email(&self) -> Option<String> {
        env_or(&self.tracker.email, "JIRA_EMAIL")
    }

    /// API token comes from the environment only and is never persisted.
    pub fn tracker_token(&self) -> Option<String> {
        non_empty_env("JIRA_API_TOKEN")
    }

    /// Vault root: env `VAULT_PATH` > config > current directory.
    pub fn vault_root(&self) -> PathBuf {
        if let Some(value) = non_empty_env("VAULT_PATH") {
            return PathBuf::from(value);
        }
        self.vault
            .root
            .clone()
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Folder for ticket documents: env `TICKETS_FOLDER` > config > default.
    pub fn tickets_folder(&self) -> String {
        if let Some(value) = non_empty_env("TICKETS_FOLDER") {
            return value;
        }
        self.vault
            .tickets_folder
            .clone()
            .unwrap_or_else(|| DEFAULT_TICKETS_FOLDER.to_string())
    }

    pub fn tickets_path(&self) -> PathBuf {
        self.vault_root().join(self.tickets_folder())
    }

    /// Mapped tag for a status, falling back to the normalized form.
    pub fn status_tag(&self, status: &str) -> String {
        mapped_tag(&self.tags.status, status, "status")
    }

    pub fn priority_tag(&self, priority: &str) -> String {
        mapped_tag(&self.tags.priority, priority, "priority")
    }

    pub fn type_tag(&self, issue_type: &str) -> String {
        mapped_tag(&self.tags.issue_type, issue_type, "type")
    }

    /// Missing required settings, by env-variable name.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.tracker_url().is_none() {
            errors.push("JIRA_URL is required".to_string());
        }
        if self.tracker_email().is_none() {
            errors.push("JIRA_EMAIL is required".to_string());
        }
        if self.tracker_token().is_none() {
            errors.push("JIRA_API_TOKEN is required".to_string());
        }
        errors
    }
}

fn mapped_tag(mappings: &BTreeMap<String, String>, value: &str, namespace: &str) -> String {
    if let Some(mapped) = mappings.get(value) {
        return mapped.clone();
    }
    format!("{namespace}/{}", value.to_lowercase().replace(' ', "-"))
}

fn env_or(config_value: &Option<String>, var: &str) -> Option<String> {
    non_empty_env(var).or_else(|| config_value.clone())
}

fn non_empty_env(var: &str) -> Option<String> {
    let value = env::var(var).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Load config from a TOML file. Returns the default when the file is absent.
pub fn load_config(config_path: &Path) -> Result<VaultConfig> {
    if !config_path.exists() {
        return Ok(VaultConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: VaultConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Write a commented starter config. Returns false when one already exists
/// and `force` is not set.
pub fn write_default_config(config_path: &Path, force: bool) -> Result<bool> {
    if config_path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(config_path, STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

const STARTER_CONFIG: &str = r#"# ticketvault configuration.
# The API token is read from the JIRA_API_TOKEN environment variable only.

[tracker]
# url = "https://your-site.atlassian.net"
# email = "you@example.com"

[vault]
# root = "/path/to/vault"
tickets_folder = "tickets"

[format]
include_comments = true
include_attachments = true
include_links = true
max_description_length = 0
# comment_style = "callout"   # callout | quote | section
# metadata_style = "block"    # block | table

[tags.status]
"To Do" = "status/todo"
"In Progress" = "status/in-progress"
"Done" = "status/done"

[tags.priority]
"Highest" = "priority/highest"
"High" = "priority/high"
"Medium" = "priority/medium"
"Low" = "priority/low"
"Lowest" = "priority/lowest"

[tags.type]
"Epic" = "type/epic"
"Story" = "type/story"
"Task" = "type/task"
"Bug" = "type/bug"
"Sub-task" = "type/subtask"
"#;
