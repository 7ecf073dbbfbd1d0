use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::compose::{MetaValue, parse_meta_block};

/// A document previously written to the vault: raw content plus the parsed
/// metadata block. Built fresh on every read, never mutated in place.
#[derive(Debug, Clone)]
pub struct LocalDocument {
    pub path: PathBuf,
    pub raw: String,
    pub meta: Vec<(String, MetaValue)>,
    pub body: String,
    pub key: String,
}

impl LocalDocument {
    /// Read and parse the document at `path`; `None` when no file exists.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let (meta, body) = parse_meta_block(&raw);
        let key = meta
            .iter()
            .find(|(name, _)| name == "key")
            .and_then(|(_, value)| value.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| key_from_filename(path));

        Ok(Some(Self {
            path: path.to_path_buf(),
            raw,
            meta,
            body,
            key,
        }))
    }

    /// First metadata value with the given name, as a string.
    pub fn meta_str(&self, name: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_str())
    }
}

fn key_from_filename(path: &Path) -> String {
    static KEY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9]*-\d+)").unwrap());
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    KEY_RE
        .find(stem)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| stem.to_string())
}
