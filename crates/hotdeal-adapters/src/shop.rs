use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::AdapterError;

/// Canonical shop names. `None` means the raw name is not recognized.
pub trait ShopNameNormalizer: Send + Sync {
    fn normalize(&self, source: &str, raw_name: &str) -> Option<String>;
}

#[derive(Debug, Default, Deserialize)]
struct ShopAliasFile {
    #[serde(default)]
    global: HashMap<String, String>,
    #[serde(default)]
    sources: HashMap<String, HashMap<String, String>>,
}

/// Alias table keyed by a folded form of the raw name; source-specific aliases win
/// over global ones.
#[derive(Debug, Clone, Default)]
pub struct TableShopNameNormalizer {
    global: HashMap<String, String>,
    per_source: HashMap<String, HashMap<String, String>>,
}

fn fold(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '【' | '】') || c.is_whitespace())
        .to_lowercase()
}

fn fold_table(table: HashMap<String, String>) -> HashMap<String, String> {
    table.into_iter().map(|(k, v)| (fold(&k), v)).collect()
}

impl TableShopNameNormalizer {
    pub fn from_yaml_str(raw: &str) -> Result<Self, AdapterError> {
        let file: ShopAliasFile = serde_yaml::from_str(raw).context("parsing shop alias table")?;
        Ok(Self {
            global: fold_table(file.global),
            per_source: file
                .sources
                .into_iter()
                .map(|(source, table)| (source, fold_table(table)))
                .collect(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, AdapterError> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }
}

impl ShopNameNormalizer for TableShopNameNormalizer {
    fn normalize(&self, source: &str, raw_name: &str) -> Option<String> {
        let key = fold(raw_name);
        if key.is_empty() {
            return None;
        }
        self.per_source
            .get(source)
            .and_then(|table| table.get(&key))
            .or_else(|| self.global.get(&key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
global:
  쿠팡: 쿠팡
  coupang: 쿠팡
  G마켓: G마켓
sources:
  quasarzone:
    쿠팡: 쿠팡(로켓)
"#;

    #[test]
    fn folds_brackets_and_case() {
        let n = TableShopNameNormalizer::from_yaml_str(TABLE).unwrap();
        assert_eq!(n.normalize("ppomppu", "[Coupang]").as_deref(), Some("쿠팡"));
        assert_eq!(n.normalize("ppomppu", " g마켓 ").as_deref(), Some("G마켓"));
    }

    #[test]
    fn source_alias_overrides_global_and_unknown_is_absent() {
        let n = TableShopNameNormalizer::from_yaml_str(TABLE).unwrap();
        assert_eq!(n.normalize("quasarzone", "쿠팡").as_deref(), Some("쿠팡(로켓)"));
        assert_eq!(n.normalize("ppomppu", "동네마트"), None);
        assert_eq!(n.normalize("ppomppu", "[]"), None);
    }
}
