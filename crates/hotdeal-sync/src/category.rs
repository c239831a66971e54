//! Category resolution: explicit source mapping, then rule inference, then default.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hotdeal_core::{CategoryId, SourceCategoryId};
use hotdeal_storage::{StoreResult, StoreTx};
use serde::Deserialize;
use tracing::debug;

const EMBEDDED_CATEGORY_RULES: &str = include_str!("../../../rules/categories.yaml");
const EMBEDDED_SUBCATEGORY_RULES: &str = include_str!("../../../rules/subcategories.yaml");

/// One row of the ordered category rule table. Declaration order breaks ties.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryRule {
    Keyword {
        category: String,
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    Domain {
        category: String,
        domains: Vec<String>,
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl CategoryRule {
    pub fn category(&self) -> &str {
        match self {
            CategoryRule::Keyword { category, .. } | CategoryRule::Domain { category, .. } => {
                category
            }
        }
    }
}

/// What the rules get to look at. `text` is matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub text: String,
    pub domains: Vec<String>,
}

impl Evidence {
    pub fn new<'a>(texts: impl IntoIterator<Item = &'a str>, domains: Vec<String>) -> Self {
        Self {
            text: texts.into_iter().collect::<Vec<_>>().join(" ").to_lowercase(),
            domains: domains.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

fn keyword_hits(keywords: &[String], text: &str) -> u32 {
    keywords
        .iter()
        .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
        .count() as u32
}

fn domain_hits(hints: &[String], domains: &[String]) -> u32 {
    hints
        .iter()
        .map(|h| h.trim_start_matches('.').to_lowercase())
        .filter(|h| {
            domains
                .iter()
                .any(|d| d == h || d.ends_with(&format!(".{h}")))
        })
        .count() as u32
}

/// Include-keyword hits plus twice the domain-hint hits; any exclude hit zeroes it.
pub fn score(rule: &CategoryRule, evidence: &Evidence) -> u32 {
    let (include, domains, exclude) = match rule {
        CategoryRule::Keyword { include, exclude, .. } => {
            (include.as_slice(), &[][..], exclude.as_slice())
        }
        CategoryRule::Domain {
            domains,
            include,
            exclude,
            ..
        } => (include.as_slice(), domains.as_slice(), exclude.as_slice()),
    };
    if keyword_hits(exclude, &evidence.text) > 0 {
        return 0;
    }
    keyword_hits(include, &evidence.text) + 2 * domain_hits(domains, &evidence.domains)
}

/// Index and score of the strictly highest positive rule; the earliest wins ties.
pub fn best_rule(rules: &[CategoryRule], evidence: &Evidence) -> Option<(usize, u32)> {
    let mut best: Option<(usize, u32)> = None;
    for (index, rule) in rules.iter().enumerate() {
        let s = score(rule, evidence);
        if s > 0 && best.map_or(true, |(_, top)| s > top) {
            best = Some((index, s));
        }
    }
    best
}

#[derive(Debug, Deserialize)]
struct CategoryRulesFile {
    #[allow(dead_code)]
    version: u32,
    rules: Vec<CategoryRule>,
}

pub fn parse_category_rules(raw: &str) -> Result<Vec<CategoryRule>> {
    let file: CategoryRulesFile = serde_yaml::from_str(raw).context("parsing category rules")?;
    for (index, rule) in file.rules.iter().enumerate() {
        if rule.category().trim().is_empty() {
            bail!("category rule #{index} has no category");
        }
    }
    Ok(file.rules)
}

pub fn load_category_rules(path: Option<&Path>) -> Result<Vec<CategoryRule>> {
    match path {
        Some(path) => parse_category_rules(
            &std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )
        .with_context(|| format!("loading {}", path.display())),
        None => parse_category_rules(EMBEDDED_CATEGORY_RULES),
    }
}

/// Which cascade stage produced the category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStage {
    Mapping { source_category_id: SourceCategoryId },
    Rule { index: usize, category: String, score: u32 },
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryResolution {
    pub category_id: CategoryId,
    pub source_category_id: Option<SourceCategoryId>,
    pub stage: ResolutionStage,
    /// Human-readable notes for each stage consulted, in order.
    pub trail: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceCategoryRef<'a> {
    pub key: Option<&'a str>,
    pub name: Option<&'a str>,
}

pub struct CategoryResolver {
    rules: Vec<CategoryRule>,
    default_category_id: CategoryId,
}

impl CategoryResolver {
    pub fn new(rules: Vec<CategoryRule>, default_category_id: CategoryId) -> Self {
        Self {
            rules,
            default_category_id,
        }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub async fn resolve(
        &self,
        tx: &mut dyn StoreTx,
        source: &str,
        source_category: SourceCategoryRef<'_>,
        evidence: &Evidence,
    ) -> StoreResult<CategoryResolution> {
        let mut trail = Vec::new();
        let mut source_category_id = None;

        match (source_category.key, source_category.name) {
            (Some(key), Some(name)) if !key.is_empty() && !name.is_empty() => {
                let id = tx.upsert_source_category(source, key, name).await?;
                source_category_id = Some(id);
                if let Some(category_id) = tx.mapped_category(id).await? {
                    trail.push(format!("mapping: {source}/{key} -> {category_id}"));
                    return Ok(self.finish(CategoryResolution {
                        category_id,
                        source_category_id,
                        stage: ResolutionStage::Mapping {
                            source_category_id: id,
                        },
                        trail,
                    }));
                }
                trail.push(format!("mapping: {source}/{key} is unmapped"));
            }
            _ => trail.push("mapping: no source category on the post".to_string()),
        }

        if let Some((index, score)) = best_rule(&self.rules, evidence) {
            let category = self.rules[index].category();
            match tx.category_id_by_name(category).await? {
                Some(category_id) => {
                    trail.push(format!("rules: #{index} {category} scored {score}"));
                    return Ok(self.finish(CategoryResolution {
                        category_id,
                        source_category_id,
                        stage: ResolutionStage::Rule {
                            index,
                            category: category.to_string(),
                            score,
                        },
                        trail,
                    }));
                }
                None => trail.push(format!("rules: #{index} names unknown category {category}")),
            }
        } else {
            trail.push("rules: nothing scored".to_string());
        }

        trail.push(format!("default: {}", self.default_category_id));
        Ok(self.finish(CategoryResolution {
            category_id: self.default_category_id,
            source_category_id,
            stage: ResolutionStage::Default,
            trail,
        }))
    }

    fn finish(&self, resolution: CategoryResolution) -> CategoryResolution {
        debug!(category_id = resolution.category_id, trail = ?resolution.trail, "category resolved");
        resolution
    }
}

/// Second-level keyword rule, only eligible under its parent category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubcategoryRule {
    pub parent: String,
    pub name: String,
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubcategoryRulesFile {
    #[allow(dead_code)]
    version: u32,
    rules: Vec<SubcategoryRule>,
}

#[derive(Debug, Clone, Default)]
pub struct SubcategoryClassifier {
    rules: Vec<SubcategoryRule>,
}

impl SubcategoryClassifier {
    pub fn new(rules: Vec<SubcategoryRule>) -> Self {
        Self { rules }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: SubcategoryRulesFile =
            serde_yaml::from_str(raw).context("parsing subcategory rules")?;
        Ok(Self::new(file.rules))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_yaml_str(
                &std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
            ),
            None => Self::from_yaml_str(EMBEDDED_SUBCATEGORY_RULES),
        }
    }

    /// Distinct parent category names, in declaration order.
    pub fn parents(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !out.contains(&rule.parent.as_str()) {
                out.push(&rule.parent);
            }
        }
        out
    }

    /// Highest-scoring rule under `parent`; ties go to the earliest.
    pub fn classify(&self, parent: &str, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        let mut best: Option<(&SubcategoryRule, u32)> = None;
        for rule in self.rules.iter().filter(|r| r.parent == parent) {
            if keyword_hits(&rule.exclude, &text) > 0 {
                continue;
            }
            let hits = keyword_hits(&rule.include, &text);
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((rule, hits));
            }
        }
        best.map(|(rule, _)| rule.name.as_str())
    }

    /// Looks up the resolved category's name among the rule parents, then classifies.
    pub async fn classify_for(
        &self,
        tx: &mut dyn StoreTx,
        category_id: CategoryId,
        text: &str,
    ) -> StoreResult<Option<String>> {
        for parent in self.parents() {
            if self.classify(parent, text).is_none() {
                continue;
            }
            if tx.category_id_by_name(parent).await? == Some(category_id) {
                return Ok(self.classify(parent, text).map(ToString::to_string));
            }
        }
        Ok(None)
    }
}
