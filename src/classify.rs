use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RulesError;
use crate::normalize::normalize;

const KEYWORD_HEADERS: &[&str] = &["keyword", "Anahtar_Kelime"];
const CATEGORY_HEADERS: &[&str] = &["category", "Kategori"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub keyword: String,
    pub category: String,
}

impl CategoryRule {
    pub fn new(keyword: impl Into<String>, category: impl Into<String>) -> Self {
        CategoryRule {
            keyword: keyword.into(),
            category: category.into(),
        }
    }
}

/// Category of the first rule whose keyword occurs in `product`, compared
/// after trimming and [`normalize`]. Empty string when nothing matches.
pub fn classify(product: &str, rules: &[CategoryRule]) -> String {
    let product = normalize(product);
    rules
        .iter()
        .find(|rule| keyword_matches(&normalize(rule.keyword.trim()), &product))
        .map(|rule| rule.category.clone())
        .unwrap_or_default()
}

fn keyword_matches(keyword: &str, product: &str) -> bool {
    !keyword.is_empty() && product.contains(keyword)
}

/// Ordered rule table. Keywords are trimmed and normalized at load time.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| CategoryRule::new(normalize(r.keyword.trim()), r.category))
            .collect();
        RuleSet { rules }
    }

    pub fn classify(&self, product: &str) -> String {
        classify(product, &self.rules)
    }
}

/// Load the keyword → category table from CSV. Fails when the file or either
/// column is absent.
pub fn load_rules(path: &Path) -> Result<RuleSet, RulesError> {
    if !path.exists() {
        return Err(RulesError::NotFound(path.to_path_buf()));
    }
    let read_err = |source| RulesError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .trim(Trim::Headers)
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;

    let headers = reader.headers().map_err(read_err)?.clone();
    let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
    let keyword_idx = find(KEYWORD_HEADERS).ok_or(RulesError::MissingColumn("keyword"))?;
    let category_idx = find(CATEGORY_HEADERS).ok_or(RulesError::MissingColumn("category"))?;

    let mut rules = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_err)?;
        let keyword = record.get(keyword_idx).unwrap_or_default();
        if keyword.trim().is_empty() {
            continue;
        }
        let category = record.get(category_idx).unwrap_or_default().trim();
        rules.push(CategoryRule::new(keyword, category));
    }

    info!("Loaded {} category rules from {:?}", rules.len(), path);
    Ok(RuleSet::new(rules))
}
