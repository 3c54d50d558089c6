//! Brand catalogue: canonical names, normalized aliases and categories

use crate::error::GroupingError;
use crate::text::normalize_text;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandEntry {
    pub name: String,
    /// Normalized, deduplicated, canonical name first
    pub aliases: Vec<String>,
    pub category: String,
}

impl BrandEntry {
    /// Build an entry, normalizing the canonical name and every alias. Aliases that
    /// normalize to nothing are dropped.
    pub fn new<I, S>(name: impl Into<String>, aliases: I, category: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let mut seen = HashSet::new();
        let normalized: Vec<String> = std::iter::once(normalize_text(&name))
            .chain(aliases.into_iter().map(|a| normalize_text(a.as_ref())))
            .filter(|a| !a.is_empty() && seen.insert(a.clone()))
            .collect();

        Self {
            name,
            aliases: normalized,
            category: category.into(),
        }
    }
}

/// Raw catalogue entry as written in a brand file
#[derive(Debug, Deserialize)]
struct CatalogueEntry {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    brands: Vec<CatalogueEntry>,
}

/// Immutable, insertion-ordered brand catalogue shared by all requests.
#[derive(Debug, Clone)]
pub struct BrandDatabase {
    entries: Vec<BrandEntry>,
}

impl BrandDatabase {
    /// Canonical names must be unique and non-empty.
    pub fn new(entries: Vec<BrandEntry>) -> Result<Self, GroupingError> {
        let mut names = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(GroupingError::BrandDatabase(
                    "brand name cannot be empty".to_string(),
                ));
            }
            if entry.aliases.is_empty() {
                return Err(GroupingError::BrandDatabase(format!(
                    "brand '{}' has no usable alias",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(GroupingError::BrandDatabase(format!(
                    "duplicate brand name '{}'",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Retail catalogue shipped with the service
    pub fn builtin() -> Self {
        let catalogue: &[(&str, &[&str], &str)] = &[
            ("Kotex", &["Kotex Ultra"], "feminine_care"),
            ("Seni", &["Seni Gentle"], "feminine_care"),
            ("Always", &["Always Ultra"], "feminine_care"),
            ("Tampax", &["Tampax Pearl"], "feminine_care"),
            ("Carefree", &[], "feminine_care"),
            ("Playtex", &[], "feminine_care"),
            ("Molto", &["Molto Ultra"], "laundry"),
            ("Downy", &["Downy Ultra"], "laundry"),
            ("Tide", &["Tide Ultra"], "laundry"),
            ("Ariel", &[], "laundry"),
            ("Surf", &[], "laundry"),
            ("Huggies", &[], "baby_care"),
            ("Pampers", &[], "baby_care"),
            ("MamyPoko", &["Mamy Poko"], "baby_care"),
            ("Head & Shoulders", &["Head and Shoulders"], "personal_care"),
            ("Pantene", &[], "personal_care"),
            ("Dove", &[], "personal_care"),
            ("Lux", &[], "personal_care"),
            ("Sunsilk", &[], "personal_care"),
            ("Ultra", &[], "product_line"),
            ("Gentle", &[], "product_line"),
            ("Slimguard", &[], "product_line"),
            ("Regular", &[], "product_line"),
            ("Super", &[], "product_line"),
        ];

        let entries = catalogue
            .iter()
            .map(|(name, aliases, category)| BrandEntry::new(*name, aliases.iter(), *category))
            .collect();
        Self { entries }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GroupingError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GroupingError::BrandDatabase(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    /// Parse a `{ brands = [...] }` catalogue in JSON, TOML or YAML.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, GroupingError> {
        let catalogue: Catalogue = if let Ok(c) = serde_json::from_str(content) {
            c
        } else if let Ok(c) = toml::from_str(content) {
            c
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                GroupingError::BrandDatabase(format!("unrecognized brand catalogue: {}", e))
            })?
        };

        let entries = catalogue
            .brands
            .into_iter()
            .map(|e| BrandEntry::new(e.name, e.aliases, e.category))
            .collect();
        Self::new(entries)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[BrandEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&BrandEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
