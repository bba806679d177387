//! Versioned, read-only attribute catalog.
//!
//! The catalog lists the application fields a tree may test and, for
//! categorical fields, their allowed categories. It is loaded once and shared
//! by the editor (to seed default branches) and the validator (to flag
//! unknown attributes and categories).

mod builtins;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::tree::{Branch, BranchDef, ConditionKind};

/// Value kind of a catalog attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Boolean,
    Categorical,
    Numeric,
}

impl AttributeKind {
    /// Condition kind a node testing this attribute defaults to.
    pub fn condition_kind(&self) -> ConditionKind {
        match self {
            AttributeKind::Boolean => ConditionKind::Binary,
            AttributeKind::Categorical => ConditionKind::Categorical,
            AttributeKind::Numeric => ConditionKind::NumericRange,
        }
    }
}

/// One selectable application field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub kind: AttributeKind,
    /// Allowed values, categorical attributes only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl AttributeDef {
    /// Create an attribute.
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            categories: Vec::new(),
        }
    }

    /// Set the categories.
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    version: String,
    attributes: Vec<AttributeDef>,
}

/// Immutable attribute catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeCatalog {
    version: String,
    attributes: BTreeMap<String, AttributeDef>,
}

impl AttributeCatalog {
    /// Build a catalog from attribute definitions. Later duplicates win.
    pub fn new(version: impl Into<String>, attributes: Vec<AttributeDef>) -> Self {
        Self {
            version: version.into(),
            attributes: attributes
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
        }
    }

    /// The built-in loan-origination catalog.
    pub fn builtin() -> Self {
        Self::new(builtins::BUILTIN_VERSION, builtins::attributes())
    }

    /// Parse a catalog from JSON `{version, attributes: [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self, AppError> {
        let file: CatalogFile = serde_json::from_str(json).map_err(|e| AppError::Config {
            message: format!("Invalid attribute catalog: {}", e),
        })?;
        Ok(Self::new(file.version, file.attributes))
    }

    /// Load a catalog file.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| AppError::Config {
            message: format!("Failed to read catalog {}: {}", path.display(), e),
        })?;
        let catalog = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            version = %catalog.version,
            attributes = catalog.attributes.len(),
            "Attribute catalog loaded"
        );
        Ok(catalog)
    }

    /// Catalog version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Whether the attribute is known.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// All attributes, sorted by name.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.values()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Default branches for a new node of `kind` testing `attribute`.
    ///
    /// Binary nodes get `Yes`/`No`; categorical nodes get one branch per
    /// catalog category. Other kinds start without branches.
    pub fn default_branches(&self, kind: ConditionKind, attribute: Option<&str>) -> Vec<Branch> {
        match kind {
            ConditionKind::Binary => vec![
                Branch::new("Yes", BranchDef::binary(true)),
                Branch::new("No", BranchDef::binary(false)),
            ],
            ConditionKind::Categorical => attribute
                .and_then(|a| self.get(a))
                .map(|def| {
                    def.categories
                        .iter()
                        .map(|c| Branch::new(c.clone(), BranchDef::categorical([c.clone()])))
                        .collect()
                })
                .unwrap_or_default(),
            ConditionKind::NumericRange | ConditionKind::Compound => Vec::new(),
        }
    }
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
