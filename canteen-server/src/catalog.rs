//! Catalog service seam
//!
//! The catalog is an external collaborator: the saga consults it only to
//! re-validate prices and item classes at creation time. Drafts never
//! carry authoritative prices.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog item class; scheduled orders accept only `Special` items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemClass {
    Standard,
    Special,
}

/// Current catalog metadata for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub unit_price: Decimal,
    pub class: ItemClass,
}

/// Read-only catalog lookup used during order validation
pub trait Catalog: Send + Sync {
    /// Current metadata for an item, `None` when not on the menu
    fn item(&self, name: &str) -> Option<CatalogItem>;
}

/// In-memory catalog for tests and the demo binary
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: DashMap<String, CatalogItem>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON array of items
    pub fn from_json_file(path: &std::path::Path) -> crate::utils::AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::utils::AppError::storage(format!("Read {} failed: {}", path.display(), e))
        })?;
        let items: Vec<CatalogItem> = serde_json::from_str(&raw).map_err(|e| {
            crate::utils::AppError::storage(format!("Parse {} failed: {}", path.display(), e))
        })?;

        let catalog = Self::new();
        for item in items {
            catalog.items.insert(item.name.clone(), item);
        }
        Ok(catalog)
    }

    pub fn insert(&self, name: impl Into<String>, unit_price: Decimal, class: ItemClass) {
        let name = name.into();
        self.items.insert(
            name.clone(),
            CatalogItem {
                name,
                unit_price,
                class,
            },
        );
    }
}

impl Catalog for InMemoryCatalog {
    fn item(&self, name: &str) -> Option<CatalogItem> {
        self.items.get(name).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog.insert("Tea", Decimal::from(20), ItemClass::Standard);

        let item = catalog.item("Tea").unwrap();
        assert_eq!(item.unit_price, Decimal::from(20));
        assert_eq!(item.class, ItemClass::Standard);
        assert!(catalog.item("Coffee").is_none());
    }
}
