//! Category metadata – maps class ids to display names.
//!
//! The dataset ships a JSON list such as
//! `[{"id": 0, "name": "Aythya valisineria", "supercategory": "Aves"}, ...]`;
//! only `id` and `name` are used.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::FigsError;

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub id: usize,
    pub name: String,
}

/// Lookup table from class id to name.
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    names: HashMap<usize, String>,
}

impl CategoryTable {
    pub fn from_categories(categories: Vec<Category>) -> Self {
        Self {
            names: categories.into_iter().map(|c| (c.id, c.name)).collect(),
        }
    }

    pub fn name(&self, class_id: usize) -> Result<&str, FigsError> {
        self.names
            .get(&class_id)
            .map(String::as_str)
            .ok_or(FigsError::UnknownClass(class_id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Load the category JSON file.
pub fn load(path: &Path) -> Result<CategoryTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read categories: {}", path.display()))?;
    let categories: Vec<Category> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid category JSON: {}", path.display()))?;
    let table = CategoryTable::from_categories(categories);
    info!("Loaded {} categories from {}", table.len(), path.display());
    Ok(table)
}
