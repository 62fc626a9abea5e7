//! Table schema
//!
//! The storage core only needs three facts from a schema: how many columns a
//! block has, which one is the primary key, and how many index slots each
//! column declares.

use serde::{Deserialize, Serialize};

use crate::error::{PillarError, Result};

/// Index slots declared by a primary-key column (zone map + bloom filter)
pub const PK_INDEX_SLOTS: usize = 2;

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Number of index-slot files kept for this column
    pub index_slots: usize,
}

/// Column layout of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    primary_key: usize,
}

impl Schema {
    /// Build a schema, validating the primary key ordinal.
    ///
    /// The primary-key column always gets at least [`PK_INDEX_SLOTS`] slots.
    pub fn new(mut columns: Vec<ColumnDef>, primary_key: usize) -> Result<Self> {
        if columns.is_empty() {
            return Err(PillarError::InvalidParameter(
                "schema needs at least one column".to_string(),
            ));
        }
        if primary_key >= columns.len() {
            return Err(PillarError::InvalidParameter(format!(
                "primary key ordinal {} out of range for {} columns",
                primary_key,
                columns.len()
            )));
        }
        let pk = &mut columns[primary_key];
        pk.index_slots = pk.index_slots.max(PK_INDEX_SLOTS);
        Ok(Self {
            columns,
            primary_key,
        })
    }

    /// Convenience: named columns, no index slots except on the primary key
    pub fn with_columns(names: &[&str], primary_key: usize) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| ColumnDef {
                name: name.to_string(),
                index_slots: 0,
            })
            .collect();
        Self::new(columns, primary_key)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn primary_key(&self) -> usize {
        self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Index slot count declared for `column` (0 for unknown columns)
    pub fn index_slots(&self, column: usize) -> usize {
        self.columns.get(column).map(|c| c.index_slots).unwrap_or(0)
    }
}
