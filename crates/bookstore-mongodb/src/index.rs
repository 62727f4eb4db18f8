//! Index specifications

use bookstore_common::Result;
use bson::Document as BsonDocument;
use mongodb::IndexModel;

use crate::query::{keys_document, push_key, SortDirection};
use crate::validation::ValidatedFieldName;

/// Single-field or compound index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    keys: Vec<(ValidatedFieldName, SortDirection)>,
}

impl IndexSpec {
    pub fn on(field: &str, direction: SortDirection) -> Result<Self> {
        let mut keys = Vec::new();
        push_key(&mut keys, field, direction)?;
        Ok(Self { keys })
    }

    /// Extend into a compound index
    pub fn then(mut self, field: &str, direction: SortDirection) -> Result<Self> {
        push_key(&mut self.keys, field, direction)?;
        Ok(self)
    }

    pub fn keys(&self) -> &[(ValidatedFieldName, SortDirection)] {
        &self.keys
    }

    pub fn keys_document(&self) -> BsonDocument {
        keys_document(&self.keys)
    }

    /// Name the server assigns when none is given, e.g. `author_1_published_year_-1`
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn to_model(&self) -> IndexModel {
        IndexModel::builder().keys(self.keys_document()).build()
    }
}
