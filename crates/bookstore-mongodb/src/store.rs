//! The store collaborator the query runner talks to

use async_trait::async_trait;
use bookstore_common::Result;
use bson::Document as BsonDocument;

use crate::index::IndexSpec;
use crate::pipeline::Pipeline;
use crate::query::{Filter, FindQuery, Update};

/// Counts reported by a single-document update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Operations the runner needs from a document store, scoped to one collection
///
/// `close` consumes the store, so a handle can be released only once.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Name of the collection this store operates on
    fn collection_name(&self) -> &str;

    async fn find(&self, query: &FindQuery) -> Result<Vec<BsonDocument>>;

    /// Update the first document matching `filter`
    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<UpdateOutcome>;

    /// Delete the first document matching `filter`, returning the deleted count
    async fn delete_one(&self, filter: &Filter) -> Result<u64>;

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<BsonDocument>>;

    /// Create an index, returning its name
    async fn create_index(&self, index: &IndexSpec) -> Result<String>;

    /// Execution statistics for a find with `filter`
    async fn explain(&self, filter: &Filter) -> Result<BsonDocument>;

    /// Release the underlying connection
    async fn close(self) -> Result<()>;
}
