//! MongoDB query runner for the bookstore collection
//!
//! This crate runs a fixed script of queries, updates, aggregations and index
//! operations against a document store and reports every result.
//!
//! # Features
//! - Typed filters, updates, projections, sorts and pipelines, validated on construction
//! - `BookStore` trait with a MongoDB-backed and an in-memory implementation
//! - Sequential runner that closes the store exactly once on every exit path

pub mod book;
pub mod connection;
pub mod index;
pub mod memory;
pub mod pipeline;
pub mod query;
pub mod runner;
pub mod script;
pub mod store;
pub mod validation;

pub use book::{Book, Record};
pub use bookstore_common::{BookstoreError, Result};
pub use connection::{MongoStore, StoreConfig, DEFAULT_DATABASE, DEFAULT_URI};
pub use index::IndexSpec;
pub use memory::{InMemoryStore, OperationKind, StoreStats};
pub use pipeline::{Accumulator, Expr, Pipeline, Projected, Stage};
pub use query::{Comparison, Filter, FindQuery, Projection, SortDirection, SortSpec, Update};
pub use runner::{
    Operation, Pagination, QueryRunner, ReportSink, RunSummary, Step, StepOutput, StepReport,
};
pub use store::{BookStore, UpdateOutcome};
pub use validation::{ValidatedCollectionName, ValidatedFieldName};
