//! In-memory store
//!
//! Evaluates the same descriptors the MongoDB store sends to the server, over
//! a `Vec` of BSON documents. Open and close calls are counted through a
//! shared [`StoreStats`] handle, and a single operation kind can be made to
//! fail, which makes it the collaborator for runner tests.

mod eval;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bookstore_common::{BookstoreError, Result};
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use parking_lot::Mutex;
use tracing::debug;

use crate::book::{Book, Record};
use crate::index::IndexSpec;
use crate::pipeline::Pipeline;
use crate::query::{Filter, FindQuery, Update};
use crate::store::{BookStore, UpdateOutcome};
use crate::validation::ValidatedCollectionName;

/// Store operation kinds, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Find,
    UpdateOne,
    DeleteOne,
    Aggregate,
    CreateIndex,
    Explain,
    Close,
}

/// Lifecycle counters shared between a store and its observers
#[derive(Debug, Default)]
pub struct StoreStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    operations: AtomicUsize,
}

impl StoreStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Close attempts, including ones that failed
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Operations issued between open and close
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }
}

pub struct InMemoryStore {
    collection: ValidatedCollectionName,
    documents: Mutex<Vec<BsonDocument>>,
    indexes: Mutex<Vec<IndexSpec>>,
    stats: Arc<StoreStats>,
    failing: Option<OperationKind>,
}

impl InMemoryStore {
    /// Open a collection holding `documents` in natural order
    ///
    /// Documents without an `_id` get a fresh ObjectId, placed first as the server does.
    pub fn open(collection: &str, documents: Vec<BsonDocument>) -> Result<Self> {
        let collection = ValidatedCollectionName::new(collection)?;
        let documents: Vec<BsonDocument> = documents
            .into_iter()
            .map(|document| {
                if document.contains_key("_id") {
                    return document;
                }
                let mut with_id = doc! { "_id": ObjectId::new() };
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                with_id
            })
            .collect();

        let stats = Arc::new(StoreStats::default());
        stats.opened.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Opened in-memory collection '{}' with {} documents",
            collection,
            documents.len()
        );

        Ok(Self {
            collection,
            documents: Mutex::new(documents),
            indexes: Mutex::new(Vec::new()),
            stats,
            failing: None,
        })
    }

    /// Open the `books` collection seeded with `books`
    pub fn with_books(books: &[Book]) -> Result<Self> {
        let documents = books
            .iter()
            .map(Record::to_bson)
            .collect::<Result<Vec<_>>>()?;
        Self::open(Book::collection_name(), documents)
    }

    /// Make every operation of `kind` fail
    pub fn failing_on(mut self, kind: OperationKind) -> Self {
        self.failing = Some(kind);
        self
    }

    pub fn stats(&self) -> Arc<StoreStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot of the collection in natural order
    pub fn documents(&self) -> Vec<BsonDocument> {
        self.documents.lock().clone()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.lock().iter().map(IndexSpec::default_name).collect()
    }

    fn begin(&self, kind: OperationKind) -> Result<()> {
        if kind != OperationKind::Close {
            self.stats.operations.fetch_add(1, Ordering::SeqCst);
        }
        if self.failing != Some(kind) {
            return Ok(());
        }
        let message = format!("simulated {:?} failure on '{}'", kind, self.collection);
        Err(match kind {
            OperationKind::CreateIndex => BookstoreError::Index(message),
            OperationKind::Close => BookstoreError::Connection(message),
            _ => BookstoreError::Query(message),
        })
    }
}

#[async_trait]
impl BookStore for InMemoryStore {
    fn collection_name(&self) -> &str {
        self.collection.as_str()
    }

    async fn find(&self, query: &FindQuery) -> Result<Vec<BsonDocument>> {
        self.begin(OperationKind::Find)?;

        let mut matched: Vec<BsonDocument> = self
            .documents
            .lock()
            .iter()
            .filter(|doc| eval::matches(query.get_filter(), doc))
            .cloned()
            .collect();

        if let Some(sort) = query.get_sort() {
            eval::sort_documents(&mut matched, sort);
        }

        let skip = usize::try_from(query.get_skip().unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .get_limit()
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        let page = matched.into_iter().skip(skip).take(limit);

        match query.get_projection() {
            Some(projection) => page.map(|doc| eval::project(projection, &doc)).collect(),
            None => Ok(page.collect()),
        }
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<UpdateOutcome> {
        self.begin(OperationKind::UpdateOne)?;

        let mut documents = self.documents.lock();
        let Some(target) = documents.iter_mut().find(|doc| eval::matches(filter, doc)) else {
            return Ok(UpdateOutcome::default());
        };

        // Apply to a copy so a failing assignment leaves the document untouched
        let mut updated = target.clone();
        let modified = eval::apply_update(update, &mut updated)?;
        *target = updated;

        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(modified),
        })
    }

    async fn delete_one(&self, filter: &Filter) -> Result<u64> {
        self.begin(OperationKind::DeleteOne)?;

        let mut documents = self.documents.lock();
        match documents.iter().position(|doc| eval::matches(filter, doc)) {
            Some(position) => {
                documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<BsonDocument>> {
        self.begin(OperationKind::Aggregate)?;
        let snapshot = self.documents();
        eval::run_pipeline(pipeline, snapshot)
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<String> {
        self.begin(OperationKind::CreateIndex)?;

        let mut indexes = self.indexes.lock();
        // Re-creating an identical index is a no-op
        if !indexes.iter().any(|existing| existing == index) {
            indexes.push(index.clone());
        }
        Ok(index.default_name())
    }

    /// Report shaped like the server's `executionStats` section
    async fn explain(&self, filter: &Filter) -> Result<BsonDocument> {
        self.begin(OperationKind::Explain)?;

        let documents = self.documents.lock();
        let indexes = self.indexes.lock();

        let returned = documents.iter().filter(|doc| eval::matches(filter, doc)).count() as i64;
        let total = documents.len() as i64;

        // An index is usable when its leading key is compared for equality
        let usable = filter.equalities().into_iter().find_map(|(field, value)| {
            indexes
                .iter()
                .find(|index| index.keys().first().map(|(key, _)| key) == Some(field))
                .map(|index| (index, field, value))
        });

        let (keys_examined, docs_examined, stages) = match usable {
            Some((index, field, value)) => {
                let keyed = documents
                    .iter()
                    .filter(|doc| {
                        let actual = eval::lookup(doc, field.as_str()).unwrap_or(&Bson::Null);
                        eval::values_equal(actual, value)
                    })
                    .count() as i64;
                let stages = doc! {
                    "stage": "FETCH",
                    "nReturned": returned,
                    "docsExamined": keyed,
                    "inputStage": {
                        "stage": "IXSCAN",
                        "nReturned": keyed,
                        "indexName": index.default_name(),
                        "keysExamined": keyed,
                    },
                };
                (keyed, keyed, stages)
            }
            None => {
                let stages = doc! {
                    "stage": "COLLSCAN",
                    "nReturned": returned,
                    "docsExamined": total,
                };
                (0, total, stages)
            }
        };

        Ok(doc! {
            "executionSuccess": true,
            "nReturned": returned,
            "executionTimeMillis": 0i64,
            "totalKeysExamined": keys_examined,
            "totalDocsExamined": docs_examined,
            "executionStages": stages,
        })
    }

    async fn close(self) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.begin(OperationKind::Close)?;
        debug!("Closed in-memory collection '{}'", self.collection);
        Ok(())
    }
}
