//! Sequential query runner
//!
//! Executes an ordered list of steps against a [`BookStore`], hands each
//! result to a [`ReportSink`] before starting the next step, stops at the
//! first error, and closes the store on every exit path.

use std::time::{Duration, Instant};

use bookstore_common::{BookstoreError, Result};
use bson::Document as BsonDocument;
use tracing::{debug, info, warn};

use crate::index::IndexSpec;
use crate::pipeline::Pipeline;
use crate::query::{Filter, FindQuery, Update};
use crate::script::bookstore_script;
use crate::store::BookStore;

/// A single store operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find(FindQuery),
    /// Consecutive skip/limit pages of the same query
    Paginate(Pagination),
    UpdateOne {
        filter: Filter,
        update: Update,
    },
    DeleteOne(Filter),
    Aggregate(Pipeline),
    CreateIndex(IndexSpec),
    Explain(Filter),
}

impl Operation {
    pub fn paginate(query: FindQuery, page_size: u64, pages: u64) -> Result<Self> {
        Ok(Operation::Paginate(Pagination::new(query, page_size, pages)?))
    }
}

/// Paging of a find query; only constructible through [`Pagination::new`]
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    query: FindQuery,
    page_size: u64,
    pages: u64,
}

impl Pagination {
    pub fn new(query: FindQuery, page_size: u64, pages: u64) -> Result<Self> {
        if page_size == 0 || pages == 0 {
            return Err(BookstoreError::Validation(format!(
                "Pagination needs a positive page size and page count, got {} x {}",
                page_size, pages
            )));
        }
        if query.get_skip().is_some() || query.get_limit().is_some() {
            return Err(BookstoreError::Validation(
                "Paginated query must not set its own skip or limit".to_string(),
            ));
        }
        // The last page's offset must still be representable
        if page_size.checked_mul(pages).is_none() || page_size > i64::MAX as u64 {
            return Err(BookstoreError::Validation(format!(
                "Pagination of {} x {} is out of range",
                page_size, pages
            )));
        }
        Ok(Self {
            query,
            page_size,
            pages,
        })
    }

    /// One find per page, in page order
    pub fn page_queries(&self) -> Result<Vec<FindQuery>> {
        (0..self.pages)
            .map(|page| {
                let offset = page.checked_mul(self.page_size).ok_or_else(|| {
                    BookstoreError::Validation(format!(
                        "Offset of page {} overflows with page size {}",
                        page, self.page_size
                    ))
                })?;
                self.query.clone().skip(offset).limit(self.page_size)
            })
            .collect()
    }
}

/// A labelled operation
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    label: String,
    operation: Operation,
}

impl Step {
    pub fn new(label: impl Into<String>, operation: Operation) -> Self {
        Self {
            label: label.into(),
            operation,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Documents(Vec<BsonDocument>),
    Pages(Vec<Vec<BsonDocument>>),
    Updated { matched: u64, modified: u64 },
    Deleted(u64),
    IndexCreated(String),
    Explain(BsonDocument),
}

/// A step's output tagged with its position (1-based) and label
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub position: usize,
    pub total: usize,
    pub label: String,
    pub output: StepOutput,
}

/// Receives each step report as soon as the step completes
pub trait ReportSink {
    fn record(&mut self, report: &StepReport) -> Result<()>;
}

impl ReportSink for Vec<StepReport> {
    fn record(&mut self, report: &StepReport) -> Result<()> {
        self.push(report.clone());
        Ok(())
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub steps_completed: usize,
    pub elapsed: Duration,
}

pub struct QueryRunner {
    steps: Vec<Step>,
}

impl QueryRunner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Runner for the bookstore script
    pub fn bookstore() -> Result<Self> {
        Ok(Self::new(bookstore_script()?))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step, then close the store
    ///
    /// The store is closed exactly once whether or not a step failed. A step
    /// error takes precedence over a close error. The returned error is left
    /// to the caller to report.
    pub async fn run<S, K>(&self, store: S, sink: &mut K) -> Result<RunSummary>
    where
        S: BookStore,
        K: ReportSink + ?Sized,
    {
        let outcome = self.execute(&store, sink).await;
        let closed = store.close().await;

        match (outcome, closed) {
            (Ok(summary), Ok(())) => {
                info!("Connection closed");
                Ok(summary)
            }
            (Ok(_), Err(close_err)) => {
                debug!("Failed to close connection: {}", close_err);
                Err(close_err)
            }
            (Err(step_err), close) => {
                match close {
                    Ok(()) => info!("Connection closed"),
                    Err(close_err) => warn!("Failed to close connection: {}", close_err),
                }
                Err(step_err)
            }
        }
    }

    async fn execute<S, K>(&self, store: &S, sink: &mut K) -> Result<RunSummary>
    where
        S: BookStore,
        K: ReportSink + ?Sized,
    {
        let started = Instant::now();
        let total = self.steps.len();

        for (index, step) in self.steps.iter().enumerate() {
            let position = index + 1;
            debug!("[{}/{}] {}", position, total, step.label());

            let output = perform(store, step.operation()).await.map_err(|e| {
                debug!("Step {} ({}) failed: {}", position, step.label(), e);
                e
            })?;

            sink.record(&StepReport {
                position,
                total,
                label: step.label().to_string(),
                output,
            })?;
        }

        let summary = RunSummary {
            steps_completed: total,
            elapsed: started.elapsed(),
        };
        info!(
            "Completed {} steps against '{}' in {:?}",
            summary.steps_completed,
            store.collection_name(),
            summary.elapsed
        );
        Ok(summary)
    }
}

async fn perform<S: BookStore>(store: &S, operation: &Operation) -> Result<StepOutput> {
    match operation {
        Operation::Find(query) => Ok(StepOutput::Documents(store.find(query).await?)),
        Operation::Paginate(pagination) => {
            let mut collected = Vec::new();
            for paged in pagination.page_queries()? {
                collected.push(store.find(&paged).await?);
            }
            Ok(StepOutput::Pages(collected))
        }
        Operation::UpdateOne { filter, update } => {
            let outcome = store.update_one(filter, update).await?;
            Ok(StepOutput::Updated {
                matched: outcome.matched,
                modified: outcome.modified,
            })
        }
        Operation::DeleteOne(filter) => Ok(StepOutput::Deleted(store.delete_one(filter).await?)),
        Operation::Aggregate(pipeline) => {
            Ok(StepOutput::Documents(store.aggregate(pipeline).await?))
        }
        Operation::CreateIndex(index) => {
            Ok(StepOutput::IndexCreated(store.create_index(index).await?))
        }
        Operation::Explain(filter) => Ok(StepOutput::Explain(store.explain(filter).await?)),
    }
}
