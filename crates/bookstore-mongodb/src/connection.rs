//! MongoDB connection management and the driver-backed store

use std::time::Duration;

use async_trait::async_trait;
use bookstore_common::{BookstoreError, Result};
use bson::{doc, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use tracing::{debug, info};

use crate::book::{Book, Record};
use crate::index::IndexSpec;
use crate::pipeline::Pipeline;
use crate::query::{Filter, FindQuery, Update};
use crate::store::{BookStore, UpdateOutcome};
use crate::validation::ValidatedCollectionName;

/// Default endpoint of a local MongoDB server
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Database holding the `books` collection
pub const DEFAULT_DATABASE: &str = "plp_bookstore";

/// Where to connect and how long to wait for the server
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: ValidatedCollectionName,
    /// Connection timeout (driver default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (driver default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>, database: &str, collection: &str) -> Result<Self> {
        Ok(Self {
            uri: uri.into(),
            database: validate_database_name(database)?,
            collection: ValidatedCollectionName::new(collection)?,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("bookstore-queries".to_string()),
        })
    }

    /// The local `plp_bookstore.books` collection
    pub fn local() -> Result<Self> {
        Self::new(DEFAULT_URI, DEFAULT_DATABASE, Book::collection_name())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }
}

fn validate_database_name(name: &str) -> Result<String> {
    const FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];
    if name.is_empty() || name.len() > 63 {
        return Err(BookstoreError::Validation(format!(
            "Database name must be 1 to 63 characters: '{}'",
            name
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(BookstoreError::Validation(format!(
            "Database name cannot contain {:?}: '{}'",
            c, name
        )));
    }
    Ok(name.to_string())
}

/// Store backed by a live MongoDB deployment
pub struct MongoStore {
    client: Client,
    database: Database,
    collection: Collection<BsonDocument>,
}

impl MongoStore {
    /// Connect and verify the server is reachable
    ///
    /// The driver connects lazily, so a ping is issued here to surface an
    /// unreachable endpoint before any step runs.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(config.uri.as_str())
            .await
            .map_err(|e| BookstoreError::Connection(format!("Invalid connection string: {}", e)))?;

        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &config.app_name {
            client_options.app_name = Some(app.clone());
        }

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let hosts: Vec<String> = client_options.hosts.iter().map(|h| h.to_string()).collect();

        let client = Client::with_options(client_options)
            .map_err(|e| BookstoreError::Connection(e.to_string()))?;
        let database = client.database(&config.database);

        if let Err(e) = database.run_command(doc! { "ping": 1 }).await {
            client.shutdown().await;
            return Err(BookstoreError::Connection(format!("Ping failed: {}", e)));
        }

        info!(
            "Connected to MongoDB at {} (database: {})",
            hosts.join(","),
            config.database
        );

        let collection = database.collection(config.collection.as_str());
        Ok(Self {
            client,
            database,
            collection,
        })
    }
}

#[async_trait]
impl BookStore for MongoStore {
    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    async fn find(&self, query: &FindQuery) -> Result<Vec<BsonDocument>> {
        let filter = query.get_filter().to_document();
        debug!("find {}: {}", self.collection.name(), filter);

        let mut action = self.collection.find(filter);
        if let Some(projection) = query.get_projection() {
            action = action.projection(projection.to_document());
        }
        if let Some(sort) = query.get_sort() {
            action = action.sort(sort.to_document());
        }
        if let Some(skip) = query.get_skip() {
            action = action.skip(skip);
        }
        if let Some(limit) = query.get_limit() {
            // Bounded by FindQuery::limit
            action = action.limit(limit as i64);
        }

        let cursor = action.await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<UpdateOutcome> {
        let result = self
            .collection
            .update_one(filter.to_document(), update.to_document())
            .await?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, filter: &Filter) -> Result<u64> {
        let result = self.collection.delete_one(filter.to_document()).await?;
        Ok(result.deleted_count)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<BsonDocument>> {
        let stages = pipeline.to_documents();
        debug!("aggregate {}: {:?}", self.collection.name(), stages);

        let cursor = self.collection.aggregate(stages).await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<String> {
        let result = self
            .collection
            .create_index(index.to_model())
            .await
            .map_err(|e| BookstoreError::Index(e.to_string()))?;
        Ok(result.index_name)
    }

    async fn explain(&self, filter: &Filter) -> Result<BsonDocument> {
        let command = doc! {
            "explain": {
                "find": self.collection.name(),
                "filter": filter.to_document(),
            },
            "verbosity": "executionStats",
        };

        let report = self.database.run_command(command).await?;
        report
            .get_document("executionStats")
            .cloned()
            .map_err(|_| {
                BookstoreError::Query("explain output has no executionStats section".to_string())
            })
    }

    async fn close(self) -> Result<()> {
        self.client.shutdown().await;
        Ok(())
    }
}
