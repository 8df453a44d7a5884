use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind as MongoErrorKind, WriteFailure},
    options::{ClientOptions, FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use std::future::Future;
use std::time::Duration;

use super::{EntityStore, Filter, SetOp, StoreError};
use crate::config::MongoConfig;
use crate::models::{EntityKind, ID_FIELD, POLICY_RESOURCE_FIELD, TYPE_FIELD, USER_EMAIL_FIELD};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
    collection: Collection<Document>,
    timeout: Duration,
}

impl MongoStore {
    pub async fn connect(config: &MongoConfig, timeout: Duration) -> Result<Self, StoreError> {
        tracing::info!(database = %config.database, collection = %config.collection, "Connecting to MongoDB");

        let mut options = ClientOptions::parse(&config.uri).await.map_err(|e| {
            tracing::error!("Failed to parse MongoDB connection string: {}", e);
            StoreError::Unavailable(e.to_string())
        })?;
        options.app_name = Some("iam-service".to_string());
        options.server_selection_timeout = Some(timeout);

        let client = MongoClient::with_options(options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            StoreError::Unavailable(e.to_string())
        })?;
        let db = client.database(&config.database);
        let collection = db.collection::<Document>(&config.collection);

        tracing::info!(database = %config.database, "Successfully connected to MongoDB database");
        Ok(Self {
            client,
            db,
            collection,
            timeout,
        })
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for iam-service");

        let id_index = IndexModel::builder()
            .keys(doc! { ID_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .name("id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.bounded("create_index", self.collection.create_index(id_index, None))
            .await?;

        // Emails are unique among users only.
        let email_index = IndexModel::builder()
            .keys(doc! { USER_EMAIL_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .name("user_email_idx".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { TYPE_FIELD: EntityKind::User.tag() })
                    .build(),
            )
            .build();
        self.bounded("create_index", self.collection.create_index(email_index, None))
            .await?;

        let resource_index = IndexModel::builder()
            .keys(doc! { TYPE_FIELD: 1, POLICY_RESOURCE_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .name("type_resource_idx".to_string())
                    .build(),
            )
            .build();
        self.bounded("create_index", self.collection.create_index(resource_index, None))
            .await?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    /// Bounds a driver call by the configured deadline.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, mongodb::error::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| map_mongo_error(operation, e)),
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.timeout, "Store operation timed out");
                Err(StoreError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }

    fn by_kind_and_id(kind: EntityKind, id: &str) -> Document {
        doc! { ID_FIELD: id, TYPE_FIELD: kind.tag() }
    }

    fn return_updated() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build()
    }
}

fn map_mongo_error(operation: &'static str, err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        MongoErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => {
            StoreError::Duplicate(e.message.clone())
        }
        MongoErrorKind::Command(e) if e.code == DUPLICATE_KEY => {
            StoreError::Duplicate(e.message.clone())
        }
        _ => {
            tracing::error!(operation, error = %err, "MongoDB operation failed");
            StoreError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl EntityStore for MongoStore {
    async fn insert(&self, doc: Document) -> Result<(), StoreError> {
        self.bounded("insert", self.collection.insert_one(doc, None))
            .await
            .map(|_| ())
    }

    async fn find_by_id(&self, id: &str) -> Result<Document, StoreError> {
        self.bounded("find_by_id", self.collection.find_one(doc! { ID_FIELD: id }, None))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let query = filter.to_bson();
        self.bounded("find", async {
            let cursor = self.collection.find(query, None).await?;
            cursor.try_collect().await
        })
        .await
    }

    async fn update_set(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<Document, StoreError> {
        let update = doc! { op.operator(): { field: value } };
        self.bounded(
            "update_set",
            self.collection.find_one_and_update(
                Self::by_kind_and_id(kind, id),
                update,
                Self::return_updated(),
            ),
        )
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} `{}`", kind, id)))
    }

    async fn update_set_many(
        &self,
        filter: &Filter,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<u64, StoreError> {
        let update = doc! { op.operator(): { field: value } };
        self.bounded(
            "update_set_many",
            self.collection.update_many(filter.to_bson(), update, None),
        )
        .await
        .map(|result| result.modified_count)
    }

    async fn set_field(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        value: Option<&str>,
    ) -> Result<Document, StoreError> {
        let update = match value {
            Some(v) => doc! { "$set": { field: v } },
            None => doc! { "$unset": { field: "" } },
        };
        self.bounded(
            "set_field",
            self.collection.find_one_and_update(
                Self::by_kind_and_id(kind, id),
                update,
                Self::return_updated(),
            ),
        )
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} `{}`", kind, id)))
    }

    async fn delete_by_id(&self, id: &str) -> Result<Document, StoreError> {
        self.bounded(
            "delete_by_id",
            self.collection.find_one_and_delete(doc! { ID_FIELD: id }, None),
        )
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.bounded(
            "delete_many",
            self.collection.delete_many(filter.to_bson(), None),
        )
        .await
        .map(|result| result.deleted_count)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.bounded(
            "health_check",
            self.client
                .database("admin")
                .run_command(doc! { "ping": 1 }, None),
        )
        .await?;
        tracing::debug!(database = %self.db.name(), "MongoDB ping ok");
        Ok(())
    }
}
