use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client as MongoClient, Collection, Database, IndexModel,
    bson::{Bson, Document, doc},
    options::{
        FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
        IndexOptions, InsertOneOptions, ReturnDocument,
    },
};

use super::handler::{Entity, Handler, StoreError};
use crate::error::AppError;

/// Connection to one MongoDB database; hands out collection-bound handlers.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { db })
    }

    pub fn handler(&self, entity: Entity) -> Arc<dyn Handler> {
        Arc::new(MongoHandler {
            db: self.db.clone(),
            collection: self.db.collection(&entity.collection),
            entity,
        })
    }
}

pub struct MongoHandler {
    db: Database,
    collection: Collection<Document>,
    entity: Entity,
}

impl MongoHandler {
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.entity.timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                if !e.is_not_found() && !e.is_conflict() {
                    tracing::error!(
                        collection = %self.entity.collection,
                        operation = op,
                        error = %e,
                        "Store operation failed"
                    );
                }
                e
            }),
            Err(_) => {
                tracing::error!(
                    collection = %self.entity.collection,
                    operation = op,
                    timeout_ms = self.entity.timeout.as_millis() as u64,
                    "Store operation timed out"
                );
                Err(StoreError::Timeout(op))
            }
        }
    }
}

#[async_trait]
impl Handler for MongoHandler {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.bounded("find", async {
            let cursor = self.collection.find(filter, options).await?;
            Ok(cursor.try_collect().await?)
        })
        .await
    }

    async fn get_one(
        &self,
        filter: Document,
        options: FindOneOptions,
    ) -> Result<Document, StoreError> {
        self.bounded("get_one", async {
            self.collection
                .find_one(filter, options)
                .await?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn create(
        &self,
        payload: Document,
        options: InsertOneOptions,
    ) -> Result<Bson, StoreError> {
        self.bounded("create", async {
            let result = self.collection.insert_one(payload, options).await?;
            Ok(result.inserted_id)
        })
        .await
    }

    async fn patch_one(
        &self,
        filter: Document,
        payload: Document,
        mut options: FindOneAndUpdateOptions,
    ) -> Result<Document, StoreError> {
        options.return_document = Some(ReturnDocument::After);
        self.bounded("patch_one", async {
            self.collection
                .find_one_and_update(filter, doc! { "$set": payload }, options)
                .await?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn delete_one(
        &self,
        filter: Document,
        options: FindOneAndDeleteOptions,
    ) -> Result<Document, StoreError> {
        self.bounded("delete_one", async {
            self.collection
                .find_one_and_delete(filter, options)
                .await?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn count(&self, filter: Document) -> Result<u64, StoreError> {
        self.bounded("count", async {
            Ok(self.collection.count_documents(filter, None).await?)
        })
        .await
    }

    async fn ensure_unique_index(&self, field: &str) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(
                IndexOptions::builder()
                    .name(format!("{}_unique_idx", field))
                    .unique(true)
                    .build(),
            )
            .build();

        self.bounded("ensure_unique_index", async {
            self.collection.create_index(index, None).await?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded("ping", async {
            self.db.run_command(doc! { "ping": 1 }, None).await?;
            Ok(())
        })
        .await
    }
}
