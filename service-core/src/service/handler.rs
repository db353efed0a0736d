use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
    InsertOneOptions,
};
use thiserror::Error;

use crate::error::AppError;

const DUPLICATE_KEY_CODE: i32 = 11000;
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// The logical collection a handler is bound to, plus the deadline applied to
/// every store call made through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub collection: String,
    pub timeout: Duration,
}

impl Entity {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("store operation '{0}' timed out")]
    Timeout(&'static str),

    #[error("store error: {0}")]
    Backend(anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let duplicate = match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
            ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
            _ => false,
        };

        if duplicate {
            StoreError::Conflict("duplicate key".to_string())
        } else {
            StoreError::Backend(anyhow::Error::new(err))
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("document not found")),
            StoreError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Timeout(op) => {
                AppError::InternalError(anyhow::anyhow!("store operation '{}' timed out", op))
            }
            StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

/// Atomic document operations over one bound collection.
///
/// Implementations must be safe to share across requests; atomicity of
/// update and delete is delegated to the store's find-and-modify.
#[async_trait]
pub trait Handler: Send + Sync {
    fn entity(&self) -> &Entity;

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError>;

    /// `NotFound` when nothing matches.
    async fn get_one(
        &self,
        filter: Document,
        options: FindOneOptions,
    ) -> Result<Document, StoreError>;

    /// Returns the inserted `_id`.
    async fn create(
        &self,
        payload: Document,
        options: InsertOneOptions,
    ) -> Result<Bson, StoreError>;

    /// `$set`s the payload fields on the first match and returns the
    /// document after modification.
    async fn patch_one(
        &self,
        filter: Document,
        payload: Document,
        options: FindOneAndUpdateOptions,
    ) -> Result<Document, StoreError>;

    /// Removes the first match and returns it.
    async fn delete_one(
        &self,
        filter: Document,
        options: FindOneAndDeleteOptions,
    ) -> Result<Document, StoreError>;

    async fn count(&self, filter: Document) -> Result<u64, StoreError>;

    async fn ensure_unique_index(&self, field: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
