use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, oid::ObjectId};
use mongodb::options::{
    FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
    InsertOneOptions,
};

use super::handler::{Entity, Handler, StoreError};

/// Process-local handler with the same observable semantics as the MongoDB
/// one for top-level equality filters. Used by tests and local runs.
pub struct MemoryHandler {
    entity: Entity,
    documents: Mutex<Vec<Document>>,
    unique_fields: Mutex<BTreeSet<String>>,
}

impl MemoryHandler {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            documents: Mutex::new(Vec::new()),
            unique_fields: Mutex::new(BTreeSet::new()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend(anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn unique_fields(&self) -> Result<BTreeSet<String>, StoreError> {
        self.unique_fields
            .lock()
            .map(|fields| fields.clone())
            .map_err(|_| Self::poisoned())
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match document.get(key) {
        Some(actual) => actual == expected,
        None => matches!(expected, Bson::Null),
    })
}

/// Returns the first unique field whose value in `candidate` is already held
/// by a document other than the one at `skip_index`.
fn unique_violation(
    documents: &[Document],
    candidate: &Document,
    unique_fields: &BTreeSet<String>,
    skip_index: Option<usize>,
) -> Option<String> {
    unique_fields.iter().find_map(|field| {
        let value = candidate.get(field)?;
        let taken = documents
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip_index)
            .any(|(_, other)| other.get(field) == Some(value));
        taken.then(|| field.clone())
    })
}

#[async_trait]
impl Handler for MemoryHandler {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.lock().map_err(|_| Self::poisoned())?;
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options
            .limit
            .filter(|l| *l > 0)
            .map(|l| l as usize)
            .unwrap_or(usize::MAX);

        Ok(documents
            .iter()
            .filter(|d| matches(d, &filter))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_one(
        &self,
        filter: Document,
        _options: FindOneOptions,
    ) -> Result<Document, StoreError> {
        let documents = self.documents.lock().map_err(|_| Self::poisoned())?;
        documents
            .iter()
            .find(|d| matches(d, &filter))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(
        &self,
        mut payload: Document,
        _options: InsertOneOptions,
    ) -> Result<Bson, StoreError> {
        let unique_fields = self.unique_fields()?;
        let mut documents = self.documents.lock().map_err(|_| Self::poisoned())?;

        if !payload.contains_key("_id") {
            payload.insert("_id", ObjectId::new());
        }

        let mut keys = unique_fields;
        keys.insert("_id".to_string());
        if let Some(field) = unique_violation(&documents, &payload, &keys, None) {
            return Err(StoreError::Conflict(format!(
                "duplicate key on '{}'",
                field
            )));
        }

        let id = payload.get("_id").cloned().unwrap_or(Bson::Null);
        documents.push(payload);
        Ok(id)
    }

    async fn patch_one(
        &self,
        filter: Document,
        payload: Document,
        _options: FindOneAndUpdateOptions,
    ) -> Result<Document, StoreError> {
        let unique_fields = self.unique_fields()?;
        let mut documents = self.documents.lock().map_err(|_| Self::poisoned())?;

        let index = documents
            .iter()
            .position(|d| matches(d, &filter))
            .ok_or(StoreError::NotFound)?;

        let mut updated = documents[index].clone();
        for (key, value) in payload {
            updated.insert(key, value);
        }

        if let Some(field) = unique_violation(&documents, &updated, &unique_fields, Some(index)) {
            return Err(StoreError::Conflict(format!(
                "duplicate key on '{}'",
                field
            )));
        }

        documents[index] = updated.clone();
        Ok(updated)
    }

    async fn delete_one(
        &self,
        filter: Document,
        _options: FindOneAndDeleteOptions,
    ) -> Result<Document, StoreError> {
        let mut documents = self.documents.lock().map_err(|_| Self::poisoned())?;
        let index = documents
            .iter()
            .position(|d| matches(d, &filter))
            .ok_or(StoreError::NotFound)?;
        Ok(documents.remove(index))
    }

    async fn count(&self, filter: Document) -> Result<u64, StoreError> {
        let documents = self.documents.lock().map_err(|_| Self::poisoned())?;
        Ok(documents.iter().filter(|d| matches(d, &filter)).count() as u64)
    }

    async fn ensure_unique_index(&self, field: &str) -> Result<(), StoreError> {
        self.unique_fields
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(field.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
