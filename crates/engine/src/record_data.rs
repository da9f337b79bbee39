//! Record field lookup for hosts that do not pass record data themselves.

use std::collections::HashMap;

use async_trait::async_trait;
use blueprint_interchange::RecordId;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CollaboratorError;

/// Fetches the current field values of a record as a JSON object.
#[async_trait]
pub trait RecordDataProvider: Send + Sync {
    async fn fetch_record_fields(&self, record_id: RecordId) -> Result<Value, CollaboratorError>;
}

/// Records held in memory. Unknown records have no fields.
#[derive(Debug, Default)]
pub struct StaticRecordData {
    records: RwLock<HashMap<RecordId, Value>>,
}

impl StaticRecordData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, record_id: RecordId, fields: Value) {
        self.records.write().await.insert(record_id, fields);
    }
}

#[async_trait]
impl RecordDataProvider for StaticRecordData {
    async fn fetch_record_fields(&self, record_id: RecordId) -> Result<Value, CollaboratorError> {
        Ok(self
            .records
            .read()
            .await
            .get(&record_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}
