use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Collection names as the backing store knows them.
pub mod collections {
    pub const USERS: &str = "users";
    pub const REFLECTIONS: &str = "reflections";
    pub const SIMULATIONS: &str = "simulations";
    pub const COACH_FEED: &str = "coachFeed";
    pub const COACH_STATS: &str = "coachStats";
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub version: i64,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// The only filter shape the client needs: equality on one field, or none.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    field: Option<(String, Value)>,
}

impl Filter {
    pub fn none() -> Self {
        Filter { field: None }
    }

    pub fn field(name: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: Some((name.to_string(), value.into())),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        match &self.field {
            None => true,
            Some((name, value)) => data.get(name) == Some(value),
        }
    }

    /// The filter as a JSON object for `@>` containment queries.
    pub fn as_contains(&self) -> Option<Value> {
        self.field.as_ref().map(|(name, value)| {
            let mut object = serde_json::Map::new();
            object.insert(name.clone(), value.clone());
            Value::Object(object)
        })
    }
}

/// Subscriptions deliver complete snapshots, never deltas. Dropping the
/// stream is the unsubscribe: the producing task stops as soon as the
/// consumer is gone.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Vec<Document>> + Send>>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn list(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    async fn insert(&self, collection: &str, data: Value) -> Result<String>;

    /// Upsert under a caller-chosen id (stats documents keyed by coach id).
    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<()>;

    /// Versioned write: succeeds only when the stored version still equals
    /// `expected_version`. Returns false on conflict so callers can re-read
    /// and retry.
    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: Value,
    ) -> Result<bool>;

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<SnapshotStream>;
}

/// In-process store used by the test suites as a stand-in for the hosted
/// document database. Collections keep insertion order so snapshots are
/// delivered the way the backing store would deliver them.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<Document>>>>,
    changes: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        MemoryStore {
            inner: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    fn snapshot(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filter.matches(&doc.data))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, collection: &str) {
        let _ = self.changes.send(collection.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .cloned())
    }

    async fn list(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self.snapshot(collection, filter))
    }

    async fn insert(&self, collection: &str, data: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.entry(collection.to_string()).or_default().push(Document {
                id: id.clone(),
                version: 1,
                data,
                created_at: Utc::now(),
            });
        }
        self.notify(collection);
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let docs = inner.entry(collection.to_string()).or_default();
            match docs.iter_mut().find(|doc| doc.id == id) {
                Some(doc) => {
                    doc.data = data;
                    doc.version += 1;
                }
                None => docs.push(Document {
                    id: id.to_string(),
                    version: 1,
                    data,
                    created_at: Utc::now(),
                }),
            }
        }
        self.notify(collection);
        Ok(())
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: Value,
    ) -> Result<bool> {
        let updated = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let doc = inner
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
                .ok_or_else(|| Error::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            if doc.version == expected_version {
                doc.data = data;
                doc.version += 1;
                true
            } else {
                false
            }
        };
        if updated {
            self.notify(collection);
        }
        Ok(updated)
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<SnapshotStream> {
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let collection = collection.to_string();
        let mut changes = self.changes.subscribe();

        tokio::spawn(async move {
            if tx.send(store.snapshot(&collection, &filter)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == collection => {
                        if tx.send(store.snapshot(&collection, &filter)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    // Missed notifications: resync with a fresh snapshot.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if tx.send(store.snapshot(&collection, &filter)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = MemoryStore::new();
        let id = store
            .insert("users", json!({"name": "Dana", "teamId": "abc123"}))
            .await
            .unwrap();

        let doc = store.get("users", &id).await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.data["name"], "Dana");
    }

    #[tokio::test]
    async fn list_applies_field_filter() {
        let store = MemoryStore::new();
        store
            .insert("reflections", json!({"teamId": "a", "score": 7}))
            .await
            .unwrap();
        store
            .insert("reflections", json!({"teamId": "b", "score": 3}))
            .await
            .unwrap();

        let filtered = store
            .list("reflections", &Filter::field("teamId", "a"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].data["score"], 7);

        let all = store.list("reflections", &Filter::none()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn update_if_rejects_stale_version() {
        let store = MemoryStore::new();
        store.put("coachStats", "c1", json!({"totalScore": 5.0})).await.unwrap();

        let doc = store.get("coachStats", "c1").await.unwrap().unwrap();
        assert!(store
            .update_if("coachStats", "c1", doc.version, json!({"totalScore": 6.0}))
            .await
            .unwrap());

        // Same expected version again: the first write bumped it.
        assert!(!store
            .update_if("coachStats", "c1", doc.version, json!({"totalScore": 7.0}))
            .await
            .unwrap());

        let doc = store.get("coachStats", "c1").await.unwrap().unwrap();
        assert_eq!(doc.data["totalScore"], 6.0);
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        store
            .insert("reflections", json!({"teamId": "a", "score": 4}))
            .await
            .unwrap();

        let mut stream = store
            .subscribe("reflections", Filter::field("teamId", "a"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);

        store
            .insert("reflections", json!({"teamId": "a", "score": 9}))
            .await
            .unwrap();
        // Writes to other collections do not wake this subscription.
        store.insert("users", json!({"name": "x"})).await.unwrap();

        let second = stream.next().await.unwrap();
        assert_eq!(second.len(), 2);
    }
}
