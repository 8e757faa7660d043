use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{DocumentKey, DocumentStore, StoreError, StoreResult, TransactFn};

const FEED_CAPACITY: usize = 256;

/// In-process document store. Used when no `DATABASE_URL` is configured and
/// by the tests.
pub struct MemoryStore {
    docs: Mutex<HashMap<DocumentKey, Value>>,
    feed: broadcast::Sender<DocumentKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            docs: Mutex::new(HashMap::new()),
            feed,
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<DocumentKey, Value>>> {
        self.docs
            .lock()
            .map_err(|e| StoreError::Transaction(format!("Lock poisoned: {e}")))
    }

    fn publish(&self, key: &DocumentKey) {
        // No receivers is fine.
        let _ = self.feed.send(key.clone());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow merge of top-level object fields.
pub(super) fn merge_into(existing: Option<Value>, body: Value) -> Value {
    match (existing, body) {
        (Some(Value::Object(mut current)), Value::Object(fields)) => {
            current.extend(fields);
            Value::Object(current)
        }
        (_, body) => body,
    }
}

impl DocumentStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move { Ok(self.lock()?.get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a DocumentKey,
        body: Value,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            {
                let mut docs = self.lock()?;
                let next = if merge {
                    merge_into(docs.remove(key), body)
                } else {
                    body
                };
                docs.insert(key.clone(), next);
            }
            self.publish(key);
            Ok(())
        })
    }

    fn find<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<(String, Value)>>> {
        Box::pin(async move {
            let docs = self.lock()?;
            Ok(docs
                .iter()
                .filter(|(key, _)| key.collection == collection)
                .filter(|(_, body)| body.get(field).and_then(Value::as_str) == Some(value))
                .map(|(key, body)| (key.id.clone(), body.clone()))
                .collect())
        })
    }

    fn transact(
        &self,
        keys: Vec<DocumentKey>,
        apply: TransactFn,
    ) -> BoxFuture<'_, StoreResult<Vec<Option<Value>>>> {
        Box::pin(async move {
            let (after, changed) = {
                let mut docs = self.lock()?;
                let current: Vec<Option<Value>> =
                    keys.iter().map(|key| docs.get(key).cloned()).collect();
                let next = apply(current.clone())?;
                if next.len() != keys.len() {
                    return Err(StoreError::Transaction(format!(
                        "expected {} documents, got {}",
                        keys.len(),
                        next.len()
                    )));
                }

                let mut after = Vec::with_capacity(keys.len());
                let mut changed = Vec::new();
                for ((key, old), new) in keys.iter().zip(current).zip(next) {
                    match new {
                        Some(body) => {
                            docs.insert(key.clone(), body.clone());
                            changed.push(key.clone());
                            after.push(Some(body));
                        }
                        None => after.push(old),
                    }
                }
                (after, changed)
            };
            for key in &changed {
                self.publish(key);
            }
            Ok(after)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentKey> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn merge_keeps_existing_fields() {
        let store = MemoryStore::new();
        let key = DocumentKey::user("u1");
        store.set(&key, json!({"name": "Ana", "age": 30}), false).await.unwrap();
        store.set(&key, json!({"age": 31}), true).await.unwrap();

        let body = store.get(&key).await.unwrap().unwrap();
        assert_eq!(body, json!({"name": "Ana", "age": 31}));

        store.set(&key, json!({"age": 32}), false).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap(), json!({"age": 32}));
    }

    #[tokio::test]
    async fn writes_are_published_on_the_feed() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        store.set(&DocumentKey::tracking("u1"), json!({}), false).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), DocumentKey::tracking("u1"));
    }

    #[tokio::test]
    async fn transact_skips_untouched_documents() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        let a = DocumentKey::new("c", "a");
        let b = DocumentKey::new("c", "b");

        let after = store
            .transact(
                vec![a.clone(), b.clone()],
                Box::new(|current| {
                    assert_eq!(current, vec![None, None]);
                    Ok(vec![Some(json!({"n": 1})), None])
                }),
            )
            .await
            .unwrap();

        assert_eq!(after, vec![Some(json!({"n": 1})), None]);
        assert_eq!(store.get(&b).await.unwrap(), None);
        assert_eq!(feed.recv().await.unwrap(), a);
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn find_matches_top_level_string_field() {
        let store = MemoryStore::new();
        store.set(&DocumentKey::pill("p1"), json!({"userId": "u1"}), false).await.unwrap();
        store.set(&DocumentKey::pill("p2"), json!({"userId": "u2"}), false).await.unwrap();
        store.set(&DocumentKey::user("u1"), json!({"userId": "u1"}), false).await.unwrap();

        let found = store.find("pills", "userId", "u1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "p1");
    }
}
