use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use tokio::sync::broadcast;

use super::{DocumentKey, DocumentStore, StoreError, StoreResult, TransactFn};

const CHANNEL: &str = "document_changes";
const FEED_CAPACITY: usize = 256;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (collection, id)
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION notify_document_change() RETURNS trigger AS $$
    BEGIN
        PERFORM pg_notify('document_changes', NEW.collection || '/' || NEW.id);
        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS documents_notify ON documents",
    r#"
    CREATE TRIGGER documents_notify
        AFTER INSERT OR UPDATE ON documents
        FOR EACH ROW EXECUTE FUNCTION notify_document_change()
    "#,
];

#[derive(FromRow)]
struct DocumentRow {
    id: String,
    body: Json<Value>,
}

/// Postgres-backed document store. Change notifications travel through
/// `LISTEN/NOTIFY`, so every instance sharing the database sees every write.
pub struct PgStore {
    pool: PgPool,
    feed: broadcast::Sender<DocumentKey>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANNEL).await?;
        tokio::spawn(forward_notifications(listener, feed.clone()));

        Ok(Self { pool, feed })
    }
}

/// Relays notifications into the feed for as long as the store lives. After a
/// failed receive the listener reconnects and re-subscribes on the next call.
async fn forward_notifications(mut listener: PgListener, feed: broadcast::Sender<DocumentKey>) {
    let mut failures = 0;
    loop {
        match listener.recv().await {
            Ok(notification) => {
                failures = 0;
                match DocumentKey::parse(notification.payload()) {
                    Some(key) => {
                        let _ = feed.send(key);
                    }
                    None => tracing::warn!(payload = notification.payload(), "⚠️ Unparsable change notification"),
                }
            }
            Err(e) => {
                let delay = reconnect_delay(failures);
                failures = failures.saturating_add(1);
                tracing::error!(attempt = failures, ?delay, "❌ Change feed listener failed: {}", e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

fn reconnect_delay(failures: u32) -> Duration {
    Duration::from_millis(500)
        .saturating_mul(2u32.saturating_pow(failures))
        .min(MAX_RECONNECT_DELAY)
}

async fn fetch(
    conn: &mut sqlx::PgConnection,
    key: &DocumentKey,
) -> StoreResult<Option<Value>> {
    let row: Option<DocumentRow> =
        sqlx::query_as("SELECT id, body FROM documents WHERE collection = $1 AND id = $2")
            .bind(&key.collection)
            .bind(&key.id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|r| r.body.0))
}

async fn upsert(
    conn: &mut sqlx::PgConnection,
    key: &DocumentKey,
    body: Value,
    merge: bool,
) -> StoreResult<()> {
    let sql = if merge {
        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)
         ON CONFLICT (collection, id)
         DO UPDATE SET body = documents.body || EXCLUDED.body, updated_at = now()"
    } else {
        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)
         ON CONFLICT (collection, id)
         DO UPDATE SET body = EXCLUDED.body, updated_at = now()"
    };
    sqlx::query(sql)
        .bind(&key.collection)
        .bind(&key.id)
        .bind(Json(body))
        .execute(conn)
        .await?;
    Ok(())
}

impl DocumentStore for PgStore {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            fetch(&mut conn, key).await
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a DocumentKey,
        body: Value,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            upsert(&mut conn, key, body, merge).await
        })
    }

    fn find<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<(String, Value)>>> {
        Box::pin(async move {
            let rows: Vec<DocumentRow> = sqlx::query_as(
                "SELECT id, body FROM documents WHERE collection = $1 AND body->>$2 = $3",
            )
            .bind(collection)
            .bind(field)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|r| (r.id, r.body.0)).collect())
        })
    }

    fn transact(
        &self,
        keys: Vec<DocumentKey>,
        apply: TransactFn,
    ) -> BoxFuture<'_, StoreResult<Vec<Option<Value>>>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            // Advisory locks also cover documents that do not exist yet. Taking
            // them in sorted order keeps concurrent transactions deadlock-free.
            let mut lock_order: Vec<&DocumentKey> = keys.iter().collect();
            lock_order.sort();
            lock_order.dedup();
            for key in lock_order {
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind(key.to_string())
                    .execute(&mut *tx)
                    .await?;
            }

            let mut current = Vec::with_capacity(keys.len());
            for key in &keys {
                current.push(fetch(&mut tx, key).await?);
            }

            let next = apply(current.clone())?;
            if next.len() != keys.len() {
                return Err(StoreError::Transaction(format!(
                    "expected {} documents, got {}",
                    keys.len(),
                    next.len()
                )));
            }

            let mut after = Vec::with_capacity(keys.len());
            for ((key, old), new) in keys.iter().zip(current).zip(next) {
                match new {
                    Some(body) => {
                        upsert(&mut tx, key, body.clone(), false).await?;
                        after.push(Some(body));
                    }
                    None => after.push(old),
                }
            }

            tx.commit().await?;
            Ok(after)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentKey> {
        self.feed.subscribe()
    }
}
