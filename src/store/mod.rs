//! Document store seam.
//!
//! Documents are JSON bodies addressed by `collection/id`, mirroring the
//! layout the mobile app reads: `users/{uid}`, `tracking/{uid}`,
//! `history/{uid}`, `taken/{uid}_{YYYY-MM-DD}` and `pills/{pillId}`. Every
//! write publishes the changed key on a broadcast feed so subscribers can
//! re-read full documents.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{
    HistoryDoc, HistoryEntry, Medication, PillRecord, TakenRecord, TrackingDoc, UserProfile,
};
use crate::tracking::{apply_toggle, ToggleOutcome};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    pub collection: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn user(uid: &str) -> Self {
        Self::new("users", uid)
    }

    pub fn tracking(uid: &str) -> Self {
        Self::new("tracking", uid)
    }

    pub fn history(uid: &str) -> Self {
        Self::new("history", uid)
    }

    pub fn taken(uid: &str, date: NaiveDate) -> Self {
        Self::new("taken", format!("{uid}_{}", date.format("%Y-%m-%d")))
    }

    pub fn pill(pill_id: &str) -> Self {
        Self::new("pills", pill_id)
    }

    /// Parses the `collection/id` form used on the change feed.
    pub fn parse(path: &str) -> Option<Self> {
        let (collection, id) = path.split_once('/')?;
        if collection.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(collection, id))
    }

    /// Whether a change to this document can alter `uid`'s schedule.
    pub fn affects_schedule_of(&self, uid: &str) -> bool {
        match self.collection.as_str() {
            "tracking" => self.id == uid,
            "taken" => self
                .id
                .strip_prefix(uid)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()),
            _ => false,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Read-modify-write body for [`DocumentStore::transact`]. Receives the current
/// bodies of the requested keys (in request order) and returns their new
/// bodies; `None` leaves a document untouched.
pub type TransactFn =
    Box<dyn FnOnce(Vec<Option<Value>>) -> StoreResult<Vec<Option<Value>>> + Send + 'static>;

pub trait DocumentStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<Option<Value>>>;

    /// Writes a document. With `merge`, top-level fields of `body` are merged
    /// into the existing document instead of replacing it.
    fn set<'a>(
        &'a self,
        key: &'a DocumentKey,
        body: Value,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Documents in `collection` whose top-level string `field` equals `value`.
    fn find<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<(String, Value)>>>;

    /// Atomically reads `keys`, applies `apply` and writes the results back.
    /// No other transaction on any of the keys interleaves with this one.
    /// Returns the bodies as they stand after the transaction.
    fn transact(
        &self,
        keys: Vec<DocumentKey>,
        apply: TransactFn,
    ) -> BoxFuture<'_, StoreResult<Vec<Option<Value>>>>;

    fn subscribe(&self) -> broadcast::Receiver<DocumentKey>;
}

fn decode<T: DeserializeOwned + Default>(body: Option<Value>) -> StoreResult<T> {
    match body {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(T::default()),
    }
}

/// Typed access to the app's documents.
impl<'s> dyn DocumentStore + 's {
    pub async fn profile(&self, uid: &str) -> StoreResult<Option<UserProfile>> {
        match self.get(&DocumentKey::user(uid)).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    pub async fn merge_profile(&self, uid: &str, fields: Value) -> StoreResult<UserProfile> {
        let key = DocumentKey::user(uid);
        self.set(&key, fields, true).await?;
        let mut profile: UserProfile = decode(self.get(&key).await?)?;
        profile.uid = uid.to_string();
        Ok(profile)
    }

    pub async fn tracking(&self, uid: &str) -> StoreResult<Vec<Medication>> {
        let doc: TrackingDoc = decode(self.get(&DocumentKey::tracking(uid)).await?)?;
        Ok(doc.medications)
    }

    #[cfg(test)]
    pub async fn add_medication(&self, uid: &str, medication: Medication) -> StoreResult<()> {
        self.append(DocumentKey::tracking(uid), move |doc: &mut TrackingDoc| {
            doc.medications.push(medication)
        })
        .await
    }

    pub async fn history(&self, uid: &str) -> StoreResult<Vec<HistoryEntry>> {
        let doc: HistoryDoc = decode(self.get(&DocumentKey::history(uid)).await?)?;
        Ok(doc.medications)
    }

    /// Appends a confirmed scan to the user's history and its medication to
    /// tracking in one transaction, so neither exists without the other.
    pub async fn record_medication(
        &self,
        uid: &str,
        entry: HistoryEntry,
        medication: Medication,
    ) -> StoreResult<()> {
        let keys = vec![DocumentKey::history(uid), DocumentKey::tracking(uid)];
        self.transact(
            keys,
            Box::new(move |current| {
                let mut current = current.into_iter();
                let mut history: HistoryDoc = decode(current.next().flatten())?;
                let mut tracking: TrackingDoc = decode(current.next().flatten())?;
                history.medications.push(entry);
                tracking.medications.push(medication);
                Ok(vec![
                    Some(serde_json::to_value(&history)?),
                    Some(serde_json::to_value(&tracking)?),
                ])
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn taken_record(&self, uid: &str, date: NaiveDate) -> StoreResult<TakenRecord> {
        decode(self.get(&DocumentKey::taken(uid, date)).await?)
    }

    pub async fn put_pill(&self, record: &PillRecord) -> StoreResult<()> {
        let body = serde_json::to_value(record)?;
        self.set(&DocumentKey::pill(&record.id), body, false).await
    }

    /// Legacy scan records for a user, newest first.
    pub async fn pills_for_user(&self, uid: &str) -> StoreResult<Vec<PillRecord>> {
        let mut pills = self
            .find("pills", "userId", uid)
            .await?
            .into_iter()
            .map(|(_, body)| serde_json::from_value::<PillRecord>(body))
            .collect::<Result<Vec<_>, _>>()?;
        pills.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pills)
    }

    /// Flips a dose's taken flag for `date` and adjusts the medication's
    /// counter in a single transaction.
    pub async fn toggle_dose(
        &self,
        uid: &str,
        date: NaiveDate,
        todo_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ToggleOutcome> {
        let todo = todo_id.to_string();
        let keys = vec![DocumentKey::taken(uid, date), DocumentKey::tracking(uid)];

        let written = self
            .transact(
                keys,
                Box::new(move |current| {
                    let mut current = current.into_iter();
                    let mut taken: TakenRecord = decode(current.next().flatten())?;
                    let mut tracking: Option<TrackingDoc> =
                        current.next().flatten().map(serde_json::from_value::<TrackingDoc>).transpose()?;

                    let meds = tracking
                        .as_mut()
                        .map(|doc| doc.medications.as_mut_slice())
                        .unwrap_or_default();
                    apply_toggle(&mut taken, meds, &todo, now);

                    Ok(vec![
                        Some(serde_json::to_value(&taken)?),
                        tracking.map(|doc| serde_json::to_value(&doc)).transpose()?,
                    ])
                }),
            )
            .await?;

        let mut written = written.into_iter();
        let taken: TakenRecord = decode(written.next().flatten())?;
        let tracking: TrackingDoc = decode(written.next().flatten())?;
        Ok(ToggleOutcome::observe(&taken, &tracking.medications, todo_id))
    }

    #[cfg(test)]
    async fn append<T, F>(&self, key: DocumentKey, push: F) -> StoreResult<()>
    where
        T: DeserializeOwned + serde::Serialize + Default,
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.transact(
            vec![key],
            Box::new(move |current| {
                let mut doc: T = decode(current.into_iter().next().flatten())?;
                push(&mut doc);
                Ok(vec![Some(serde_json::to_value(&doc)?)])
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::date;

    #[test]
    fn taken_key_uses_iso_date() {
        let key = DocumentKey::taken("u1", date("2024-03-05"));
        assert_eq!(key.to_string(), "taken/u1_2024-03-05");
        assert_eq!(DocumentKey::parse("taken/u1_2024-03-05"), Some(key));
        assert_eq!(DocumentKey::parse("taken"), None);
    }

    #[test]
    fn schedule_changes_are_scoped_to_user() {
        let day = date("2024-03-05");
        assert!(DocumentKey::tracking("u1").affects_schedule_of("u1"));
        assert!(DocumentKey::taken("u1", day).affects_schedule_of("u1"));
        assert!(!DocumentKey::taken("u10", day).affects_schedule_of("u1"));
        assert!(!DocumentKey::tracking("u2").affects_schedule_of("u1"));
        assert!(!DocumentKey::history("u1").affects_schedule_of("u1"));
    }
}
