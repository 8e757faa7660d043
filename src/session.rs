//! Per-user reminder sessions.
//!
//! A session ties a user's store subscription to a [`ReminderScheduler`]:
//! every change to the user's tracking or taken documents re-runs the full
//! derivation pipeline and rebuilds the timers. Sessions live until they are
//! unsubscribed or the registry shuts down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration as DayDuration, Local, NaiveDate, NaiveDateTime};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::pipeline;
use crate::reminder::{Notifier, ReminderScheduler, ReminderStatus};
use crate::store::{DocumentKey, DocumentStore};

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

struct Session {
    scheduler: Arc<ReminderScheduler>,
    feed: JoinHandle<()>,
}

impl Session {
    fn close(self) {
        self.feed.abort();
        self.scheduler.shutdown();
    }
}

pub struct SessionRegistry {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(store, notifier, Arc::new(|| Local::now().naive_local()))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a session for `uid`. Returns false if one is already running.
    pub fn subscribe(&self, uid: &str) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(uid) {
            return false;
        }

        let scheduler = Arc::new(ReminderScheduler::new(self.notifier.clone()));
        // Subscribe before the first load so no write can slip in between.
        let changes = self.store.subscribe();
        let feed = tokio::spawn(run_feed(
            uid.to_string(),
            self.store.clone(),
            scheduler.clone(),
            self.clock.clone(),
            changes,
        ));

        sessions.insert(uid.to_string(), Session { scheduler, feed });
        tracing::info!(uid, "📡 Reminder session started");
        true
    }

    pub fn unsubscribe(&self, uid: &str) -> bool {
        let session = self.lock().remove(uid);
        match session {
            Some(session) => {
                session.close();
                tracing::info!(uid, "📴 Reminder session closed");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, uid: &str) -> bool {
        self.lock().contains_key(uid)
    }

    /// Suppresses the reminder for a todo and flips it in the session's
    /// in-memory list. No-op without a session or when `day` is not the day
    /// the session is scheduling.
    pub fn toggle_local(&self, uid: &str, todo_id: &str, day: NaiveDate) -> Option<bool> {
        let sessions = self.lock();
        sessions.get(uid)?.scheduler.toggle(todo_id, day)
    }

    pub fn reminders(&self, uid: &str) -> Option<Vec<ReminderStatus>> {
        let sessions = self.lock();
        sessions.get(uid).map(|s| s.scheduler.statuses())
    }

    pub fn shutdown(&self) {
        for (_, session) in self.lock().drain() {
            session.close();
        }
    }
}

async fn run_feed(
    uid: String,
    store: Arc<dyn DocumentStore>,
    scheduler: Arc<ReminderScheduler>,
    clock: Clock,
    mut changes: broadcast::Receiver<DocumentKey>,
) {
    refresh(&uid, store.as_ref(), &scheduler, &clock).await;
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(key) if key.affects_schedule_of(&uid) => {
                    tracing::debug!(uid = %uid, key = %key, "🔄 Schedule changed");
                    refresh(&uid, store.as_ref(), &scheduler, &clock).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(uid = %uid, missed, "⚠️ Change feed lagged, rebuilding");
                    refresh(&uid, store.as_ref(), &scheduler, &clock).await;
                }
                Err(RecvError::Closed) => {
                    tracing::error!(uid = %uid, "❌ Change feed closed, reminders stopped");
                    break;
                }
            },
            _ = tokio::time::sleep(until_next_day(clock())) => {
                tracing::debug!(uid = %uid, "📅 New day, rebuilding");
                refresh(&uid, store.as_ref(), &scheduler, &clock).await;
            }
        }
    }
}

/// Time left until local midnight after `now`.
fn until_next_day(now: NaiveDateTime) -> std::time::Duration {
    let midnight = (now.date() + DayDuration::days(1)).and_time(chrono::NaiveTime::MIN);
    (midnight - now).to_std().unwrap_or_default()
}

async fn refresh(uid: &str, store: &dyn DocumentStore, scheduler: &ReminderScheduler, clock: &Clock) {
    let now = clock();
    match pipeline::load(store, uid, now.date()).await {
        Ok(snapshot) => scheduler.rebuild(snapshot.todos, now),
        Err(e) => tracing::error!(uid, "❌ Failed to rebuild schedule: {}", e),
    }
}
