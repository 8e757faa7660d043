//! Dose reminders.
//!
//! A [`ReminderScheduler`] belongs to one user session. Each pending todo gets
//! a timer task that fires at its time slot; a todo fires at most once per day
//! while the scheduler lives. The notified set is in memory only, so a restart
//! re-arms reminders that were already sent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::models::Todo;
use crate::schedule::todos::parse_slot;

const REMINDER_TITLE: &str = "PillPal - Reminder";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub todo_id: String,
}

impl Notification {
    fn for_todo(todo: &Todo) -> Self {
        Self {
            title: REMINDER_TITLE.to_string(),
            message: format!("Time to take {} ({})", todo.text, todo.time),
            todo_id: todo.id.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notify request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notify endpoint returned status {0}")]
    Status(u16),
}

pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Posts reminders to `{base_url}/notify`.
pub struct HttpNotifier {
    url: String,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/notify", base_url.trim_end_matches('/')),
            client,
        })
    }
}

impl Notifier for HttpNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let response = self.client.post(&self.url).json(notification).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderState {
    Pending,
    Notified,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderStatus {
    pub todo_id: String,
    pub time_slot: String,
    pub state: ReminderState,
}

#[derive(Default)]
struct SchedulerState {
    day: Option<NaiveDate>,
    generation: u64,
    timers: HashMap<String, JoinHandle<()>>,
    notified: HashSet<String>,
    todos: Vec<Todo>,
}

impl SchedulerState {
    fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.generation += 1;
    }
}

pub struct ReminderScheduler {
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<SchedulerState>>,
}

impl ReminderScheduler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Cancels every timer and re-arms from `todos`.
    ///
    /// Completed and already-notified todos are skipped. A todo whose slot has
    /// passed fires right away; the rest get a timer for `slot - now`.
    pub fn rebuild(&self, todos: Vec<Todo>, now: NaiveDateTime) {
        let mut immediate = Vec::new();
        {
            let mut state = lock(&self.state);
            state.cancel_all();
            if state.day != Some(now.date()) {
                state.notified.clear();
                state.day = Some(now.date());
            }
            let generation = state.generation;

            for todo in &todos {
                if todo.completed || state.notified.contains(&todo.id) {
                    continue;
                }
                let Some(slot) = parse_slot(&todo.time_slot) else {
                    tracing::warn!(todo_id = %todo.id, slot = %todo.time_slot, "⚠️ Skipping reminder with unparsable time slot");
                    continue;
                };

                let notification = Notification::for_todo(todo);
                match (now.date().and_time(slot) - now).to_std() {
                    Ok(delay) if !delay.is_zero() => {
                        let timer = self.arm(todo.id.clone(), notification, delay, generation);
                        state.timers.insert(todo.id.clone(), timer);
                    }
                    _ => {
                        state.notified.insert(todo.id.clone());
                        immediate.push(notification);
                    }
                }
            }
            tracing::debug!(armed = state.timers.len(), immediate = immediate.len(), "⏰ Reminders rebuilt");
            state.todos = todos;
        }

        for notification in immediate {
            tokio::spawn(deliver(self.notifier.clone(), notification));
        }
    }

    fn arm(
        &self,
        todo_id: String,
        notification: Notification,
        delay: Duration,
        generation: u64,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = lock(&state);
                if state.generation != generation || !state.notified.insert(todo_id.clone()) {
                    return;
                }
                state.timers.remove(&todo_id);
            }
            deliver(notifier, notification).await;
        })
    }

    /// Suppresses the reminder for `todo_id` and flips its in-memory
    /// completion flag. Returns the new flag if the todo is known.
    ///
    /// Only toggles for the day currently scheduled count; a dose logged for
    /// another date leaves today's reminder alone.
    pub fn toggle(&self, todo_id: &str, day: NaiveDate) -> Option<bool> {
        let mut state = lock(&self.state);
        if state.day != Some(day) {
            return None;
        }
        if let Some(timer) = state.timers.remove(todo_id) {
            timer.abort();
        }
        state.notified.insert(todo_id.to_string());
        let todo = state.todos.iter_mut().find(|t| t.id == todo_id)?;
        todo.completed = !todo.completed;
        Some(todo.completed)
    }

    pub fn statuses(&self) -> Vec<ReminderStatus> {
        let state = lock(&self.state);
        state
            .todos
            .iter()
            .map(|todo| ReminderStatus {
                todo_id: todo.id.clone(),
                time_slot: todo.time_slot.clone(),
                state: if todo.completed {
                    ReminderState::Completed
                } else if state.notified.contains(&todo.id) {
                    ReminderState::Notified
                } else {
                    ReminderState::Pending
                },
            })
            .collect()
    }

    #[cfg(test)]
    pub fn todos(&self) -> Vec<Todo> {
        lock(&self.state).todos.clone()
    }

    pub fn shutdown(&self) {
        lock(&self.state).cancel_all();
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn deliver(notifier: Arc<dyn Notifier>, notification: Notification) {
    match notifier.notify(&notification).await {
        Ok(()) => tracing::info!(todo_id = %notification.todo_id, "🔔 Reminder sent"),
        Err(e) => tracing::warn!(todo_id = %notification.todo_id, "❌ Reminder not delivered: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every notification; fails them all when `fail` is set.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn sent_ids(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|n| n.todo_id.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(notification.clone());
                if self.fail {
                    Err(NotifyError::Status(503))
                } else {
                    Ok(())
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::models::fixtures::{date, medication};
    use crate::models::TakenRecord;
    use crate::schedule::build_today_todos;

    fn at(day: &str, hh: u32, mm: u32) -> NaiveDateTime {
        date(day).and_hms_opt(hh, mm, 0).unwrap()
    }

    fn todos() -> Vec<Todo> {
        build_today_todos(&[medication("m1", &["08:00", "20:00"])], &TakenRecord::default())
    }

    fn scheduler() -> (ReminderScheduler, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (ReminderScheduler::new(notifier.clone()), notifier)
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_slot_time_once() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 7, 59));

        advance(30).await;
        assert!(notifier.sent_ids().is_empty());

        advance(31).await;
        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
        let sent = notifier.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.title, REMINDER_TITLE);
        assert_eq!(sent.message, "Time to take pill m1 (08:00 AM)");

        advance(3600).await;
        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
    }

    #[tokio::test(start_paused = true)]
    async fn past_slots_fire_immediately() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 9, 0));
        advance(1).await;

        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
        let states: Vec<ReminderState> = scheduler.statuses().iter().map(|s| s.state).collect();
        assert_eq!(states, [ReminderState::Notified, ReminderState::Pending]);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_suppresses_pending_timer() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));

        assert_eq!(scheduler.toggle("m1:08:00", date("2024-01-15")), Some(true));
        advance(2 * 3600).await;
        assert!(notifier.sent_ids().is_empty());
        assert_eq!(scheduler.statuses()[0].state, ReminderState::Completed);

        // Un-completing does not re-arm: the todo stays suppressed for the day.
        assert_eq!(scheduler.toggle("m1:08:00", date("2024-01-15")), Some(false));
        scheduler.rebuild(scheduler.todos(), at("2024-01-15", 7, 30));
        advance(3600).await;
        assert!(notifier.sent_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_for_another_day_keeps_todays_reminder() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));

        assert_eq!(scheduler.toggle("m1:08:00", date("2024-01-14")), None);
        assert_eq!(scheduler.statuses()[0].state, ReminderState::Pending);

        advance(2 * 3600).await;
        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_cancels_previous_timers() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));

        advance(2 * 3600).await;
        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_todos_are_not_armed() {
        let (scheduler, notifier) = scheduler();
        let mut list = todos();
        list[0].completed = true;
        scheduler.rebuild(list, at("2024-01-15", 9, 0));

        advance(1).await;
        assert!(notifier.sent_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn notified_set_resets_on_a_new_day() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 9, 0));
        advance(1).await;
        scheduler.rebuild(todos(), at("2024-01-15", 9, 5));
        advance(1).await;
        assert_eq!(notifier.sent_ids().len(), 1);

        scheduler.rebuild(todos(), at("2024-01-16", 9, 0));
        advance(1).await;
        assert_eq!(notifier.sent_ids().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_is_not_retried() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let scheduler = ReminderScheduler::new(notifier.clone());
        scheduler.rebuild(todos(), at("2024-01-15", 9, 0));
        advance(3600).await;

        assert_eq!(notifier.sent_ids(), ["m1:08:00"]);
        assert_eq!(scheduler.statuses()[0].state, ReminderState::Notified);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_timers() {
        let (scheduler, notifier) = scheduler();
        scheduler.rebuild(todos(), at("2024-01-15", 7, 0));
        scheduler.shutdown();

        advance(24 * 3600).await;
        assert!(notifier.sent_ids().is_empty());
    }

    #[tokio::test]
    async fn http_notifier_posts_json_body() {
        use axum::{routing::post, Json, Router};

        let received = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/notify",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let notifier = HttpNotifier::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap();
        let notification = Notification::for_todo(&todos()[0]);
        notifier.notify(&notification).await.unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["todoId"], "m1:08:00");
        assert_eq!(bodies[0]["title"], REMINDER_TITLE);
        server.abort();
    }
}
