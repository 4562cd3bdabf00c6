//! In-process backend that turns executed statements into notifications.
//!
//! [`LoopbackBackend`] stands in for a database session with change
//! notification enabled. It keeps the backend-side registrations (port,
//! timeout, watched queries) and, when a statement runs through
//! [`LoopbackBackend::execute`], pushes the matching raw payloads into the
//! [`Inbox`] exactly as a remote backend would push them to the delivery
//! endpoint. A non-zero subscription timeout makes it push `Deregistered`
//! once the timeout elapses.
//!
//! Every failure the session raises is also reported on its
//! [`ErrorChannel`], the way a database client library hands server
//! errors to the installed error handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::NotificationBackend;
use crate::domain::{PreparedQuery, Scope, SubscriptionSpec, WatchSet};
use crate::error::BackendError;
use crate::service::decoder::{
    EVENT_DEREGISTER, EVENT_SHUTDOWN, EVENT_STARTUP, OP_ALTER, OP_DELETE, OP_DROP, OP_INSERT,
    OP_UPDATE, RawNotification,
};
use crate::service::error_channel::{ErrorChannel, ErrorRecord};
use crate::transport::Inbox;

/// Backend-side view of one registration.
#[derive(Debug, Clone)]
struct Registration {
    /// Distinguishes this registration from earlier ones under the same name.
    generation: u64,
    scope: Scope,
    port: u16,
    watch_set: WatchSet,
}

#[derive(Debug, Default)]
struct LoopbackState {
    registrations: HashMap<String, Registration>,
    /// Rows per table, used to report update/delete row ids.
    tables: HashMap<String, Vec<String>>,
}

/// Statement kinds the loopback session understands.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Create(String),
    Alter(String),
    Insert(String),
    Update(String),
    Delete(String),
    Drop(String),
    Select,
}

/// In-process notification backend.
#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    inner: Arc<LoopbackInner>,
}

#[derive(Debug)]
struct LoopbackInner {
    database: String,
    inbox: Inbox,
    errors: Arc<ErrorChannel>,
    live: AtomicBool,
    next_row: AtomicU64,
    next_generation: AtomicU64,
    state: Mutex<LoopbackState>,
}

impl LoopbackBackend {
    /// Creates a live session for `database` pushing payloads into `inbox`
    /// and reporting its failures on `errors`.
    #[must_use]
    pub fn new(database: impl Into<String>, inbox: Inbox, errors: Arc<ErrorChannel>) -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                database: database.into(),
                inbox,
                errors,
                live: AtomicBool::new(true),
                next_row: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                state: Mutex::new(LoopbackState::default()),
            }),
        }
    }

    /// Parses statement text into a watchable query handle.
    #[must_use]
    pub fn prepare(&self, text: &str) -> PreparedQuery {
        PreparedQuery::parse(text)
    }

    /// Executes a statement and pushes notifications for watched objects.
    ///
    /// Returns the number of notifications pushed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the session is closed, the statement is
    /// not understood, or the target table does not exist. The same error
    /// is reported on the session's error channel.
    pub async fn execute(&self, text: &str) -> Result<usize, BackendError> {
        let payloads = self.reported(self.apply_statement(text))?;
        let pushed = payloads.len();
        for payload in payloads {
            self.push(payload).await;
        }
        Ok(pushed)
    }

    /// Pushes `Startup` to every registration that wants lifecycle events.
    pub async fn startup(&self) {
        self.inner.live.store(true, Ordering::SeqCst);
        self.broadcast_lifecycle(EVENT_STARTUP).await;
    }

    /// Pushes `Shutdown` to every registration that wants lifecycle events.
    pub async fn shutdown(&self) {
        self.broadcast_lifecycle(EVENT_SHUTDOWN).await;
    }

    /// Ends a registration backend-side and pushes `Deregistered`.
    ///
    /// Returns `false` if no such registration exists.
    pub async fn expire(&self, subscription: &str) -> bool {
        expire(&self.inner, subscription, None).await
    }

    /// Closes the session; later registrations fail as not live.
    pub fn disconnect(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
    }

    /// Returns the names of backend-side registrations, sorted.
    #[must_use]
    pub fn registrations(&self) -> Vec<String> {
        let state = self.lock_state();
        let mut names: Vec<String> = state.registrations.keys().cloned().collect();
        names.sort();
        names
    }

    fn apply_statement(&self, text: &str) -> Result<Vec<RawNotification>, BackendError> {
        self.ensure_live()?;
        let statement = parse_statement(text)
            .ok_or_else(|| BackendError::new(format!("unsupported statement: {text}")))?;

        let mut state = self.lock_state();
        let changes = apply(&mut state, &statement, || self.next_row_id())?;
        Ok(changes
            .into_iter()
            .flat_map(|(object, op, rowid)| {
                watchers(&state, &object)
                    .into_iter()
                    .map(move |sub| (sub, object.clone(), op, rowid.clone()))
            })
            .map(|(sub, object, op, rowid)| {
                RawNotification::object_changed(
                    &self.inner.database,
                    &sub,
                    &object,
                    op,
                    rowid.as_deref(),
                )
            })
            .collect())
    }

    async fn broadcast_lifecycle(&self, code: u32) {
        let names: Vec<String> = {
            let state = self.lock_state();
            state
                .registrations
                .iter()
                .filter(|(_, r)| r.scope == Scope::AnyChange)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            self.push(RawNotification::lifecycle(code, &self.inner.database, &name))
                .await;
        }
    }

    async fn push(&self, payload: RawNotification) {
        push(&self.inner, payload).await;
    }

    /// Hands a failed result's error to the error channel, then returns it.
    fn reported<T>(&self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        result.inspect_err(|e| {
            tracing::debug!(database = %self.inner.database, error = %e, "backend error");
            self.inner.errors.report(ErrorRecord::error(e.to_string()));
        })
    }

    fn ensure_live(&self) -> Result<(), BackendError> {
        if self.inner.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::new("session is closed"))
        }
    }

    fn next_row_id(&self) -> String {
        let n = self.inner.next_row.fetch_add(1, Ordering::SeqCst);
        format!("AAAR{n:06X}AAEAAAAC")
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn push(inner: &LoopbackInner, payload: RawNotification) {
    if inner.inbox.push(payload.to_bytes()).await.is_err() {
        tracing::warn!(database = %inner.database, "delivery endpoint gone; notification lost");
    }
}

/// Removes the registration named `subscription` and pushes `Deregistered`.
///
/// With `Some(generation)` only that incarnation is removed; a later
/// registration that reused the name is left alone.
async fn expire(inner: &LoopbackInner, subscription: &str, generation: Option<u64>) -> bool {
    let removed = {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let matches = state
            .registrations
            .get(subscription)
            .is_some_and(|r| generation.is_none_or(|g| g == r.generation));
        matches && state.registrations.remove(subscription).is_some()
    };
    if removed {
        push(
            inner,
            RawNotification::lifecycle(EVENT_DEREGISTER, &inner.database, subscription),
        )
        .await;
    }
    removed
}

#[async_trait]
impl NotificationBackend for LoopbackBackend {
    fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    async fn register(&self, spec: &SubscriptionSpec) -> Result<(), BackendError> {
        self.ensure_live()?;
        if spec.delivery_port == 0 {
            return self.reported(Err(BackendError::new("delivery port 0 is unreachable")));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.lock_state();
            if state.registrations.contains_key(&spec.name) {
                return self.reported(Err(BackendError::new(format!(
                    "registration {} already exists",
                    spec.name
                ))));
            }
            state.registrations.insert(
                spec.name.clone(),
                Registration {
                    generation,
                    scope: spec.scope,
                    port: spec.delivery_port,
                    watch_set: WatchSet::new(),
                },
            );
        }

        if spec.timeout_secs > 0 {
            let inner = Arc::downgrade(&self.inner);
            let name = spec.name.clone();
            let ttl = Duration::from_secs(u64::from(spec.timeout_secs));
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(inner) = inner.upgrade() {
                    expire(&inner, &name, Some(generation)).await;
                }
            });
        }
        Ok(())
    }

    async fn watch(&self, subscription: &str, query: &PreparedQuery) -> Result<(), BackendError> {
        self.ensure_live()?;
        let mut state = self.lock_state();
        let result = state
            .registrations
            .get_mut(subscription)
            .ok_or_else(|| BackendError::new(format!("no registration {subscription}")))
            .and_then(|registration| {
                registration
                    .watch_set
                    .push(query.clone())
                    .map_err(|e| BackendError::new(e.to_string()))?;
                tracing::debug!(
                    subscription,
                    port = registration.port,
                    queries = registration.watch_set.len(),
                    "loopback watch list updated"
                );
                Ok(())
            });
        drop(state);
        self.reported(result)
    }

    async fn unregister(&self, subscription: &str) -> Result<(), BackendError> {
        let mut state = self.lock_state();
        state.registrations.remove(subscription);
        Ok(())
    }
}

/// Names of registrations watching `object`.
fn watchers(state: &LoopbackState, object: &str) -> Vec<String> {
    let mut names: Vec<String> = state
        .registrations
        .iter()
        .filter(|(_, r)| r.watch_set.covers(object))
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    names
}

/// Applies `statement` to the table state, returning the changes it made
/// as `(object, operation code, row id)`.
fn apply(
    state: &mut LoopbackState,
    statement: &Statement,
    mut next_row: impl FnMut() -> String,
) -> Result<Vec<(String, u32, Option<String>)>, BackendError> {
    fn missing(table: &str) -> BackendError {
        BackendError::new(format!("table or view {table} does not exist"))
    }

    match statement {
        Statement::Select => Ok(Vec::new()),
        Statement::Create(table) => {
            if state.tables.contains_key(table) {
                return Err(BackendError::new(format!("name {table} is already used")));
            }
            state.tables.insert(table.clone(), Vec::new());
            Ok(Vec::new())
        }
        Statement::Alter(table) => {
            if !state.tables.contains_key(table) {
                return Err(missing(table));
            }
            Ok(vec![(table.clone(), OP_ALTER, None)])
        }
        Statement::Drop(table) => {
            state.tables.remove(table).ok_or_else(|| missing(table))?;
            Ok(vec![(table.clone(), OP_DROP, None)])
        }
        Statement::Insert(table) => {
            let rows = state.tables.get_mut(table).ok_or_else(|| missing(table))?;
            let rowid = next_row();
            rows.push(rowid.clone());
            Ok(vec![(table.clone(), OP_INSERT, Some(rowid))])
        }
        Statement::Update(table) => {
            let rows = state.tables.get(table).ok_or_else(|| missing(table))?;
            Ok(rows
                .iter()
                .map(|rowid| (table.clone(), OP_UPDATE, Some(rowid.clone())))
                .collect())
        }
        Statement::Delete(table) => {
            let rows = state.tables.get_mut(table).ok_or_else(|| missing(table))?;
            Ok(rows
                .drain(..)
                .map(|rowid| (table.clone(), OP_DELETE, Some(rowid)))
                .collect())
        }
    }
}

/// Recognizes the statement forms used against the loopback session.
///
/// Updates and deletes affect every row of the table.
fn parse_statement(text: &str) -> Option<Statement> {
    let lower = text.trim().trim_end_matches(';').to_ascii_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    // Table names end at the first `(` as in `table1(code number)`.
    let table = |word: Option<&&str>| {
        word.and_then(|w| w.split('(').next())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };

    match words.as_slice() {
        ["select", ..] => Some(Statement::Select),
        ["create", "table", rest @ ..] => table(rest.first()).map(Statement::Create),
        ["alter", "table", rest @ ..] => table(rest.first()).map(Statement::Alter),
        ["drop", "table", rest @ ..] => table(rest.first()).map(Statement::Drop),
        ["insert", "into", rest @ ..] => table(rest.first()).map(Statement::Insert),
        ["update", rest @ ..] => table(rest.first()).map(Statement::Update),
        ["delete", "from", rest @ ..] | ["delete", rest @ ..] => {
            table(rest.first()).map(Statement::Delete)
        }
        _ => None,
    }
}
