//! Process-wide sink for backend warnings and errors.
//!
//! The statement/connection layer calls [`ErrorChannel::report`] whenever
//! the backend raises a problem; the dispatcher uses the same channel for
//! undecodable payloads, queue overflows, and panicking handlers. Records
//! never travel on the event path.
//!
//! The sink is installed once at startup and removed when the returned
//! [`ErrorSinkGuard`] is dropped. A panicking sink is caught and logged;
//! it cannot take the caller down with it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use serde::Serialize;

use crate::error::NotifyError;

/// Severity of an [`ErrorRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational problem; processing continued.
    Warning,
    /// The operation that raised it failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("Warning"),
            Self::Error => f.write_str("Error"),
        }
    }
}

/// A warning or error raised outside the event flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// How serious the problem is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl ErrorRecord {
    /// Creates a warning record.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// Creates an error record.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

type Sink = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

static GLOBAL: LazyLock<Arc<ErrorChannel>> = LazyLock::new(|| Arc::new(ErrorChannel::new()));

/// Single-sink error channel.
pub struct ErrorChannel {
    sink: RwLock<Option<Sink>>,
}

impl fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorChannel {
    /// Creates a channel with no sink installed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sink: RwLock::new(None),
        }
    }

    /// Returns the process-wide channel.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Installs `sink`, returning a guard that uninstalls it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::ErrorSinkInstalled`] if a sink is already
    /// installed on this channel.
    pub fn install<F>(self: &Arc<Self>, sink: F) -> Result<ErrorSinkGuard, NotifyError>
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        let mut slot = self.sink.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(NotifyError::ErrorSinkInstalled);
        }
        *slot = Some(Arc::new(sink));
        Ok(ErrorSinkGuard {
            channel: Arc::clone(self),
        })
    }

    /// Returns `true` while a sink is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hands `record` to the installed sink.
    ///
    /// Without a sink the record is only logged. Never panics.
    pub fn report(&self, record: ErrorRecord) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(sink) = sink else {
            match record.severity {
                Severity::Warning => tracing::warn!(message = %record.message, "unhandled warning"),
                Severity::Error => tracing::error!(message = %record.message, "unhandled error"),
            }
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| sink(&record))).is_err() {
            tracing::error!(message = %record.message, "error sink panicked");
        }
    }

    fn uninstall(&self) {
        let mut slot = self.sink.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

/// Keeps a sink installed; dropping it uninstalls the sink.
#[must_use = "dropping the guard uninstalls the sink"]
#[derive(Debug)]
pub struct ErrorSinkGuard {
    channel: Arc<ErrorChannel>,
}

impl Drop for ErrorSinkGuard {
    fn drop(&mut self) {
        self.channel.uninstall();
    }
}
