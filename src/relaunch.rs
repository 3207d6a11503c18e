//! Relaunch bridge
//!
//! When the process is started only to finish background transfers, the host
//! hands over a [`SessionCompletionToken`]. It must be completed once every
//! event of the session has been delivered and processed: completing it early
//! lets the host suspend the process mid-pipeline, never completing it gets
//! the process killed.
//!
//! The bridge holds at most one token. In normal foreground operation it holds
//! nothing and draining is a no-op.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Continuation handed over by the host on a background relaunch
///
/// Runs its completion at most once: either through
/// [`complete`](Self::complete) or, as a last resort, when dropped.
pub struct SessionCompletionToken {
    identifier: String,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl SessionCompletionToken {
    /// Create a token for the session named `identifier`
    pub fn new(identifier: impl Into<String>, on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self {
            identifier: identifier.into(),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Session this token belongs to
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Tell the host the session's work is finished
    pub fn complete(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}

impl Drop for SessionCompletionToken {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            tracing::warn!(
                identifier = %self.identifier,
                "session completion token dropped without being completed, completing now"
            );
            self.run();
        }
    }
}

impl fmt::Debug for SessionCompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCompletionToken")
            .field("identifier", &self.identifier)
            .field("pending", &self.on_complete.is_some())
            .finish()
    }
}

/// Holder of the relaunch token for the configured background session
#[derive(Debug)]
pub struct RelaunchBridge {
    identifier: String,
    held: Mutex<Option<SessionCompletionToken>>,
}

impl RelaunchBridge {
    /// Bridge for the session named `identifier`
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            held: Mutex::new(None),
        }
    }

    /// Well-known session identifier this bridge answers to
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn held(&self) -> MutexGuard<'_, Option<SessionCompletionToken>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a token from the host
    ///
    /// A token for another session is completed immediately since nothing
    /// here will drain it. A token replacing one already held completes the
    /// older one. Returns whether the token is now held.
    pub fn attach(&self, token: SessionCompletionToken) -> bool {
        if token.identifier() != self.identifier {
            tracing::warn!(
                expected = %self.identifier,
                received = %token.identifier(),
                "relaunch token for unknown session, completing immediately"
            );
            token.complete();
            return false;
        }

        let previous = self.held().replace(token);
        if let Some(previous) = previous {
            tracing::warn!(
                identifier = %self.identifier,
                "replacing held relaunch token, completing the previous one"
            );
            previous.complete();
        }
        tracing::debug!(identifier = %self.identifier, "relaunch token held");
        true
    }

    /// Whether a token is waiting for the session to drain
    pub fn is_holding(&self) -> bool {
        self.held().is_some()
    }

    /// Complete the held token, if any; returns whether one was completed
    pub fn release(&self) -> bool {
        // Taken out before completing so host code never runs under the lock.
        let token = self.held().take();
        match token {
            Some(token) => {
                tracing::info!(identifier = %self.identifier, "background session drained, completing relaunch token");
                token.complete();
                true
            }
            None => false,
        }
    }
}
