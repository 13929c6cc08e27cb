//! Submission lifecycle: Idle → Submitting → Success | Error → Idle.
//!
//! Every submission is stamped with a ticket. Outcomes are applied only when
//! they carry the current ticket, so anything arriving after a reset or
//! disposal falls on the floor.

use crate::error::FieldErrors;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};

pub type Ticket = u64;

pub const DEFAULT_AUTO_RESET: Duration = Duration::from_millis(3000);

#[derive(Clone, Debug, Default, PartialEq)]
pub enum SubmissionState {
    #[default]
    Idle,
    Submitting,
    Success {
        /// The payload that was submitted.
        data: JsonValue,
        /// Whatever the transport answered with.
        response: JsonValue,
    },
    Error {
        message: String,
        field_errors: FieldErrors,
    },
}

impl SubmissionState {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Submitting => "submitting",
            SubmissionState::Success { .. } => "success",
            SubmissionState::Error { .. } => "error",
        }
    }
}

#[derive(Debug)]
pub struct SubmissionMachine {
    state: SubmissionState,
    ticket: Ticket,
    auto_reset: Option<Duration>,
    reset_at: Option<Instant>,
    disposed: bool,
}

impl Default for SubmissionMachine {
    fn default() -> Self {
        Self::new(Some(DEFAULT_AUTO_RESET))
    }
}

impl SubmissionMachine {
    /// `auto_reset = None` keeps `Success` until the next submit or reset.
    pub fn new(auto_reset: Option<Duration>) -> Self {
        Self {
            state: SubmissionState::Idle,
            ticket: 0,
            auto_reset,
            reset_at: None,
            disposed: false,
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, SubmissionState::Submitting)
    }

    pub fn reset_deadline(&self) -> Option<Instant> {
        self.reset_at
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Enter `Submitting`. Returns `None` while a submission is in flight or
    /// after disposal.
    pub fn begin(&mut self) -> Option<Ticket> {
        if self.disposed {
            return None;
        }
        if self.is_submitting() {
            tracing::debug!(ticket = self.ticket, "submit ignored: already submitting");
            return None;
        }
        self.ticket += 1;
        self.reset_at = None;
        self.transition(SubmissionState::Submitting);
        Some(self.ticket)
    }

    /// Whether an outcome stamped with `ticket` would still be applied.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        !self.disposed && ticket == self.ticket && self.is_submitting()
    }

    fn accepts(&self, ticket: Ticket) -> bool {
        let ok = self.is_current(ticket);
        if !ok {
            tracing::debug!(ticket, current = self.ticket, "stale submission outcome dropped");
        }
        ok
    }

    pub fn succeed(&mut self, ticket: Ticket, data: JsonValue, response: JsonValue, now: Instant) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.reset_at = self.auto_reset.map(|d| now + d);
        self.transition(SubmissionState::Success { data, response });
        true
    }

    pub fn fail(&mut self, ticket: Ticket, message: impl Into<String>, field_errors: FieldErrors) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.transition(SubmissionState::Error {
            message: message.into(),
            field_errors,
        });
        true
    }

    /// Explicit reset from any state. Invalidates the in-flight ticket.
    pub fn reset(&mut self) {
        self.ticket += 1;
        self.reset_at = None;
        if self.state != SubmissionState::Idle {
            self.transition(SubmissionState::Idle);
        }
    }

    /// Fire the auto-reset once its deadline has passed. Returns true when
    /// the state changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.reset_at {
            Some(at) if now >= at => {
                self.reset_at = None;
                if matches!(self.state, SubmissionState::Success { .. }) {
                    self.transition(SubmissionState::Idle);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    pub fn dispose(&mut self) {
        self.ticket += 1;
        self.reset_at = None;
        self.disposed = true;
    }

    fn transition(&mut self, next: SubmissionState) {
        tracing::debug!(from = self.state.label(), to = next.label(), "submission transition");
        self.state = next;
    }
}
