//! Per-request phase tracking.

use std::fmt;
use std::time::Instant;

/// Where a proxied request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Authenticating,
    Authorized,
    Rejected,
    Forwarding,
    Responded,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPhase::Received => "received",
            RequestPhase::Authenticating => "authenticating",
            RequestPhase::Authorized => "authorized",
            RequestPhase::Rejected => "rejected",
            RequestPhase::Forwarding => "forwarding",
            RequestPhase::Responded => "responded",
        }
    }

    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Received, Authenticating)
                | (Received, Rejected)
                | (Authenticating, Authorized)
                | (Authenticating, Rejected)
                | (Authorized, Forwarding)
                | (Forwarding, Responded)
                | (Forwarding, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Rejected | RequestPhase::Responded)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request through its phases.
#[derive(Debug)]
pub struct RequestLifecycle {
    correlation_id: String,
    route: Option<String>,
    phase: RequestPhase,
    started: Instant,
}

impl RequestLifecycle {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            route: None,
            phase: RequestPhase::Received,
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Move to `next`. An illegal transition is a bug: it asserts in debug builds and is
    /// logged and ignored otherwise.
    pub fn advance(&mut self, next: RequestPhase) {
        if !self.phase.can_advance_to(next) {
            tracing::error!(
                correlation_id = %self.correlation_id,
                from = %self.phase,
                to = %next,
                "Illegal request phase transition"
            );
            debug_assert!(false, "illegal transition {} -> {}", self.phase, next);
            return;
        }
        tracing::trace!(
            correlation_id = %self.correlation_id,
            route = self.route.as_deref().unwrap_or("-"),
            phase = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Request phase"
        );
        self.phase = next;
    }
}
