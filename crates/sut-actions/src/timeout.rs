//! Shared timeout budget for postcondition verification
//!
//! A [`SharedDeadline`] carries a single duration that several verification
//! steps draw from. The clock starts on the first call to [`start`], so the
//! budget covers verification time only, not the work that precedes it.
//! Clones share the underlying clock, which lets a sequence hand the same
//! budget to every step.
//!
//! [`start`]: SharedDeadline::start

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// A timeout budget whose clock starts once and is shared across clones
#[derive(Clone, Debug)]
pub struct SharedDeadline {
    budget: Duration,
    started: Arc<OnceLock<Instant>>,
}

impl SharedDeadline {
    /// Create an unstarted budget of the given duration
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            started: Arc::new(OnceLock::new()),
        }
    }

    /// Start the clock, or return the instant it already started
    ///
    /// Only the first call across all clones has an effect.
    pub fn start(&self) -> Instant {
        *self.started.get_or_init(Instant::now)
    }

    /// The instant at which the budget runs out
    ///
    /// Starts the clock if no clone has started it yet.
    pub fn deadline(&self) -> Instant {
        self.start() + self.budget
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Whether any clone has started the clock
    pub fn is_started(&self) -> bool {
        self.started.get().is_some()
    }

    /// The total budget this deadline was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }
}
