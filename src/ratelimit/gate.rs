//! Process-wide gate for global rate limits.
//!
//! States:
//! - **Open**: requests proceed.
//! - **Closed**: requests suspend, either until `open()` or until a deadline passes.
//! - **Disposed**: terminal. Behaves as permanently open for waiters, who are released with
//!   [`RestError::Disposed`] instead of proceeding.
//!
//! Closing a closed gate or opening an open one is a no-op, except that a timed close extends
//! to the later deadline.
use crate::error::RestError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Closed { until: Option<Instant> },
    Disposed,
}

#[derive(Debug)]
pub struct GlobalGate {
    state: watch::Sender<GateState>,
    disposed: AtomicBool,
}

impl Default for GlobalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalGate {
    /// A new gate, open.
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self { state, disposed: AtomicBool::new(false) }
    }

    /// True when requests would pass without waiting.
    pub fn is_open(&self) -> bool {
        match *self.state.borrow() {
            GateState::Open | GateState::Disposed => true,
            GateState::Closed { until: Some(until) } => Instant::now() >= until,
            GateState::Closed { until: None } => false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// When a timed close ends, if one is active.
    pub fn reopens_at(&self) -> Option<Instant> {
        match *self.state.borrow() {
            GateState::Closed { until } => until,
            _ => None,
        }
    }

    /// Close until [`GlobalGate::open`] is called.
    pub fn close(&self) {
        self.state.send_if_modified(|state| match *state {
            GateState::Open => {
                *state = GateState::Closed { until: None };
                true
            }
            _ => false,
        });
    }

    /// Close until `deadline`, after which the gate reopens on its own.
    pub fn close_until(&self, deadline: Instant) {
        self.state.send_if_modified(|state| match *state {
            GateState::Open => {
                *state = GateState::Closed { until: Some(deadline) };
                true
            }
            GateState::Closed { until: Some(current) } if deadline > current => {
                *state = GateState::Closed { until: Some(deadline) };
                true
            }
            _ => false,
        });
    }

    /// Open the gate and release every waiter.
    pub fn open(&self) {
        self.state.send_if_modified(|state| match *state {
            GateState::Closed { .. } => {
                *state = GateState::Open;
                true
            }
            _ => false,
        });
    }

    /// Open permanently and fail every current and future waiter with `Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.state.send_replace(GateState::Disposed);
    }

    /// Suspend until the gate is open.
    pub async fn wait_until_open(&self) -> Result<(), RestError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                GateState::Open => return Ok(()),
                GateState::Disposed => return Err(RestError::Disposed),
                GateState::Closed { until: Some(until) } => {
                    if Instant::now() >= until {
                        self.expire(until);
                        continue;
                    }
                    tokio::select! {
                        _ = sleep_until(until) => self.expire(until),
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                GateState::Closed { until: None } => {
                    if rx.changed().await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Resolves once the gate has been disposed.
    pub async fn disposed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() == GateState::Disposed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn expire(&self, until: Instant) {
        self.state.send_if_modified(|state| {
            if *state == (GateState::Closed { until: Some(until) }) {
                *state = GateState::Open;
                true
            } else {
                false
            }
        });
    }
}
