//! # revent
//!
//! A single-threaded, readiness-driven I/O event loop.
//!
//! One reactor drives one thread: the application registers descriptors
//! with handlers, schedules deadline timers, and calls [`Reactor::run`].
//! Each iteration runs due timers, closes deferred descriptors, asks the
//! OS which descriptors are ready, and dispatches handler callbacks —
//! isolating every callback so one failure never kills the loop.
//!
//! # Architecture
//!
//! ```text
//!                 Reactor (registry + timers + loop)
//!                           │
//!                           ▼
//!               ┌───────────────────────┐
//!               │      dyn Poller       │  ◄── uniform backend contract
//!               └───────────────────────┘
//!                           │
//!          ┌────────────────┼────────────────┐
//!          ▼                ▼                ▼
//!     EpollPoller     KqueuePoller     SelectPoller
//!      (Linux)         (BSD/mac)       (any unix)
//! ```
//!
//! The best backend for the platform is probed at construction, with
//! `select()` as the universal fallback.

pub mod config;
pub mod poller;
pub mod reactor;
pub mod timer;

// Re-exports
pub use config::ReactorConfig;
pub use poller::{create_poller, Poller, PollerType};
pub use reactor::{CallbackFault, Reactor, ReactorStats};
pub use timer::{TimerCallback, TimerHandle, TimerQueue};

// Core types, re-exported so most users need only this crate
pub use revent_core::{EventHandler, EventSet, HandlerRef, ReactorError, Result};
