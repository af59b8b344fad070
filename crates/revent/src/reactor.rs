//! # Reactor — the dispatch loop
//!
//! One reactor drives one thread. Each iteration:
//! 1. Runs every due timer (so a timer set for "now" never waits on I/O)
//! 2. Closes descriptors queued for deferred close
//! 3. Waits on the poller, up to the reconciled timeout
//! 4. Dispatches readiness to handlers, error flags first
//!
//! Every handler and timer callback crosses one isolation boundary: a
//! panic is captured, routed to the fault hook, and the loop moves on to
//! the next descriptor. Aborts are not catchable and still end the
//! process.
//!
//! Single-threaded cooperative model: no locks, interior mutability
//! throughout, so callbacks may re-enter the control API (register,
//! remove, schedule, cancel, request_stop) mid-dispatch.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use revent_core::{rdebug, rerror, rtrace};
use revent_core::{EventHandler, EventSet, HandlerRef, ReactorError, Result};

use crate::config::ReactorConfig;
use crate::poller::{create_poller, Poller};
use crate::timer::{TimerHandle, TimerQueue};

/// A callback failure captured at the isolation boundary.
pub struct CallbackFault<'a> {
    /// What was being dispatched: "on_readable", "on_writable",
    /// "on_error", or "timer".
    pub context: &'static str,
    /// Descriptor involved, if any.
    pub fd: Option<RawFd>,
    /// The raw panic payload.
    pub payload: &'a (dyn std::any::Any + Send),
}

impl CallbackFault<'_> {
    /// Best-effort message extracted from the payload.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s
        } else {
            "non-string panic payload"
        }
    }
}

type FaultHook = Box<dyn Fn(&CallbackFault<'_>)>;

fn default_fault_hook(fault: &CallbackFault<'_>) {
    match fault.fd {
        Some(fd) => rerror!(
            "callback fault in {} (fd {}): {}",
            fault.context,
            fd,
            fault.message()
        ),
        None => rerror!("callback fault in {}: {}", fault.context, fault.message()),
    }
}

struct RegistryEntry {
    handler: HandlerRef,
    events: EventSet,
}

/// Snapshot of loop activity counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactorStats {
    pub iterations: u64,
    pub events_dispatched: u64,
    pub timers_fired: u64,
    pub callback_faults: u64,
}

#[derive(Default)]
struct StatsCells {
    iterations: Cell<u64>,
    events_dispatched: Cell<u64>,
    timers_fired: Cell<u64>,
    callback_faults: Cell<u64>,
}

impl StatsCells {
    fn snapshot(&self) -> ReactorStats {
        ReactorStats {
            iterations: self.iterations.get(),
            events_dispatched: self.events_dispatched.get(),
            timers_fired: self.timers_fired.get(),
            callback_faults: self.callback_faults.get(),
        }
    }

    fn reset(&self) {
        self.iterations.set(0);
        self.events_dispatched.set(0);
        self.timers_fired.set(0);
        self.callback_faults.set(0);
    }
}

#[inline]
fn bump(cell: &Cell<u64>) {
    cell.set(cell.get() + 1);
}

/// Milliseconds for a poll timeout, rounded up so a timer is never
/// polled past its deadline by truncation.
fn duration_to_ms_ceil(d: Duration) -> i32 {
    let mut ms = d.as_millis();
    if d.as_nanos() > ms * 1_000_000 {
        ms += 1;
    }
    ms.min(i32::MAX as u128) as i32
}

/// The event loop: registry + timer queue + poller backend.
pub struct Reactor {
    config: ReactorConfig,
    poller: RefCell<Box<dyn Poller>>,
    registry: RefCell<HashMap<RawFd, RegistryEntry>>,
    timers: RefCell<TimerQueue>,
    /// Descriptors to close at the fixed point of the next iteration.
    to_close: RefCell<Vec<RawFd>>,
    /// Reused readiness batch buffer.
    ready_buf: RefCell<Vec<(RawFd, EventSet)>>,
    idle_timeout: Cell<Option<Duration>>,
    running: Cell<bool>,
    stopped: Cell<bool>,
    stats: StatsCells,
    fault_hook: RefCell<FaultHook>,
}

impl Reactor {
    /// Construct with environment-derived configuration.
    pub fn new() -> Self {
        Self::with_config(ReactorConfig::from_env())
    }

    pub fn with_config(config: ReactorConfig) -> Self {
        let poller = create_poller(config.backend, config.max_events);
        rdebug!("reactor: {} backend, batch {}", poller.name(), config.max_events);
        Self {
            idle_timeout: Cell::new(config.idle_timeout),
            poller: RefCell::new(poller),
            registry: RefCell::new(HashMap::new()),
            timers: RefCell::new(TimerQueue::new()),
            to_close: RefCell::new(Vec::new()),
            ready_buf: RefCell::new(Vec::new()),
            running: Cell::new(false),
            stopped: Cell::new(false),
            stats: StatsCells::default(),
            fault_hook: RefCell::new(Box::new(default_fault_hook)),
            config,
        }
    }

    /// Thread-local default instance, created on first use.
    ///
    /// Convenience only — collaborators should normally take a reactor
    /// by parameter. One reactor per thread, never shared across threads.
    pub fn current() -> Rc<Reactor> {
        thread_local! {
            static CURRENT: RefCell<Option<Rc<Reactor>>> = RefCell::new(None);
        }
        CURRENT.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| Rc::new(Reactor::new()))
                .clone()
        })
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register `handler` to receive `events` for `fd`.
    ///
    /// The failure composite is always ORed in: handlers hear about a
    /// broken descriptor no matter what they asked to watch.
    pub fn add_handler(&self, fd: RawFd, handler: HandlerRef, events: EventSet) -> Result<()> {
        if self.registry.borrow().contains_key(&fd) {
            return Err(ReactorError::AlreadyWatched(fd));
        }
        let events = events | EventSet::ERROR;
        self.poller.borrow_mut().register(fd, events)?;
        self.registry
            .borrow_mut()
            .insert(fd, RegistryEntry { handler, events });
        rtrace!("watch fd {} for {:?}", fd, events);
        Ok(())
    }

    /// Change the events watched for `fd` (failure composite included).
    pub fn update_handler(&self, fd: RawFd, events: EventSet) -> Result<()> {
        if !self.registry.borrow().contains_key(&fd) {
            return Err(ReactorError::NotWatched(fd));
        }
        let events = events | EventSet::ERROR;
        self.poller.borrow_mut().modify(fd, events)?;
        if let Some(entry) = self.registry.borrow_mut().get_mut(&fd) {
            entry.events = events;
        }
        Ok(())
    }

    /// Stop watching `fd`.
    ///
    /// A backend-level "not watched" is only debug-logged: removal must
    /// stay safe after the OS has already invalidated the descriptor.
    pub fn remove_handler(&self, fd: RawFd) -> Result<()> {
        if self.registry.borrow_mut().remove(&fd).is_none() {
            return Err(ReactorError::NotWatched(fd));
        }
        if let Err(e) = self.poller.borrow_mut().unregister(fd) {
            rdebug!("unregister fd {}: {}", fd, e);
        }
        Ok(())
    }

    /// Descriptors currently registered.
    pub fn watched_sockets(&self) -> Vec<RawFd> {
        self.registry.borrow().keys().copied().collect()
    }

    /// The flags `fd` is watched for, if registered.
    pub fn watched_events(&self, fd: RawFd) -> Option<EventSet> {
        self.registry.borrow().get(&fd).map(|e| e.events)
    }

    /// Queue `fd` to be closed at the fixed point of the next iteration
    /// (after callbacks, before the poll), so a close requested from a
    /// callback cannot race stale readiness in the same wait batch.
    pub fn defer_close(&self, fd: RawFd) {
        let mut pending = self.to_close.borrow_mut();
        if !pending.contains(&fd) {
            pending.push(fd);
        }
    }

    // ── Timers ───────────────────────────────────────────────────────

    /// Fire `callback` once, `delay` from now.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Fire `callback` once at an absolute deadline.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.timers
            .borrow_mut()
            .schedule_at(deadline, Box::new(callback))
    }

    /// Cancel a pending timer; `false` if it already fired or was
    /// already canceled (a no-op, not an error).
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.timers.borrow_mut().cancel(handle)
    }

    /// Poll timeout used when no timer is due sooner; `None` blocks
    /// indefinitely.
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        self.idle_timeout.set(timeout);
    }

    // ── Loop control ─────────────────────────────────────────────────

    /// Replace the fault hook invoked for every captured callback panic.
    pub fn set_fault_hook<F>(&self, hook: F)
    where
        F: Fn(&CallbackFault<'_>) + 'static,
    {
        *self.fault_hook.borrow_mut() = Box::new(hook);
    }

    pub fn stats(&self) -> ReactorStats {
        self.stats.snapshot()
    }

    /// Run iterations until a stop is requested.
    ///
    /// A stop requested while idle makes exactly the next `run()` return
    /// immediately; after a stop that ended a running loop, `run()`
    /// resumes as usual.
    pub fn run(&self) {
        if self.stopped.replace(false) {
            return;
        }
        self.running.set(true);
        while self.running.get() {
            if let Err(e) = self.run_once() {
                rerror!("reactor: poll failed: {}", e);
                break;
            }
        }
        self.running.set(false);
        self.stopped.set(false);
    }

    /// Exit the loop after the current iteration completes — never
    /// mid-dispatch, so in-flight callbacks finish cleanly.
    pub fn request_stop(&self) {
        self.running.set(false);
        self.stopped.set(true);
    }

    /// Return the reactor to its just-constructed state: no handlers,
    /// no timers, no deferred closes, counters zeroed, and a fresh
    /// kernel resource in place of the released one.
    pub fn reset(&self) {
        self.registry.borrow_mut().clear();
        self.timers.borrow_mut().clear();
        self.to_close.borrow_mut().clear();
        self.ready_buf.borrow_mut().clear();
        self.idle_timeout.set(self.config.idle_timeout);
        self.running.set(false);
        self.stopped.set(false);
        self.stats.reset();
        *self.fault_hook.borrow_mut() = Box::new(default_fault_hook);

        let mut poller = self.poller.borrow_mut();
        poller.close();
        *poller = create_poller(self.config.backend, self.config.max_events);
        rdebug!("reactor: reset, {} backend recreated", poller.name());
    }

    // ── One iteration ────────────────────────────────────────────────

    /// One wait/dispatch cycle. Public so collaborators can embed the
    /// reactor in their own outer loop.
    pub fn run_once(&self) -> Result<()> {
        bump(&self.stats.iterations);

        let timeout_ms = self.run_timers();
        self.process_deferred_closes();

        let mut ready = self.ready_buf.take();
        let result = self.poller.borrow_mut().wait(timeout_ms, &mut ready);
        if let Err(e) = result {
            self.ready_buf.replace(ready);
            return Err(e);
        }

        for &(fd, revents) in ready.iter() {
            // handler may have been removed between wait and dispatch;
            // stale readiness is an expected race, not an error
            let handler = match self.registry.borrow().get(&fd) {
                Some(entry) => entry.handler.clone(),
                None => {
                    rtrace!("stale event for fd {}", fd);
                    continue;
                }
            };
            bump(&self.stats.events_dispatched);

            // error beats read beats write: a handler is not asked to
            // use a descriptor the OS already flagged as broken
            if revents.is_error() {
                self.guard("on_error", Some(fd), || handler.borrow_mut().on_error());
            } else if revents.is_readable() {
                self.guard("on_readable", Some(fd), || handler.borrow_mut().on_readable());
            } else if revents.is_writable() {
                self.guard("on_writable", Some(fd), || handler.borrow_mut().on_writable());
            }
        }

        ready.clear();
        self.ready_buf.replace(ready);
        Ok(())
    }

    /// Drain due timers, then reconcile the idle timeout with the next
    /// deadline into the poll timeout.
    fn run_timers(&self) -> i32 {
        loop {
            // one pop per borrow: the callback may schedule or cancel
            let due = self.timers.borrow_mut().pop_due(Instant::now());
            match due {
                Some(callback) => {
                    bump(&self.stats.timers_fired);
                    self.guard("timer", None, callback);
                }
                None => break,
            }
        }
        self.next_poll_timeout(Instant::now())
    }

    /// min(idle timeout, time to earliest deadline), -1 to block.
    fn next_poll_timeout(&self, now: Instant) -> i32 {
        let idle_ms: i32 = match self.idle_timeout.get() {
            Some(t) => duration_to_ms_ceil(t),
            None => -1,
        };
        match self.timers.borrow().next_deadline() {
            Some(deadline) => {
                let until = duration_to_ms_ceil(deadline.saturating_duration_since(now));
                if idle_ms < 0 {
                    until
                } else {
                    idle_ms.min(until)
                }
            }
            None => idle_ms,
        }
    }

    fn process_deferred_closes(&self) {
        let pending = std::mem::take(&mut *self.to_close.borrow_mut());
        for fd in pending {
            if self.registry.borrow_mut().remove(&fd).is_some() {
                if let Err(e) = self.poller.borrow_mut().unregister(fd) {
                    rdebug!("deferred close: unregister fd {}: {}", fd, e);
                }
            }
            unsafe {
                libc::close(fd);
            }
            rtrace!("closed deferred fd {}", fd);
        }
    }

    /// The isolation boundary: every handler and timer callback runs
    /// here. Panics are captured and reported through the fault hook;
    /// the loop always continues.
    fn guard<F: FnOnce()>(&self, context: &'static str, fd: Option<RawFd>, f: F) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            bump(&self.stats.callback_faults);
            let fault = CallbackFault {
                context,
                fd,
                payload: payload.as_ref(),
            };
            let hook = self.fault_hook.borrow();
            // a panicking hook must not breach the boundary either
            if catch_unwind(AssertUnwindSafe(|| hook(&fault))).is_err() {
                rerror!("fault hook panicked while reporting {} fault", context);
            }
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}
