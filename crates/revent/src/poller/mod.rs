//! Readiness poller abstraction.
//!
//! A `Poller` wraps exactly one OS notification facility behind a uniform
//! register/modify/unregister/wait contract. The reactor core talks only
//! to this trait; which implementation backs it is decided once, at
//! construction.
//!
//! # Implementors
//!
//! - `EpollPoller` (Linux, preferred): the reactor's event bits are the
//!   epoll bits, so flag translation is the identity function.
//! - `KqueuePoller` (BSD/macOS): one kernel filter per direction; see the
//!   module docs for the read-filter quirk.
//! - `SelectPoller` (any unix, universal fallback): three candidate sets
//!   and a `select(2)` sweep.

use revent_core::error::{ReactorError, Result};
use revent_core::events::EventSet;
use revent_core::rwarn;

use std::os::unix::io::RawFd;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollPoller;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))] {
        mod kqueue;
        pub use kqueue::KqueuePoller;
    }
}

mod select;
pub use select::SelectPoller;

/// Uniform contract over one OS readiness-notification facility.
///
/// **Contract:**
/// - `register` fails with `AlreadyWatched` for a descriptor the backend
///   already knows; `modify`/`unregister` fail with `NotWatched` for one
///   it does not.
/// - `wait` blocks up to `timeout_ms` (negative = indefinitely, zero =
///   non-blocking poll), retries interrupted waits transparently, and
///   fills `ready` with the observed (descriptor, flags) pairs.
/// - `close` releases the kernel resource and is idempotent; backends
///   also close on `Drop`.
pub trait Poller {
    /// Begin watching `fd` for `events`.
    fn register(&mut self, fd: RawFd, events: EventSet) -> Result<()>;

    /// Atomically replace the watched flags for a registered `fd`.
    fn modify(&mut self, fd: RawFd, events: EventSet) -> Result<()>;

    /// Stop watching `fd`.
    fn unregister(&mut self, fd: RawFd) -> Result<()>;

    /// Wait for readiness, up to `timeout_ms` milliseconds.
    ///
    /// Returns the number of ready descriptors written into `ready`
    /// (cleared first). One entry per descriptor, flags coalesced.
    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<(RawFd, EventSet)>) -> Result<usize>;

    /// Release the backend's kernel resource. Idempotent.
    fn close(&mut self);

    /// Backend name for logs and stats.
    fn name(&self) -> &'static str;
}

/// Selector for the poller implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerType {
    /// Edge-level kernel event queue (Linux).
    Epoll,
    /// Discrete kernel event queue (BSD family).
    Kqueue,
    /// Portable `select(2)` fallback.
    Select,
}

impl PollerType {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PollerType::Epoll => "epoll",
            PollerType::Kqueue => "kqueue",
            PollerType::Select => "select",
        }
    }

    /// The best backend this platform offers.
    pub fn native() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            PollerType::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            PollerType::Kqueue
        } else {
            PollerType::Select
        }
    }
}

/// Create the preferred poller, probing the kernel facility once.
///
/// If the native queue cannot be created (or was not built for this
/// platform), falls back to `select()` with a logged warning — the
/// portable backend is the universal last resort.
pub fn create_poller(preferred: PollerType, capacity: usize) -> Box<dyn Poller> {
    match preferred {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        PollerType::Epoll => match EpollPoller::new(capacity) {
            Ok(p) => return Box::new(p),
            Err(e) => rwarn!("epoll setup failed ({}), falling back to select", e),
        },
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        PollerType::Kqueue => match KqueuePoller::new(capacity) {
            Ok(p) => return Box::new(p),
            Err(e) => rwarn!("kqueue setup failed ({}), falling back to select", e),
        },
        PollerType::Select => {}
        other => rwarn!("{} backend not built for this platform, using select", other.name()),
    }
    Box::new(SelectPoller::new())
}

/// The calling thread's last errno.
#[inline]
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Fold `flags` for `fd` into `ready`, coalescing per-descriptor entries
/// (a backend may observe one descriptor through several native events).
pub(crate) fn merge_ready(ready: &mut Vec<(RawFd, EventSet)>, fd: RawFd, flags: EventSet) {
    match ready.iter_mut().find(|(f, _)| *f == fd) {
        Some(slot) => slot.1 |= flags,
        None => ready.push((fd, flags)),
    }
}

/// Map a kernel "no such watch" errno onto the contract error.
#[inline]
pub(crate) fn not_watched_errno(fd: RawFd, errno: i32) -> ReactorError {
    if errno == libc::ENOENT || errno == libc::EBADF {
        ReactorError::NotWatched(fd)
    } else {
        ReactorError::Os(errno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_backend_matches_platform() {
        let native = PollerType::native();
        if cfg!(any(target_os = "linux", target_os = "android")) {
            assert_eq!(native, PollerType::Epoll);
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            assert_eq!(native, PollerType::Kqueue);
        } else {
            assert_eq!(native, PollerType::Select);
        }
    }

    #[test]
    fn test_create_native_poller() {
        let mut poller = create_poller(PollerType::native(), 64);
        assert_eq!(poller.name(), PollerType::native().name());
        poller.close();
        poller.close(); // idempotent
    }

    #[test]
    fn test_create_select_poller() {
        let poller = create_poller(PollerType::Select, 64);
        assert_eq!(poller.name(), "select");
    }

    #[test]
    fn test_merge_ready_coalesces() {
        let mut ready = Vec::new();
        merge_ready(&mut ready, 3, EventSet::READABLE);
        merge_ready(&mut ready, 5, EventSet::WRITABLE);
        merge_ready(&mut ready, 3, EventSet::WRITABLE);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0], (3, EventSet::READABLE | EventSet::WRITABLE));
        assert_eq!(ready[1], (5, EventSet::WRITABLE));
    }
}
