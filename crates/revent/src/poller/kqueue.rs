//! `KqueuePoller` — backend for the BSD family.
//!
//! kqueue has no single "read and write" registration primitive: each
//! direction is its own kernel filter, armed with one control call per
//! filter (some kernels reject batched changelists outright).
//!
//! Quirk: a registration that asks for neither direction still arms the
//! read filter. kqueue only reports `EV_ERROR`/`EV_EOF` through an armed
//! filter, so an error-only watch would otherwise never hear anything.
//!
//! There is no native modify either; `modify` composes delete-then-add
//! inside one call, which cannot lose events because changes are applied
//! atomically per control call.

use revent_core::error::{ReactorError, Result};
use revent_core::events::EventSet;

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use super::{last_errno, merge_ready, Poller};

pub struct KqueuePoller {
    kq: RawFd,
    /// Flags each descriptor was registered with; kqueue itself has no
    /// queryable registration state.
    active: HashMap<RawFd, EventSet>,
    events: Vec<libc::kevent>,
}

impl KqueuePoller {
    /// Create the kernel event queue.
    pub fn new(capacity: usize) -> Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(ReactorError::PollerSetup(last_errno()));
        }
        unsafe {
            libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
        }
        let empty: libc::kevent = unsafe { std::mem::zeroed() };
        Ok(Self {
            kq,
            active: HashMap::new(),
            events: vec![empty; capacity.max(1)],
        })
    }

    /// Arm or disarm the kernel filters for `events`, one control call
    /// per direction.
    fn apply(&self, fd: RawFd, events: EventSet, add: bool) -> Result<()> {
        let mut filters: Vec<i16> = Vec::with_capacity(2);
        if events.is_writable() {
            filters.push(libc::EVFILT_WRITE as i16);
        }
        if events.is_readable() || filters.is_empty() {
            // direction-less watch: arm the read side (see module docs)
            filters.push(libc::EVFILT_READ as i16);
        }

        let action = if add { libc::EV_ADD } else { libc::EV_DELETE };
        for filt in filters {
            let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
            kev.ident = fd as libc::uintptr_t;
            kev.filter = filt as _;
            kev.flags = action as _;
            let rc = unsafe {
                libc::kevent(self.kq, &kev, 1, std::ptr::null_mut(), 0, std::ptr::null())
            };
            if rc < 0 {
                let err = last_errno();
                // the kernel drops filters on its own when an fd closes;
                // a missing filter on delete is not a failure
                if add || err != libc::ENOENT {
                    return Err(ReactorError::Os(err));
                }
            }
        }
        Ok(())
    }
}

impl Poller for KqueuePoller {
    fn register(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        if self.active.contains_key(&fd) {
            return Err(ReactorError::AlreadyWatched(fd));
        }
        self.apply(fd, events, true)?;
        self.active.insert(fd, events);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        let old = match self.active.get(&fd) {
            Some(old) => *old,
            None => return Err(ReactorError::NotWatched(fd)),
        };
        self.apply(fd, old, false)?;
        self.apply(fd, events, true)?;
        self.active.insert(fd, events);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        let old = match self.active.remove(&fd) {
            Some(old) => old,
            None => return Err(ReactorError::NotWatched(fd)),
        };
        self.apply(fd, old, false)
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<(RawFd, EventSet)>) -> Result<usize> {
        ready.clear();

        let ts_storage;
        let ts_ptr: *const libc::timespec = if timeout_ms < 0 {
            std::ptr::null()
        } else {
            ts_storage = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
            };
            &ts_storage
        };

        let n = loop {
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    ts_ptr,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = last_errno();
            if err != libc::EINTR {
                return Err(ReactorError::Os(err));
            }
            // interrupted by a signal: retry
        };

        // one kevent per filter: coalesce back to per-descriptor flags
        for i in 0..n {
            let kev = self.events[i];
            let fd = kev.ident as RawFd;
            let mut flags = EventSet::NONE;
            if kev.filter == libc::EVFILT_READ as _ {
                flags |= EventSet::READABLE;
            }
            if kev.filter == libc::EVFILT_WRITE as _ {
                flags |= EventSet::WRITABLE;
            }
            if kev.flags & (libc::EV_ERROR as _) != 0 {
                flags |= EventSet::ERR;
            }
            if kev.flags & (libc::EV_EOF as _) != 0 {
                flags |= EventSet::RDHUP;
            }
            merge_ready(ready, fd, flags);
        }
        Ok(ready.len())
    }

    fn close(&mut self) {
        if self.kq >= 0 {
            unsafe {
                libc::close(self.kq);
            }
            self.kq = -1;
        }
        self.active.clear();
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        self.close();
    }
}
