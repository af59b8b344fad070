//! `EpollPoller` — preferred backend on Linux.
//!
//! The reactor's event bits are the epoll bits, so translation in both
//! directions is the identity function. Registration state lives in the
//! kernel: `EEXIST`/`ENOENT` from `epoll_ctl` map straight onto the
//! `AlreadyWatched`/`NotWatched` contract errors.

use revent_core::error::{ReactorError, Result};
use revent_core::events::EventSet;

use std::os::unix::io::RawFd;

use super::{last_errno, not_watched_errno, Poller};

pub struct EpollPoller {
    epfd: RawFd,
    /// Reused kernel event buffer; capacity bounds one wait batch.
    events: Vec<libc::epoll_event>,
}

impl EpollPoller {
    /// Create the kernel event queue.
    pub fn new(capacity: usize) -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(ReactorError::PollerSetup(last_errno()));
        }
        let empty = libc::epoll_event { events: 0, u64: 0 };
        Ok(Self {
            epfd,
            events: vec![empty; capacity.max(1)],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: EventSet) -> libc::c_int {
        let mut ev = libc::epoll_event {
            events: events.bits(),
            u64: fd as u64,
        };
        unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) }
    }
}

impl Poller for EpollPoller {
    fn register(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        if self.ctl(libc::EPOLL_CTL_ADD, fd, events) < 0 {
            return Err(match last_errno() {
                libc::EEXIST => ReactorError::AlreadyWatched(fd),
                e => ReactorError::Os(e),
            });
        }
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        if self.ctl(libc::EPOLL_CTL_MOD, fd, events) < 0 {
            return Err(not_watched_errno(fd, last_errno()));
        }
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        if self.ctl(libc::EPOLL_CTL_DEL, fd, EventSet::NONE) < 0 {
            return Err(not_watched_errno(fd, last_errno()));
        }
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<(RawFd, EventSet)>) -> Result<usize> {
        ready.clear();
        let n = loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    timeout_ms,
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

        for i in 0..n {
            let ev = self.events[i];
            ready.push((ev.u64 as RawFd, EventSet::from_bits(ev.events)));
        }
        Ok(n)
    }

    fn close(&mut self) {
        if self.epfd >= 0 {
            unsafe {
                libc::close(self.epfd);
            }
            self.epfd = -1;
        }
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        self.close();
    }
}
