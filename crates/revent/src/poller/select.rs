//! `SelectPoller` — the portable fallback, available on any unix.
//!
//! Descriptors are partitioned into three candidate sets (readable,
//! writable, error); register/modify/unregister are set-membership
//! edits, and `wait` runs one `select(2)` sweep, reconstructing the
//! flag mapping from which sets each descriptor fired in.
//!
//! Limits of the model: `select` caps descriptors at `FD_SETSIZE`
//! (rejected at `register`), and its third set rarely fires — closed
//! peers usually surface as readable EOF instead. That is the price of
//! universality; the native backends report failure bits directly.

use revent_core::error::{ReactorError, Result};
use revent_core::events::EventSet;

use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;

use super::{last_errno, merge_ready, Poller};

#[derive(Default)]
pub struct SelectPoller {
    read_fds: HashSet<RawFd>,
    write_fds: HashSet<RawFd>,
    error_fds: HashSet<RawFd>,
    /// Registration bookkeeping for the contract errors.
    active: HashMap<RawFd, EventSet>,
}

impl SelectPoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn enroll(&mut self, fd: RawFd, events: EventSet) {
        if events.is_readable() {
            self.read_fds.insert(fd);
        }
        if events.is_writable() {
            self.write_fds.insert(fd);
        }
        if events.is_error() {
            self.error_fds.insert(fd);
        }
    }

    fn withdraw(&mut self, fd: RawFd) {
        self.read_fds.remove(&fd);
        self.write_fds.remove(&fd);
        self.error_fds.remove(&fd);
    }
}

impl Poller for SelectPoller {
    fn register(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            // select cannot represent descriptors past FD_SETSIZE
            return Err(ReactorError::Os(libc::EINVAL));
        }
        if self.active.contains_key(&fd) {
            return Err(ReactorError::AlreadyWatched(fd));
        }
        self.enroll(fd, events);
        self.active.insert(fd, events);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: EventSet) -> Result<()> {
        if !self.active.contains_key(&fd) {
            return Err(ReactorError::NotWatched(fd));
        }
        self.withdraw(fd);
        self.enroll(fd, events);
        self.active.insert(fd, events);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        if self.active.remove(&fd).is_none() {
            return Err(ReactorError::NotWatched(fd));
        }
        self.withdraw(fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<(RawFd, EventSet)>) -> Result<usize> {
        ready.clear();

        loop {
            // select clobbers its sets and (on Linux) the timeout, so
            // everything is rebuilt per attempt
            let mut rset: libc::fd_set = unsafe { std::mem::zeroed() };
            let mut wset: libc::fd_set = unsafe { std::mem::zeroed() };
            let mut eset: libc::fd_set = unsafe { std::mem::zeroed() };
            unsafe {
                libc::FD_ZERO(&mut rset);
                libc::FD_ZERO(&mut wset);
                libc::FD_ZERO(&mut eset);
            }

            let mut nfds: libc::c_int = 0;
            for &fd in &self.read_fds {
                unsafe { libc::FD_SET(fd, &mut rset) };
                nfds = nfds.max(fd + 1);
            }
            for &fd in &self.write_fds {
                unsafe { libc::FD_SET(fd, &mut wset) };
                nfds = nfds.max(fd + 1);
            }
            for &fd in &self.error_fds {
                unsafe { libc::FD_SET(fd, &mut eset) };
                nfds = nfds.max(fd + 1);
            }

            let mut tv_storage;
            let tv_ptr: *mut libc::timeval = if timeout_ms < 0 {
                std::ptr::null_mut()
            } else {
                tv_storage = libc::timeval {
                    tv_sec: (timeout_ms / 1000) as libc::time_t,
                    tv_usec: ((timeout_ms % 1000) as libc::suseconds_t) * 1000,
                };
                &mut tv_storage
            };

            let rc = unsafe { libc::select(nfds, &mut rset, &mut wset, &mut eset, tv_ptr) };
            if rc < 0 {
                let err = last_errno();
                if err == libc::EINTR {
                    continue;
                }
                return Err(ReactorError::Os(err));
            }

            for &fd in &self.read_fds {
                if unsafe { libc::FD_ISSET(fd, &mut rset) } {
                    merge_ready(ready, fd, EventSet::READABLE);
                }
            }
            for &fd in &self.write_fds {
                if unsafe { libc::FD_ISSET(fd, &mut wset) } {
                    merge_ready(ready, fd, EventSet::WRITABLE);
                }
            }
            for &fd in &self.error_fds {
                if unsafe { libc::FD_ISSET(fd, &mut eset) } {
                    merge_ready(ready, fd, EventSet::ERR);
                }
            }
            return Ok(ready.len());
        }
    }

    fn close(&mut self) {
        // no kernel resource to release; forget the candidate sets
        self.read_fds.clear();
        self.write_fds.clear();
        self.error_fds.clear();
        self.active.clear();
    }

    fn name(&self) -> &'static str {
        "select"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn close_fd(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_register_contract() {
        let mut poller = SelectPoller::new();
        let (r, w) = pipe_pair();

        poller.register(r, EventSet::READABLE).unwrap();
        assert_eq!(
            poller.register(r, EventSet::READABLE),
            Err(ReactorError::AlreadyWatched(r))
        );
        assert_eq!(
            poller.modify(w, EventSet::WRITABLE),
            Err(ReactorError::NotWatched(w))
        );
        assert_eq!(poller.unregister(w), Err(ReactorError::NotWatched(w)));
        poller.unregister(r).unwrap();

        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn test_rejects_fd_past_setsize() {
        let mut poller = SelectPoller::new();
        let huge = libc::FD_SETSIZE as RawFd + 5;
        assert_eq!(
            poller.register(huge, EventSet::READABLE),
            Err(ReactorError::Os(libc::EINVAL))
        );
    }

    #[test]
    fn test_candidate_sets_follow_flags() {
        let mut poller = SelectPoller::new();
        let (r, w) = pipe_pair();

        poller
            .register(r, EventSet::READABLE | EventSet::ERROR)
            .unwrap();
        assert!(poller.read_fds.contains(&r));
        assert!(!poller.write_fds.contains(&r));
        assert!(poller.error_fds.contains(&r));

        poller.modify(r, EventSet::WRITABLE | EventSet::ERROR).unwrap();
        assert!(!poller.read_fds.contains(&r));
        assert!(poller.write_fds.contains(&r));

        poller.unregister(r).unwrap();
        assert!(poller.write_fds.is_empty());
        assert!(poller.error_fds.is_empty());

        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn test_wait_reconstructs_flags() {
        let mut poller = SelectPoller::new();
        let (r, w) = pipe_pair();
        poller
            .register(r, EventSet::READABLE | EventSet::ERROR)
            .unwrap();
        poller
            .register(w, EventSet::WRITABLE | EventSet::ERROR)
            .unwrap();

        let n = unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);

        let mut ready = Vec::new();
        assert_eq!(poller.wait(100, &mut ready).unwrap(), 2);
        ready.sort_by_key(|(fd, _)| *fd);
        assert_eq!(ready[0], (r, EventSet::READABLE));
        assert_eq!(ready[1], (w, EventSet::WRITABLE));

        close_fd(r);
        close_fd(w);
    }
}
