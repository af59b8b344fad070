//! Revent Echo Server
//!
//! Single-threaded TCP echo server driven entirely by the revent
//! reactor: one listener handler accepting connections, one handler per
//! connection buffering outbound bytes and toggling write interest, and
//! a periodic stats timer.
//!
//! Usage:
//!     cargo run --release -p revent-echo [port]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999
//!
//!     # a few concurrent clients:
//!     for i in $(seq 1 50); do echo "ping $i" | nc -q0 localhost 9999 & done

use revent::{EventHandler, EventSet, HandlerRef, Reactor};
use revent_core::{rdebug, rerror, rinfo, rwarn};

use std::cell::RefCell;
use std::net::TcpListener;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

const BUF_SIZE: usize = 4096;
const STATS_INTERVAL: Duration = Duration::from_secs(10);

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn would_block(err: i32) -> bool {
    err == libc::EAGAIN || err == libc::EWOULDBLOCK
}

fn set_nonblocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

// ── Per-connection handler ───────────────────────────────────────────

struct EchoConn {
    fd: RawFd,
    reactor: Weak<Reactor>,
    /// Outbound bytes the kernel would not take yet.
    wbuf: Vec<u8>,
}

impl EchoConn {
    fn reactor(&self) -> Option<Rc<Reactor>> {
        self.reactor.upgrade()
    }

    fn close(&self) {
        if let Some(reactor) = self.reactor() {
            rdebug!("conn fd {}: closing", self.fd);
            reactor.defer_close(self.fd);
        }
    }

    /// Push buffered bytes to the kernel. True once the buffer drained.
    fn flush(&mut self) -> std::result::Result<bool, i32> {
        while !self.wbuf.is_empty() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    self.wbuf.as_ptr() as *const libc::c_void,
                    self.wbuf.len(),
                )
            };
            if n > 0 {
                self.wbuf.drain(..n as usize);
                continue;
            }
            let err = errno();
            if would_block(err) {
                return Ok(false);
            }
            if err == libc::EINTR {
                continue;
            }
            return Err(err);
        }
        Ok(true)
    }

    /// Keep read interest, arm write interest only while data is queued.
    fn rearm(&self, want_write: bool) {
        let Some(reactor) = self.reactor() else { return };
        let events = if want_write {
            EventSet::READABLE | EventSet::WRITABLE
        } else {
            EventSet::READABLE
        };
        if let Err(e) = reactor.update_handler(self.fd, events) {
            rwarn!("conn fd {}: rearm failed: {}", self.fd, e);
            self.close();
        }
    }
}

impl EventHandler for EchoConn {
    fn on_readable(&mut self) {
        let mut buf = [0u8; BUF_SIZE];
        loop {
            let n = unsafe {
                libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, BUF_SIZE)
            };
            if n > 0 {
                self.wbuf.extend_from_slice(&buf[..n as usize]);
            } else if n == 0 {
                // peer closed
                self.close();
                return;
            } else {
                let err = errno();
                if would_block(err) {
                    break;
                }
                if err == libc::EINTR {
                    continue;
                }
                rwarn!("conn fd {}: read failed: errno {}", self.fd, err);
                self.close();
                return;
            }
        }

        match self.flush() {
            Ok(drained) => self.rearm(!drained),
            Err(err) => {
                rwarn!("conn fd {}: write failed: errno {}", self.fd, err);
                self.close();
            }
        }
    }

    fn on_writable(&mut self) {
        match self.flush() {
            Ok(drained) => self.rearm(!drained),
            Err(err) => {
                rwarn!("conn fd {}: write failed: errno {}", self.fd, err);
                self.close();
            }
        }
    }

    fn on_error(&mut self) {
        rdebug!("conn fd {}: hangup/error", self.fd);
        self.close();
    }
}

// ── Listener handler ─────────────────────────────────────────────────

struct EchoListener {
    fd: RawFd,
    reactor: Weak<Reactor>,
    accepted: u64,
}

impl EventHandler for EchoListener {
    fn on_readable(&mut self) {
        loop {
            let fd = unsafe { libc::accept(self.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            if fd < 0 {
                let err = errno();
                if would_block(err) {
                    break;
                }
                if err == libc::EINTR {
                    continue;
                }
                rwarn!("accept failed: errno {}", err);
                break;
            }

            let Some(reactor) = self.reactor.upgrade() else {
                unsafe {
                    libc::close(fd);
                }
                return;
            };

            set_nonblocking(fd);
            let conn: HandlerRef = Rc::new(RefCell::new(EchoConn {
                fd,
                reactor: self.reactor.clone(),
                wbuf: Vec::new(),
            }));
            match reactor.add_handler(fd, conn, EventSet::READABLE) {
                Ok(()) => {
                    self.accepted += 1;
                    rdebug!("accepted conn fd {} (#{})", fd, self.accepted);
                }
                Err(e) => {
                    rwarn!("register conn fd {}: {}", fd, e);
                    unsafe {
                        libc::close(fd);
                    }
                }
            }
        }
    }

    fn on_error(&mut self) {
        rerror!("listener fd {} errored, shutting down", self.fd);
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.request_stop();
        }
    }
}

// ── Stats timer ──────────────────────────────────────────────────────

fn schedule_stats_tick(reactor: &Rc<Reactor>) {
    let weak = Rc::downgrade(reactor);
    reactor.schedule(STATS_INTERVAL, move || {
        if let Some(reactor) = weak.upgrade() {
            let s = reactor.stats();
            rinfo!(
                "stats: {} iterations, {} events, {} timers, {} faults, {} watched",
                s.iterations,
                s.events_dispatched,
                s.timers_fired,
                s.callback_faults,
                reactor.watched_sockets().len()
            );
            schedule_stats_tick(&reactor);
        }
    });
}

fn main() {
    revent_core::rprint::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9999);

    let listener = TcpListener::bind(("0.0.0.0", port)).expect("revent-echo: bind failed");
    listener
        .set_nonblocking(true)
        .expect("revent-echo: set_nonblocking failed");
    let fd = listener.into_raw_fd();

    let reactor = Rc::new(Reactor::new());
    let handler: HandlerRef = Rc::new(RefCell::new(EchoListener {
        fd,
        reactor: Rc::downgrade(&reactor),
        accepted: 0,
    }));
    reactor
        .add_handler(fd, handler, EventSet::READABLE)
        .expect("revent-echo: register listener failed");

    schedule_stats_tick(&reactor);
    rinfo!("revent-echo: listening on port {}", port);
    reactor.run();
    rinfo!("revent-echo: stopped");
}
