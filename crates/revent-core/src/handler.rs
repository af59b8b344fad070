//! Handler capability trait for readiness dispatch.
//!
//! A handler is the application-side object tied to one watched
//! descriptor — typically a connection wrapper that owns the socket, its
//! buffers, and its protocol state. The reactor only knows the three
//! capabilities below; everything else about the object is the
//! application's business.

use std::cell::RefCell;
use std::rc::Rc;

/// Reacts to readiness events on one descriptor.
///
/// All methods take no arguments: the handler owns its descriptor and
/// queries/operates on it itself. Defaults are no-ops so implementors
/// only write the directions they actually watch.
///
/// The reactor never calls more than one method per descriptor per
/// iteration, and error notification always wins: a handler is not asked
/// to read or write a descriptor the OS has already flagged as broken.
pub trait EventHandler {
    /// The descriptor has data to read (or a pending accept).
    fn on_readable(&mut self) {}

    /// The descriptor can accept writes.
    fn on_writable(&mut self) {}

    /// The descriptor errored, hung up, or was half-closed.
    fn on_error(&mut self) {}
}

/// Shared handle to a handler.
///
/// The registry clones the `Rc`; the application keeps its own clone and
/// drives the handler's lifetime. The reactor never constructs or
/// destroys handlers. Single-threaded by design — `Rc`, not `Arc`.
pub type HandlerRef = Rc<RefCell<dyn EventHandler>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        reads: u32,
    }

    impl EventHandler for Probe {
        fn on_readable(&mut self) {
            self.reads += 1;
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let probe = Rc::new(RefCell::new(Probe { reads: 0 }));
        let shared: HandlerRef = probe.clone();
        shared.borrow_mut().on_writable();
        shared.borrow_mut().on_error();
        assert_eq!(probe.borrow().reads, 0);
    }

    #[test]
    fn test_implemented_capability_runs() {
        let probe = Rc::new(RefCell::new(Probe { reads: 0 }));
        let shared: HandlerRef = probe.clone();
        shared.borrow_mut().on_readable();
        shared.borrow_mut().on_readable();
        assert_eq!(probe.borrow().reads, 2);
    }
}
