//! Readiness event flag set.
//!
//! `EventSet` is a bitmask of the conditions a descriptor can be watched
//! for or observed in: readable, writable, and the error composite. The
//! bit values are the epoll constants, so the preferred backend translates
//! registrations and observations by identity; other backends map their
//! native notions onto these bits.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A set of readiness events, stored as an epoll-compatible bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventSet(u32);

impl EventSet {
    /// Empty set.
    pub const NONE: EventSet = EventSet(0);

    /// Descriptor has data to read (EPOLLIN).
    pub const READABLE: EventSet = EventSet(0x001);

    /// Descriptor can accept writes (EPOLLOUT).
    pub const WRITABLE: EventSet = EventSet(0x004);

    /// Error condition on the descriptor (EPOLLERR).
    pub const ERR: EventSet = EventSet(0x008);

    /// Peer hung up (EPOLLHUP).
    pub const HUP: EventSet = EventSet(0x010);

    /// Peer half-closed its write side (EPOLLRDHUP).
    pub const RDHUP: EventSet = EventSet(0x2000);

    /// The failure composite: error, hangup, or half-close.
    ///
    /// Every registration implicitly includes this set — the reactor ORs
    /// it in before handing flags to a backend, so handlers are always
    /// told about a broken descriptor no matter what they asked to watch.
    pub const ERROR: EventSet = EventSet(0x008 | 0x010 | 0x2000);

    /// Build a set from a raw bitmask.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        EventSet(bits)
    }

    /// The raw bitmask.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is present in `self`.
    #[inline]
    pub const fn contains(self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share any bit.
    #[inline]
    pub const fn intersects(self, other: EventSet) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.intersects(EventSet::READABLE)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.intersects(EventSet::WRITABLE)
    }

    /// True if any bit of the failure composite is set.
    #[inline]
    pub const fn is_error(self) -> bool {
        self.intersects(EventSet::ERROR)
    }
}

impl BitOr for EventSet {
    type Output = EventSet;

    #[inline]
    fn bitor(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventSet {
    #[inline]
    fn bitor_assign(&mut self, rhs: EventSet) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventSet {
    type Output = EventSet;

    #[inline]
    fn bitand(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(EventSet, &str)] = &[
            (EventSet::READABLE, "READABLE"),
            (EventSet::WRITABLE, "WRITABLE"),
            (EventSet::ERR, "ERR"),
            (EventSet::HUP, "HUP"),
            (EventSet::RDHUP, "RDHUP"),
        ];

        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        let unknown = self.0 & !(EventSet::READABLE.0
            | EventSet::WRITABLE.0
            | EventSet::ERROR.0);
        if unknown != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_composite() {
        assert!(EventSet::ERROR.contains(EventSet::ERR));
        assert!(EventSet::ERROR.contains(EventSet::HUP));
        assert!(EventSet::ERROR.contains(EventSet::RDHUP));
        assert!(!EventSet::ERROR.intersects(EventSet::READABLE));
        assert!(!EventSet::ERROR.intersects(EventSet::WRITABLE));
    }

    #[test]
    fn test_bit_ops() {
        let both = EventSet::READABLE | EventSet::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!both.is_error());
        assert_eq!(both & EventSet::READABLE, EventSet::READABLE);

        let mut set = EventSet::NONE;
        set |= EventSet::WRITABLE;
        assert!(set.is_writable());
        assert!(!set.is_readable());
    }

    #[test]
    fn test_roundtrip_bits() {
        let set = EventSet::READABLE | EventSet::ERROR;
        assert_eq!(EventSet::from_bits(set.bits()), set);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", EventSet::NONE), "NONE");
        assert_eq!(format!("{:?}", EventSet::READABLE), "READABLE");
        assert_eq!(
            format!("{:?}", EventSet::READABLE | EventSet::WRITABLE),
            "READABLE|WRITABLE"
        );
    }
}
