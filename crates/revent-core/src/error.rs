//! Reactor error types.

use std::fmt;
use std::os::unix::io::RawFd;

#[derive(Debug, PartialEq, Eq)]
pub enum ReactorError {
    /// Descriptor is already registered with the backend.
    AlreadyWatched(RawFd),
    /// Descriptor is not registered with the backend.
    NotWatched(RawFd),
    /// The poller's kernel resource could not be created.
    PollerSetup(i32),
    /// OS error with errno.
    Os(i32),
}

impl ReactorError {
    /// Capture the calling thread's last OS error.
    pub fn last_os() -> Self {
        ReactorError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// True for the two registry-contract errors a caller can recover
    /// from by fixing its bookkeeping.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            ReactorError::AlreadyWatched(_) | ReactorError::NotWatched(_)
        )
    }
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyWatched(fd) => write!(f, "fd {} already watched", fd),
            Self::NotWatched(fd) => write!(f, "fd {} not watched", fd),
            Self::PollerSetup(e) => write!(f, "poller setup: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for ReactorError {}

pub type Result<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ReactorError::AlreadyWatched(7).to_string(),
            "fd 7 already watched"
        );
        assert_eq!(ReactorError::NotWatched(9).to_string(), "fd 9 not watched");
        assert_eq!(ReactorError::Os(4).to_string(), "OS error: errno 4");
    }

    #[test]
    fn test_registration_errors() {
        assert!(ReactorError::AlreadyWatched(1).is_registration_error());
        assert!(ReactorError::NotWatched(1).is_registration_error());
        assert!(!ReactorError::Os(1).is_registration_error());
    }
}
