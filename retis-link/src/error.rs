//! # Errors
//!
//! Every operation of this crate returns a [`LinkError`]. Errors are never
//! downgraded to log messages: the caller gets the failure along with its
//! [`ErrorCategory`] and decides what to do (fall back, skip, retry with
//! another program, etc).

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::link::LinkVariant;

/// Linux internal errno, returned by some bpf(2) commands but not exported by
/// libc.
pub(crate) const ENOTSUPP: i32 = 524;

/// Broad classes of failures, so callers can react on the kind of failure
/// without matching every single variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    /// The running kernel lacks the requested attach type or command.
    Unsupported,
    /// The request itself is wrong; a caller bug.
    InvalidRequest,
    /// The kernel refused an otherwise well-formed request.
    VerifierRejected,
    /// Operation not allowed in the current state of the in-memory handle.
    ResourceState,
    /// Operation failed on the persisted (bpffs) side.
    Filesystem,
    /// Any other kernel failure.
    Kernel,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{feature} is not supported by the running kernel")]
    Unsupported { feature: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("freplace target given both at load time and at attach time")]
    ConflictingTarget,

    #[error("freplace target missing: set it at load time or at attach time")]
    MissingTarget,

    #[error("attach rejected by verifier (`{call}`)")]
    VerifierRejected {
        call: &'static str,
        #[source]
        io_error: io::Error,
    },

    #[error("the BPF_PROG_LOAD syscall failed. Verifier output: {verifier_log}")]
    ProgramLoad {
        #[source]
        io_error: io::Error,
        verifier_log: String,
    },

    #[error("the handle is closed")]
    Closed,

    #[error("{variant} links can't be pinned")]
    NotPinnable { variant: LinkVariant },

    #[error("link is already pinned at {}", path.display())]
    AlreadyPinned { path: PathBuf },

    #[error("link is not pinned")]
    NotPinned,

    #[error("expected a {expected} link, found {found}")]
    TypeMismatch { expected: LinkVariant, found: String },

    #[error("pin path {} already exists", path.display())]
    PinExists { path: PathBuf },

    #[error("pin path {} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid pin path {}: {reason}", path.display())]
    InvalidPinPath { path: PathBuf, reason: String },

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        io_error: io::Error,
    },

    #[error("`{call}` failed")]
    Syscall {
        call: &'static str,
        #[source]
        io_error: io::Error,
    },
}

impl LinkError {
    /// Category the error belongs to.
    pub fn category(&self) -> ErrorCategory {
        use LinkError::*;
        match self {
            Unsupported { .. } => ErrorCategory::Unsupported,
            InvalidRequest(_) | ConflictingTarget | MissingTarget => ErrorCategory::InvalidRequest,
            VerifierRejected { .. } | ProgramLoad { .. } => ErrorCategory::VerifierRejected,
            Closed | NotPinnable { .. } | AlreadyPinned { .. } | NotPinned | TypeMismatch { .. } => {
                ErrorCategory::ResourceState
            }
            PinExists { .. } | NotFound { .. } | InvalidPinPath { .. } | Io { .. } => {
                ErrorCategory::Filesystem
            }
            Syscall { .. } => ErrorCategory::Kernel,
        }
    }

    /// Is the error reporting a feature missing in the running kernel?
    pub fn is_unsupported(&self) -> bool {
        self.category() == ErrorCategory::Unsupported
    }

    /// Convert a failed bpf(2) call into an error, singling out the errnos
    /// meaning the kernel does not know about the request.
    pub(crate) fn from_syscall(call: &'static str, io_error: io::Error) -> LinkError {
        match io_error.raw_os_error() {
            Some(libc::EOPNOTSUPP) | Some(ENOTSUPP) | Some(libc::ENOSYS) => {
                LinkError::Unsupported {
                    feature: format!("`{call}` ({io_error})"),
                }
            }
            _ => LinkError::Syscall { call, io_error },
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(libc::EOPNOTSUPP, ErrorCategory::Unsupported ; "eopnotsupp")]
    #[test_case(ENOTSUPP, ErrorCategory::Unsupported ; "enotsupp")]
    #[test_case(libc::ENOSYS, ErrorCategory::Unsupported ; "enosys")]
    #[test_case(libc::EINVAL, ErrorCategory::Kernel ; "einval")]
    #[test_case(libc::EPERM, ErrorCategory::Kernel ; "eperm")]
    fn syscall_errno(errno: i32, category: ErrorCategory) {
        let err = LinkError::from_syscall("BPF_LINK_CREATE", io::Error::from_raw_os_error(errno));
        assert_eq!(err.category(), category);
    }

    #[test]
    fn categories() {
        assert_eq!(
            LinkError::ConflictingTarget.category(),
            ErrorCategory::InvalidRequest
        );
        assert_eq!(
            LinkError::MissingTarget.category(),
            ErrorCategory::InvalidRequest
        );
        assert_eq!(LinkError::Closed.category(), ErrorCategory::ResourceState);
        assert_eq!(LinkError::NotPinned.category(), ErrorCategory::ResourceState);
        assert_eq!(
            LinkError::NotPinnable {
                variant: LinkVariant::RawTracepoint
            }
            .category(),
            ErrorCategory::ResourceState
        );
        assert_eq!(
            LinkError::PinExists {
                path: PathBuf::from("/sys/fs/bpf/foo")
            }
            .category(),
            ErrorCategory::Filesystem
        );
        assert_eq!(
            LinkError::NotFound {
                path: PathBuf::from("/sys/fs/bpf/foo")
            }
            .category(),
            ErrorCategory::Filesystem
        );
        assert_eq!(
            LinkError::VerifierRejected {
                call: "BPF_LINK_CREATE",
                io_error: io::Error::from_raw_os_error(libc::EINVAL),
            }
            .category(),
            ErrorCategory::VerifierRejected
        );
        assert!(LinkError::Unsupported {
            feature: "freplace".to_string()
        }
        .is_unsupported());
    }
}
