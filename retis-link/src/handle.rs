//! # Kernel handle
//!
//! Owner of a single kernel file descriptor (link or program). The only
//! state transition is open -> closed, implemented as an atomic swap so that
//! concurrent or repeated closes release the descriptor exactly once: file
//! descriptor numbers get reused, a second close(2) could silently release an
//! unrelated object.
//!
//! For the same reason the descriptor is only handed out through a
//! [`HandleFd`] guard, and close(2) waits for outstanding guards to be
//! dropped. A thread must not close a handle while holding one of its guards.

use std::{
    fmt, io,
    os::fd::{AsFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd},
    sync::atomic::{AtomicI32, AtomicUsize, Ordering},
    thread,
};

use log::debug;

use crate::error::LinkError;

const CLOSED: RawFd = -1;

pub struct KernelHandle {
    fd: AtomicI32,
    /// Number of live HandleFd guards.
    borrows: AtomicUsize,
}

/// Borrowed descriptor of an open [`KernelHandle`]. The descriptor stays
/// valid until the guard is dropped, even if the handle is closed meanwhile.
#[derive(Debug)]
pub struct HandleFd<'a> {
    fd: BorrowedFd<'a>,
    borrows: &'a AtomicUsize,
}

impl AsFd for HandleFd<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd
    }
}

impl Drop for HandleFd<'_> {
    fn drop(&mut self) {
        self.borrows.fetch_sub(1, Ordering::SeqCst);
    }
}

impl KernelHandle {
    /// Take ownership of a file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        KernelHandle {
            fd: AtomicI32::new(fd.into_raw_fd()),
            borrows: AtomicUsize::new(0),
        }
    }

    /// Borrow the underlying file descriptor, if the handle is still open.
    pub fn as_fd(&self) -> Result<HandleFd<'_>, LinkError> {
        // Registered before looking at the descriptor: a close swapping it
        // out after this point sees the borrow and waits for it.
        self.borrows.fetch_add(1, Ordering::SeqCst);
        match self.fd.load(Ordering::SeqCst) {
            CLOSED => {
                self.borrows.fetch_sub(1, Ordering::SeqCst);
                Err(LinkError::Closed)
            }
            fd => Ok(HandleFd {
                // SAFETY: the descriptor is owned by us, and can't be closed
                // until the guard is dropped.
                fd: unsafe { BorrowedFd::borrow_raw(fd) },
                borrows: &self.borrows,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.fd.load(Ordering::Acquire) == CLOSED
    }

    /// Close the handle. Closing an already closed handle is a no-op.
    pub fn close(&self) -> Result<(), LinkError> {
        self.release().map(|_| ())
    }

    /// Returns true if this call released the descriptor.
    fn release(&self) -> Result<bool, LinkError> {
        let fd = self.fd.swap(CLOSED, Ordering::SeqCst);
        if fd == CLOSED {
            return Ok(false);
        }

        // New borrows now fail, wait for the in-flight ones.
        while self.borrows.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }

        // The descriptor is gone even if close(2) reports an error, there is
        // nothing to retry.
        nix::unistd::close(fd).map_err(|e| LinkError::Syscall {
            call: "close",
            io_error: io::Error::from(e),
        })?;
        Ok(true)
    }
}

impl Drop for KernelHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Failed to close kernel handle: {e}");
        }
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fd.load(Ordering::Relaxed) {
            CLOSED => write!(f, "KernelHandle(closed)"),
            fd => write!(f, "KernelHandle({fd})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, os::fd::AsRawFd, sync::Arc, time::Duration};

    use nix::fcntl::{fcntl, FcntlArg};

    use super::*;

    fn dev_null() -> KernelHandle {
        KernelHandle::new(OwnedFd::from(File::open("/dev/null").unwrap()))
    }

    #[test]
    fn close_twice() {
        let handle = dev_null();
        assert!(!handle.is_closed());
        assert!(handle.as_fd().is_ok());

        assert!(handle.close().is_ok());
        assert!(handle.is_closed());
        assert!(handle.close().is_ok());
        assert!(matches!(handle.as_fd(), Err(LinkError::Closed)));
    }

    #[test]
    fn release_once() {
        let handle = dev_null();
        assert!(handle.release().unwrap());
        assert!(!handle.release().unwrap());
        assert!(!handle.release().unwrap());
    }

    #[test]
    fn concurrent_close() {
        let handle = Arc::new(dev_null());

        let released: usize = (0..16)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.release().unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(released, 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn close_waits_for_borrows() {
        let handle = Arc::new(dev_null());
        let fd = handle.as_fd().unwrap();
        let raw = fd.as_fd().as_raw_fd();

        let closer = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || handle.release().unwrap())
        };
        // The closer can't finish while the borrow is alive.
        while !handle.is_closed() {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!closer.is_finished());
        assert!(fcntl(raw, FcntlArg::F_GETFD).is_ok());
        // New borrows are refused as soon as the close started.
        assert!(matches!(handle.as_fd(), Err(LinkError::Closed)));

        drop(fd);
        assert!(closer.join().unwrap());
        assert_eq!(handle.borrows.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn borrow_count() {
        let handle = dev_null();
        {
            let _a = handle.as_fd().unwrap();
            let _b = handle.as_fd().unwrap();
            assert_eq!(handle.borrows.load(Ordering::SeqCst), 2);
        }
        assert_eq!(handle.borrows.load(Ordering::SeqCst), 0);

        handle.close().unwrap();
        assert!(handle.as_fd().is_err());
        assert_eq!(handle.borrows.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_output() {
        let handle = dev_null();
        assert!(format!("{handle:?}").starts_with("KernelHandle("));
        handle.close().unwrap();
        assert_eq!(format!("{handle:?}"), "KernelHandle(closed)");
    }
}
