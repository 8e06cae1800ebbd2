//! Helpers shared by unit tests

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

/// Non-blocking eventfd; clones share the descriptor
#[derive(Clone)]
pub(crate) struct EventFd(Rc<OwnedFd>);

impl EventFd {
    pub(crate) fn new() -> Self {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(fd >= 0, "eventfd failed");
        EventFd(Rc::new(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Make the fd readable
    pub(crate) fn signal(&self) {
        let one: u64 = 1;
        let n = unsafe { libc::write(self.fd(), &one as *const u64 as *const libc::c_void, 8) };
        assert_eq!(n, 8);
    }

    /// Reset the counter
    pub(crate) fn drain(&self) {
        let mut value: u64 = 0;
        unsafe { libc::read(self.fd(), &mut value as *mut u64 as *mut libc::c_void, 8) };
    }
}
