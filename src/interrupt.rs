// SPDX-License-Identifier: Apache-2.0

//! Sharing a capture session between interrupt handlers and the foreground loop, via a static
//! [`Mutex`].

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    adapter::DeviceAdapter,
    error::Error,
    session::{Board, CaptureSession},
};

/// Session slot usable from a `static`.
///
/// ```
/// use evb_stream::interrupt::SharedSession;
///
/// static COUNTER: SharedSession<u32> = SharedSession::new();
/// COUNTER.install(7);
/// assert_eq!(COUNTER.with(|value| *value + 1), Some(8));
/// ```
pub struct SharedSession<S> {
    /// Protected session
    inner: Mutex<RefCell<Option<S>>>,
}

impl<S> SharedSession<S> {
    /// Empty slot
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Store `session`, returning any previous one.
    pub fn install(&self, session: S) -> Option<S> {
        debug!("critical_section: install session");
        critical_section::with(|cs| self.inner.replace(cs, Some(session)))
    }

    /// Remove the session.
    pub fn take(&self) -> Option<S> {
        critical_section::with(|cs| self.inner.take(cs))
    }

    /// Run `f` on the session inside a critical section. Returns `None` if the slot is empty.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).as_mut().map(f))
    }
}

impl<S> Default for SharedSession<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: DeviceAdapter, B: Board> SharedSession<CaptureSession<'static, A, B>> {
    /// Wait until the session can be drained, then drain into `dst`.
    ///
    /// Spins outside the critical section so interrupts keep committing data. If the session is
    /// still not ready after `budget` retries it is faulted with [`Error::Timeout`]. Fails with
    /// [`Error::InvalidState`] if no session is installed.
    pub fn drain_until(&self, dst: &mut [u8], budget: u32) -> Result<usize, Error> {
        let mut remaining = budget;
        loop {
            match self.with(|session| session.drain_ready()) {
                None => return Err(Error::InvalidState),
                Some(true) => break,
                Some(false) if remaining == 0 => {
                    return Err(self
                        .with(|session| session.fail(Error::Timeout))
                        .unwrap_or(Error::Timeout));
                }
                Some(false) => remaining -= 1,
            }
        }
        self.with(|session| session.drain(dst))
            .unwrap_or(Err(Error::InvalidState))
    }
}
