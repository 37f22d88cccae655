//! A minimal condition variable for teardown rendezvous.
//!
//! Nothing on the data path blocks; the single use is waiting for loaned
//! receive buffers to drain back before ring memory may be reclaimed. With
//! the `std` feature this is a `parking_lot` condvar; without it, waiters
//! spin and re-check, which is adequate for the rare teardown path.

use super::mutex::{MCSNode, Mutex};

pub struct Condvar {
    #[cfg(feature = "std")]
    cv: parking_lot::Condvar,
    #[cfg(not(feature = "std"))]
    _dummy: (),
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "std")]
            cv: parking_lot::Condvar::new(),
            #[cfg(not(feature = "std"))]
            _dummy: (),
        }
    }

    /// Block until `cond` returns true for the value guarded by `mutex`.
    #[cfg(feature = "std")]
    pub fn wait_until<T: Send, F: FnMut(&mut T) -> bool>(&self, mutex: &Mutex<T>, mut cond: F) {
        let mut node = MCSNode::new();
        let mut guard = mutex.lock(&mut node);
        while !cond(&mut guard) {
            self.cv.wait(&mut guard);
        }
    }

    #[cfg(not(feature = "std"))]
    pub fn wait_until<T: Send, F: FnMut(&mut T) -> bool>(&self, mutex: &Mutex<T>, mut cond: F) {
        loop {
            {
                let mut node = MCSNode::new();
                let mut guard = mutex.lock(&mut node);
                if cond(&mut guard) {
                    return;
                }
            }
            core::hint::spin_loop();
        }
    }

    pub fn notify_all(&self) {
        #[cfg(feature = "std")]
        self.cv.notify_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
