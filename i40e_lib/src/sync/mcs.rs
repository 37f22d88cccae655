use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::null_mut,
    sync::atomic::{fence, AtomicBool, AtomicPtr, Ordering},
};

/// An MCS queue lock. Each waiter spins on its own node, so the lock scales
/// under contention and hands off in FIFO order.
pub struct MCSLock<T: Send> {
    last: AtomicPtr<MCSNode<T>>,
    data: UnsafeCell<T>,
}

pub struct MCSNode<T> {
    next: AtomicPtr<MCSNode<T>>,
    locked: AtomicBool,
}

impl<T> Default for MCSNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MCSNode<T> {
    pub fn new() -> Self {
        MCSNode {
            next: AtomicPtr::new(null_mut()),
            locked: AtomicBool::new(false),
        }
    }
}

unsafe impl<T: Send> Sync for MCSLock<T> {}
unsafe impl<T: Send> Send for MCSLock<T> {}

impl<T: Send> MCSLock<T> {
    pub const fn new(v: T) -> MCSLock<T> {
        MCSLock {
            last: AtomicPtr::new(null_mut()),
            data: UnsafeCell::new(v),
        }
    }

    /// acquire lock
    pub fn lock<'a>(&'a self, node: &'a mut MCSNode<T>) -> MCSLockGuard<'a, T> {
        node.next = AtomicPtr::new(null_mut());
        node.locked = AtomicBool::new(false);

        let guard = MCSLockGuard {
            node,
            mcs_lock: self,
            _phantom: Default::default(),
        };

        // set myself as the last node
        let ptr = guard.node as *mut MCSNode<T>;
        let prev = self.last.swap(ptr, Ordering::Relaxed);

        // if prev is null then nobody is trying to acquire lock,
        // otherwise enqueue myself
        if !prev.is_null() {
            // set acquiring lock
            guard.node.locked.store(true, Ordering::Relaxed);

            // enqueue myself
            let prev = unsafe { &*prev };
            prev.next.store(ptr, Ordering::Relaxed);

            // spin until other thread sets locked false
            while guard.node.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop()
            }
        }

        fence(Ordering::Acquire);
        guard
    }
}

pub struct MCSLockGuard<'a, T: Send> {
    node: &'a mut MCSNode<T>,
    mcs_lock: &'a MCSLock<T>,
    _phantom: PhantomData<*mut ()>,
}

impl<'a, T: Send> Drop for MCSLockGuard<'a, T> {
    fn drop(&mut self) {
        // if next is null then self may be the last node
        if self.node.next.load(Ordering::Relaxed).is_null() {
            let ptr = self.node as *mut MCSNode<T>;
            if self
                .mcs_lock
                .last
                .compare_exchange(ptr, null_mut(), Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            // another node is enqueueing itself; wait for the link
            while self.node.next.load(Ordering::Relaxed).is_null() {
                core::hint::spin_loop()
            }
        }

        // unlock the next node
        let next = unsafe { &*self.node.next.load(Ordering::Relaxed) };
        next.locked.store(false, Ordering::Release);
    }
}

impl<'a, T: Send> Deref for MCSLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mcs_lock.data.get() }
    }
}

impl<'a, T: Send> DerefMut for MCSLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mcs_lock.data.get() }
    }
}
