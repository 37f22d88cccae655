//! Memory barrier abstractions for device drivers.
//!
//! Descriptor rings are plain memory shared with a bus-mastering device, so
//! stores must be ordered before the doorbell write and loads of
//! device-written memory must be ordered after the sync that made them
//! visible.

use core::sync::atomic::{fence, Ordering};

/// Bus space barrier flags
pub const BUS_SPACE_BARRIER_READ: u32 = 0x01;
pub const BUS_SPACE_BARRIER_WRITE: u32 = 0x02;

/// Producer memory barrier - ensures all stores before the barrier complete
/// before any stores after the barrier.
#[inline(always)]
pub fn membar_producer() {
    fence(Ordering::Release);
}

/// Consumer memory barrier - ensures all loads before the barrier complete
/// before any loads after the barrier.
#[inline(always)]
pub fn membar_consumer() {
    fence(Ordering::Acquire);
}

/// Full memory synchronization barrier
#[inline(always)]
pub fn membar_sync() {
    fence(Ordering::SeqCst);
}

/// Bus space barrier - ensures ordering of MMIO operations
#[inline(always)]
pub fn bus_space_barrier(flags: u32) {
    match flags & (BUS_SPACE_BARRIER_READ | BUS_SPACE_BARRIER_WRITE) {
        BUS_SPACE_BARRIER_READ => fence(Ordering::Acquire),
        BUS_SPACE_BARRIER_WRITE => fence(Ordering::Release),
        _ => fence(Ordering::SeqCst),
    }
}
