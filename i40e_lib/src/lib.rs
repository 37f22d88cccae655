//! Platform abstractions shared by the i40e data-plane driver.
//!
//! This crate collects everything the driver needs from its surroundings:
//! address types, page-size constants, memory barriers, a contiguous DMA
//! allocator, scatter/gather DMA binding, spin/parking locks, and the
//! network-facing types that make up the contract with the host stack.
//!
//! The crate is `no_std` with `alloc`. With the `std` feature (default) the
//! locks are backed by `parking_lot` and the DMA pool can be seeded from the
//! process heap, which is how the test suite runs the whole data plane in a
//! normal process.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod addr;
pub mod barrier;
pub mod dma_map;
pub mod dma_pool;
pub mod net;
pub mod paging;
pub mod sync;
