//! # Intel XL710 (i40e) data-plane driver core
//!
//! The transmit/receive core of a driver for the XL710 family of 10/40 GbE
//! controllers: per-queue descriptor rings, control-block pools, the
//! copy-versus-bind buffer strategies on both paths, checksum/segmentation
//! offload programming, and flow-control handshaking with the host stack.
//!
//! Everything outside the data plane (PCI attach, firmware queues, link
//! management, interrupt wiring, filter programming) is a collaborator
//! reached through the seams in [`i40e_lib`]: the device is handed a mapped
//! register window, a configuration snapshot, and the stack's callback
//! object, and exposes the ring entry points behind
//! [`i40e_lib::net::net_device::NetDevice`].

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod i40e;

pub use i40e::{I40e, I40eConfig, I40eDriverErr, QueueContext, RxQueueStats, TxQueueStats};
