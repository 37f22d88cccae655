use crate::net::packet::EtherFrame;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt::Display;

bitflags! {
    /// Per-frame offload metadata. The `_OUT` flags are requests attached by
    /// the stack on transmit; the `_IN_OK` flags are results attached by the
    /// driver on receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketHeaderFlags: u32 {
        const IPV4_CSUM_OUT = 0x0001; // IPv4 header checksum needed
        const PSEUDO_CSUM_OUT = 0x0002; // partial (pseudo) L4 checksum needed
        const INNER_IPV4_CSUM_OUT = 0x0004; // tunneled inner IPv4 header checksum needed
        const INNER_PSEUDO_CSUM_OUT = 0x0008; // tunneled inner L4 checksum needed
        const TCP_TSO = 0x0010; // TCP segmentation offload needed

        const IPV4_CSUM_IN_OK = 0x0100; // IPv4 header checksum verified
        const FULL_CSUM_IN_OK = 0x0200; // full L4 checksum verified
        const INNER_IPV4_CSUM_IN_OK = 0x0400; // inner IPv4 header checksum verified
        const INNER_FULL_CSUM_IN_OK = 0x0800; // inner full L4 checksum verified
    }
}

impl PacketHeaderFlags {
    /// The transmit-request subset.
    pub const fn out_flags(self) -> Self {
        self.intersection(
            Self::IPV4_CSUM_OUT
                .union(Self::PSEUDO_CSUM_OUT)
                .union(Self::INNER_IPV4_CSUM_OUT)
                .union(Self::INNER_PSEUDO_CSUM_OUT),
        )
    }
}

/// Encapsulation declared for a frame by the stack. Only VXLAN is
/// recognized by the offload path today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelType {
    #[default]
    None,
    Vxlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    UpFullDuplex,
    UpHalfDuplex,
    Down,
    Unknown,
}

impl Display for LinkStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "Up"),
            LinkStatus::UpFullDuplex => write!(f, "Up (Full Duplex)"),
            LinkStatus::UpHalfDuplex => write!(f, "Up (Half Duplex)"),
            LinkStatus::Down => write!(f, "Down"),
            LinkStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDevError {
    AlreadyUp,
    AlreadyDown,
    DeviceError,
}

/// Callbacks the host stack registers with the driver.
pub trait NetStack: Send + Sync {
    /// Backpressure previously signalled on `que_id` has cleared; the stack
    /// may resume submitting frames to that ring.
    fn tx_ring_update(&self, que_id: usize);
}

/// The driver side of the contract.
///
/// Queues are processed in parallel, so implementations must be
/// thread-safe.
pub trait NetDevice: Send + Sync {
    fn up(&self) -> Result<(), NetDevError>;
    fn down(&self) -> Result<(), NetDevError>;

    fn num_queues(&self) -> usize;
    fn link_status(&self) -> LinkStatus;
    fn can_send(&self) -> bool;

    /// Poll `que_id` for received frames, returning at most `poll_bytes`
    /// bytes worth.
    fn rx_poll(&self, que_id: usize, poll_bytes: usize) -> Vec<EtherFrame>;

    /// Drain `que_id` from interrupt context, bounded by the per-interrupt
    /// frame limit rather than a byte budget.
    fn rx_intr(&self, que_id: usize) -> Vec<EtherFrame>;

    /// Submit one frame. `None` means the frame was accepted (or dropped);
    /// `Some` returns it under backpressure, and the stack must hold off
    /// until [`NetStack::tx_ring_update`] fires for this queue.
    fn tx(&self, que_id: usize, frame: EtherFrame) -> Option<EtherFrame>;

    /// Reclaim completed transmit descriptors on `que_id`.
    fn tx_recycle(&self, que_id: usize);
}
