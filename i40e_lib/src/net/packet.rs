use crate::net::net_device::{PacketHeaderFlags, TunnelType};
use alloc::{boxed::Box, vec::Vec};

/// A receive buffer the driver has loaned to the stack. Dropping the trait
/// object is the recycle notification: the implementation returns the
/// underlying buffer to its ring.
pub trait LoanedBuf: Send {
    fn as_bytes(&self) -> &[u8];
}

/// One fragment of a frame.
pub enum FrameSeg {
    Owned(Vec<u8>),
    Loaned(Box<dyn LoanedBuf>),
}

impl FrameSeg {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FrameSeg::Owned(v) => v.as_slice(),
            FrameSeg::Loaned(l) => l.as_bytes(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for FrameSeg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameSeg::Owned(v) => f.debug_tuple("Owned").field(&v.len()).finish(),
            FrameSeg::Loaned(l) => f.debug_tuple("Loaned").field(&l.as_bytes().len()).finish(),
        }
    }
}

/// An Ethernet frame as exchanged with the host stack: a chain of fragments
/// (no sibling links) plus per-frame offload metadata.
#[derive(Debug, Default)]
pub struct EtherFrame {
    pub segs: Vec<FrameSeg>,
    pub csum_flags: PacketHeaderFlags,
    pub mss: Option<u32>,
    pub tunnel: TunnelType,
}

impl EtherFrame {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            segs: alloc::vec![FrameSeg::Owned(data)],
            ..Default::default()
        }
    }

    pub fn from_segs(segs: Vec<FrameSeg>) -> Self {
        Self {
            segs,
            ..Default::default()
        }
    }

    pub fn loaned(buf: Box<dyn LoanedBuf>) -> Self {
        Self {
            segs: alloc::vec![FrameSeg::Loaned(buf)],
            ..Default::default()
        }
    }

    /// Total payload length across all fragments.
    pub fn len(&self) -> usize {
        self.segs.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-empty fragments.
    pub fn num_bufs(&self) -> usize {
        self.segs.iter().filter(|s| !s.is_empty()).count()
    }

    /// Flatten the chain into one buffer. Handy for inspection and tests;
    /// the driver itself never pulls a chain up.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in self.segs.iter() {
            out.extend_from_slice(seg.as_bytes());
        }
        out
    }

    /// Attach receive-side checksum results.
    pub fn set_csum_result(&mut self, flags: PacketHeaderFlags) {
        self.csum_flags |= flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_chain() {
        let frame = EtherFrame::from_segs(alloc::vec![
            FrameSeg::Owned(alloc::vec![1, 2, 3]),
            FrameSeg::Owned(Vec::new()),
            FrameSeg::Owned(alloc::vec![4, 5]),
        ]);

        assert_eq!(frame.len(), 5);
        assert_eq!(frame.num_bufs(), 2);
        assert_eq!(frame.to_vec(), alloc::vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_loaned_drop_runs_recycle() {
        use core::sync::atomic::{AtomicU32, Ordering};

        static RECYCLED: AtomicU32 = AtomicU32::new(0);

        struct Loan;

        impl LoanedBuf for Loan {
            fn as_bytes(&self) -> &[u8] {
                &[0xab, 0xcd]
            }
        }

        impl Drop for Loan {
            fn drop(&mut self) {
                RECYCLED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let frame = EtherFrame::loaned(Box::new(Loan));
        assert_eq!(frame.to_vec(), alloc::vec![0xab, 0xcd]);
        drop(frame);
        assert_eq!(RECYCLED.load(Ordering::SeqCst), 1);
    }
}
