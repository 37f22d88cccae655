//! Device and queue-pair structures, configuration, and ring lifecycle.
//!
//! Each hardware queue is a [`TrqPair`]: a receive ring and a transmit ring
//! that operate independently under their own locks. The locks are ordered
//! as follows and never inverted:
//!
//! 1. a queue's `rx` or `tx` lock
//! 2. the rx free-list / tx control-block free-list lock
//! 3. the device-wide rx-pending lock
//!
//! Ring memory lives from `up()` to `down()`. Teardown must tolerate
//! receive buffers still loaned to the stack: the receive control-block
//! arena stays alive until the last loan is recycled, and `wait_rx_drained`
//! lets a detaching caller rendezvous with that final recycle.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use i40e_lib::{
    addr::phy_addr::PhyAddr,
    net::{
        ether::{ETHER_CRC_LEN, ETHER_HDR_LEN, ETHER_VLAN_ENCAP_LEN},
        net_device::{LinkStatus, NetDevError, NetDevice, NetStack},
        packet::EtherFrame,
    },
    sync::{
        condvar::Condvar,
        mutex::{MCSNode, Mutex},
    },
};

pub mod i40e_buf;
pub mod i40e_ptype;
pub mod i40e_regs;
mod i40e_rx;
mod i40e_tx;

use i40e_buf::{DmaAttrs, I40E_TX_MAX_COOKIE};
use i40e_regs::{qrx_tail, qtx_tail, RegSpace};
use i40e_rx::Rx;
use i40e_tx::Tx;

pub use i40e_rx::RxQueueStats;
pub use i40e_tx::TxQueueStats;

/// Rx buffers are over-allocated by two bytes and the buffer window shifted
/// by the same amount, so that the 14- or 18-byte MAC header leaves the L3
/// header 4-byte aligned.
pub(crate) const I40E_BUF_IPHDR_ALIGNMENT: usize = 2;

// Device state bits.
pub(crate) const I40E_STARTED: u32 = 1 << 0;
pub(crate) const I40E_SUSPENDED: u32 = 1 << 1;
pub(crate) const I40E_OVERTEMP: u32 = 1 << 2;
pub(crate) const I40E_ERROR: u32 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I40eDriverErr {
    /// A DMA buffer or descriptor-ring allocation failed.
    DmaBuffer,
    /// A control-block or list allocation failed.
    NoMemory,
    /// A DMA handle failed its post-sync verification.
    DmaHandleFault,
    /// The configuration snapshot is not usable.
    InvalidConfig,
    /// The queue index does not exist.
    InvalidQueue,
}

impl core::fmt::Display for I40eDriverErr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::DmaBuffer => write!(f, "DMA allocation failure."),
            Self::NoMemory => write!(f, "Memory allocation failure."),
            Self::DmaHandleFault => write!(f, "DMA handle fault."),
            Self::InvalidConfig => write!(f, "Invalid configuration."),
            Self::InvalidQueue => write!(f, "Invalid queue index."),
        }
    }
}

/// Tunables, read once when ring memory is allocated. The external
/// configuration layer fills this in; defaults mirror the driver's shipped
/// settings.
#[derive(Debug, Clone, Copy)]
pub struct I40eConfig {
    pub num_trqpairs: usize,
    pub rx_ring_size: usize,
    pub tx_ring_size: usize,
    /// Frames at least this long are delivered by loaning the DMA buffer.
    pub rx_dma_min: usize,
    /// Frames longer than this are transmitted by binding their fragments.
    pub tx_dma_min: usize,
    /// Fewer free tx descriptors than this blocks the ring.
    pub tx_block_thresh: usize,
    /// Frame budget for a single rx pipeline invocation.
    pub rx_limit_per_intr: usize,
    pub rx_hcksum_enable: bool,
    pub tx_hcksum_enable: bool,
    pub mtu: usize,
    pub numa_id: usize,
    /// Fault-management capability of this instance.
    pub fma: bool,
}

impl Default for I40eConfig {
    fn default() -> Self {
        Self {
            num_trqpairs: 1,
            rx_ring_size: 1024,
            tx_ring_size: 1024,
            rx_dma_min: 256,
            tx_dma_min: 256,
            tx_block_thresh: I40E_TX_MAX_COOKIE,
            rx_limit_per_intr: 256,
            rx_hcksum_enable: true,
            tx_hcksum_enable: true,
            mtu: 1500,
            numa_id: 0,
            fma: false,
        }
    }
}

impl I40eConfig {
    pub(crate) fn validate(&self) -> Result<(), I40eDriverErr> {
        if self.num_trqpairs == 0
            || self.rx_ring_size < 4
            || self.rx_ring_size > 4096
            || self.tx_ring_size < 4
            || self.tx_ring_size > 4096
            || self.tx_block_thresh >= self.tx_ring_size
            || self.rx_limit_per_intr == 0
            || self.mtu == 0
            || self.tx_dma_min > self.tx_buf_size()
        {
            return Err(I40eDriverErr::InvalidConfig);
        }

        Ok(())
    }

    /// Largest on-wire frame: MTU plus MAC header, VLAN tag and FCS.
    pub(crate) fn frame_max(&self) -> usize {
        self.mtu + ETHER_HDR_LEN + ETHER_VLAN_ENCAP_LEN + ETHER_CRC_LEN
    }

    pub(crate) fn rx_buf_size(&self) -> usize {
        round_up_1k(self.frame_max()) + I40E_BUF_IPHDR_ALIGNMENT
    }

    pub(crate) fn tx_buf_size(&self) -> usize {
        round_up_1k(self.frame_max())
    }
}

pub(crate) fn round_up_1k(size: usize) -> usize {
    (size + 1023) & !1023
}

/// Advance a descriptor cursor by `count`, wrapping at `size`.
pub(crate) fn next_desc(base: usize, count: usize, size: usize) -> usize {
    debug_assert!(base < size);
    debug_assert!(count > 0);
    debug_assert!(size > 0);

    let out = if base + count < size {
        base + count
    } else {
        base + count - size
    };

    debug_assert!(out < size);
    out
}

/// Step a descriptor cursor back by `count`, wrapping at `size`.
pub(crate) fn prev_desc(base: usize, count: usize, size: usize) -> usize {
    debug_assert!(base < size);
    debug_assert!(count > 0);
    debug_assert!(size > 0);

    let out = if base >= count {
        base - count
    } else {
        base + size - count
    };

    debug_assert!(out < size);
    out
}

/// The firmware queue-context collaborator. Ring placement is not
/// programmed through MMIO on this controller; the control-queue layer owns
/// it, and the data plane hands over the geometry at start.
pub trait QueueContext: Send + Sync {
    fn setup_rx_queue(&self, que_id: usize, ring_base: PhyAddr, ring_size: usize);
    fn setup_tx_queue(
        &self,
        que_id: usize,
        ring_base: PhyAddr,
        ring_size: usize,
        wb_addr: PhyAddr,
    );
}

/// State shared between the device, its queues, and outstanding receive
/// loans.
pub(crate) struct I40eShared {
    pub(crate) state: AtomicU32,
    pub(crate) link_active: AtomicBool,
    /// Loaned receive buffers outstanding across all queues.
    pub(crate) rx_pending: AtomicU32,
    pub(crate) rx_pending_lock: Mutex<()>,
    pub(crate) rx_pending_cv: Condvar,
    pub(crate) stack: Arc<dyn NetStack>,
}

impl I40eShared {
    pub(crate) fn state_has(&self, bits: u32) -> bool {
        self.state.load(Ordering::Acquire) & bits != 0
    }

    pub(crate) fn state_or(&self, bits: u32) {
        self.state.fetch_or(bits, Ordering::AcqRel);
    }

    pub(crate) fn state_clear(&self, bits: u32) {
        self.state.fetch_and(!bits, Ordering::AcqRel);
    }
}

/// One transmit/receive queue pair.
pub struct TrqPair {
    pub(crate) me: usize,
    pub(crate) rx: Mutex<Rx>,
    pub(crate) tx: Mutex<Tx>,
}

/// An XL710 data-plane instance.
pub struct I40e {
    pub(crate) regs: RegSpace,
    pub(crate) config: I40eConfig,
    pub(crate) attrs: DmaAttrs,
    pub(crate) que: Vec<TrqPair>,
    pub(crate) shared: Arc<I40eShared>,
    pub(crate) qctx: Arc<dyn QueueContext>,
}

impl I40e {
    /// Build an instance over an already-mapped register window. `stack` is
    /// the host stack's callback object, `qctx` the firmware queue-context
    /// layer, and `config` the tunable snapshot from the external
    /// configuration source.
    pub fn new(
        regs: RegSpace,
        config: I40eConfig,
        stack: Arc<dyn NetStack>,
        qctx: Arc<dyn QueueContext>,
    ) -> Result<Self, I40eDriverErr> {
        config.validate()?;

        let shared = Arc::new(I40eShared {
            state: AtomicU32::new(0),
            link_active: AtomicBool::new(false),
            rx_pending: AtomicU32::new(0),
            rx_pending_lock: Mutex::new(()),
            rx_pending_cv: Condvar::new(),
            stack,
        });

        let mut que = Vec::with_capacity(config.num_trqpairs);
        for i in 0..config.num_trqpairs {
            que.push(TrqPair {
                me: i,
                rx: Mutex::new(Rx::empty()),
                tx: Mutex::new(Tx::empty()),
            });
        }

        Ok(Self {
            regs,
            config,
            attrs: DmaAttrs::new(config.fma),
            que,
            shared,
            qctx,
        })
    }

    /// The link-management collaborator reports state changes here.
    pub fn set_link(&self, up: bool) {
        self.shared.link_active.store(up, Ordering::Release);
    }

    pub fn rx_stats(&self, que_id: usize) -> RxQueueStats {
        let mut node = MCSNode::new();
        let rx = self.que[que_id].rx.lock(&mut node);
        rx.stats
    }

    pub fn tx_stats(&self, que_id: usize) -> TxQueueStats {
        let mut node = MCSNode::new();
        let tx = self.que[que_id].tx.lock(&mut node);
        tx.stats
    }

    /// Loaned receive buffers outstanding across all queues.
    pub fn rx_pending(&self) -> u32 {
        self.shared.rx_pending.load(Ordering::Acquire)
    }

    /// Block until every loaned receive buffer has come back. Called by the
    /// detach path after `down()`; never from the data path.
    pub fn wait_rx_drained(&self) {
        let shared = &self.shared;
        shared
            .rx_pending_cv
            .wait_until(&shared.rx_pending_lock, |_| {
                shared.rx_pending.load(Ordering::Acquire) == 0
            });
    }

    /// Allocate and program ring memory for every queue pair, then open the
    /// gates. Failure unwinds everything allocated so far.
    fn start(&self) -> Result<(), I40eDriverErr> {
        for que in self.que.iter() {
            if let Err(e) = self.setup_trqpair(que) {
                log::error!("i40e: failed to set up ring memory for queue {}", que.me);
                self.stop();
                return Err(e);
            }
        }

        self.shared.state_or(I40E_STARTED);
        Ok(())
    }

    fn setup_trqpair(&self, que: &TrqPair) -> Result<(), I40eDriverErr> {
        {
            let mut node = MCSNode::new();
            let mut rx = que.rx.lock(&mut node);
            *rx = i40e_rx::alloc_rx(&self.config, &self.shared)?;

            let desc_area = rx.desc_area.as_ref().unwrap();
            self.qctx
                .setup_rx_queue(que.me, desc_area.dma_address(), self.config.rx_ring_size);
        }

        {
            let mut node = MCSNode::new();
            let mut tx = que.tx.lock(&mut node);
            *tx = i40e_tx::alloc_tx(&self.config, &self.attrs)?;

            let desc_area = tx.desc_area.as_ref().unwrap();
            let wb_addr = desc_area.dma_address()
                + self.config.tx_ring_size * core::mem::size_of::<i40e_regs::TxDesc>();
            self.qctx.setup_tx_queue(
                que.me,
                desc_area.dma_address(),
                self.config.tx_ring_size,
                wb_addr,
            );
        }

        // Hardware owns everything between head and tail inclusive: the
        // initial rx tail is the last descriptor, the tx ring starts empty.
        self.regs
            .write32(qrx_tail(que.me), (self.config.rx_ring_size - 1) as u32);
        self.regs.write32(qtx_tail(que.me), 0);

        Ok(())
    }

    /// Tear down ring memory. Safe to call with loans outstanding: their
    /// control blocks survive until the stack recycles them.
    fn stop(&self) {
        self.shared.state_clear(I40E_STARTED);

        for que in self.que.iter() {
            {
                let mut node = MCSNode::new();
                let mut tx = que.tx.lock(&mut node);
                i40e_tx::tx_cleanup_ring(&mut tx);
                tx.teardown();
            }

            {
                let mut node = MCSNode::new();
                let mut rx = que.rx.lock(&mut node);
                i40e_rx::free_rx_dma(&mut rx, &self.shared);
            }
        }
    }
}

impl NetDevice for I40e {
    fn up(&self) -> Result<(), NetDevError> {
        if self.shared.state_has(I40E_STARTED) {
            return Err(NetDevError::AlreadyUp);
        }

        self.start().or(Err(NetDevError::DeviceError))
    }

    fn down(&self) -> Result<(), NetDevError> {
        if !self.shared.state_has(I40E_STARTED) {
            return Err(NetDevError::AlreadyDown);
        }

        self.stop();
        Ok(())
    }

    fn num_queues(&self) -> usize {
        self.que.len()
    }

    fn link_status(&self) -> LinkStatus {
        if self.shared.link_active.load(Ordering::Acquire) {
            LinkStatus::UpFullDuplex
        } else {
            LinkStatus::Down
        }
    }

    fn can_send(&self) -> bool {
        self.shared.state_has(I40E_STARTED) && self.shared.link_active.load(Ordering::Acquire)
    }

    fn rx_poll(&self, que_id: usize, poll_bytes: usize) -> Vec<EtherFrame> {
        debug_assert!(poll_bytes > 0);
        if poll_bytes == 0 || que_id >= self.que.len() {
            return Vec::new();
        }

        self.ring_rx(que_id, Some(poll_bytes))
    }

    fn rx_intr(&self, que_id: usize) -> Vec<EtherFrame> {
        if que_id >= self.que.len() {
            return Vec::new();
        }

        self.ring_rx(que_id, None)
    }

    fn tx(&self, que_id: usize, frame: EtherFrame) -> Option<EtherFrame> {
        if que_id >= self.que.len() {
            return None;
        }

        self.ring_tx(que_id, frame)
    }

    fn tx_recycle(&self, que_id: usize) {
        if que_id < self.que.len() {
            self.tx_recycle_ring(que_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_prev_desc() {
        assert_eq!(next_desc(0, 1, 8), 1);
        assert_eq!(next_desc(7, 1, 8), 0);
        assert_eq!(next_desc(5, 4, 8), 1);
        assert_eq!(prev_desc(0, 1, 8), 7);
        assert_eq!(prev_desc(3, 3, 8), 0);

        // next and prev are inverses for every in-range base and count.
        for n in [4usize, 8, 1024] {
            for k in 1..n.min(32) {
                for i in (0..n).step_by(7) {
                    assert_eq!(next_desc(prev_desc(i, k, n), k, n), i);
                    assert_eq!(prev_desc(next_desc(i, k, n), k, n), i);
                }
            }
        }
    }

    #[test]
    fn test_round_up_1k() {
        assert_eq!(round_up_1k(1), 1024);
        assert_eq!(round_up_1k(1024), 1024);
        assert_eq!(round_up_1k(1025), 2048);
    }

    #[test]
    fn test_config_geometry() {
        let config = I40eConfig::default();
        // 1500 + 14 + 4 + 4 = 1522, rounded to 2048.
        assert_eq!(config.frame_max(), 1522);
        assert_eq!(config.tx_buf_size(), 2048);
        assert_eq!(config.rx_buf_size(), 2048 + I40E_BUF_IPHDR_ALIGNMENT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_thresh() {
        let config = I40eConfig {
            tx_ring_size: 8,
            tx_block_thresh: 8,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(I40eDriverErr::InvalidConfig));
    }
}
