//! Receive data structures and the receive pipeline.
//!
//! Every descriptor slot is backed by a receive control block (RCB) on the
//! working list; a second, equally sized free list supplies replacements so
//! a frame can be delivered by loaning its DMA buffer to the stack instead
//! of copying. A loaned RCB carries a reference count: one reference belongs
//! to the driver for as long as the ring is up, one to each outstanding
//! loan. The arena holding the RCBs must outlive ring teardown while loans
//! remain; the last recycle releases it.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use i40e_lib::{
    addr::Addr,
    net::{
        net_device::PacketHeaderFlags,
        packet::{EtherFrame, LoanedBuf},
    },
    sync::mutex::{MCSNode, Mutex},
};

use crate::i40e::{
    i40e_buf::DmaBuffer,
    i40e_ptype::{decode_ptype, OuterIp, OuterIpVer, PtypeFrag, TunnelEndProt, TunnelKind},
    i40e_regs::{
        qrx_tail, RxDesc, I40E_RXD_QW1_ERROR_MASK, I40E_RXD_QW1_ERROR_SHIFT,
        I40E_RXD_QW1_LENGTH_PBUF_MASK, I40E_RXD_QW1_LENGTH_PBUF_SHIFT, I40E_RXD_QW1_PTYPE_MASK,
        I40E_RXD_QW1_PTYPE_SHIFT, I40E_RX_DESC_ERROR_EIPE_SHIFT, I40E_RX_DESC_ERROR_IPE_SHIFT,
        I40E_RX_DESC_ERROR_L4E_SHIFT, I40E_RX_DESC_STATUS_DD_SHIFT, I40E_RX_DESC_STATUS_EOF_SHIFT,
        I40E_RX_DESC_STATUS_IPV6EXADD_SHIFT, I40E_RX_DESC_STATUS_L3L4P_SHIFT, I40E_RX_ERR_BITS,
    },
    next_desc, prev_desc, I40e, I40eConfig, I40eDriverErr, I40eShared, I40E_BUF_IPHDR_ALIGNMENT,
    I40E_ERROR, I40E_OVERTEMP, I40E_STARTED, I40E_SUSPENDED,
};

/// Per-queue receive counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RxQueueStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_desc_error: u64,
    pub rx_intr_limit: u64,
    pub rx_bind_norcb: u64,
    pub rx_bind_nobuf: u64,
    pub rx_copy_nomem: u64,
    pub rx_hck_unknown: u64,
    pub rx_hck_nol3l4p: u64,
    pub rx_hck_v6skip: u64,
    pub rx_hck_iperr: u64,
    pub rx_hck_eiperr: u64,
    pub rx_hck_l4err: u64,
    pub rx_hck_v4hdrok: u64,
    pub rx_hck_l4hdrok: u64,
    pub rx_hck_set: u64,
    pub rx_hck_miss: u64,
}

/// The loan-ready window of an RCB's buffer, pre-built so the bind path
/// only has to fill in the received length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoanWrapper {
    addr: usize,
    size: usize,
}

impl LoanWrapper {
    pub(crate) fn new(dma: &DmaBuffer) -> Self {
        Self {
            addr: dma.address().as_usize(),
            size: dma.size(),
        }
    }
}

pub(crate) struct RcbInner {
    pub(crate) dma: DmaBuffer,
    pub(crate) wrapper: Option<LoanWrapper>,
}

/// A receive control block. The reference count is 1 while the driver holds
/// the only claim (working or free list) and 2 while loaned upward.
pub(crate) struct RxControlBlock {
    pub(crate) rcb_ref: AtomicU32,
    pub(crate) inner: Mutex<RcbInner>,
}

/// The portion of a queue's receive state that must survive teardown while
/// loans are outstanding.
pub(crate) struct RxData {
    pub(crate) rcb_area: Box<[RxControlBlock]>,
    rcb_free: Mutex<Vec<u16>>,
    pub(crate) ring_size: usize,
    pub(crate) free_list_size: usize,
    pub(crate) rcb_pending: AtomicU32,
    pub(crate) shutdown: AtomicBool,
    pub(crate) shared: Arc<I40eShared>,
}

impl RxData {
    #[allow(dead_code)]
    pub(crate) fn rcb_free_count(&self) -> usize {
        let mut node = MCSNode::new();
        self.rcb_free.lock(&mut node).len()
    }
}

fn rcb_alloc(rxd: &RxData) -> Option<u16> {
    let mut node = MCSNode::new();
    let mut free = rxd.rcb_free.lock(&mut node);
    free.pop()
}

fn rcb_free(rxd: &RxData, index: u16) {
    let mut node = MCSNode::new();
    let mut free = rxd.rcb_free.lock(&mut node);
    debug_assert!(free.len() < rxd.free_list_size);
    free.push(index);
}

/// Per-queue receive state, guarded by the queue's rx lock.
pub(crate) struct Rx {
    pub(crate) rxd: Option<Arc<RxData>>,
    pub(crate) desc_area: Option<DmaBuffer>,
    /// Next descriptor to examine; the driver's cached head.
    pub(crate) desc_next: usize,
    /// RCB index backing each descriptor slot.
    pub(crate) work_list: Vec<u16>,
    pub(crate) stats: RxQueueStats,
}

impl Rx {
    pub(crate) fn empty() -> Self {
        Self {
            rxd: None,
            desc_area: None,
            desc_next: 0,
            work_list: Vec::new(),
            stats: RxQueueStats::default(),
        }
    }
}

/// Allocate the receive side of one queue pair: the RCB arena (working plus
/// free list), every data buffer, and the armed descriptor ring.
pub(crate) fn alloc_rx(config: &I40eConfig, shared: &Arc<I40eShared>) -> Result<Rx, I40eDriverErr> {
    let ring_size = config.rx_ring_size;
    let free_list_size = ring_size;
    let count = ring_size + free_list_size;
    let buf_size = config.rx_buf_size();

    let mut rcb_area = Vec::with_capacity(count);
    for _ in 0..count {
        let mut dma = DmaBuffer::alloc(config.numa_id, buf_size, false)?;
        dma.offset_window(I40E_BUF_IPHDR_ALIGNMENT);

        let wrapper = Some(LoanWrapper::new(&dma));
        rcb_area.push(RxControlBlock {
            rcb_ref: AtomicU32::new(1),
            inner: Mutex::new(RcbInner { dma, wrapper }),
        });
    }

    let desc_area = DmaBuffer::alloc(
        config.numa_id,
        ring_size * core::mem::size_of::<RxDesc>(),
        true,
    )?;

    let work_list: Vec<u16> = (0..ring_size as u16).collect();
    let rcb_free: Vec<u16> = (ring_size as u16..count as u16).collect();

    // Arm every descriptor with its working buffer.
    let ring = unsafe {
        core::slice::from_raw_parts_mut(desc_area.address().as_mut_ptr::<RxDesc>(), ring_size)
    };
    for (i, desc) in ring.iter_mut().enumerate() {
        let mut node = MCSNode::new();
        let inner = rcb_area[i].inner.lock(&mut node);
        unsafe {
            desc.read.pkt_addr = u64::to_le(inner.dma.dma_address().as_usize() as u64);
            desc.read.hdr_addr = 0;
        }
    }
    desc_area.sync_for_dev();

    Ok(Rx {
        rxd: Some(Arc::new(RxData {
            rcb_area: rcb_area.into_boxed_slice(),
            rcb_free: Mutex::new(rcb_free),
            ring_size,
            free_list_size,
            rcb_pending: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            shared: shared.clone(),
        })),
        desc_area: Some(desc_area),
        desc_next: 0,
        work_list,
        stats: RxQueueStats::default(),
    })
}

/// Release the receive side of one queue. The descriptor ring goes away
/// immediately. Each RCB loses the driver's reference: at zero its buffer
/// is destroyed on the spot, otherwise it is counted as pending and its
/// recycle finishes the job. The shutdown flag is raised only after the
/// decrement pass so a concurrent recycle cannot observe it early.
pub(crate) fn free_rx_dma(rx: &mut Rx, shared: &Arc<I40eShared>) {
    let Some(rxd) = rx.rxd.take() else {
        return;
    };

    rx.desc_area = None;
    rx.desc_next = 0;
    rx.work_list.clear();

    {
        let mut node = MCSNode::new();
        let _guard = shared.rx_pending_lock.lock(&mut node);

        for rcb in rxd.rcb_area.iter() {
            let remaining = rcb.rcb_ref.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 {
                let mut node = MCSNode::new();
                let mut inner = rcb.inner.lock(&mut node);
                inner.wrapper = None;
                inner.dma.free();
            } else {
                rxd.rcb_pending.fetch_add(1, Ordering::AcqRel);
                shared.rx_pending.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    {
        let mut node = MCSNode::new();
        let _guard = shared.rx_pending_lock.lock(&mut node);
        rxd.shutdown.store(true, Ordering::Release);
    }

    // The arena itself is freed when the last strong reference drops: here
    // if nothing is pending, otherwise by the final recycle.
}

/// A receive buffer on loan to the stack. Dropping it is the recycle
/// callback.
pub(crate) struct RcbLoan {
    rxd: Arc<RxData>,
    index: u16,
    addr: *const u8,
    len: usize,
}

// The loan is the only reader of its buffer window until it drops, and the
// arena outlives the loan via the Arc.
unsafe impl Send for RcbLoan {}

impl LoanedBuf for RcbLoan {
    fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.addr, self.len) }
    }
}

impl Drop for RcbLoan {
    fn drop(&mut self) {
        let rxd = &self.rxd;
        let rcb = &rxd.rcb_area[self.index as usize];

        // Rebuild the loan wrapper ahead of the reference drop; the bind
        // path re-checks for an absent wrapper either way.
        {
            let mut node = MCSNode::new();
            let mut inner = rcb.inner.lock(&mut node);
            if inner.dma.is_bound() {
                inner.wrapper = Some(LoanWrapper::new(&inner.dma));
            }
        }

        rcb_free(rxd, self.index);

        let remaining = rcb.rcb_ref.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            // Only reachable during shutdown: the driver already gave up
            // its reference.
            {
                let mut node = MCSNode::new();
                let mut inner = rcb.inner.lock(&mut node);
                inner.wrapper = None;
                inner.dma.free();
            }

            let shared = &rxd.shared;
            let mut node = MCSNode::new();
            let _guard = shared.rx_pending_lock.lock(&mut node);

            rxd.rcb_pending.fetch_sub(1, Ordering::AcqRel);
            shared.rx_pending.fetch_sub(1, Ordering::AcqRel);

            if rxd.shutdown.load(Ordering::Acquire)
                && rxd.rcb_pending.load(Ordering::Acquire) == 0
            {
                shared.rx_pending_cv.notify_all();
            }
        }
    }
}

/// Deliver the frame in working slot `index` by loaning its buffer: swap a
/// replacement RCB into the slot, bump the reference count, and hand the
/// pre-built wrapper upward.
fn rx_bind(
    shared: &Arc<I40eShared>,
    rxd: &Arc<RxData>,
    work_list: &mut [u16],
    stats: &mut RxQueueStats,
    index: usize,
    plen: usize,
) -> Option<EtherFrame> {
    let Some(rep_index) = rcb_alloc(rxd) else {
        stats.rx_bind_norcb += 1;
        return None;
    };

    let rcb_index = work_list[index];
    let rcb = &rxd.rcb_area[rcb_index as usize];

    let addr = {
        let mut node = MCSNode::new();
        let mut inner = rcb.inner.lock(&mut node);

        if !inner.dma.is_bound() {
            stats.rx_bind_nobuf += 1;
            drop(inner);
            rcb_free(rxd, rep_index);
            return None;
        }

        if inner.wrapper.is_none() {
            inner.wrapper = Some(LoanWrapper::new(&inner.dma));
        }

        inner.dma.sync_for_kernel();
        if inner.dma.check().is_err() {
            shared.state_or(I40E_ERROR);
            drop(inner);
            rcb_free(rxd, rep_index);
            return None;
        }

        let wrapper = inner.wrapper.take().unwrap();
        debug_assert!(plen <= wrapper.size);
        wrapper.addr
    };

    rcb.rcb_ref.fetch_add(1, Ordering::AcqRel);

    let loan = RcbLoan {
        rxd: rxd.clone(),
        index: rcb_index,
        addr: addr as *const u8,
        len: plen,
    };

    work_list[index] = rep_index;
    Some(EtherFrame::loaned(Box::new(loan)))
}

/// Deliver the frame in working slot `index` by copying it into a fresh
/// buffer; the RCB stays in place and is immediately reusable.
fn rx_copy(
    shared: &Arc<I40eShared>,
    rxd: &Arc<RxData>,
    work_list: &[u16],
    stats: &mut RxQueueStats,
    index: usize,
    plen: usize,
) -> Option<EtherFrame> {
    let rcb = &rxd.rcb_area[work_list[index] as usize];

    let mut node = MCSNode::new();
    let inner = rcb.inner.lock(&mut node);

    inner.dma.sync_for_kernel();
    if inner.dma.check().is_err() {
        shared.state_or(I40E_ERROR);
        return None;
    }

    let src = unsafe { inner.dma.as_slice() };
    if plen > src.len() {
        stats.rx_copy_nomem += 1;
        return None;
    }

    Some(EtherFrame::from_vec(src[..plen].to_vec()))
}

/// Decode the hardware's checksum verdict for one frame and attach the
/// result flags.
fn rx_hcksum(stats: &mut RxQueueStats, mp: &mut EtherFrame, status: u64, err: u32, ptype: u8) {
    let pinfo = decode_ptype(ptype);
    let mut cksum = PacketHeaderFlags::empty();

    if !pinfo.known {
        stats.rx_hck_unknown += 1;
        return;
    }

    // Without the L3L4P bit there is no checksum verdict on the frame.
    if status & (1 << I40E_RX_DESC_STATUS_L3L4P_SHIFT) == 0 {
        stats.rx_hck_nol3l4p += 1;
        return;
    }

    // IPv6 frames carrying a destination-options or routing header get an
    // untrustworthy verdict; report nothing.
    if pinfo.outer_ip == OuterIp::Ip
        && pinfo.outer_ip_ver == OuterIpVer::Ipv6
        && status & (1 << I40E_RX_DESC_STATUS_IPV6EXADD_SHIFT) != 0
    {
        stats.rx_hck_v6skip += 1;
        return;
    }

    // IPE covers the only IP header of a plain frame but the inner header
    // of a tunneled one, where EIPE covers the outer.
    if pinfo.outer_ip == OuterIp::Ip && pinfo.outer_ip_ver == OuterIpVer::Ipv4 {
        if pinfo.tunnel == TunnelKind::None {
            if err & (1 << I40E_RX_DESC_ERROR_IPE_SHIFT) != 0 {
                stats.rx_hck_iperr += 1;
            } else {
                stats.rx_hck_v4hdrok += 1;
                cksum |= PacketHeaderFlags::IPV4_CSUM_IN_OK;
            }
        } else if err & (1 << I40E_RX_DESC_ERROR_EIPE_SHIFT) != 0 {
            stats.rx_hck_eiperr += 1;
        } else {
            stats.rx_hck_v4hdrok += 1;
            cksum |= PacketHeaderFlags::IPV4_CSUM_IN_OK;
        }
    }

    if pinfo.outer_frag == PtypeFrag::Frag {
        finish_hcksum(stats, mp, cksum);
        return;
    }

    if pinfo.tunnel != TunnelKind::None && pinfo.tunnel_end_prot == TunnelEndProt::Ipv4 {
        if err & (1 << I40E_RX_DESC_ERROR_IPE_SHIFT) != 0 {
            stats.rx_hck_iperr += 1;
        } else {
            stats.rx_hck_v4hdrok += 1;
            cksum |= PacketHeaderFlags::INNER_IPV4_CSUM_IN_OK;
        }
    }

    if pinfo.nontunnel_l4_valid() {
        if err & (1 << I40E_RX_DESC_ERROR_L4E_SHIFT) != 0 {
            stats.rx_hck_l4err += 1;
        } else {
            stats.rx_hck_l4hdrok += 1;
            cksum |= PacketHeaderFlags::FULL_CSUM_IN_OK;
        }
    }

    if pinfo.tunnel_inner_l4_valid() {
        if err & (1 << I40E_RX_DESC_ERROR_L4E_SHIFT) != 0 {
            stats.rx_hck_l4err += 1;
        } else {
            stats.rx_hck_l4hdrok += 1;
            cksum |= PacketHeaderFlags::INNER_FULL_CSUM_IN_OK;
        }
    }

    finish_hcksum(stats, mp, cksum);
}

fn finish_hcksum(stats: &mut RxQueueStats, mp: &mut EtherFrame, cksum: PacketHeaderFlags) {
    if !cksum.is_empty() {
        stats.rx_hck_set += 1;
        mp.set_csum_result(cksum);
    } else {
        stats.rx_hck_miss += 1;
    }
}

impl I40e {
    /// The receive pipeline. `poll_bytes` is `Some` when the stack polls
    /// with a byte budget and `None` from interrupt context; both are
    /// bounded by the per-invocation frame limit.
    pub(crate) fn ring_rx(&self, que_id: usize, poll_bytes: Option<usize>) -> Vec<EtherFrame> {
        let que = &self.que[que_id];

        let mut node = MCSNode::new();
        let mut rx = que.rx.lock(&mut node);

        if !self.shared.state_has(I40E_STARTED)
            || self
                .shared
                .state_has(I40E_OVERTEMP | I40E_SUSPENDED | I40E_ERROR)
        {
            return Vec::new();
        }

        let Rx {
            rxd,
            desc_area,
            desc_next,
            work_list,
            stats,
        } = &mut *rx;

        let (Some(rxd), Some(desc_area)) = (rxd.as_ref(), desc_area.as_ref()) else {
            return Vec::new();
        };

        desc_area.sync_for_kernel();
        if desc_area.check().is_err() {
            self.shared.state_or(I40E_ERROR);
            return Vec::new();
        }

        let ring_size = rxd.ring_size;
        let ring = unsafe {
            core::slice::from_raw_parts_mut(desc_area.address().as_mut_ptr::<RxDesc>(), ring_size)
        };

        let mut rx_bytes: u64 = 0;
        let mut rx_frames: u64 = 0;
        let mut mp_head: Vec<EtherFrame> = Vec::new();

        // `(cur_head, stword)` always name the next descriptor to examine,
        // never a consumed one; on exit they name one that has NOT been
        // processed.
        let mut cur_head = *desc_next;
        let mut stword = u64::from_le(unsafe { ring[cur_head].wb.status_error_len });

        while stword & (1 << I40E_RX_DESC_STATUS_DD_SHIFT) != 0 {
            let eop = stword & (1 << I40E_RX_DESC_STATUS_EOF_SHIFT) != 0;
            let error = ((stword & I40E_RXD_QW1_ERROR_MASK) >> I40E_RXD_QW1_ERROR_SHIFT) as u32;
            let plen =
                ((stword & I40E_RXD_QW1_LENGTH_PBUF_MASK) >> I40E_RXD_QW1_LENGTH_PBUF_SHIFT)
                    as usize;
            let ptype = ((stword & I40E_RXD_QW1_PTYPE_MASK) >> I40E_RXD_QW1_PTYPE_SHIFT) as u8;

            if !eop || error & I40E_RX_ERR_BITS != 0 {
                // Multi-descriptor frames are unsupported and errored
                // frames are consumed without delivery; either way the
                // descriptor is rearmed below.
                stats.rx_desc_error += 1;
            } else {
                if let Some(limit) = poll_bytes {
                    if rx_bytes as usize + plen > limit {
                        break;
                    }
                }
                rx_bytes += plen as u64;

                let mut mp = None;
                if plen >= self.config.rx_dma_min {
                    mp = rx_bind(&self.shared, rxd, work_list, stats, cur_head, plen);
                }
                if mp.is_none() {
                    mp = rx_copy(&self.shared, rxd, work_list, stats, cur_head, plen);
                }

                if let Some(mut mp) = mp {
                    if self.config.rx_hcksum_enable {
                        rx_hcksum(stats, &mut mp, stword, error, ptype);
                    }
                    mp_head.push(mp);
                }
            }

            // Rearm the descriptor with whatever RCB now occupies the slot
            // (the bind path may have swapped it).
            {
                let rcb = &rxd.rcb_area[work_list[cur_head] as usize];
                let mut node = MCSNode::new();
                let inner = rcb.inner.lock(&mut node);
                unsafe {
                    ring[cur_head].read.pkt_addr =
                        u64::to_le(inner.dma.dma_address().as_usize() as u64);
                    ring[cur_head].read.hdr_addr = 0;
                }
            }

            cur_head = next_desc(cur_head, 1, ring_size);
            stword = u64::from_le(unsafe { ring[cur_head].wb.status_error_len });

            rx_frames += 1;
            if rx_frames > self.config.rx_limit_per_intr as u64 {
                stats.rx_intr_limit += 1;
                break;
            }
        }

        desc_area.sync_for_dev();
        if desc_area.check().is_err() {
            self.shared.state_or(I40E_ERROR);
        }

        if rx_frames != 0 {
            *desc_next = cur_head;
            let tail = prev_desc(cur_head, 1, ring_size);
            self.regs.write32(qrx_tail(que_id), tail as u32);

            stats.rx_bytes += rx_bytes;
            stats.rx_packets += rx_frames;
        }

        mp_head
    }
}
