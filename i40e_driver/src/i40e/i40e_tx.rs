//! Transmit control blocks, offload-context derivation, and the transmit
//! pipeline.
//!
//! A frame is sent either by copying every fragment into one control
//! block's pre-allocated buffer, or by DMA-binding each fragment in place;
//! large frames and LSO always bind. Each control block occupies one
//! descriptor per bind cookie (or exactly one on the copy path), and a
//! context descriptor precedes the data descriptors when segmentation or
//! tunneling is requested. Completion is reported through the write-back
//! head word after the ring, not through per-descriptor done bits.

use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use bitflags::bitflags;
use core::mem::size_of;
use memoffset::offset_of;

use i40e_lib::{
    addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr},
    dma_map::{DmaMap, DmaSyncOp},
    net::{
        ether::{EtherHeader, EtherVlanHeader, ETHER_TYPE_IP, ETHER_TYPE_IPV6, ETHER_TYPE_VLAN,
            VXLAN_HDR_LEN},
        ip::{Ip, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP, SCTP_HDR_LEN},
        ipv6::Ip6Hdr,
        net_device::{PacketHeaderFlags, TunnelType},
        packet::EtherFrame,
        tcp::TCPHdr,
        udp::UDPHdr,
    },
    sync::mutex::{MCSNode, Mutex},
};

use crate::i40e::{
    i40e_buf::{DmaAttrs, DmaBuffer},
    i40e_regs::{
        qtx_tail, txd_tnl_set_decttl, txd_tnl_set_eiplen, txd_tnl_set_eipt, txd_tnl_set_l4tunlen,
        txd_tnl_set_l4tunt, TxContextDesc, TxDesc, I40E_TXD_CTX_QW1_CMD_SHIFT,
        I40E_TXD_CTX_QW1_MSS_SHIFT, I40E_TXD_CTX_QW1_TSO_LEN_SHIFT, I40E_TXD_QW1_CMD_SHIFT,
        I40E_TXD_QW1_OFFSET_SHIFT, I40E_TXD_QW1_TX_BUF_SZ_SHIFT, I40E_TX_CTX_DESC_TSO,
        I40E_TX_CTX_EXT_IP_IPV4, I40E_TX_CTX_EXT_IP_IPV4_NO_CSUM, I40E_TX_CTX_EXT_IP_IPV6,
        I40E_TX_CTX_TNL_UDP, I40E_TX_DESC_CMD_EOP, I40E_TX_DESC_CMD_ICRC,
        I40E_TX_DESC_CMD_IIPT_IPV4, I40E_TX_DESC_CMD_IIPT_IPV4_CSUM, I40E_TX_DESC_CMD_IIPT_IPV6,
        I40E_TX_DESC_CMD_L4T_EOFT_SCTP, I40E_TX_DESC_CMD_L4T_EOFT_TCP,
        I40E_TX_DESC_CMD_L4T_EOFT_UDP, I40E_TX_DESC_CMD_RS, I40E_TX_DESC_DTYPE_CONTEXT,
        I40E_TX_DESC_DTYPE_DATA, I40E_TX_DESC_LENGTH_IPLEN_SHIFT,
        I40E_TX_DESC_LENGTH_L4_FC_LEN_SHIFT, I40E_TX_DESC_LENGTH_MACLEN_SHIFT,
    },
    next_desc, I40e, I40eConfig, I40eDriverErr, I40E_ERROR, I40E_OVERTEMP, I40E_STARTED,
    I40E_SUSPENDED,
};

/// Per-queue transmit counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TxQueueStats {
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_descriptors: u64,
    pub tx_recycled: u64,
    pub tx_num_unblocked: u64,
    pub tx_err_notcb: u64,
    pub tx_err_nodescs: u64,
    pub tx_err_context: u64,
    pub tx_err_bindfail: u64,
    pub tx_hck_meoifail: u64,
    pub tx_hck_notun: u64,
    pub tx_hck_nol2info: u64,
    pub tx_hck_nol3info: u64,
    pub tx_hck_nol4info: u64,
    pub tx_hck_badl3: u64,
    pub tx_hck_badl4: u64,
}

/// One device-visible cookie of a bound fragment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DmaBindInfo {
    pub(crate) paddr: PhyAddr,
    pub(crate) len: usize,
}

/// What a transmit control block currently carries.
#[derive(Debug, Default)]
pub(crate) enum TcbState {
    #[default]
    None,
    /// Payload copied into the control block's own buffer.
    Copy,
    /// Fragment bound in place through one of the two pre-created maps.
    Bind {
        used_lso: bool,
        cookies: Vec<DmaBindInfo>,
    },
    /// Sentinel occupying a context descriptor's slot.
    Context,
}

pub(crate) struct TxControlBlock {
    pub(crate) state: TcbState,
    /// Copy-path destination buffer.
    pub(crate) dma: DmaBuffer,
    /// Bind map for non-LSO frames.
    pub(crate) bind_map: DmaMap,
    /// Bind map for LSO frames, with the larger cookie allowance.
    pub(crate) lso_map: DmaMap,
    /// The frame being transmitted, held until write-back confirms it.
    pub(crate) tcb_mp: Option<EtherFrame>,
}

impl TxControlBlock {
    /// Descriptors this control block occupies.
    fn desc_span(&self) -> usize {
        match &self.state {
            TcbState::Bind { cookies, .. } => cookies.len(),
            _ => 1,
        }
    }
}

/// The control-block arena and free pool, shared so that blocks can be
/// allocated and bound before the ring lock is taken.
pub(crate) struct TxData {
    pub(crate) tcb_area: Box<[Mutex<TxControlBlock>]>,
    tcb_free: Mutex<Vec<u16>>,
    pub(crate) free_list_size: usize,
    pub(crate) ring_size: usize,
}

impl TxData {
    #[allow(dead_code)]
    pub(crate) fn tcb_free_count(&self) -> usize {
        let mut node = MCSNode::new();
        self.tcb_free.lock(&mut node).len()
    }
}

fn tcb_alloc(txd: &TxData) -> Option<u16> {
    let mut node = MCSNode::new();
    let mut free = txd.tcb_free.lock(&mut node);
    free.pop()
}

fn tcb_free(txd: &TxData, index: u16) {
    let mut node = MCSNode::new();
    let mut free = txd.tcb_free.lock(&mut node);
    debug_assert!(free.len() < txd.free_list_size);
    free.push(index);
}

/// Return a control block to its pristine state: unbind, drop any frame
/// reference, clear the variant tag.
fn tcb_reset(tcb: &mut TxControlBlock) {
    match &tcb.state {
        TcbState::Copy => {
            tcb.dma.set_len(0);
        }
        TcbState::Bind { used_lso, .. } => {
            if *used_lso {
                tcb.lso_map.unload();
            } else {
                tcb.bind_map.unload();
            }
        }
        TcbState::Context => {}
        TcbState::None => {}
    }

    tcb.state = TcbState::None;
    tcb.tcb_mp = None;
}

/// Per-queue transmit state, guarded by the queue's tx lock.
pub(crate) struct Tx {
    pub(crate) txd: Option<Arc<TxData>>,
    /// `ring_size + 1` descriptor slots; the trailing one is the write-back
    /// head target.
    pub(crate) desc_area: Option<DmaBuffer>,
    pub(crate) desc_head: usize,
    pub(crate) desc_tail: usize,
    pub(crate) desc_free: usize,
    /// Owning control block of each descriptor slot; every slot a block
    /// covers names it.
    pub(crate) work_list: Vec<Option<u16>>,
    pub(crate) blocked: bool,
    pub(crate) stats: TxQueueStats,
}

impl Tx {
    pub(crate) fn empty() -> Self {
        Self {
            txd: None,
            desc_area: None,
            desc_head: 0,
            desc_tail: 0,
            desc_free: 0,
            work_list: Vec::new(),
            blocked: false,
            stats: TxQueueStats::default(),
        }
    }

    pub(crate) fn teardown(&mut self) {
        self.txd = None;
        self.desc_area = None;
        self.desc_head = 0;
        self.desc_tail = 0;
        self.desc_free = 0;
        self.work_list.clear();
        self.blocked = false;
    }

    /// The write-back head word, living just past the last descriptor.
    fn read_wbhead(&self) -> usize {
        let desc_area = self.desc_area.as_ref().unwrap();
        let off = self.work_list.len() * size_of::<TxDesc>();
        let ptr = (desc_area.address() + off).as_ptr::<u32>();
        u32::from_le(unsafe { core::ptr::read_volatile(ptr) }) as usize
    }
}

/// Allocate the transmit side of one queue pair: the descriptor ring with
/// its write-back slot, and a free pool of 1.5x ring-size control blocks,
/// each carrying a copy buffer and both bind maps.
pub(crate) fn alloc_tx(config: &I40eConfig, attrs: &DmaAttrs) -> Result<Tx, I40eDriverErr> {
    let ring_size = config.tx_ring_size;
    let free_list_size = ring_size + (ring_size >> 1);

    let desc_area = DmaBuffer::alloc(
        config.numa_id,
        (ring_size + 1) * size_of::<TxDesc>(),
        true,
    )?;

    let mut tcb_area = Vec::with_capacity(free_list_size);
    for _ in 0..free_list_size {
        let dma = DmaBuffer::alloc(config.numa_id, config.tx_buf_size(), false)?;
        tcb_area.push(Mutex::new(TxControlBlock {
            state: TcbState::None,
            dma,
            bind_map: DmaMap::new(attrs.txbind_attr),
            lso_map: DmaMap::new(attrs.txbind_lso_attr),
            tcb_mp: None,
        }));
    }

    Ok(Tx {
        txd: Some(Arc::new(TxData {
            tcb_area: tcb_area.into_boxed_slice(),
            tcb_free: Mutex::new((0..free_list_size as u16).collect()),
            free_list_size,
            ring_size,
        })),
        desc_area: Some(desc_area),
        desc_head: 0,
        desc_tail: 0,
        desc_free: ring_size,
        work_list: vec![None; ring_size],
        blocked: false,
        stats: TxQueueStats::default(),
    })
}

//===========================================================================
// Offload-context derivation

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct MeoiFlags: u8 {
        const L2INFO_SET = 0x01;
        const VLAN_TAGGED = 0x02;
        const L3INFO_SET = 0x04;
        const L4INFO_SET = 0x10;
        const TUNNEL_INFO_SET = 0x40;
    }
}

const MEOI_L2_L3_L4: MeoiFlags = MeoiFlags::L2INFO_SET
    .union(MeoiFlags::L3INFO_SET)
    .union(MeoiFlags::L4INFO_SET);

/// Header geometry extracted by walking the fragment chain, without ever
/// pulling it up.
#[derive(Debug, Default)]
struct MacEtherOffloadInfo {
    flags: MeoiFlags,
    l2hlen: u8,
    l3proto: u16,
    l3hlen: u8,
    l4proto: u8,
    l4hlen: u8,
    tun_protlen: u8,
    tun_l2hlen: u8,
    tun_l3proto: u16,
    tun_l3hlen: u8,
    tun_l4proto: u8,
    tun_l4hlen: u8,
}

fn byte_at(mp: &EtherFrame, mut off: usize) -> u8 {
    for seg in mp.segs.iter() {
        let bytes = seg.as_bytes();
        if off < bytes.len() {
            return bytes[off];
        }
        off -= bytes.len();
    }
    unreachable!("offset validated against the chain length");
}

fn meoi_get_u8(mp: &EtherFrame, off: usize) -> Option<u8> {
    if off + size_of::<u16>() > mp.len() {
        return None;
    }

    Some(byte_at(mp, off))
}

/// Fetch a big-endian 16-bit value that may straddle a fragment boundary.
fn meoi_get_be16(mp: &EtherFrame, off: usize) -> Option<u16> {
    if off + size_of::<u16>() > mp.len() {
        return None;
    }

    Some(((byte_at(mp, off) as u16) << 8) | byte_at(mp, off + 1) as u16)
}

/// Walk the chain starting `starting_off` bytes in and fill in the L2/L3/L4
/// geometry; for a VXLAN frame, recurse past the outer headers for the
/// inner set.
fn mac_ether_offload_info(
    mp: &EtherFrame,
    ttype: TunnelType,
    starting_off: usize,
) -> Result<MacEtherOffloadInfo, ()> {
    let mut meoi = MacEtherOffloadInfo::default();

    let mut off = offset_of!(EtherHeader, ether_type) + starting_off;
    let mut ether = meoi_get_be16(mp, off).ok_or(())?;

    let maclen;
    if ether == ETHER_TYPE_VLAN {
        off = offset_of!(EtherVlanHeader, ether_proto) + starting_off;
        ether = meoi_get_be16(mp, off).ok_or(())?;
        meoi.flags |= MeoiFlags::VLAN_TAGGED;
        maclen = size_of::<EtherVlanHeader>();
    } else {
        maclen = size_of::<EtherHeader>();
    }
    meoi.flags |= MeoiFlags::L2INFO_SET;
    meoi.l2hlen = maclen as u8;
    meoi.l3proto = ether;

    let iplen;
    let ipproto;
    match ether {
        ETHER_TYPE_IP => {
            // IPv4 header length is variable.
            off = offset_of!(Ip, ip_ver_len) + maclen + starting_off;
            let ihl = meoi_get_u8(mp, off).ok_or(())? & 0x0f;
            if ihl < 5 {
                return Err(());
            }
            iplen = ihl as usize * 4;

            off = offset_of!(Ip, ip_p) + maclen + starting_off;
            ipproto = meoi_get_u8(mp, off).ok_or(())?;
        }
        ETHER_TYPE_IPV6 => {
            iplen = size_of::<Ip6Hdr>();
            off = offset_of!(Ip6Hdr, next_header) + maclen + starting_off;
            ipproto = meoi_get_u8(mp, off).ok_or(())?;
        }
        _ => return Ok(meoi),
    }
    meoi.l3hlen = iplen as u8;
    meoi.l4proto = ipproto;
    meoi.flags |= MeoiFlags::L3INFO_SET;

    let l4len = match ipproto {
        IPPROTO_TCP => {
            off = offset_of!(TCPHdr, th_x2_off) + maclen + iplen + starting_off;
            let doff = (meoi_get_u8(mp, off).ok_or(())? & 0xf0) >> 4;
            if doff < 5 {
                return Err(());
            }
            doff as usize * 4
        }
        IPPROTO_UDP => size_of::<UDPHdr>(),
        IPPROTO_SCTP => SCTP_HDR_LEN,
        _ => return Ok(meoi),
    };
    meoi.l4hlen = l4len as u8;
    meoi.flags |= MeoiFlags::L4INFO_SET;

    if ttype == TunnelType::Vxlan {
        // Tunneling is only recognized within UDP.
        if ipproto != IPPROTO_UDP {
            return Err(());
        }

        debug_assert_eq!(starting_off, 0);
        let off = maclen + iplen + l4len + VXLAN_HDR_LEN;
        let inner = mac_ether_offload_info(mp, TunnelType::None, off)?;

        if !inner.flags.contains(MEOI_L2_L3_L4) {
            return Err(());
        }

        meoi.tun_protlen = VXLAN_HDR_LEN as u8;
        meoi.tun_l2hlen = inner.l2hlen;
        meoi.tun_l3proto = inner.l3proto;
        meoi.tun_l3hlen = inner.l3hlen;
        meoi.tun_l4proto = inner.l4proto;
        meoi.tun_l4hlen = inner.l4hlen;
        meoi.flags |= MeoiFlags::TUNNEL_INFO_SET;
    }

    Ok(meoi)
}

/// The decoded offload request for one frame, ready to be folded into the
/// data descriptors and, when needed, a context descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct TxContext {
    pub(crate) data_cmdflags: u32,
    pub(crate) data_offsets: u32,
    pub(crate) tunneled: bool,
    pub(crate) tunnel_fld: u32,
    pub(crate) ctx_cmdflags: u32,
    pub(crate) tso_len: u32,
    pub(crate) mss: u32,
}

/// Which counter a failed derivation charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxCtxError {
    MeoiFail,
    NoTun,
    NoL2Info,
    NoL3Info,
    NoL4Info,
    BadL3,
    BadL4,
    LsoFlags,
}

fn l4t_for(proto: u8) -> Result<u32, TxCtxError> {
    match proto {
        IPPROTO_TCP => Ok(I40E_TX_DESC_CMD_L4T_EOFT_TCP),
        IPPROTO_UDP => Ok(I40E_TX_DESC_CMD_L4T_EOFT_UDP),
        IPPROTO_SCTP => Ok(I40E_TX_DESC_CMD_L4T_EOFT_SCTP),
        _ => Err(TxCtxError::BadL4),
    }
}

/// Turn a frame's offload metadata into descriptor fields, validating that
/// the headers needed for each request are actually present.
pub(crate) fn tx_context(
    config: &I40eConfig,
    mp: &EtherFrame,
) -> Result<TxContext, TxCtxError> {
    let mut tctx = TxContext::default();

    if !config.tx_hcksum_enable {
        return Ok(tctx);
    }

    let chkflags = mp.csum_flags.out_flags();
    let lso = mp.csum_flags.contains(PacketHeaderFlags::TCP_TSO);
    let mss = mp.mss.unwrap_or(0);
    let ttype = mp.tunnel;

    if chkflags.is_empty() && !lso {
        return Ok(tctx);
    }

    // An inner-checksum request implies a tunneled frame.
    let tunneled = chkflags.intersects(
        PacketHeaderFlags::INNER_IPV4_CSUM_OUT | PacketHeaderFlags::INNER_PSEUDO_CSUM_OUT,
    );
    if tunneled && ttype != TunnelType::Vxlan {
        return Err(TxCtxError::NoTun);
    }
    tctx.tunneled = tunneled;

    let meo =
        mac_ether_offload_info(mp, ttype, 0).map_err(|_| TxCtxError::MeoiFail)?;

    if tunneled {
        if !meo.flags.contains(MeoiFlags::L2INFO_SET) {
            return Err(TxCtxError::NoL2Info);
        }
        if !meo.flags.contains(MeoiFlags::L3INFO_SET) {
            return Err(TxCtxError::NoL3Info);
        }
        if !meo.flags.contains(MeoiFlags::L4INFO_SET) || meo.l4proto != IPPROTO_UDP {
            return Err(TxCtxError::BadL4);
        }
        if !meo.flags.contains(MeoiFlags::TUNNEL_INFO_SET) {
            return Err(TxCtxError::MeoiFail);
        }

        // Only the outer IPv4 header checksum is supported on the outer
        // headers of a tunneled frame.
        if chkflags.contains(PacketHeaderFlags::PSEUDO_CSUM_OUT) {
            return Err(TxCtxError::NoTun);
        }

        // UDP header, inner MAC and the tunnel protocol header together
        // form the L4 tunneling length.
        let l4tunlen = meo.l4hlen as u32 + meo.tun_l2hlen as u32 + meo.tun_protlen as u32;

        let eipt = if chkflags.contains(PacketHeaderFlags::IPV4_CSUM_OUT) {
            if meo.l3proto == ETHER_TYPE_IP {
                I40E_TX_CTX_EXT_IP_IPV4
            } else {
                return Err(TxCtxError::BadL3);
            }
        } else if meo.l3proto == ETHER_TYPE_IP {
            I40E_TX_CTX_EXT_IP_IPV4_NO_CSUM
        } else if meo.l3proto == ETHER_TYPE_IPV6 {
            I40E_TX_CTX_EXT_IP_IPV6
        } else {
            return Err(TxCtxError::BadL3);
        };

        tctx.tunnel_fld = txd_tnl_set_eipt(eipt)
            | txd_tnl_set_eiplen(meo.l3hlen as u32 >> 2)
            | txd_tnl_set_l4tunt(I40E_TX_CTX_TNL_UDP)
            | txd_tnl_set_l4tunlen(l4tunlen >> 1)
            | txd_tnl_set_decttl(0);

        // The MAC length always describes the outer header.
        tctx.data_offsets |=
            ((meo.l2hlen as u32) >> 1) << I40E_TX_DESC_LENGTH_MACLEN_SHIFT;

        // When tunneled, IIPT applies to the inner IP header.
        if chkflags.contains(PacketHeaderFlags::INNER_IPV4_CSUM_OUT) {
            if meo.tun_l3proto != ETHER_TYPE_IP {
                return Err(TxCtxError::BadL3);
            }
            tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV4_CSUM;
        } else if meo.l3proto == ETHER_TYPE_IP {
            tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV4;
        } else if meo.l3proto == ETHER_TYPE_IPV6 {
            tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV6;
        } else {
            return Err(TxCtxError::BadL3);
        }

        tctx.data_offsets |=
            ((meo.tun_l3hlen as u32) >> 2) << I40E_TX_DESC_LENGTH_IPLEN_SHIFT;

        if chkflags.contains(PacketHeaderFlags::INNER_PSEUDO_CSUM_OUT) {
            tctx.data_cmdflags |= l4t_for(meo.tun_l4proto)?;

            // A non-zero L4LEN is what arms the inner L4 checksum.
            tctx.data_offsets |=
                ((meo.tun_l4hlen as u32) >> 2) << I40E_TX_DESC_LENGTH_L4_FC_LEN_SHIFT;
        }
    } else {
        if chkflags.contains(PacketHeaderFlags::IPV4_CSUM_OUT) {
            if !meo.flags.contains(MeoiFlags::L2INFO_SET) {
                return Err(TxCtxError::NoL2Info);
            }
            if !meo.flags.contains(MeoiFlags::L3INFO_SET) {
                return Err(TxCtxError::NoL3Info);
            }
            if meo.l3proto != ETHER_TYPE_IP {
                return Err(TxCtxError::BadL3);
            }

            tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV4_CSUM;
            tctx.data_offsets |=
                ((meo.l2hlen as u32) >> 1) << I40E_TX_DESC_LENGTH_MACLEN_SHIFT;
            tctx.data_offsets |=
                ((meo.l3hlen as u32) >> 2) << I40E_TX_DESC_LENGTH_IPLEN_SHIFT;
        }

        if chkflags.contains(PacketHeaderFlags::PSEUDO_CSUM_OUT) {
            if !meo.flags.contains(MeoiFlags::L4INFO_SET) {
                return Err(TxCtxError::NoL4Info);
            }

            if !chkflags.contains(PacketHeaderFlags::IPV4_CSUM_OUT) {
                if !meo.flags.contains(MeoiFlags::L2INFO_SET) {
                    return Err(TxCtxError::NoL2Info);
                }
                if !meo.flags.contains(MeoiFlags::L3INFO_SET) {
                    return Err(TxCtxError::NoL3Info);
                }

                if meo.l3proto == ETHER_TYPE_IP {
                    tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV4;
                } else if meo.l3proto == ETHER_TYPE_IPV6 {
                    tctx.data_cmdflags |= I40E_TX_DESC_CMD_IIPT_IPV6;
                } else {
                    return Err(TxCtxError::BadL3);
                }

                tctx.data_offsets |=
                    ((meo.l2hlen as u32) >> 1) << I40E_TX_DESC_LENGTH_MACLEN_SHIFT;
                tctx.data_offsets |=
                    ((meo.l3hlen as u32) >> 2) << I40E_TX_DESC_LENGTH_IPLEN_SHIFT;
            }

            tctx.data_cmdflags |= l4t_for(meo.l4proto)?;
            tctx.data_offsets |=
                ((meo.l4hlen as u32) >> 2) << I40E_TX_DESC_LENGTH_L4_FC_LEN_SHIFT;
        }
    }

    if lso {
        // Segmentation needs both header checksums armed alongside it.
        if !(chkflags.contains(PacketHeaderFlags::IPV4_CSUM_OUT)
            && chkflags.contains(PacketHeaderFlags::PSEUDO_CSUM_OUT))
        {
            return Err(TxCtxError::LsoFlags);
        }

        tctx.ctx_cmdflags |= I40E_TX_CTX_DESC_TSO;
        tctx.mss = mss;
        tctx.tso_len =
            (mp.len() - (meo.l2hlen as usize + meo.l3hlen as usize + meo.l4hlen as usize)) as u32;
    }

    Ok(tctx)
}

//===========================================================================
// Transmit pipeline

/// Bind one fragment through a fresh control block, recording the cookies.
/// Returns the block index and its cookie count.
fn tx_bind_fragment(txd: &TxData, seg: &[u8], use_lso: bool) -> Option<(u16, usize)> {
    let index = tcb_alloc(txd)?;

    let mut node = MCSNode::new();
    let mut tcb = txd.tcb_area[index as usize].lock(&mut node);

    let map = if use_lso {
        &mut tcb.lso_map
    } else {
        &mut tcb.bind_map
    };

    if map
        .load(VirtAddr::new(seg.as_ptr() as usize), seg.len())
        .is_err()
    {
        drop(tcb);
        tcb_free(txd, index);
        return None;
    }

    let _ = map.sync(DmaSyncOp::PreRead);

    let cookies: Vec<DmaBindInfo> = map
        .get_segments()
        .iter()
        .map(|s| DmaBindInfo {
            paddr: s.ds_addr,
            len: s.ds_len,
        })
        .collect();
    let ncookies = cookies.len();

    tcb.state = TcbState::Bind {
        used_lso: use_lso,
        cookies,
    };

    Some((index, ncookies))
}

/// Write one data descriptor at the tail and advance.
fn set_data_desc(
    ring: &mut [TxDesc],
    desc_tail: &mut usize,
    desc_free: &mut usize,
    tctx: &TxContext,
    paddr: PhyAddr,
    len: usize,
    last_desc: bool,
) {
    *desc_free -= 1;
    let ring_size = ring.len();
    let txdesc = &mut ring[*desc_tail];
    *desc_tail = next_desc(*desc_tail, 1, ring_size);

    let mut cmd = I40E_TX_DESC_CMD_ICRC | tctx.data_cmdflags;

    // The device starts transmitting once it sees a descriptor with EOP,
    // and RS asks it to report the frame's completion in the write-back
    // head.
    if last_desc {
        cmd |= I40E_TX_DESC_CMD_EOP | I40E_TX_DESC_CMD_RS;
    }

    txdesc.buffer_addr = u64::to_le(paddr.as_usize() as u64);
    txdesc.cmd_type_offset_bsz = u64::to_le(
        I40E_TX_DESC_DTYPE_DATA
            | ((tctx.data_offsets as u64) << I40E_TXD_QW1_OFFSET_SHIFT)
            | ((cmd as u64) << I40E_TXD_QW1_CMD_SHIFT)
            | ((len as u64) << I40E_TXD_QW1_TX_BUF_SZ_SHIFT),
    );
}

enum TxFailStat {
    NoTcb,
    NoDescs,
    BindFail,
}

impl I40e {
    fn bump_ctx_stat(&self, que_id: usize, e: TxCtxError) {
        let mut node = MCSNode::new();
        let mut tx = self.que[que_id].tx.lock(&mut node);
        let stats = &mut tx.stats;

        stats.tx_err_context += 1;
        match e {
            TxCtxError::MeoiFail => stats.tx_hck_meoifail += 1,
            TxCtxError::NoTun => stats.tx_hck_notun += 1,
            TxCtxError::NoL2Info => stats.tx_hck_nol2info += 1,
            TxCtxError::NoL3Info => stats.tx_hck_nol3info += 1,
            TxCtxError::NoL4Info => stats.tx_hck_nol4info += 1,
            TxCtxError::BadL3 => stats.tx_hck_badl3 += 1,
            TxCtxError::BadL4 => stats.tx_hck_badl4 += 1,
            TxCtxError::LsoFlags => stats.tx_hck_badl4 += 1,
        }
    }

    /// Resource-exhaustion rollback: free every control block allocated for
    /// the attempt, recover the frame, mark the ring blocked, and hand the
    /// frame back for the stack to retry after `tx_ring_update`.
    fn tx_rollback(
        &self,
        que_id: usize,
        txd: &TxData,
        allocated: &[u16],
        mut mp: Option<EtherFrame>,
        stat: TxFailStat,
    ) -> Option<EtherFrame> {
        for &index in allocated {
            let mut node = MCSNode::new();
            let mut tcb = txd.tcb_area[index as usize].lock(&mut node);

            if let Some(m) = tcb.tcb_mp.take() {
                if mp.is_none() {
                    mp = Some(m);
                }
            }
            tcb_reset(&mut tcb);
            drop(tcb);
            tcb_free(txd, index);
        }

        {
            let mut node = MCSNode::new();
            let mut tx = self.que[que_id].tx.lock(&mut node);
            match stat {
                TxFailStat::NoTcb => tx.stats.tx_err_notcb += 1,
                TxFailStat::NoDescs => tx.stats.tx_err_nodescs += 1,
                TxFailStat::BindFail => tx.stats.tx_err_bindfail += 1,
            }
            tx.blocked = true;
        }

        mp
    }

    /// Transmit one frame. `None` means the frame was consumed (sent or
    /// dropped); `Some` gives it back under backpressure.
    pub(crate) fn ring_tx(&self, que_id: usize, mp: EtherFrame) -> Option<EtherFrame> {
        if !self.shared.state_has(I40E_STARTED)
            || self
                .shared
                .state_has(I40E_OVERTEMP | I40E_SUSPENDED | I40E_ERROR)
            || !self
                .shared
                .link_active
                .load(core::sync::atomic::Ordering::Acquire)
        {
            return None;
        }

        let tctx = match tx_context(&self.config, &mp) {
            Ok(t) => t,
            Err(e) => {
                self.bump_ctx_stat(que_id, e);
                return None;
            }
        };

        let use_lso = tctx.ctx_cmdflags & I40E_TX_CTX_DESC_TSO != 0;
        let do_ctx_desc = use_lso || tctx.tunneled;

        let mpsize = mp.len();
        let nbufs = mp.num_bufs();
        if nbufs == 0 {
            return None;
        }

        let txd = {
            let mut node = MCSNode::new();
            let tx = self.que[que_id].tx.lock(&mut node);
            tx.txd.clone()
        };
        let Some(txd) = txd else {
            return None;
        };

        let mut allocated: Vec<u16> = Vec::with_capacity(nbufs + 1);
        let mut needed_desc: usize = 0;
        let mut mp = Some(mp);

        // A context descriptor gets a sentinel control block so the
        // recycler treats its slot like any other.
        let mut tcb_ctx: Option<u16> = None;
        if do_ctx_desc {
            match tcb_alloc(&txd) {
                Some(index) => {
                    let mut node = MCSNode::new();
                    let mut tcb = txd.tcb_area[index as usize].lock(&mut node);
                    tcb.state = TcbState::Context;
                    drop(tcb);

                    allocated.push(index);
                    tcb_ctx = Some(index);
                    needed_desc += 1;
                }
                None => {
                    return self.tx_rollback(que_id, &txd, &allocated, mp, TxFailStat::NoTcb);
                }
            }
        }

        let do_dma_bind = use_lso || mpsize > self.config.tx_dma_min;
        let mut tcb_bind: Vec<(u16, usize)> = Vec::new();
        let mut tcb_data: Option<u16> = None;

        if do_dma_bind {
            // Bind each non-empty fragment through its own control block
            // and count a descriptor per cookie.
            let frame = mp.as_ref().unwrap();
            for seg in frame.segs.iter() {
                let bytes = seg.as_bytes();
                if bytes.is_empty() {
                    continue;
                }

                match tx_bind_fragment(&txd, bytes, use_lso) {
                    Some((index, ncookies)) => {
                        allocated.push(index);
                        tcb_bind.push((index, ncookies));
                        needed_desc += ncookies;
                    }
                    None => {
                        log::error!("i40e: tx DMA bind failed on queue {}", que_id);
                        return self.tx_rollback(
                            que_id,
                            &txd,
                            &allocated,
                            mp,
                            TxFailStat::BindFail,
                        );
                    }
                }
            }

            // The first fragment's control block owns the frame until
            // write-back.
            let first = tcb_bind[0].0;
            let mut node = MCSNode::new();
            let mut tcb = txd.tcb_area[first as usize].lock(&mut node);
            tcb.tcb_mp = mp.take();
        } else {
            // Copy every fragment end-to-end into a single control block.
            let Some(index) = tcb_alloc(&txd) else {
                return self.tx_rollback(que_id, &txd, &allocated, mp, TxFailStat::NoTcb);
            };
            allocated.push(index);

            let mut node = MCSNode::new();
            let mut tcb = txd.tcb_area[index as usize].lock(&mut node);
            debug_assert!(tcb.dma.is_empty());
            debug_assert!(tcb.dma.size() >= mpsize);

            let frame = mp.as_ref().unwrap();
            let mut off = 0;
            {
                let dst = unsafe { tcb.dma.as_mut_slice() };
                for seg in frame.segs.iter() {
                    let bytes = seg.as_bytes();
                    dst[off..off + bytes.len()].copy_from_slice(bytes);
                    off += bytes.len();
                }
            }
            debug_assert_eq!(off, mpsize);
            tcb.dma.set_len(off);
            tcb.dma.sync_for_dev();

            tcb.state = TcbState::Copy;
            tcb.tcb_mp = mp.take();
            tcb_data = Some(index);
            needed_desc += 1;
        }

        // Descriptor emission, under the ring lock.
        let mut node = MCSNode::new();
        let mut tx = self.que[que_id].tx.lock(&mut node);

        // The ring may have been torn down since the control blocks were
        // prepared; that counts as having no descriptors.
        if tx.txd.is_none()
            || tx.desc_free < self.config.tx_block_thresh
            || tx.desc_free < needed_desc
        {
            drop(tx);
            return self.tx_rollback(que_id, &txd, &allocated, None, TxFailStat::NoDescs);
        }

        let Tx {
            desc_area,
            desc_tail,
            desc_free,
            work_list,
            stats,
            ..
        } = &mut *tx;

        let desc_area = desc_area.as_ref().unwrap();
        let ring_size = work_list.len();
        let ring = unsafe {
            core::slice::from_raw_parts_mut(desc_area.address().as_mut_ptr::<TxDesc>(), ring_size)
        };

        if let Some(ctx_index) = tcb_ctx {
            // The context descriptor must precede the data descriptors.
            *desc_free -= 1;
            let tail = *desc_tail;
            work_list[tail] = Some(ctx_index);
            *desc_tail = next_desc(tail, 1, ring_size);

            let ctxdesc =
                unsafe { &mut *(&mut ring[tail] as *mut TxDesc as *mut TxContextDesc) };
            ctxdesc.tunneling_params = u32::to_le(if tctx.tunneled { tctx.tunnel_fld } else { 0 });
            ctxdesc.l2tag2 = 0;
            ctxdesc.rsvd = 0;

            let mut qw1 = I40E_TX_DESC_DTYPE_CONTEXT;
            if tctx.ctx_cmdflags & I40E_TX_CTX_DESC_TSO != 0 {
                qw1 |= ((tctx.ctx_cmdflags as u64) << I40E_TXD_CTX_QW1_CMD_SHIFT)
                    | ((tctx.tso_len as u64) << I40E_TXD_CTX_QW1_TSO_LEN_SHIFT)
                    | ((tctx.mss as u64) << I40E_TXD_CTX_QW1_MSS_SHIFT);
            }
            ctxdesc.type_cmd_tso_mss = u64::to_le(qw1);
        }

        if do_dma_bind {
            let nbind = tcb_bind.len();
            for (i, &(index, _)) in tcb_bind.iter().enumerate() {
                let cookies = {
                    let mut node = MCSNode::new();
                    let tcb = txd.tcb_area[index as usize].lock(&mut node);
                    match &tcb.state {
                        TcbState::Bind { cookies, .. } => cookies.clone(),
                        _ => Vec::new(),
                    }
                };

                for (c, cookie) in cookies.iter().enumerate() {
                    let last_desc = i == nbind - 1 && c == cookies.len() - 1;
                    work_list[*desc_tail] = Some(index);
                    set_data_desc(
                        ring,
                        desc_tail,
                        desc_free,
                        &tctx,
                        cookie.paddr,
                        cookie.len,
                        last_desc,
                    );
                }
            }
        } else {
            let index = tcb_data.unwrap();
            let (paddr, len) = {
                let mut node = MCSNode::new();
                let tcb = txd.tcb_area[index as usize].lock(&mut node);
                (tcb.dma.dma_address(), tcb.dma.len())
            };

            work_list[*desc_tail] = Some(index);
            set_data_desc(ring, desc_tail, desc_free, &tctx, paddr, len, true);
        }

        desc_area.sync_for_dev();
        self.regs.write32(qtx_tail(que_id), *desc_tail as u32);

        stats.tx_bytes += mpsize as u64;
        stats.tx_packets += 1;
        stats.tx_descriptors += needed_desc as u64;

        None
    }

    /// Reclaim descriptors the device has written back, unblocking the ring
    /// if enough opened up.
    pub(crate) fn tx_recycle_ring(&self, que_id: usize) {
        let que = &self.que[que_id];

        let mut node = MCSNode::new();
        let mut tx = que.tx.lock(&mut node);

        let Some(txd) = tx.txd.clone() else {
            return;
        };
        let ring_size = txd.ring_size;

        debug_assert!(tx.desc_free <= ring_size);
        if tx.desc_free == ring_size {
            // Nothing outstanding.
            let notify = tx.blocked;
            if notify {
                tx.blocked = false;
                tx.stats.tx_num_unblocked += 1;
            }
            drop(tx);
            if notify {
                self.shared.stack.tx_ring_update(que_id);
            }
            return;
        }

        {
            let desc_area = tx.desc_area.as_ref().unwrap();
            desc_area.sync_for_kernel();
            if desc_area.check().is_err() {
                drop(tx);
                self.shared.state_or(I40E_ERROR);
                return;
            }
        }

        let wbhead = tx.read_wbhead();
        debug_assert!(wbhead < ring_size);

        let mut toclean = tx.desc_head;
        let mut count: usize = 0;
        let mut reclaimed: Vec<u16> = Vec::new();

        {
            let Tx {
                desc_area,
                work_list,
                ..
            } = &mut *tx;
            let desc_area = desc_area.as_ref().unwrap();
            let ring = unsafe {
                core::slice::from_raw_parts_mut(
                    desc_area.address().as_mut_ptr::<TxDesc>(),
                    ring_size,
                )
            };

            while toclean != wbhead {
                let Some(index) = work_list[toclean] else {
                    debug_assert!(false, "descriptor slot without an owner");
                    break;
                };
                reclaimed.push(index);

                // A bound control block covers one descriptor per cookie.
                let span = {
                    let mut node = MCSNode::new();
                    let tcb = txd.tcb_area[index as usize].lock(&mut node);
                    tcb.desc_span()
                };

                for _ in 0..span {
                    work_list[toclean] = None;
                    ring[toclean] = TxDesc {
                        buffer_addr: 0,
                        cmd_type_offset_bsz: 0,
                    };
                    toclean = next_desc(toclean, 1, ring_size);
                    count += 1;
                }
            }
        }

        tx.desc_head = wbhead;
        tx.desc_free += count;
        tx.stats.tx_recycled += count as u64;
        debug_assert!(tx.desc_free <= ring_size);

        let notify = tx.blocked && tx.desc_free > self.config.tx_block_thresh;
        if notify {
            tx.blocked = false;
            tx.stats.tx_num_unblocked += 1;
        }

        drop(tx);

        if notify {
            self.shared.stack.tx_ring_update(que_id);
        }

        // Clean the control blocks outside the ring lock: unbind, release
        // the frame, return to the pool.
        for index in reclaimed {
            let mut node = MCSNode::new();
            let mut tcb = txd.tcb_area[index as usize].lock(&mut node);
            tcb_reset(&mut tcb);
            drop(tcb);
            tcb_free(&txd, index);
        }
    }
}

/// Shutdown drain: with the queue disabled, walk everything between head
/// and tail, zero the descriptors, and return every control block to the
/// pool. Caller holds the tx lock.
pub(crate) fn tx_cleanup_ring(tx: &mut Tx) {
    let Some(txd) = tx.txd.clone() else {
        return;
    };
    let ring_size = txd.ring_size;
    debug_assert!(tx.desc_free <= ring_size);

    let mut index = tx.desc_head;

    while tx.desc_free < ring_size {
        let Some(tcb_index) = tx.work_list[index] else {
            debug_assert!(false, "descriptor slot without an owner");
            break;
        };

        let span = {
            let mut node = MCSNode::new();
            let tcb = txd.tcb_area[tcb_index as usize].lock(&mut node);
            tcb.desc_span()
        };

        {
            let desc_area = tx.desc_area.as_ref().unwrap();
            let ring = unsafe {
                core::slice::from_raw_parts_mut(
                    desc_area.address().as_mut_ptr::<TxDesc>(),
                    ring_size,
                )
            };

            for _ in 0..span {
                tx.work_list[index] = None;
                ring[index] = TxDesc {
                    buffer_addr: 0,
                    cmd_type_offset_bsz: 0,
                };
                index = next_desc(index, 1, ring_size);
                tx.desc_free += 1;
            }
        }

        let mut node = MCSNode::new();
        let mut tcb = txd.tcb_area[tcb_index as usize].lock(&mut node);
        tcb_reset(&mut tcb);
        drop(tcb);
        tcb_free(&txd, tcb_index);
    }

    debug_assert_eq!(index, tx.desc_tail);
    tx.desc_head = index;
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::i40e::i40e_buf::{I40E_TX_LSO_MAX_COOKIE, I40E_TX_MAX_COOKIE};
    use crate::i40e::i40e_regs::{
        I40E_TXD_CTX_QW0_EXT_IPLEN_SHIFT, I40E_TXD_CTX_QW0_NATLEN_SHIFT,
    };
    use i40e_lib::net::packet::FrameSeg;

    fn setup() {
        i40e_lib::dma_pool::init_std_dma_pool(0, 4096);
    }

    fn small_config() -> I40eConfig {
        I40eConfig {
            rx_ring_size: 8,
            tx_ring_size: 8,
            tx_block_thresh: 2,
            ..I40eConfig::default()
        }
    }

    /// A TCP/IPv4 frame with sane headers, `payload` bytes of data.
    fn tcp4_frame(payload: usize) -> Vec<u8> {
        let mut data = vec![0u8; 14 + 20 + 20 + payload];
        data[12] = 0x08; // ethertype IPv4
        data[13] = 0x00;
        data[14] = 0x45; // version 4, ihl 5
        data[23] = IPPROTO_TCP;
        data[14 + 20 + 12] = 0x50; // data offset 5
        data
    }

    #[test]
    fn test_alloc_tx_shape() {
        setup();
        let tx = alloc_tx(&small_config(), &DmaAttrs::new(false)).unwrap();

        let txd = tx.txd.as_ref().unwrap();
        assert_eq!(txd.ring_size, 8);
        assert_eq!(txd.free_list_size, 12);
        assert_eq!(txd.tcb_free_count(), 12);
        assert_eq!(tx.desc_free, 8);
        assert_eq!(tx.work_list.len(), 8);

        // The descriptor area reserves the extra write-back slot.
        assert_eq!(
            tx.desc_area.as_ref().unwrap().size(),
            9 * size_of::<TxDesc>()
        );
    }

    #[test]
    fn test_tcb_alloc_free() {
        setup();
        let tx = alloc_tx(&small_config(), &DmaAttrs::new(false)).unwrap();
        let txd = tx.txd.as_ref().unwrap();

        let a = tcb_alloc(txd).unwrap();
        assert_eq!(txd.tcb_free_count(), 11);
        tcb_free(txd, a);
        assert_eq!(txd.tcb_free_count(), 12);
    }

    #[test]
    fn test_bind_fragment_cookies() {
        setup();
        let tx = alloc_tx(&small_config(), &DmaAttrs::new(false)).unwrap();
        let txd = tx.txd.as_ref().unwrap();

        let data = vec![0xa5u8; 900];
        let (index, ncookies) = tx_bind_fragment(txd, &data, false).unwrap();
        assert!(ncookies >= 1);

        {
            let mut node = MCSNode::new();
            let tcb = txd.tcb_area[index as usize].lock(&mut node);
            match &tcb.state {
                TcbState::Bind { used_lso, cookies } => {
                    assert!(!*used_lso);
                    assert_eq!(cookies.len(), ncookies);
                    let total: usize = cookies.iter().map(|c| c.len).sum();
                    assert_eq!(total, 900);
                }
                other => panic!("unexpected tcb state {:?}", other),
            }
        }

        let mut node = MCSNode::new();
        let mut tcb = txd.tcb_area[index as usize].lock(&mut node);
        tcb_reset(&mut tcb);
        assert!(matches!(tcb.state, TcbState::None));
        assert!(!tcb.bind_map.is_loaded());
    }

    #[test]
    fn test_meoi_walks_fragment_boundaries() {
        let whole = tcp4_frame(64);

        // Split awkwardly so header fields straddle fragments.
        let frame = EtherFrame::from_segs(vec![
            FrameSeg::Owned(whole[..13].to_vec()),
            FrameSeg::Owned(whole[13..15].to_vec()),
            FrameSeg::Owned(whole[15..40].to_vec()),
            FrameSeg::Owned(whole[40..].to_vec()),
        ]);

        let meo = mac_ether_offload_info(&frame, TunnelType::None, 0).unwrap();
        assert!(meo.flags.contains(MEOI_L2_L3_L4));
        assert_eq!(meo.l2hlen, 14);
        assert_eq!(meo.l3proto, ETHER_TYPE_IP);
        assert_eq!(meo.l3hlen, 20);
        assert_eq!(meo.l4proto, IPPROTO_TCP);
        assert_eq!(meo.l4hlen, 20);
    }

    #[test]
    fn test_meoi_bounds_check_is_u16_sized() {
        let frame = EtherFrame::from_vec(vec![0u8; 16]);
        // A one-byte read at the last byte fails the two-byte check.
        assert_eq!(meoi_get_u8(&frame, 15), None);
        assert_eq!(meoi_get_u8(&frame, 14), Some(0));
    }

    #[test]
    fn test_tx_context_plain_checksums() {
        let config = small_config();
        let mut frame = EtherFrame::from_vec(tcp4_frame(100));
        frame.csum_flags =
            PacketHeaderFlags::IPV4_CSUM_OUT | PacketHeaderFlags::PSEUDO_CSUM_OUT;

        let tctx = tx_context(&config, &frame).unwrap();
        assert_eq!(
            tctx.data_cmdflags,
            I40E_TX_DESC_CMD_IIPT_IPV4_CSUM | I40E_TX_DESC_CMD_L4T_EOFT_TCP
        );

        let maclen = (tctx.data_offsets >> I40E_TX_DESC_LENGTH_MACLEN_SHIFT) & 0x7f;
        let iplen = (tctx.data_offsets >> I40E_TX_DESC_LENGTH_IPLEN_SHIFT) & 0x7f;
        let l4len = (tctx.data_offsets >> I40E_TX_DESC_LENGTH_L4_FC_LEN_SHIFT) & 0xf;
        assert_eq!(maclen, 7); // 14 bytes in 2-byte words
        assert_eq!(iplen, 5); // 20 bytes in 4-byte words
        assert_eq!(l4len, 5);

        assert!(!tctx.tunneled);
        assert_eq!(tctx.ctx_cmdflags, 0);
    }

    #[test]
    fn test_tx_context_lso() {
        let config = small_config();
        let mut frame = EtherFrame::from_vec(tcp4_frame(4446));
        frame.csum_flags = PacketHeaderFlags::IPV4_CSUM_OUT
            | PacketHeaderFlags::PSEUDO_CSUM_OUT
            | PacketHeaderFlags::TCP_TSO;
        frame.mss = Some(1448);

        let tctx = tx_context(&config, &frame).unwrap();
        assert_eq!(tctx.ctx_cmdflags & I40E_TX_CTX_DESC_TSO, I40E_TX_CTX_DESC_TSO);
        assert_eq!(tctx.mss, 1448);
        assert_eq!(tctx.tso_len, 4446);
    }

    #[test]
    fn test_tx_context_lso_requires_checksums() {
        let config = small_config();
        let mut frame = EtherFrame::from_vec(tcp4_frame(4446));
        frame.csum_flags = PacketHeaderFlags::TCP_TSO;
        frame.mss = Some(1448);

        assert_eq!(tx_context(&config, &frame), Err(TxCtxError::LsoFlags));
    }

    #[test]
    fn test_tx_context_inner_request_needs_tunnel_type() {
        let config = small_config();
        let mut frame = EtherFrame::from_vec(tcp4_frame(100));
        frame.csum_flags = PacketHeaderFlags::INNER_PSEUDO_CSUM_OUT;

        assert_eq!(tx_context(&config, &frame), Err(TxCtxError::NoTun));
    }

    #[test]
    fn test_tx_context_disabled_by_config() {
        let config = I40eConfig {
            tx_hcksum_enable: false,
            ..small_config()
        };
        let mut frame = EtherFrame::from_vec(tcp4_frame(100));
        frame.csum_flags = PacketHeaderFlags::IPV4_CSUM_OUT;

        let tctx = tx_context(&config, &frame).unwrap();
        assert_eq!(tctx.data_cmdflags, 0);
        assert_eq!(tctx.data_offsets, 0);
    }

    #[test]
    fn test_tx_context_vxlan_inner() {
        let config = small_config();

        // Outer: MAC + IPv4 + UDP + VXLAN; inner: MAC + IPv4 + TCP.
        let outer_hdrs = 14 + 20 + 8 + 8;
        let mut data = vec![0u8; outer_hdrs + 14 + 20 + 20 + 32];
        data[12] = 0x08;
        data[13] = 0x00;
        data[14] = 0x45;
        data[23] = IPPROTO_UDP;
        let ioff = outer_hdrs;
        data[ioff + 12] = 0x08;
        data[ioff + 13] = 0x00;
        data[ioff + 14] = 0x45;
        data[ioff + 23] = IPPROTO_TCP;
        data[ioff + 14 + 20 + 12] = 0x50;

        let mut frame = EtherFrame::from_vec(data);
        frame.tunnel = TunnelType::Vxlan;
        frame.csum_flags = PacketHeaderFlags::IPV4_CSUM_OUT
            | PacketHeaderFlags::INNER_IPV4_CSUM_OUT
            | PacketHeaderFlags::INNER_PSEUDO_CSUM_OUT;

        let tctx = tx_context(&config, &frame).unwrap();
        assert!(tctx.tunneled);
        assert_eq!(
            tctx.data_cmdflags,
            I40E_TX_DESC_CMD_IIPT_IPV4_CSUM | I40E_TX_DESC_CMD_L4T_EOFT_TCP
        );

        let eipt = tctx.tunnel_fld & 0x3;
        assert_eq!(eipt, I40E_TX_CTX_EXT_IP_IPV4);
        let eiplen = (tctx.tunnel_fld >> I40E_TXD_CTX_QW0_EXT_IPLEN_SHIFT) & 0x7f;
        assert_eq!(eiplen, 5);
        // UDP + inner MAC + VXLAN header, in 2-byte words.
        let l4tunlen = (tctx.tunnel_fld >> I40E_TXD_CTX_QW0_NATLEN_SHIFT) & 0x7f;
        assert_eq!(l4tunlen, (8 + 14 + 8) / 2);
    }

    #[test]
    fn test_attrs_cookie_limits() {
        let attrs = DmaAttrs::new(true);
        assert_eq!(attrs.txbind_attr.nsegments, I40E_TX_MAX_COOKIE);
        assert_eq!(attrs.txbind_lso_attr.nsegments, I40E_TX_LSO_MAX_COOKIE);
        assert!(attrs.fma);
    }
}
