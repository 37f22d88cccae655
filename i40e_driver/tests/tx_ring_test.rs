//! Transmit-ring behavior against fake hardware memory: copy and bind
//! dispositions, context descriptors, write-back reclamation, and
//! backpressure.

mod common;

use common::{parse_tx_qw1, tcp4_frame, TestRig};
use i40e_driver::I40eConfig;
use i40e_lib::net::net_device::{NetDevice, PacketHeaderFlags};
use i40e_lib::net::packet::{EtherFrame, FrameSeg};
use std::sync::atomic::Ordering;

const CMD_EOP: u64 = 0x1;
const CMD_RS: u64 = 0x2;
const CMD_ICRC: u64 = 0x4;

fn small_config() -> I40eConfig {
    I40eConfig {
        num_trqpairs: 1,
        rx_ring_size: 8,
        tx_ring_size: 8,
        tx_dma_min: 256,
        tx_block_thresh: 2,
        ..I40eConfig::default()
    }
}

#[test]
fn test_single_frame_copy_path() {
    let rig = TestRig::new(small_config());
    rig.up();

    let payload: Vec<u8> = (0u8..128).collect();
    assert!(rig.dev.tx(0, EtherFrame::from_vec(payload.clone())).is_none());

    // One data descriptor at slot 0, doorbell advanced by one.
    assert_eq!(rig.tx_tail(0), 1);

    let desc = rig.tx_desc(0, 0);
    let qw1 = parse_tx_qw1(&desc);
    assert_eq!(qw1.dtype, 0, "data descriptor");
    assert_eq!(qw1.buf_sz, 128);
    assert_eq!(qw1.cmd & CMD_EOP, CMD_EOP);
    assert_eq!(qw1.cmd & CMD_RS, CMD_RS);
    assert_eq!(qw1.cmd & CMD_ICRC, CMD_ICRC);

    // The copy buffer holds the payload byte for byte.
    let buf_addr = u64::from_le(desc.buffer_addr) as usize;
    let copied = unsafe { core::slice::from_raw_parts(buf_addr as *const u8, 128) };
    assert_eq!(copied, &payload[..]);

    let stats = rig.dev.tx_stats(0);
    assert_eq!(stats.tx_packets, 1);
    assert_eq!(stats.tx_bytes, 128);
    assert_eq!(stats.tx_descriptors, 1);

    // Hardware reports completion; the block and descriptor come back.
    rig.write_tx_wbhead(0, 1);
    rig.dev.tx_recycle(0);
    assert_eq!(rig.dev.tx_stats(0).tx_recycled, 1);

    // The whole ring is writable again.
    for _ in 0..6 {
        assert!(rig.dev.tx(0, EtherFrame::from_vec(vec![0u8; 64])).is_none());
    }
}

#[test]
fn test_multi_fragment_bind_path() {
    let config = I40eConfig {
        tx_ring_size: 32,
        tx_dma_min: 512,
        ..small_config()
    };
    let rig = TestRig::new(config);
    rig.up();

    // Nine 100-byte fragments: 900 bytes total exceeds the copy threshold,
    // so each fragment is bound and emits one descriptor per cookie.
    let mut segs = Vec::new();
    for f in 0..9u8 {
        segs.push(FrameSeg::Owned(vec![f; 100]));
    }
    assert!(rig.dev.tx(0, EtherFrame::from_segs(segs)).is_none());

    let tail = rig.tx_tail(0) as usize;
    assert_eq!(tail, 9, "one descriptor per fragment cookie");

    for i in 0..9 {
        let desc = rig.tx_desc(0, i);
        let qw1 = parse_tx_qw1(&desc);
        assert_eq!(qw1.dtype, 0);
        assert_eq!(qw1.buf_sz, 100);

        // EOP and RS appear only on the final descriptor of the frame.
        let eop_rs = qw1.cmd & (CMD_EOP | CMD_RS);
        if i == 8 {
            assert_eq!(eop_rs, CMD_EOP | CMD_RS);
        } else {
            assert_eq!(eop_rs, 0);
        }

        // Each descriptor points into the fragment's own memory.
        let addr = u64::from_le(desc.buffer_addr) as usize;
        let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, 100) };
        assert!(bytes.iter().all(|&b| b == i as u8));
    }

    assert_eq!(rig.dev.tx_stats(0).tx_descriptors, 9);

    // Reclaim the whole frame in one write-back report.
    rig.write_tx_wbhead(0, 9);
    rig.dev.tx_recycle(0);
    assert_eq!(rig.dev.tx_stats(0).tx_recycled, 9);
}

#[test]
fn test_lso_context_descriptor() {
    let config = I40eConfig {
        tx_ring_size: 32,
        mtu: 9000,
        ..small_config()
    };
    let rig = TestRig::new(config);
    rig.up();

    // 4500 bytes total with 54 bytes of headers; MSS 1448.
    let mut frame = EtherFrame::from_vec(tcp4_frame(4446));
    frame.csum_flags = PacketHeaderFlags::IPV4_CSUM_OUT
        | PacketHeaderFlags::PSEUDO_CSUM_OUT
        | PacketHeaderFlags::TCP_TSO;
    frame.mss = Some(1448);

    assert!(rig.dev.tx(0, frame).is_none());

    // The context descriptor precedes the data descriptors.
    let ctx = rig.tx_desc(0, 0);
    let qw1 = u64::from_le(ctx.cmd_type_offset_bsz);
    assert_eq!(qw1 & 0xF, 0x1, "context descriptor");
    assert_eq!((qw1 >> 4) & 0x1, 0x1, "TSO command bit");
    assert_eq!((qw1 >> 30) & 0x3FFFF, 4446, "tso length");
    assert_eq!((qw1 >> 50) & 0x3FFF, 1448, "mss");

    let data = rig.tx_desc(0, 1);
    let dqw1 = parse_tx_qw1(&data);
    assert_eq!(dqw1.dtype, 0);
    assert_eq!(dqw1.cmd & (CMD_EOP | CMD_RS), CMD_EOP | CMD_RS);

    let tail = rig.tx_tail(0);
    assert!(tail >= 2);
    assert_eq!(rig.dev.tx_stats(0).tx_packets, 1);

    // Reclamation treats the sentinel context block like any other.
    rig.write_tx_wbhead(0, tail);
    rig.dev.tx_recycle(0);
    assert_eq!(rig.dev.tx_stats(0).tx_recycled as u32, tail);
}

#[test]
fn test_backpressure_blocks_and_unblocks_once() {
    let config = I40eConfig {
        tx_block_thresh: 4,
        ..small_config()
    };
    let rig = TestRig::new(config);
    rig.up();

    // Five single-descriptor frames leave three free, one under the
    // threshold.
    for _ in 0..5 {
        assert!(rig.dev.tx(0, EtherFrame::from_vec(vec![0u8; 64])).is_none());
    }

    // The next frame is refused and handed back; the ring is now blocked.
    let refused = rig.dev.tx(0, EtherFrame::from_vec(vec![0xeeu8; 64]));
    let refused = refused.expect("frame returned under backpressure");
    assert_eq!(refused.to_vec(), vec![0xeeu8; 64]);
    assert_eq!(rig.dev.tx_stats(0).tx_err_nodescs, 1);
    assert_eq!(rig.stack.tx_updates.load(Ordering::SeqCst), 0);

    // Hardware completes everything outstanding; recycling crosses the
    // threshold and notifies the stack exactly once.
    rig.write_tx_wbhead(0, 5);
    rig.dev.tx_recycle(0);
    assert_eq!(rig.stack.tx_updates.load(Ordering::SeqCst), 1);
    assert_eq!(rig.dev.tx_stats(0).tx_num_unblocked, 1);

    // A second recycle with nothing new does not notify again.
    rig.dev.tx_recycle(0);
    assert_eq!(rig.stack.tx_updates.load(Ordering::SeqCst), 1);

    // And the returned frame can be resubmitted now.
    assert!(rig.dev.tx(0, refused).is_none());
}

#[test]
fn test_tx_drops_when_link_down() {
    let rig = TestRig::new(small_config());
    rig.dev.up().unwrap();
    // Link never came up: the frame is consumed but nothing is emitted.
    assert!(rig.dev.tx(0, EtherFrame::from_vec(vec![0u8; 64])).is_none());
    assert_eq!(rig.tx_tail(0), 0);
    assert_eq!(rig.dev.tx_stats(0).tx_packets, 0);
}

#[test]
fn test_tx_offload_flags_reach_descriptor() {
    let rig = TestRig::new(small_config());
    rig.up();

    let mut frame = EtherFrame::from_vec(tcp4_frame(32));
    frame.csum_flags = PacketHeaderFlags::IPV4_CSUM_OUT | PacketHeaderFlags::PSEUDO_CSUM_OUT;
    assert!(rig.dev.tx(0, frame).is_none());

    let qw1 = parse_tx_qw1(&rig.tx_desc(0, 0));
    // IIPT = IPv4 with checksum (0x6 << 1 within cmd), L4T = TCP.
    assert_eq!(qw1.cmd & 0x60, 0x60);
    assert_eq!(qw1.cmd & 0x300, 0x100);

    // MACLEN 7 words, IPLEN 5 dwords, L4LEN 5 dwords.
    assert_eq!(qw1.offset & 0x7F, 7);
    assert_eq!((qw1.offset >> 7) & 0x7F, 5);
    assert_eq!((qw1.offset >> 14) & 0xF, 5);
}

#[test]
fn test_bad_offload_request_is_dropped() {
    let rig = TestRig::new(small_config());
    rig.up();

    // An inner-checksum request without a declared tunnel type cannot be
    // programmed; the frame is dropped with a counted error.
    let mut frame = EtherFrame::from_vec(tcp4_frame(32));
    frame.csum_flags = PacketHeaderFlags::INNER_PSEUDO_CSUM_OUT;

    assert!(rig.dev.tx(0, frame).is_none());
    assert_eq!(rig.tx_tail(0), 0);

    let stats = rig.dev.tx_stats(0);
    assert_eq!(stats.tx_err_context, 1);
    assert_eq!(stats.tx_hck_notun, 1);
    assert_eq!(stats.tx_packets, 0);
}
