//! Ring teardown with receive buffers still loaned to the stack.

mod common;

use common::TestRig;
use i40e_driver::I40eConfig;
use i40e_lib::net::net_device::NetDevice;

fn bind_config() -> I40eConfig {
    I40eConfig {
        num_trqpairs: 1,
        rx_ring_size: 8,
        tx_ring_size: 8,
        tx_block_thresh: 2,
        rx_dma_min: 64,
        rx_hcksum_enable: false,
        ..I40eConfig::default()
    }
}

#[test]
fn test_down_with_loans_outstanding() {
    let rig = TestRig::new(bind_config());
    rig.up();

    // Loan five buffers upward.
    let mut held = Vec::new();
    for i in 0..5 {
        rig.rx_complete_frame(0, i, &[i as u8; 600], 26, 0, 0);
        let mut frames = rig.dev.rx_poll(0, 4096);
        assert_eq!(frames.len(), 1);
        held.push(frames.pop().unwrap());
    }

    rig.dev.down().unwrap();
    assert_eq!(rig.dev.rx_pending(), 5);

    // The loaned payloads stay readable after teardown.
    for (i, frame) in held.iter().enumerate() {
        assert_eq!(frame.to_vec(), vec![i as u8; 600]);
    }

    // Each recycle retires one pending buffer; the last one finishes the
    // teardown.
    for (n, frame) in held.drain(..).enumerate() {
        drop(frame);
        assert_eq!(rig.dev.rx_pending(), 4 - n as u32);
    }

    // The rendezvous returns immediately now.
    rig.dev.wait_rx_drained();
    assert_eq!(rig.dev.rx_pending(), 0);
}

#[test]
fn test_down_and_up_cycle() {
    let rig = TestRig::new(bind_config());
    rig.up();

    rig.rx_complete_frame(0, 0, &[1u8; 300], 26, 0, 0);
    assert_eq!(rig.dev.rx_poll(0, 4096).len(), 1);

    rig.dev.down().unwrap();
    assert_eq!(rig.dev.rx_pending(), 0);

    // Polling a torn-down ring yields nothing and does not crash.
    assert!(rig.dev.rx_poll(0, 4096).is_empty());

    // A fresh start rebuilds the rings from scratch.
    rig.up();
    rig.rx_complete_frame(0, 0, &[2u8; 300], 26, 0, 0);
    let frames = rig.dev.rx_poll(0, 4096);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].to_vec(), vec![2u8; 300]);
}

#[test]
fn test_down_drains_tx_work_list() {
    use i40e_lib::net::packet::EtherFrame;

    let rig = TestRig::new(bind_config());
    rig.up();

    // Leave three frames outstanding (no write-back), then stop.
    for _ in 0..3 {
        assert!(rig.dev.tx(0, EtherFrame::from_vec(vec![0u8; 64])).is_none());
    }
    rig.dev.down().unwrap();

    // Restart and fill the entire ring: every control block and
    // descriptor must have been recovered by the shutdown drain.
    rig.up();
    for _ in 0..6 {
        assert!(rig.dev.tx(0, EtherFrame::from_vec(vec![0u8; 64])).is_none());
    }
}

#[test]
fn test_double_up_and_down() {
    use i40e_lib::net::net_device::NetDevError;

    let rig = TestRig::new(bind_config());
    rig.up();
    assert_eq!(rig.dev.up(), Err(NetDevError::AlreadyUp));
    rig.dev.down().unwrap();
    assert_eq!(rig.dev.down(), Err(NetDevError::AlreadyDown));
}
