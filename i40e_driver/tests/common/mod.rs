//! Shared scaffolding for the ring tests: a device instance wired to plain
//! memory standing in for the register window, plus a recording stack
//! callback and queue-context collaborator so tests can find the rings and
//! drive them the way hardware would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use i40e_driver::i40e::i40e_regs::{qrx_tail, qtx_tail, RegSpace, RxDesc, TxDesc,
    I40E_REG_SPACE_SIZE};
use i40e_driver::{I40e, I40eConfig, QueueContext};
use i40e_lib::addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr};
use i40e_lib::net::net_device::{NetDevice, NetStack};

#[derive(Default)]
pub struct TestStack {
    pub tx_updates: AtomicU32,
}

impl NetStack for TestStack {
    fn tx_ring_update(&self, _que_id: usize) {
        self.tx_updates.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TestQueueCtx {
    pub rx: Mutex<HashMap<usize, (usize, usize)>>,
    pub tx: Mutex<HashMap<usize, (usize, usize, usize)>>,
}

impl QueueContext for TestQueueCtx {
    fn setup_rx_queue(&self, que_id: usize, ring_base: PhyAddr, ring_size: usize) {
        self.rx
            .lock()
            .unwrap()
            .insert(que_id, (ring_base.as_usize(), ring_size));
    }

    fn setup_tx_queue(
        &self,
        que_id: usize,
        ring_base: PhyAddr,
        ring_size: usize,
        wb_addr: PhyAddr,
    ) {
        self.tx.lock().unwrap().insert(
            que_id,
            (ring_base.as_usize(), ring_size, wb_addr.as_usize()),
        );
    }
}

pub struct TestRig {
    pub dev: I40e,
    pub stack: Arc<TestStack>,
    pub qctx: Arc<TestQueueCtx>,
    reg_mem: Box<[u8]>,
}

impl TestRig {
    pub fn new(config: I40eConfig) -> Self {
        i40e_lib::dma_pool::init_std_dma_pool(0, 16 * 1024);

        let reg_mem = vec![0u8; I40E_REG_SPACE_SIZE].into_boxed_slice();
        let regs =
            unsafe { RegSpace::new(VirtAddr::new(reg_mem.as_ptr() as usize), reg_mem.len()) };

        let stack = Arc::new(TestStack::default());
        let qctx = Arc::new(TestQueueCtx::default());

        let dev = I40e::new(regs, config, stack.clone(), qctx.clone()).unwrap();

        Self {
            dev,
            stack,
            qctx,
            reg_mem,
        }
    }

    pub fn up(&self) {
        self.dev.up().unwrap();
        self.dev.set_link(true);
    }

    fn read_reg(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.reg_mem[off..off + 4].try_into().unwrap())
    }

    pub fn rx_tail(&self, que_id: usize) -> u32 {
        self.read_reg(qrx_tail(que_id))
    }

    pub fn tx_tail(&self, que_id: usize) -> u32 {
        self.read_reg(qtx_tail(que_id))
    }

    fn rx_ring_base(&self, que_id: usize) -> usize {
        self.qctx.rx.lock().unwrap()[&que_id].0
    }

    fn tx_ring_base(&self, que_id: usize) -> usize {
        self.qctx.tx.lock().unwrap()[&que_id].0
    }

    fn tx_wb_addr(&self, que_id: usize) -> usize {
        self.qctx.tx.lock().unwrap()[&que_id].2
    }

    /// The buffer address a receive descriptor is currently armed with.
    pub fn rx_desc_pkt_addr(&self, que_id: usize, index: usize) -> u64 {
        let base = self.rx_ring_base(que_id);
        let desc = unsafe {
            core::ptr::read_volatile((base + index * size_of::<RxDesc>()) as *const RxDesc)
        };
        u64::from_le(unsafe { desc.read.pkt_addr })
    }

    pub fn rx_desc_stword(&self, que_id: usize, index: usize) -> u64 {
        let base = self.rx_ring_base(que_id);
        let desc = unsafe {
            core::ptr::read_volatile((base + index * size_of::<RxDesc>()) as *const RxDesc)
        };
        u64::from_le(unsafe { desc.wb.status_error_len })
    }

    /// Build a write-back qword1: DD and EOP set, plus whatever the test
    /// asks for.
    pub fn rx_stword(len: usize, ptype: u8, err: u32, extra_status: u64) -> u64 {
        0x1 | 0x2
            | extra_status
            | ((err as u64) << 19)
            | ((ptype as u64) << 30)
            | ((len as u64) << 38)
    }

    /// Play hardware: deposit `payload` into the armed buffer of descriptor
    /// `index` and write its completion word.
    pub fn rx_complete_frame(
        &self,
        que_id: usize,
        index: usize,
        payload: &[u8],
        ptype: u8,
        err: u32,
        extra_status: u64,
    ) {
        let pkt_addr = self.rx_desc_pkt_addr(que_id, index) as usize;
        assert_ne!(pkt_addr, 0, "descriptor {index} is not armed");

        unsafe {
            core::ptr::copy_nonoverlapping(payload.as_ptr(), pkt_addr as *mut u8, payload.len())
        };

        let stword = Self::rx_stword(payload.len(), ptype, err, extra_status);
        let base = self.rx_ring_base(que_id);
        unsafe {
            core::ptr::write_volatile(
                (base + index * size_of::<RxDesc>() + 8) as *mut u64,
                u64::to_le(stword),
            )
        };
    }

    pub fn tx_desc(&self, que_id: usize, index: usize) -> TxDesc {
        let base = self.tx_ring_base(que_id);
        unsafe { core::ptr::read_volatile((base + index * size_of::<TxDesc>()) as *const TxDesc) }
    }

    /// Play hardware: report transmit progress through the write-back head.
    pub fn write_tx_wbhead(&self, que_id: usize, head: u32) {
        let addr = self.tx_wb_addr(que_id);
        unsafe { core::ptr::write_volatile(addr as *mut u32, u32::to_le(head)) };
    }
}

use core::mem::size_of;

/// Decoded fields of a transmit data/context descriptor's second qword.
pub struct TxQw1 {
    pub dtype: u64,
    pub cmd: u64,
    pub offset: u64,
    pub buf_sz: u64,
}

pub fn parse_tx_qw1(desc: &TxDesc) -> TxQw1 {
    let qw1 = u64::from_le(desc.cmd_type_offset_bsz);
    TxQw1 {
        dtype: qw1 & 0xF,
        cmd: (qw1 >> 4) & 0xFFF,
        offset: (qw1 >> 16) & 0x3FFFF,
        buf_sz: (qw1 >> 34) & 0x3FFF,
    }
}

/// A TCP/IPv4 frame: 14-byte MAC, 20-byte IP, 20-byte TCP, then payload.
pub fn tcp4_frame(payload: usize) -> Vec<u8> {
    let mut data = vec![0u8; 14 + 20 + 20 + payload];
    data[12] = 0x08;
    data[13] = 0x00;
    data[14] = 0x45;
    data[23] = 6; // TCP
    data[14 + 20 + 12] = 0x50;
    for (i, b) in data.iter_mut().enumerate().skip(54) {
        *b = i as u8;
    }
    data
}
