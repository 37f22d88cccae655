//! The single-cookie DMA buffer primitive and the per-device DMA attribute
//! templates.

use core::sync::atomic::{AtomicBool, Ordering};

use i40e_lib::{
    addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr},
    barrier,
    dma_map::DmaTag,
    dma_pool::DMAPool,
    paging::PAGESIZE,
};

use crate::i40e::I40eDriverErr;

/// DMA alignment request, the smallest supported page size of the platform.
pub const I40E_DMA_ALIGNMENT: usize = 0x1000;

/// Largest buffer a single tx data descriptor can describe.
pub const I40E_MAX_TX_BUFSZ: usize = (1 << 14) - 1;

/// Scatter/gather limit for a non-LSO transmit bind.
pub const I40E_TX_MAX_COOKIE: usize = 8;

/// Scatter/gather limit for an LSO transmit bind.
pub const I40E_TX_LSO_MAX_COOKIE: usize = 32;

/// Per-device copies of the DMA attribute templates.
///
/// Devices can differ in fault-management capability, so each instance gets
/// its own copies at attach time rather than sharing the templates.
#[derive(Debug, Clone, Copy)]
pub struct DmaAttrs {
    /// Single-cookie profile for rings and control-block buffers.
    pub static_attr: DmaTag,
    /// Multi-cookie profile for binding non-LSO transmit fragments.
    pub txbind_attr: DmaTag,
    /// Multi-cookie profile for binding LSO transmit fragments.
    pub txbind_lso_attr: DmaTag,
    /// Whether DMA faults are reported to the fault-management collaborator.
    pub fma: bool,
}

impl DmaAttrs {
    pub fn new(fma: bool) -> Self {
        let static_attr = DmaTag {
            boundary: u64::MAX,
            maxsegsz: usize::MAX,
            nsegments: 1,
            maxsize: u32::MAX as usize,
            alignment: I40E_DMA_ALIGNMENT,
        };

        let txbind_attr = DmaTag {
            boundary: u64::MAX,
            maxsegsz: I40E_MAX_TX_BUFSZ,
            nsegments: I40E_TX_MAX_COOKIE,
            maxsize: u32::MAX as usize,
            alignment: 1,
        };

        let txbind_lso_attr = DmaTag {
            nsegments: I40E_TX_LSO_MAX_COOKIE,
            ..txbind_attr
        };

        Self {
            static_attr,
            txbind_attr,
            txbind_lso_attr,
            fma,
        }
    }
}

/// A single-cookie region of device-visible memory: the backing allocation
/// plus the kernel and bus addresses of its (possibly offset) window.
#[derive(Default)]
pub struct DmaBuffer {
    mem: Option<DMAPool>,
    dmab_address: usize,
    dmab_dma_address: usize,
    dmab_size: usize,
    dmab_len: usize,
    dmab_fault: AtomicBool,
}

impl DmaBuffer {
    /// Allocate `size` bytes of device-visible memory on `numa_id`.
    /// Non-blocking; a failed allocation releases anything partially
    /// acquired before returning.
    pub fn alloc(numa_id: usize, size: usize, zero: bool) -> Result<Self, I40eDriverErr> {
        debug_assert!(size > 0);

        let pages = size.div_ceil(PAGESIZE);
        let Some(mem) = DMAPool::new(numa_id, pages) else {
            log::error!("i40e: failed to allocate {} bytes of DMA memory", size);
            return Err(I40eDriverErr::DmaBuffer);
        };

        let vaddr = mem.get_virt_addr();
        let paddr = mem.get_phy_addr();

        if zero {
            unsafe { core::ptr::write_bytes(vaddr.as_mut_ptr::<u8>(), 0, size) };
        }

        Ok(Self {
            mem: Some(mem),
            dmab_address: vaddr.as_usize(),
            dmab_dma_address: paddr.as_usize(),
            dmab_size: size,
            dmab_len: 0,
            dmab_fault: AtomicBool::new(false),
        })
    }

    /// Shift the buffer window forward by `off` bytes. Used on rx buffers so
    /// the L3 header of a received frame lands on a 4-byte boundary.
    pub fn offset_window(&mut self, off: usize) {
        debug_assert!(off < self.dmab_size);
        self.dmab_address += off;
        self.dmab_dma_address += off;
        self.dmab_size -= off;
    }

    #[inline(always)]
    pub fn address(&self) -> VirtAddr {
        VirtAddr::new(self.dmab_address)
    }

    #[inline(always)]
    pub fn dma_address(&self) -> PhyAddr {
        PhyAddr::new(self.dmab_dma_address)
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.dmab_size
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.dmab_len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.dmab_len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.dmab_size);
        self.dmab_len = len;
    }

    pub fn is_bound(&self) -> bool {
        self.mem.is_some()
    }

    /// The window as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure the device is not writing the region (a
    /// `sync_for_kernel` happened after the last device write).
    pub unsafe fn as_slice(&self) -> &[u8] {
        debug_assert!(self.is_bound());
        core::slice::from_raw_parts(self.dmab_address as *const u8, self.dmab_size)
    }

    /// # Safety
    ///
    /// See [`DmaBuffer::as_slice`]; additionally nothing else may alias the
    /// region mutably.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        debug_assert!(self.is_bound());
        core::slice::from_raw_parts_mut(self.dmab_address as *mut u8, self.dmab_size)
    }

    /// Make device writes visible to the CPU.
    pub fn sync_for_kernel(&self) {
        barrier::membar_consumer();
    }

    /// Make CPU writes visible to the device.
    pub fn sync_for_dev(&self) {
        barrier::membar_producer();
    }

    /// Post-sync handle verification. A faulted handle degrades the device;
    /// the caller drops whatever the buffer was carrying.
    pub fn check(&self) -> Result<(), I40eDriverErr> {
        if self.dmab_fault.load(Ordering::Acquire) {
            Err(I40eDriverErr::DmaHandleFault)
        } else {
            Ok(())
        }
    }

    /// Mark the handle faulted, as the fault-management collaborator would.
    pub fn set_fault(&self) {
        self.dmab_fault.store(true, Ordering::Release);
    }

    /// Release the memory and clear every field. A freed buffer reports
    /// zero addresses and sizes.
    pub fn free(&mut self) {
        self.mem = None;
        self.dmab_address = 0;
        self.dmab_dma_address = 0;
        self.dmab_size = 0;
        self.dmab_len = 0;
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn setup() {
        i40e_lib::dma_pool::init_std_dma_pool(0, 4096);
    }

    #[test]
    fn test_alloc_window_free() {
        setup();

        let mut buf = DmaBuffer::alloc(0, 1500, true).unwrap();
        assert!(buf.is_bound());
        assert_eq!(buf.size(), 1500);
        assert_eq!(unsafe { buf.as_slice() }[0], 0);

        let before = buf.address().as_usize();
        buf.offset_window(2);
        assert_eq!(buf.address().as_usize(), before + 2);
        assert_eq!(buf.size(), 1498);
        assert_eq!(
            buf.dma_address().as_usize() % 4,
            (before + 2) % 4,
            "window shift applies to both addresses"
        );

        buf.free();
        assert!(!buf.is_bound());
        assert_eq!(buf.address().as_usize(), 0);
        assert_eq!(buf.dma_address().as_usize(), 0);
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_fault_check() {
        setup();

        let buf = DmaBuffer::alloc(0, 64, false).unwrap();
        assert!(buf.check().is_ok());
        buf.set_fault();
        assert_eq!(buf.check(), Err(I40eDriverErr::DmaHandleFault));
    }
}
