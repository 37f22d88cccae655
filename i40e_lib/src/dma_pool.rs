//! Memory pool for DMA.

use core::{alloc::Layout, ptr::NonNull};

use rlsf::Tlsf;

use crate::{
    addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr},
    paging::{self, PAGESIZE},
    sync::{mcs::MCSNode, mutex::Mutex},
};

const FLLEN: usize = 28; // The maximum block size is (32 << 28) - 1 = 8_589_934_591 (nearly 8GiB)
const SLLEN: usize = 64; // The worst-case internal fragmentation is ((32 << 28) / 64 - 2) = 134_217_726 (nearly 128MiB)
type FLBitmap = u32; // must be longer than FLLEN
type SLBitmap = u64; // must be longer than SLLEN

type TLSFAlloc = Tlsf<'static, FLBitmap, SLBitmap, FLLEN, SLLEN>;

const NUMA_NUM_MAX: usize = 16;

static CONTINUOUS_MEMORY_POOLS: [Mutex<TLSFAlloc>; NUMA_NUM_MAX] =
    array_macro::array![_ => Mutex::new(TLSFAlloc::new()); NUMA_NUM_MAX];

/// A contiguous, page-aligned region of device-visible memory.
pub struct DMAPool {
    virt_addr: VirtAddr,
    phy_addr: PhyAddr,
    size: usize,
    numa_id: usize,
}

/// Donate `[start, start + size)` to the pool for NUMA node `numa_id`.
///
/// # Safety
///
/// The region must be unused, writable, and device-visible for its whole
/// lifetime; it is never given back.
pub unsafe fn init_dma_pool(numa_id: usize, start: VirtAddr, size: usize) {
    assert!(numa_id < NUMA_NUM_MAX);

    let ptr = start.as_mut_ptr::<u8>();
    let pool = core::slice::from_raw_parts_mut(ptr, size);
    let Some(pool) = NonNull::new(pool) else {
        return;
    };

    let mut node = MCSNode::new();

    CONTINUOUS_MEMORY_POOLS[numa_id]
        .lock(&mut node)
        .insert_free_block_ptr(pool);
}

/// Seed the pool for `numa_id` with `pages` pages of leaked heap memory.
///
/// Only meaningful with the `std` feature, where virtual and bus addresses
/// coincide. Repeated calls are ignored.
#[cfg(feature = "std")]
pub fn init_std_dma_pool(numa_id: usize, pages: usize) {
    use core::sync::atomic::{AtomicBool, Ordering};

    static SEEDED: AtomicBool = AtomicBool::new(false);

    if SEEDED.swap(true, Ordering::SeqCst) {
        return;
    }

    let region = alloc::vec![0u8; pages * PAGESIZE].leak();
    unsafe {
        init_dma_pool(
            numa_id,
            VirtAddr::new(region.as_mut_ptr() as usize),
            region.len(),
        )
    };
}

impl DMAPool {
    pub fn new(numa_id: usize, pages: usize) -> Option<Self> {
        assert!(numa_id < NUMA_NUM_MAX);

        let size = pages * PAGESIZE;
        let layout = Layout::from_size_align(size, PAGESIZE).ok()?;

        let mut node = MCSNode::new();

        let pool = {
            let mut allocator = CONTINUOUS_MEMORY_POOLS[numa_id].lock(&mut node);
            allocator.allocate(layout)?
        };

        let virt_addr = VirtAddr::new(pool.as_ptr() as usize);
        let phy_addr = paging::vm_to_phy(virt_addr)?;

        Some(Self {
            virt_addr,
            phy_addr,
            size,
            numa_id,
        })
    }

    #[inline(always)]
    pub fn get_virt_addr(&self) -> VirtAddr {
        self.virt_addr
    }

    #[inline(always)]
    pub fn get_phy_addr(&self) -> PhyAddr {
        self.phy_addr
    }

    #[inline(always)]
    pub fn get_size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn get_numa_id(&self) -> usize {
        self.numa_id
    }

    /// # Safety
    ///
    /// The caller must ensure nothing else mutates the region concurrently.
    #[inline(always)]
    pub unsafe fn get_slice<'a, T: Sized>(&'a self) -> &'a [T] {
        assert!(self.size % core::mem::size_of::<T>() == 0);
        core::slice::from_raw_parts::<'a, T>(
            self.virt_addr.as_ptr(),
            self.size / core::mem::size_of::<T>(),
        )
    }

    /// # Safety
    ///
    /// See [`DMAPool::get_slice`].
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_slice_mut<'a, T: Sized>(&'a self) -> &'a mut [T] {
        assert!(self.size % core::mem::size_of::<T>() == 0);
        core::slice::from_raw_parts_mut::<'a, T>(
            self.virt_addr.as_mut_ptr(),
            self.size / core::mem::size_of::<T>(),
        )
    }
}

impl Drop for DMAPool {
    fn drop(&mut self) {
        let ptr = self.virt_addr.as_mut_ptr::<u8>();
        let mut node = MCSNode::new();
        let mut allocator = CONTINUOUS_MEMORY_POOLS[self.numa_id].lock(&mut node);
        unsafe {
            allocator.deallocate(NonNull::new_unchecked(ptr), PAGESIZE);
        }
    }
}

unsafe impl Send for DMAPool {}
unsafe impl Sync for DMAPool {}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free() {
        init_std_dma_pool(0, 64);

        let a = DMAPool::new(0, 2).unwrap();
        assert_eq!(a.get_size(), 2 * PAGESIZE);
        assert_eq!(a.get_virt_addr().as_usize() % PAGESIZE, 0);
        assert_eq!(a.get_virt_addr().as_usize(), a.get_phy_addr().as_usize());

        let b = DMAPool::new(0, 1).unwrap();
        assert_ne!(a.get_virt_addr(), b.get_virt_addr());

        drop(a);
        drop(b);

        let c = DMAPool::new(0, 4).unwrap();
        assert_eq!(c.get_size(), 4 * PAGESIZE);
    }
}
