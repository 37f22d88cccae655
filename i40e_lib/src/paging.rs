use crate::addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr};

pub const PAGESIZE: usize = 4 * 1024;

/// Translate a virtual address to the physical address a device would use.
///
/// With the `std` feature the crate runs inside an ordinary process and the
/// translation is the identity: process memory doubles as device-visible
/// memory. `no_std` platforms must register a translator at boot.
#[cfg(feature = "std")]
pub fn vm_to_phy(vm_addr: VirtAddr) -> Option<PhyAddr> {
    Some(PhyAddr::new(vm_addr.as_usize()))
}

#[cfg(not(feature = "std"))]
static VM_TO_PHY: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

/// Register the platform translator. Must be called before any DMA
/// allocation is attempted.
#[cfg(not(feature = "std"))]
pub fn register_translator(f: fn(VirtAddr) -> Option<PhyAddr>) {
    VM_TO_PHY.store(f as usize, core::sync::atomic::Ordering::Release);
}

#[cfg(not(feature = "std"))]
pub fn vm_to_phy(vm_addr: VirtAddr) -> Option<PhyAddr> {
    let f = VM_TO_PHY.load(core::sync::atomic::Ordering::Acquire);
    if f == 0 {
        return None;
    }

    let f: fn(VirtAddr) -> Option<PhyAddr> = unsafe { core::mem::transmute(f) };
    f(vm_addr)
}
