//! Scatter/gather DMA binding over existing memory.
//!
//! A [`DmaMap`] is created once with the device's constraints and then
//! loaded and unloaded around each transfer. Loading walks the region page
//! by page, coalescing physically contiguous runs into segments; the
//! resulting segment list is what descriptor emission consumes. A region
//! that cannot be described within the constraints fails the load, and the
//! caller decides whether to copy instead or to give the frame back.

use alloc::vec::Vec;

use crate::{
    addr::{phy_addr::PhyAddr, virt_addr::VirtAddr, Addr},
    barrier,
    paging::{self, PAGESIZE},
};

/// DMA constraints for a device.
#[derive(Debug, Clone, Copy)]
pub struct DmaTag {
    /// Maximum DMA address the device can access
    pub boundary: u64,
    /// Maximum size of a single DMA segment
    pub maxsegsz: usize,
    /// Maximum number of segments in a transfer
    pub nsegments: usize,
    /// Maximum total size of a DMA transfer
    pub maxsize: usize,
    /// Alignment requirements (must be power of 2)
    pub alignment: usize,
}

impl DmaTag {
    /// A permissive tag for 64-bit bus-mastering devices.
    pub const fn new_64bit() -> Self {
        Self {
            boundary: u64::MAX,
            maxsegsz: usize::MAX,
            nsegments: 1,
            maxsize: usize::MAX,
            alignment: 1,
        }
    }
}

/// One device-visible segment of a loaded map.
#[derive(Debug, Clone, Copy)]
pub struct DmaSegment {
    pub ds_addr: PhyAddr,
    pub ds_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Address exceeds the device's DMA boundary
    AddressTooHigh,
    /// Size exceeds the maximum transfer size
    SizeTooLarge,
    /// Too many segments required
    TooManySegments,
    /// Alignment requirements not met
    BadAlignment,
    /// No physical translation for the region
    NoTranslation,
    /// Map not loaded
    NotLoaded,
}

/// DMA synchronization direction.
#[derive(Debug, Clone, Copy)]
pub enum DmaSyncOp {
    /// Before the device reads the region
    PreRead,
    /// After the device wrote the region, before the CPU reads it
    PostRead,
}

pub struct DmaMap {
    tag: DmaTag,
    segments: Vec<DmaSegment>,
    mapsize: usize,
}

impl DmaMap {
    pub fn new(tag: DmaTag) -> Self {
        Self {
            tag,
            segments: Vec::new(),
            mapsize: 0,
        }
    }

    /// Load `[vaddr, vaddr + size)` into the map, building the segment list.
    pub fn load(&mut self, vaddr: VirtAddr, size: usize) -> Result<(), DmaError> {
        if size > self.tag.maxsize {
            return Err(DmaError::SizeTooLarge);
        }

        if vaddr.as_usize() & (self.tag.alignment - 1) != 0 {
            return Err(DmaError::BadAlignment);
        }

        self.segments.clear();

        let mut offset = 0;
        while offset < size {
            let page_offset = (vaddr.as_usize() + offset) % PAGESIZE;
            let chunk = core::cmp::min(PAGESIZE - page_offset, size - offset);

            let Some(paddr) = paging::vm_to_phy(vaddr + offset) else {
                self.segments.clear();
                return Err(DmaError::NoTranslation);
            };

            if paddr.as_usize() as u64 > self.tag.boundary {
                self.segments.clear();
                return Err(DmaError::AddressTooHigh);
            }

            // Extend the previous segment when the physical run continues.
            let coalesced = match self.segments.last_mut() {
                Some(last)
                    if last.ds_addr + last.ds_len == paddr
                        && last.ds_len + chunk <= self.tag.maxsegsz =>
                {
                    last.ds_len += chunk;
                    true
                }
                _ => false,
            };

            if !coalesced {
                if self.segments.len() >= self.tag.nsegments || chunk > self.tag.maxsegsz {
                    self.segments.clear();
                    return Err(DmaError::TooManySegments);
                }

                self.segments.push(DmaSegment {
                    ds_addr: paddr,
                    ds_len: chunk,
                });
            }

            offset += chunk;
        }

        self.mapsize = size;
        Ok(())
    }

    pub fn unload(&mut self) {
        self.segments.clear();
        self.mapsize = 0;
    }

    pub fn is_loaded(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Order memory against the device for the loaded region.
    pub fn sync(&self, op: DmaSyncOp) -> Result<(), DmaError> {
        if self.segments.is_empty() {
            return Err(DmaError::NotLoaded);
        }

        match op {
            DmaSyncOp::PreRead => barrier::membar_producer(),
            DmaSyncOp::PostRead => barrier::membar_consumer(),
        }

        Ok(())
    }

    pub fn get_segments(&self) -> &[DmaSegment] {
        &self.segments
    }

    pub fn mapsize(&self) -> usize {
        self.mapsize
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_load_coalesces_identity_mapping() {
        let buf = alloc::vec![0u8; 3 * PAGESIZE];
        let mut map = DmaMap::new(DmaTag {
            nsegments: 8,
            maxsegsz: usize::MAX,
            ..DmaTag::new_64bit()
        });

        map.load(VirtAddr::new(buf.as_ptr() as usize), buf.len())
            .unwrap();

        // Identity mapping means every page continues the previous run.
        assert_eq!(map.get_segments().len(), 1);
        assert_eq!(map.get_segments()[0].ds_len, 3 * PAGESIZE);

        map.unload();
        assert!(!map.is_loaded());
    }

    #[test]
    fn test_load_splits_at_maxsegsz() {
        let buf = alloc::vec![0u8; 2 * PAGESIZE];
        let mut map = DmaMap::new(DmaTag {
            nsegments: 8,
            maxsegsz: PAGESIZE,
            ..DmaTag::new_64bit()
        });

        map.load(VirtAddr::new(buf.as_ptr() as usize), buf.len())
            .unwrap();

        assert!(map.get_segments().len() >= 2);
        let total: usize = map.get_segments().iter().map(|s| s.ds_len).sum();
        assert_eq!(total, 2 * PAGESIZE);
    }

    #[test]
    fn test_load_rejects_too_many_segments() {
        let buf = alloc::vec![0u8; 4 * PAGESIZE];
        let mut map = DmaMap::new(DmaTag {
            nsegments: 2,
            maxsegsz: PAGESIZE / 2,
            ..DmaTag::new_64bit()
        });

        assert_eq!(
            map.load(VirtAddr::new(buf.as_ptr() as usize), buf.len()),
            Err(DmaError::TooManySegments)
        );
        assert!(!map.is_loaded());
    }
}
