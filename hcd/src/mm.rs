//! DMA address translation for descriptor memory.

use x86_64::{PhysAddr, VirtAddr};

/// Translates CPU-visible buffers into the bus addresses the controller
/// dereferences over DMA.
pub trait DmaMapper {
    /// Maps `len` bytes at `virt` for device access. The whole range must be
    /// contiguous on the bus side.
    fn map(&self, virt: VirtAddr, len: usize) -> Option<PhysAddr>;
}

/// Linear mapping: physical memory is visible at a fixed virtual offset, so
/// `phys = virt - offset`. This is the layout kernels get from a bootloader
/// that maps all of physical memory at `physical_memory_offset`.
#[derive(Debug, Clone, Copy)]
pub struct OffsetMapper {
    offset: VirtAddr,
}

impl OffsetMapper {
    pub const fn new(offset: VirtAddr) -> Self {
        Self { offset }
    }
}

impl DmaMapper for OffsetMapper {
    fn map(&self, virt: VirtAddr, len: usize) -> Option<PhysAddr> {
        let start = virt.as_u64().checked_sub(self.offset.as_u64())?;
        start.checked_add(len as u64)?;
        PhysAddr::try_new(start).ok()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use core::cell::Cell;

    /// IOMMU-style window that hands out consecutive bus addresses,
    /// ignoring where the buffer actually lives.
    pub struct BusWindow {
        next: Cell<u64>,
        end: u64,
    }

    impl BusWindow {
        pub fn new(base: u64, size: u64) -> Self {
            Self { next: Cell::new(base), end: base + size }
        }
    }

    impl DmaMapper for BusWindow {
        fn map(&self, _virt: VirtAddr, len: usize) -> Option<PhysAddr> {
            let base = self.next.get();
            let len = (len as u64 + 0xFFF) & !0xFFF;
            if base + len > self.end {
                return None;
            }
            self.next.set(base + len);
            Some(PhysAddr::new(base))
        }
    }
}
