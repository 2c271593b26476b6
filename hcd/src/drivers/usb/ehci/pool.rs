//! Per-controller QHD pool, which doubles as the device slot table.
//!
//! Entry 0 is the permanent async schedule head (and the default-address
//! control pipe); entry `n` holds the control QHD of device address `n`.
//! The pool is one DMA mapping, so bus address <-> entry is arithmetic.

use alloc::boxed::Box;
use alloc::vec::Vec;

use x86_64::{PhysAddr, VirtAddr};

use super::link::DESCRIPTOR_ALIGN;
use super::qhd::{QueueHead, QHD_SIZE};
use crate::mm::DmaMapper;
use crate::util::{KError, KResult};

/// Pool entry of the async schedule head.
pub const HEAD: usize = 0;

pub struct QhPool {
    entries: Box<[QueueHead]>,
    bus_base: PhysAddr,
}

impl QhPool {
    /// Allocates the head plus `slots` device entries and maps them for DMA.
    pub fn new<M: DmaMapper + ?Sized>(slots: usize, mapper: &M) -> KResult<Self> {
        let entries: Box<[QueueHead]> = (0..=slots)
            .map(|_| QueueHead::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let len = entries.len() * QHD_SIZE;
        let virt = VirtAddr::from_ptr(entries.as_ptr());
        let bus_base = mapper.map(virt, len).ok_or(KError::NoMemory)?;

        // QHD pointers are 32 bits wide (CTRLDSSEGMENT stays 0).
        if bus_base.align_down(DESCRIPTOR_ALIGN) != bus_base
            || bus_base.as_u64() + len as u64 > 1 << 32
        {
            crate::kprintln!("ehci: QHD pool mapped at unusable address {:#x}", bus_base.as_u64());
            return Err(KError::Invalid);
        }

        Ok(Self { entries, bus_base })
    }

    /// Number of device slots (the head not counted).
    pub fn slots(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&QueueHead> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut QueueHead> {
        self.entries.get_mut(index)
    }

    pub fn head(&self) -> &QueueHead {
        &self.entries[HEAD]
    }

    pub fn head_mut(&mut self) -> &mut QueueHead {
        &mut self.entries[HEAD]
    }

    /// Slot of a non-zero device address.
    pub fn slot_of(&self, device_address: u8) -> KResult<usize> {
        let index = device_address as usize;
        if index == HEAD || index >= self.entries.len() {
            return Err(KError::ResourceExhausted);
        }
        Ok(index)
    }

    /// Bus address of an entry.
    pub fn bus_addr(&self, index: usize) -> PhysAddr {
        debug_assert!(index < self.entries.len());
        self.bus_base + (index * QHD_SIZE) as u64
    }

    /// Entry a bus address points at, if it is one of ours.
    pub fn index_of(&self, addr: PhysAddr) -> Option<usize> {
        let offset = addr.as_u64().checked_sub(self.bus_base.as_u64())? as usize;
        if offset % QHD_SIZE != 0 {
            return None;
        }
        let index = offset / QHD_SIZE;
        (index < self.entries.len()).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testing::BusWindow;

    #[test]
    fn test_bus_translation() {
        let pool = QhPool::new(4, &BusWindow::new(0x2000_0000, 0x10_0000)).unwrap();
        assert_eq!(pool.slots(), 4);
        assert_eq!(pool.bus_addr(HEAD).as_u64(), 0x2000_0000);
        assert_eq!(pool.bus_addr(3).as_u64(), 0x2000_00C0);
        assert_eq!(pool.index_of(PhysAddr::new(0x2000_00C0)), Some(3));
        assert_eq!(pool.index_of(PhysAddr::new(0x2000_00C4)), None);
        assert_eq!(pool.index_of(PhysAddr::new(0x2000_0140)), None);
        assert_eq!(pool.index_of(PhysAddr::new(0x1000_0000)), None);
    }

    #[test]
    fn test_slot_bounds() {
        let pool = QhPool::new(2, &BusWindow::new(0x2000_0000, 0x1000)).unwrap();
        assert_eq!(pool.slot_of(1), Ok(1));
        assert_eq!(pool.slot_of(2), Ok(2));
        assert_eq!(pool.slot_of(3), Err(KError::ResourceExhausted));
        assert_eq!(pool.slot_of(0), Err(KError::ResourceExhausted));
    }

    #[test]
    fn test_unusable_mappings() {
        assert_eq!(
            QhPool::new(2, &BusWindow::new(0x2000_0000, 0)).err(),
            Some(KError::NoMemory)
        );
        assert_eq!(
            QhPool::new(2, &BusWindow::new(0x2000_0010, 0x1000)).err(),
            Some(KError::Invalid)
        );
        assert_eq!(
            QhPool::new(2, &BusWindow::new(0xFFFF_FFC0, 0x2000)).err(),
            Some(KError::Invalid)
        );
    }
}
