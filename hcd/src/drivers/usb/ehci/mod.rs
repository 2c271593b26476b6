//! EHCI (Enhanced Host Controller Interface) driver core for USB 2.0.
//!
//! Covers:
//! - Queue Head (QHD) layout and the transfer overlay
//! - The asynchronous schedule and race-free insertion into it
//! - Control pipe open/close, including the default address 0 pipe
//! - Split-transaction classification for full/low-speed devices behind hubs
//!
//! Each controller instance owns its schedule and QHD pool; all of them hang
//! off an [`EhciHcd`] context that the host stack passes around explicitly.

extern crate alloc;

use alloc::vec::Vec;

use x86_64::PhysAddr;

use super::{Topology, MAX_DEVICE_ADDRESS};
use crate::mm::DmaMapper;
use crate::util::{KError, KResult};

pub mod link;
pub mod pipe;
pub mod pool;
pub mod qhd;
pub mod schedule;

use pool::{QhPool, HEAD};
use qhd::QueueHead;
use schedule::AsyncSchedule;

/// Driver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HcdConfig {
    /// Device addresses 1..=max_devices get a control QHD on every controller.
    pub max_devices: u8,
}

impl HcdConfig {
    pub const fn new() -> Self {
        Self { max_devices: 8 }
    }

    pub const fn with_max_devices(mut self, max_devices: u8) -> Self {
        self.max_devices = if max_devices > MAX_DEVICE_ADDRESS {
            MAX_DEVICE_ADDRESS
        } else {
            max_devices
        };
        self
    }
}

impl Default for HcdConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One EHCI controller
pub struct HostController {
    /// Id the topology records refer to (`DeviceInfo::core_id`)
    id: u8,
    /// Async schedule, its head and the device QHD slots
    schedule: AsyncSchedule,
}

impl HostController {
    /// Allocates the QHD pool and brings up the async schedule head.
    pub fn new<M: DmaMapper + ?Sized>(id: u8, config: &HcdConfig, mapper: &M) -> KResult<Self> {
        let pool = QhPool::new(config.max_devices as usize, mapper)?;
        let schedule = AsyncSchedule::new(pool);

        crate::kprintln!(
            "ehci: controller {} async head at {:#x}, {} device slots",
            id,
            schedule.head_bus_addr().as_u64(),
            config.max_devices
        );

        Ok(Self { id, schedule })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn schedule(&self) -> &AsyncSchedule {
        &self.schedule
    }

    /// The permanent head QHD.
    pub fn async_head(&self) -> &QueueHead {
        self.schedule.head()
    }

    /// Value to program into ASYNCLISTADDR.
    pub fn async_list_addr(&self) -> PhysAddr {
        self.schedule.head_bus_addr()
    }

    fn pool_index(&self, device_address: u8) -> Option<usize> {
        match device_address {
            0 => Some(HEAD),
            addr => self.schedule.pool().slot_of(addr).ok(),
        }
    }

    /// Control QHD of a device. Address 0 resolves to the async head.
    pub fn control_qhd(&self, device_address: u8) -> Option<&QueueHead> {
        self.schedule.pool().get(self.pool_index(device_address)?)
    }

    /// Bus address of a device's control QHD.
    pub fn control_qhd_addr(&self, device_address: u8) -> Option<PhysAddr> {
        Some(self.schedule.pool().bus_addr(self.pool_index(device_address)?))
    }
}

/// Host controller driver context: every controller plus the topology
/// collaborator they share.
pub struct EhciHcd<T: Topology> {
    config: HcdConfig,
    topology: T,
    controllers: Vec<HostController>,
}

impl<T: Topology> EhciHcd<T> {
    pub fn new(config: HcdConfig, topology: T) -> Self {
        Self {
            config,
            topology,
            controllers: Vec::new(),
        }
    }

    pub fn config(&self) -> &HcdConfig {
        &self.config
    }

    /// Brings up controller `id`. Ids must be unique.
    pub fn add_controller<M: DmaMapper + ?Sized>(&mut self, id: u8, mapper: &M) -> KResult<()> {
        if self.controller(id).is_some() {
            return Err(KError::AlreadyExists);
        }
        let controller = HostController::new(id, &self.config, mapper)?;
        self.controllers.push(controller);
        Ok(())
    }

    pub fn controller(&self, id: u8) -> Option<&HostController> {
        self.controllers.iter().find(|c| c.id == id)
    }

    fn controller_mut(&mut self, id: u8) -> Option<&mut HostController> {
        self.controllers.iter_mut().find(|c| c.id == id)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &HostController> {
        self.controllers.iter()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// For the enumeration layer, which owns the topology records.
    pub fn topology_mut(&mut self) -> &mut T {
        &mut self.topology
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::TopologyTable;
    use crate::mm::testing::BusWindow;

    #[test]
    fn test_config_clamps_addresses() {
        assert_eq!(HcdConfig::new().max_devices, 8);
        assert_eq!(HcdConfig::new().with_max_devices(200).max_devices, 127);
    }

    #[test]
    fn test_add_controller() {
        let window = BusWindow::new(0x1000_0000, 0x10_0000);
        let mut hcd = EhciHcd::new(HcdConfig::new(), TopologyTable::new());
        hcd.add_controller(0, &window).unwrap();
        hcd.add_controller(1, &window).unwrap();
        assert_eq!(hcd.add_controller(1, &window), Err(KError::AlreadyExists));
        assert_eq!(hcd.controller_count(), 2);

        let c0 = hcd.controller(0).unwrap();
        let c1 = hcd.controller(1).unwrap();
        assert_ne!(c0.async_list_addr(), c1.async_list_addr());
        assert_eq!(c0.control_qhd_addr(0), Some(c0.async_list_addr()));
        assert_eq!(
            c0.control_qhd_addr(2).map(|a| a.as_u64()),
            Some(c0.async_list_addr().as_u64() + 128)
        );
        assert!(c0.control_qhd(9).is_none());
        assert!(hcd.controller(7).is_none());
    }
}
