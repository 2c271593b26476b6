//! Device topology as seen by the host controller driver.
//!
//! Records are written by enumeration and hub code; the pipe code only
//! reads them.

use alloc::collections::BTreeMap;

use super::UsbSpeed;

/// Where a device sits and how fast it talks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Id of the host controller the device is attached to.
    pub core_id: u8,
    /// Address of the nearest upstream high-speed hub, 0 for a root port.
    pub hub_addr: u8,
    /// Port on that hub.
    pub hub_port: u8,
    pub speed: UsbSpeed,
    pub connected: bool,
}

impl DeviceInfo {
    pub const fn new(core_id: u8, speed: UsbSpeed) -> Self {
        Self {
            core_id,
            hub_addr: 0,
            hub_port: 0,
            speed,
            connected: true,
        }
    }

    pub const fn behind_hub(mut self, hub_addr: u8, hub_port: u8) -> Self {
        self.hub_addr = hub_addr;
        self.hub_port = hub_port;
        self
    }
}

/// Read-only lookup of device records by USB address.
pub trait Topology {
    fn device(&self, address: u8) -> Option<DeviceInfo>;
}

/// Topology kept in a map keyed by device address.
#[derive(Debug, Default)]
pub struct TopologyTable {
    devices: BTreeMap<u8, DeviceInfo>,
}

impl TopologyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or replaces) the device at `address`.
    pub fn insert(&mut self, address: u8, info: DeviceInfo) -> Option<DeviceInfo> {
        self.devices.insert(address, info)
    }

    pub fn remove(&mut self, address: u8) -> Option<DeviceInfo> {
        self.devices.remove(&address)
    }

    pub fn set_speed(&mut self, address: u8, speed: UsbSpeed) -> bool {
        match self.devices.get_mut(&address) {
            Some(info) => {
                info.speed = speed;
                true
            }
            None => false,
        }
    }

    /// Marks a device as gone without forgetting which controller it was on.
    pub fn set_connected(&mut self, address: u8, connected: bool) -> bool {
        match self.devices.get_mut(&address) {
            Some(info) => {
                info.connected = connected;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Topology for TopologyTable {
    fn device(&self, address: u8) -> Option<DeviceInfo> {
        self.devices.get(&address).copied()
    }
}
