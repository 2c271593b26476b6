//! USB host support.
//!
//! Only the EHCI control pipe core lives here; enumeration and the class
//! drivers sit above it and feed it through [`Topology`].

pub mod ehci;
pub mod topology;

pub use topology::{DeviceInfo, Topology, TopologyTable};

/// Highest address a USB device can be assigned. Address 0 is the default
/// address a device answers on until SET_ADDRESS.
pub const MAX_DEVICE_ADDRESS: u8 = 127;

/// Negotiated bus speed of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsbSpeed {
    #[default]
    Full,      // 12 Mbps (USB 1.1)
    Low,       // 1.5 Mbps (USB 1.0)
    High,      // 480 Mbps (USB 2.0)
}

impl UsbSpeed {
    /// EPS field encoding in the QHD endpoint characteristics.
    pub const fn eps(self) -> u32 {
        match self {
            UsbSpeed::Full => 0,
            UsbSpeed::Low => 1,
            UsbSpeed::High => 2,
        }
    }

    pub const fn from_eps(eps: u32) -> Option<Self> {
        match eps {
            0 => Some(UsbSpeed::Full),
            1 => Some(UsbSpeed::Low),
            2 => Some(UsbSpeed::High),
            _ => None,
        }
    }

    /// Transactions to a device below high speed go through the
    /// transaction translator of the upstream high-speed hub.
    pub const fn needs_split(self) -> bool {
        !matches!(self, UsbSpeed::High)
    }
}
