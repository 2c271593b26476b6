//! EHCI host controller driver core: queue heads, the asynchronous schedule
//! and control pipe management.
//!
//! The crate is `no_std` + `alloc`; the embedding kernel provides DMA address
//! translation (`mm::DmaMapper`), a log sink (`console::set_sink`) and the
//! device topology (`drivers::usb::Topology`).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod util;
pub mod console;
pub mod mm;
pub mod drivers;

pub use drivers::usb::ehci::{EhciHcd, HcdConfig, HostController};
pub use drivers::usb::{DeviceInfo, Topology, TopologyTable, UsbSpeed};
pub use util::{KError, KResult};
