//! Queue Head Descriptor (QHD) - 48 hardware bytes, 32-byte aligned.
//!
//! Layout per EHCI 1.0 section 3.6:
//! - DWord 0: horizontal link pointer
//! - DWord 1: endpoint characteristics
//! - DWord 2: endpoint capabilities
//! - DWord 3: current qTD pointer
//! - DWords 4-11: transfer overlay
//!
//! The remaining 16 bytes up to the next 32-byte boundary are never read by
//! the controller and hold the driver's bookkeeping.

use core::sync::atomic::{fence, AtomicU32, Ordering};

use bitflags::bitflags;
use x86_64::PhysAddr;

use super::link::{LinkPointer, DESCRIPTOR_ALIGN};
use crate::drivers::usb::UsbSpeed;

/// Size of one QHD including the software area.
pub const QHD_SIZE: usize = 64;

bitflags! {
    /// Single-bit fields of the endpoint characteristics dword.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EpChar: u32 {
        /// I: do not execute the next transaction (periodic only)
        const INACTIVE_NEXT_XACT = 1 << 7;
        /// DTC: initial data toggle comes from the qTD
        const DATA_TOGGLE_CONTROL = 1 << 14;
        /// H: head of the reclamation list
        const HEAD_OF_RECLAMATION = 1 << 15;
        /// C: control endpoint on a full/low-speed device
        const CONTROL_ENDPOINT = 1 << 27;
    }
}

bitflags! {
    /// Status byte of a qTD token (and of the QHD overlay).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QtdStatus: u32 {
        const PING = 1 << 0;
        const SPLIT_STATE = 1 << 1;
        const MISSED_MICROFRAME = 1 << 2;
        const XACT_ERR = 1 << 3;
        const BABBLE = 1 << 4;
        const BUFFER_ERR = 1 << 5;
        const HALTED = 1 << 6;
        const ACTIVE = 1 << 7;
    }
}

const EP_ADDR_MASK: u32 = 0x7F;
const EP_ENDPT_SHIFT: u32 = 8;
const EP_ENDPT_MASK: u32 = 0xF;
const EP_EPS_SHIFT: u32 = 12;
const EP_EPS_MASK: u32 = 0x3;
const EP_MAXPKT_SHIFT: u32 = 16;
const EP_MAXPKT_MASK: u32 = 0x7FF;
const EP_RL_SHIFT: u32 = 28;
const EP_RL_MASK: u32 = 0xF;

const CAP_SMASK_SHIFT: u32 = 0;
const CAP_CMASK_SHIFT: u32 = 8;
const CAP_HUBADDR_SHIFT: u32 = 16;
const CAP_HUBADDR_MASK: u32 = 0x7F;
const CAP_PORT_SHIFT: u32 = 23;
const CAP_PORT_MASK: u32 = 0x7F;
const CAP_MULT_SHIFT: u32 = 30;
const CAP_MULT_MASK: u32 = 0x3;

/// Source of the data toggle for transactions on this queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataToggle {
    /// The QHD overlay keeps the toggle across qTDs.
    FromQueueHead,
    /// Each qTD carries its own toggle (control pipes: SETUP is always DATA0).
    PerDescriptor,
}

/// Decoded endpoint characteristics dword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointCharacteristics {
    pub device_address: u8,
    pub inactive_next_xact: bool,
    pub endpoint_number: u8,
    pub speed: UsbSpeed,
    pub data_toggle: DataToggle,
    pub head_list_flag: bool,
    pub max_packet_size: u16,
    pub non_hs_control_endpoint: bool,
    /// 0 disables the NAK counter: the controller retries forever.
    pub nak_count_reload: u8,
}

impl EndpointCharacteristics {
    pub fn encode(&self) -> u32 {
        let mut flags = EpChar::empty();
        flags.set(EpChar::INACTIVE_NEXT_XACT, self.inactive_next_xact);
        flags.set(
            EpChar::DATA_TOGGLE_CONTROL,
            self.data_toggle == DataToggle::PerDescriptor,
        );
        flags.set(EpChar::HEAD_OF_RECLAMATION, self.head_list_flag);
        flags.set(EpChar::CONTROL_ENDPOINT, self.non_hs_control_endpoint);

        (self.device_address as u32 & EP_ADDR_MASK)
            | ((self.endpoint_number as u32 & EP_ENDPT_MASK) << EP_ENDPT_SHIFT)
            | (self.speed.eps() << EP_EPS_SHIFT)
            | ((self.max_packet_size as u32 & EP_MAXPKT_MASK) << EP_MAXPKT_SHIFT)
            | ((self.nak_count_reload as u32 & EP_RL_MASK) << EP_RL_SHIFT)
            | flags.bits()
    }
}

/// Decoded endpoint capabilities dword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointCapabilities {
    pub smask: u8,
    pub cmask: u8,
    pub hub_address: u8,
    pub hub_port: u8,
    /// High-bandwidth pipe multiplier, 1..=3.
    pub mult: u8,
}

impl EndpointCapabilities {
    pub fn encode(&self) -> u32 {
        ((self.smask as u32) << CAP_SMASK_SHIFT)
            | ((self.cmask as u32) << CAP_CMASK_SHIFT)
            | ((self.hub_address as u32 & CAP_HUBADDR_MASK) << CAP_HUBADDR_SHIFT)
            | ((self.hub_port as u32 & CAP_PORT_MASK) << CAP_PORT_SHIFT)
            | ((self.mult as u32 & CAP_MULT_MASK) << CAP_MULT_SHIFT)
    }
}

/// Transfer overlay: the controller's working copy of the active qTD.
#[repr(C)]
pub struct QtdOverlay {
    next: u32,
    alternate: u32,
    token: AtomicU32,
    buffer: [u32; 5],
}

impl QtdOverlay {
    const fn new() -> Self {
        Self {
            next: LinkPointer::terminated().raw(),
            alternate: LinkPointer::terminated().raw(),
            token: AtomicU32::new(0),
            buffer: [0; 5],
        }
    }

    pub fn next(&self) -> LinkPointer {
        LinkPointer::from_raw(self.next)
    }

    pub fn alternate(&self) -> LinkPointer {
        LinkPointer::from_raw(self.alternate)
    }

    pub fn token(&self) -> u32 {
        self.token.load(Ordering::Acquire)
    }

    pub fn status(&self) -> QtdStatus {
        QtdStatus::from_bits_truncate(self.token() & 0xFF)
    }

    pub fn is_halted(&self) -> bool {
        self.status().contains(QtdStatus::HALTED)
    }

    pub fn is_active(&self) -> bool {
        self.status().contains(QtdStatus::ACTIVE)
    }
}

/// Queue Head Descriptor
#[repr(C, align(32))]
pub struct QueueHead {
    /// Horizontal link pointer, written with a single store once linked
    horizontal: AtomicU32,
    characteristics: u32,
    capabilities: u32,
    current_qtd: u32,
    overlay: QtdOverlay,

    // Not seen by the controller.
    /// Bus address of the first pending qTD, 0 when none
    qtd_list: u32,
    used: bool,
    _reserved: [u8; 11],
}

const _: () = assert!(core::mem::size_of::<QueueHead>() == QHD_SIZE);
const _: () = assert!(core::mem::align_of::<QueueHead>() == 32);

impl QueueHead {
    pub const fn new() -> Self {
        Self {
            horizontal: AtomicU32::new(LinkPointer::terminated().raw()),
            characteristics: 0,
            capabilities: 0,
            current_qtd: 0,
            overlay: QtdOverlay::new(),
            qtd_list: 0,
            used: false,
            _reserved: [0; 11],
        }
    }

    // ---- horizontal link ----

    pub fn next(&self) -> LinkPointer {
        LinkPointer::from_raw(self.horizontal.load(Ordering::Acquire))
    }

    /// Replaces the horizontal link with one store. On a QHD the controller
    /// can reach, this store is the moment the change becomes visible.
    pub fn publish_next(&self, link: LinkPointer) {
        self.horizontal.store(link.raw(), Ordering::Release);
    }

    // ---- endpoint words ----

    pub fn set_characteristics(&mut self, ep: &EndpointCharacteristics) {
        self.characteristics = ep.encode();
    }

    pub fn set_capabilities(&mut self, caps: &EndpointCapabilities) {
        self.capabilities = caps.encode();
    }

    pub fn characteristics_word(&self) -> u32 {
        self.characteristics
    }

    pub fn capabilities_word(&self) -> u32 {
        self.capabilities
    }

    fn flags(&self) -> EpChar {
        EpChar::from_bits_truncate(self.characteristics)
    }

    pub fn device_address(&self) -> u8 {
        (self.characteristics & EP_ADDR_MASK) as u8
    }

    pub fn inactive_next_xact(&self) -> bool {
        self.flags().contains(EpChar::INACTIVE_NEXT_XACT)
    }

    pub fn endpoint_number(&self) -> u8 {
        ((self.characteristics >> EP_ENDPT_SHIFT) & EP_ENDPT_MASK) as u8
    }

    pub fn endpoint_speed(&self) -> Option<UsbSpeed> {
        UsbSpeed::from_eps((self.characteristics >> EP_EPS_SHIFT) & EP_EPS_MASK)
    }

    pub fn data_toggle_control(&self) -> DataToggle {
        if self.flags().contains(EpChar::DATA_TOGGLE_CONTROL) {
            DataToggle::PerDescriptor
        } else {
            DataToggle::FromQueueHead
        }
    }

    pub fn head_list_flag(&self) -> bool {
        self.flags().contains(EpChar::HEAD_OF_RECLAMATION)
    }

    pub fn max_package_size(&self) -> u16 {
        ((self.characteristics >> EP_MAXPKT_SHIFT) & EP_MAXPKT_MASK) as u16
    }

    pub fn non_hs_control_endpoint(&self) -> bool {
        self.flags().contains(EpChar::CONTROL_ENDPOINT)
    }

    pub fn nak_count_reload(&self) -> u8 {
        ((self.characteristics >> EP_RL_SHIFT) & EP_RL_MASK) as u8
    }

    pub fn smask(&self) -> u8 {
        (self.capabilities >> CAP_SMASK_SHIFT) as u8
    }

    pub fn cmask(&self) -> u8 {
        (self.capabilities >> CAP_CMASK_SHIFT) as u8
    }

    pub fn hub_address(&self) -> u8 {
        ((self.capabilities >> CAP_HUBADDR_SHIFT) & CAP_HUBADDR_MASK) as u8
    }

    pub fn hub_port(&self) -> u8 {
        ((self.capabilities >> CAP_PORT_SHIFT) & CAP_PORT_MASK) as u8
    }

    pub fn mult(&self) -> u8 {
        ((self.capabilities >> CAP_MULT_SHIFT) & CAP_MULT_MASK) as u8
    }

    /// Full/low-speed endpoint reached through a hub's transaction translator.
    pub fn is_split(&self) -> bool {
        self.endpoint_speed().is_some_and(UsbSpeed::needs_split) && self.hub_address() != 0
    }

    // ---- overlay ----

    pub fn overlay(&self) -> &QtdOverlay {
        &self.overlay
    }

    pub fn current_qtd(&self) -> u32 {
        self.current_qtd
    }

    /// Stops the controller from executing anything on this queue. Safe on a
    /// linked QHD: only the token's status byte changes.
    pub fn halt(&self) {
        self.overlay
            .token
            .store(QtdStatus::HALTED.bits(), Ordering::Release);
    }

    /// Puts the overlay in the idle state of a queue with no work: no qTD,
    /// both links terminated, halted.
    pub fn park(&mut self) {
        self.halt();
        self.current_qtd = 0;
        self.overlay.next = LinkPointer::terminated().raw();
        self.overlay.alternate = LinkPointer::terminated().raw();
        self.overlay.buffer = [0; 5];
    }

    /// Hands a qTD chain to the controller: the overlay's next pointer is set
    /// first, then the halt is lifted so the controller fetches it.
    pub fn attach_qtd(&mut self, qtd: PhysAddr) {
        debug_assert!(
            qtd.align_down(DESCRIPTOR_ALIGN) == qtd,
            "ehci: misaligned qTD {:#x}",
            qtd.as_u64()
        );
        self.set_qtd_list(Some(qtd));
        self.overlay.next = qtd.as_u64() as u32;
        self.overlay.alternate = LinkPointer::terminated().raw();
        fence(Ordering::SeqCst);
        self.overlay.token.store(0, Ordering::Release);
    }

    // ---- software bookkeeping ----

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    /// First pending qTD, if any.
    pub fn qtd_list(&self) -> Option<PhysAddr> {
        match self.qtd_list {
            0 => None,
            addr => Some(PhysAddr::new(addr as u64)),
        }
    }

    pub fn set_qtd_list(&mut self, qtd: Option<PhysAddr>) {
        self.qtd_list = qtd.map_or(0, |addr| addr.as_u64() as u32);
    }
}

impl Default for QueueHead {
    fn default() -> Self {
        Self::new()
    }
}
