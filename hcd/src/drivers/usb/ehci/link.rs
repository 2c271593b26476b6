//! Link pointers: the 32-bit words EHCI descriptors use to reference each
//! other.
//!
//! ```text
//!  31                               5  4  3  2  1  0
//! +----------------------------------+-----+-----+---+
//! |     descriptor address [31:5]    | rsv | typ | T |
//! +----------------------------------+-----+-----+---+
//! ```

use core::fmt;

use x86_64::PhysAddr;

/// Every descriptor the controller links to is 32-byte aligned; the low
/// five bits of a link word carry flags.
pub const DESCRIPTOR_ALIGN: u64 = 32;

const TERMINATE: u32 = 1 << 0;
const TYPE_SHIFT: u32 = 1;
const TYPE_MASK: u32 = 0b11 << TYPE_SHIFT;
const RESERVED_MASK: u32 = 0b11 << 3;
const ADDR_MASK: u32 = !0x1F;

/// Descriptor kind named by the `typ` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LinkType {
    /// Isochronous transfer descriptor
    Itd = 0,
    /// Queue head
    Qh = 1,
    /// Split-transaction isochronous transfer descriptor
    Sitd = 2,
    /// Periodic frame span traversal node
    Fstn = 3,
}

impl LinkType {
    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => LinkType::Itd,
            1 => LinkType::Qh,
            2 => LinkType::Sitd,
            _ => LinkType::Fstn,
        }
    }
}

/// Immutable encoded link word. A new link is always built fresh and
/// written with one store; nothing edits a link in place.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LinkPointer(u32);

impl LinkPointer {
    /// "No next descriptor". The remaining bits are don't-care.
    pub const fn terminated() -> Self {
        Self(TERMINATE)
    }

    /// Links to the descriptor at `addr`.
    ///
    /// `addr` must be 32-byte aligned and reachable with a 32-bit pointer;
    /// anything else is a driver bug.
    pub fn new(addr: PhysAddr, ty: LinkType) -> Self {
        debug_assert!(
            addr.align_down(DESCRIPTOR_ALIGN) == addr,
            "ehci: misaligned descriptor address {:#x}",
            addr.as_u64()
        );
        debug_assert!(
            addr.as_u64() <= u32::MAX as u64,
            "ehci: descriptor above 4GiB {:#x}",
            addr.as_u64()
        );
        Self((addr.as_u64() as u32 & ADDR_MASK) | ((ty as u32) << TYPE_SHIFT))
    }

    /// Decodes a word read back from descriptor memory.
    pub fn from_raw(raw: u32) -> Self {
        debug_assert!(
            raw & TERMINATE != 0 || raw & RESERVED_MASK == 0,
            "ehci: reserved bits set in link word {:#010x}",
            raw
        );
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_terminated(self) -> bool {
        self.0 & TERMINATE != 0
    }

    /// Target address, `None` when terminated.
    pub fn address(self) -> Option<PhysAddr> {
        if self.is_terminated() {
            None
        } else {
            Some(PhysAddr::new((self.0 & ADDR_MASK) as u64))
        }
    }

    /// Target descriptor kind, `None` when terminated.
    pub const fn link_type(self) -> Option<LinkType> {
        if self.is_terminated() {
            None
        } else {
            Some(LinkType::from_bits((self.0 & TYPE_MASK) >> TYPE_SHIFT))
        }
    }
}

impl fmt::Debug for LinkPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.address(), self.link_type()) {
            (Some(addr), Some(ty)) => write!(f, "LinkPointer({:?} @ {:#x})", ty, addr.as_u64()),
            _ => f.write_str("LinkPointer(T)"),
        }
    }
}

impl Default for LinkPointer {
    fn default() -> Self {
        Self::terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated() {
        let lp = LinkPointer::terminated();
        assert!(lp.is_terminated());
        assert_eq!(lp.raw(), 1);
        assert_eq!(lp.address(), None);
        assert_eq!(lp.link_type(), None);
    }

    #[test]
    fn test_qh_link_bits() {
        let lp = LinkPointer::new(PhysAddr::new(0x1234_5660), LinkType::Qh);
        assert_eq!(lp.raw(), 0x1234_5662);
        assert!(!lp.is_terminated());
        assert_eq!(lp.address(), Some(PhysAddr::new(0x1234_5660)));
        assert_eq!(lp.link_type(), Some(LinkType::Qh));
    }

    #[test]
    fn test_type_field() {
        let base = PhysAddr::new(0x8000);
        assert_eq!(LinkPointer::new(base, LinkType::Itd).raw() & 0x1F, 0b000);
        assert_eq!(LinkPointer::new(base, LinkType::Sitd).raw() & 0x1F, 0b100);
        assert_eq!(LinkPointer::new(base, LinkType::Fstn).raw() & 0x1F, 0b110);
    }

    #[test]
    fn test_terminated_word_ignores_other_bits() {
        // Hardware leaves stale address bits behind a set T bit.
        let lp = LinkPointer::from_raw(0xDEAD_BEE3);
        assert!(lp.is_terminated());
        assert_eq!(lp.address(), None);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_misaligned_address_rejected() {
        let _ = LinkPointer::new(PhysAddr::new(0x1010), LinkType::Qh);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_reserved_bits_rejected() {
        let _ = LinkPointer::from_raw(0x1000 | (1 << 3) | 0b10);
    }
}
