//! Asynchronous schedule: the circular list of QHDs the controller walks
//! for control and bulk traffic while ASE is set.
//!
//! The controller reads the ring concurrently with every change made here,
//! and it cannot be paused cheaply. Changes are therefore made so that the
//! only write the controller can observe is a single link store:
//!
//! - insert: the new QHD is built completely and pointed at the head's
//!   successor first, then the head's link is swapped to it;
//! - remove: the predecessor's link is swapped to the victim's successor;
//!   the victim keeps its own link so a controller parked on it still finds
//!   its way back into the ring.

use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use x86_64::PhysAddr;

use super::link::{LinkPointer, LinkType};
use super::pool::{QhPool, HEAD};
use super::qhd::{DataToggle, EndpointCapabilities, EndpointCharacteristics, QueueHead};
use crate::drivers::usb::UsbSpeed;

pub struct AsyncSchedule {
    pool: QhPool,
}

impl AsyncSchedule {
    /// Takes ownership of a freshly allocated pool and sets up entry 0 as
    /// the permanent head: H bit set, halted, linked to itself.
    pub fn new(mut pool: QhPool) -> Self {
        let head_bus = pool.bus_addr(HEAD);
        let head = pool.head_mut();

        head.set_characteristics(&EndpointCharacteristics {
            device_address: 0,
            inactive_next_xact: false,
            endpoint_number: 0,
            speed: UsbSpeed::High,
            data_toggle: DataToggle::PerDescriptor,
            head_list_flag: true,
            max_packet_size: 64,
            non_hs_control_endpoint: false,
            nak_count_reload: 0,
        });
        head.set_capabilities(&EndpointCapabilities {
            mult: 1,
            ..Default::default()
        });
        head.park();
        head.publish_next(LinkPointer::new(head_bus, LinkType::Qh));

        Self { pool }
    }

    pub fn pool(&self) -> &QhPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut QhPool {
        &mut self.pool
    }

    pub fn head(&self) -> &QueueHead {
        self.pool.head()
    }

    /// Value for ASYNCLISTADDR.
    pub fn head_bus_addr(&self) -> PhysAddr {
        self.pool.bus_addr(HEAD)
    }

    /// Pool entry the link of `index` points at. `None` for a terminated
    /// link or one that leaves the pool.
    fn successor(&self, index: usize) -> Option<usize> {
        let addr = self.pool.get(index)?.next().address()?;
        self.pool.index_of(addr)
    }

    /// Pool entries on the ring in controller order, head excluded.
    /// `None` if the ring is broken.
    pub fn walk(&self) -> Option<Vec<usize>> {
        let mut ring = Vec::new();
        let mut cur = HEAD;
        loop {
            let next = self.successor(cur)?;
            if next == HEAD {
                return Some(ring);
            }
            if ring.len() >= self.pool.slots() {
                // Looping without coming back through the head.
                return None;
            }
            ring.push(next);
            cur = next;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index == HEAD || self.walk().is_some_and(|ring| ring.contains(&index))
    }

    /// Links entry `index` in right after the head.
    ///
    /// Every field of the QHD other than its link must already be final: the
    /// controller may fetch it as soon as the head's link is stored.
    pub fn splice(&mut self, index: usize) {
        debug_assert!(index != HEAD, "ehci: the head is always linked");
        debug_assert!(!self.contains(index), "ehci: QHD {} already linked", index);

        let head_bus = self.pool.bus_addr(HEAD);
        let target = self.pool.bus_addr(index);
        let inherited = self.head().next().address().unwrap_or(head_bus);

        let Some(qh) = self.pool.get(index) else {
            return;
        };
        qh.publish_next(LinkPointer::new(inherited, LinkType::Qh));

        // The new QHD must be visible in memory before the head points at it.
        fence(Ordering::SeqCst);
        self.head().publish_next(LinkPointer::new(target, LinkType::Qh));

        crate::kprintln!(
            "ehci: linked QHD {:#x} after head {:#x}",
            target.as_u64(),
            head_bus.as_u64()
        );
    }

    /// Takes entry `index` off the ring. Returns false if it was not linked.
    ///
    /// The QHD memory must stay untouched until the controller has advanced
    /// past it (async advance doorbell, owned by the interrupt path).
    pub fn unlink(&mut self, index: usize) -> bool {
        if index == HEAD {
            return false;
        }

        let head_bus = self.pool.bus_addr(HEAD);
        let mut cur = HEAD;
        for _ in 0..=self.pool.slots() {
            let Some(next) = self.successor(cur) else {
                return false;
            };
            if next == index {
                let bypass = self.pool.get(index).and_then(|qh| qh.next().address());
                fence(Ordering::SeqCst);
                if let Some(pred) = self.pool.get(cur) {
                    pred.publish_next(LinkPointer::new(
                        bypass.unwrap_or(head_bus),
                        LinkType::Qh,
                    ));
                }
                crate::kprintln!(
                    "ehci: unlinked QHD {:#x}",
                    self.pool.bus_addr(index).as_u64()
                );
                return true;
            }
            if next == HEAD {
                return false;
            }
            cur = next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testing::BusWindow;

    fn schedule(slots: usize) -> AsyncSchedule {
        let pool = QhPool::new(slots, &BusWindow::new(0x4000_0000, 0x10_0000)).unwrap();
        AsyncSchedule::new(pool)
    }

    #[test]
    fn test_head_bring_up_state() {
        let s = schedule(4);
        let head = s.head();
        assert!(head.head_list_flag());
        assert!(head.overlay().is_halted());
        assert!(head.overlay().next().is_terminated());
        assert!(head.overlay().alternate().is_terminated());
        assert_eq!(head.next().address(), Some(s.head_bus_addr()));
        assert_eq!(head.next().link_type(), Some(LinkType::Qh));
        assert_eq!(s.walk(), Some(Vec::new()));
    }

    #[test]
    fn test_splice_inserts_after_head() {
        let mut s = schedule(4);
        s.splice(1);
        s.splice(3);
        assert_eq!(s.walk(), Some(alloc::vec![3, 1]));

        // The last one in still closes the ring through the head.
        let tail = s.pool().get(1).unwrap().next();
        assert_eq!(tail.address(), Some(s.head_bus_addr()));
        assert!(!tail.is_terminated());
        assert_eq!(tail.link_type(), Some(LinkType::Qh));

        assert!(s.contains(1));
        assert!(s.contains(3));
        assert!(!s.contains(2));
    }

    #[test]
    fn test_unlink() {
        let mut s = schedule(4);
        for i in 1..=4 {
            s.splice(i);
        }
        assert!(s.unlink(2));
        assert_eq!(s.walk(), Some(alloc::vec![4, 3, 1]));
        // The removed QHD still leads back into the ring.
        assert_eq!(s.pool().get(2).unwrap().next().address(), Some(s.pool().bus_addr(1)));

        assert!(!s.unlink(2));
        assert!(!s.unlink(HEAD));
        assert!(s.unlink(4));
        assert!(s.unlink(1));
        assert!(s.unlink(3));
        assert_eq!(s.walk(), Some(Vec::new()));
        assert_eq!(s.head().next().address(), Some(s.head_bus_addr()));
    }

    #[test]
    fn test_walk_detects_broken_ring() {
        let mut s = schedule(4);
        s.splice(1);
        s.splice(2);
        s.pool().get(1).unwrap().publish_next(LinkPointer::terminated());
        assert_eq!(s.walk(), None);

        // 2 -> 1 -> 2 never returns to the head.
        let two = s.pool().bus_addr(2);
        s.pool().get(1).unwrap().publish_next(LinkPointer::new(two, LinkType::Qh));
        assert_eq!(s.walk(), None);
        assert!(!s.contains(1));
    }
}
