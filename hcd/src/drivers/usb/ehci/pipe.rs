//! Control pipes.
//!
//! Opening a pipe only builds a QHD and puts it on the async schedule; the
//! overlay is left halted so the controller does nothing with it until a qTD
//! chain is attached by the transfer code.

use core::sync::atomic::{fence, Ordering};

use super::pool::HEAD;
use super::qhd::{DataToggle, EndpointCapabilities, EndpointCharacteristics};
use super::{EhciHcd, HostController};
use crate::drivers::usb::{DeviceInfo, Topology, MAX_DEVICE_ADDRESS};
use crate::util::{KError, KResult};

/// NAK counter reload for control pipes. 0 disables the counter, so a
/// device that keeps NAKing is retried by the controller indefinitely.
pub const CONTROL_NAK_RELOAD: u8 = 0;

fn valid_control_packet_size(max_packet_size: u16) -> bool {
    matches!(max_packet_size, 8 | 16 | 32 | 64)
}

impl<T: Topology> EhciHcd<T> {
    /// Opens the control pipe (endpoint 0) of `device_address`.
    ///
    /// Address 0 is the default pipe used during enumeration; it lives in the
    /// async head of the device's controller and takes no slot. Fails without
    /// touching any QHD if the device is unknown or disconnected, or if its
    /// controller has no slot for the address.
    pub fn open_control_pipe(&mut self, device_address: u8, max_packet_size: u16) -> KResult<()> {
        let result = self.lookup(device_address).and_then(|info| {
            let host = self
                .controller_mut(info.core_id)
                .ok_or(KError::InvalidDevice)?;
            host.open_control(device_address, max_packet_size, &info)
        });

        if let Err(e) = result {
            crate::kprintln!("ehci: open control pipe {} failed: {}", device_address, e);
        }
        result
    }

    /// Closes the control pipe of `device_address`: halts it and takes it off
    /// the schedule. The default pipe is only halted, the head stays linked.
    pub fn close_control_pipe(&mut self, device_address: u8) -> KResult<()> {
        let info = self
            .topology
            .device(device_address)
            .ok_or(KError::InvalidDevice)?;
        let host = self
            .controller_mut(info.core_id)
            .ok_or(KError::InvalidDevice)?;
        host.close_control(device_address)
    }

    /// Disconnect hook: tears down whatever pipe the address still has open.
    ///
    /// Without a usable topology record the owning controller is unknown, so
    /// every controller's slot for the address is checked.
    pub fn device_removed(&mut self, device_address: u8) -> KResult<()> {
        let owner = self
            .topology
            .device(device_address)
            .map(|info| info.core_id)
            .filter(|id| self.controller(*id).is_some());

        for host in self.controllers.iter_mut() {
            if owner.is_some_and(|id| id != host.id) {
                continue;
            }
            if host
                .control_qhd(device_address)
                .is_some_and(|qh| qh.is_used())
            {
                host.close_control(device_address)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, device_address: u8) -> KResult<DeviceInfo> {
        if device_address > MAX_DEVICE_ADDRESS {
            return Err(KError::InvalidDevice);
        }
        let info = self
            .topology
            .device(device_address)
            .ok_or(KError::InvalidDevice)?;
        if !info.connected {
            return Err(KError::InvalidDevice);
        }
        Ok(info)
    }
}

impl HostController {
    pub(super) fn open_control(
        &mut self,
        device_address: u8,
        max_packet_size: u16,
        info: &DeviceInfo,
    ) -> KResult<()> {
        debug_assert!(
            valid_control_packet_size(max_packet_size),
            "ehci: bad control max packet size {}",
            max_packet_size
        );

        let index = match device_address {
            0 => HEAD,
            addr => self.schedule.pool().slot_of(addr)?,
        };
        let is_head = index == HEAD;
        // The head is always on the ring; a slot is once it has been opened.
        let linked = self.schedule.contains(index);

        let ep = EndpointCharacteristics {
            device_address,
            inactive_next_xact: false,
            endpoint_number: 0,
            speed: info.speed,
            data_toggle: DataToggle::PerDescriptor,
            head_list_flag: is_head,
            max_packet_size,
            non_hs_control_endpoint: info.speed.needs_split(),
            nak_count_reload: CONTROL_NAK_RELOAD,
        };
        let caps = EndpointCapabilities {
            smask: 0,
            cmask: 0,
            hub_address: info.hub_addr,
            hub_port: info.hub_port,
            mult: 1,
        };

        let Some(qh) = self.schedule.pool_mut().get_mut(index) else {
            return Err(KError::ResourceExhausted);
        };

        if linked {
            // Reachable by the controller: stop it before rewriting the
            // endpoint words under it.
            qh.halt();
            fence(Ordering::SeqCst);
        }

        qh.set_characteristics(&ep);
        qh.set_capabilities(&caps);
        qh.park();
        qh.set_used(true);
        qh.set_qtd_list(None);

        crate::kprintln!(
            "ehci: controller {} control pipe addr={} mps={} speed={:?}{}",
            self.id,
            device_address,
            max_packet_size,
            info.speed,
            if qh.is_split() { " (split)" } else { "" }
        );

        if !linked {
            self.schedule.splice(index);
        }
        Ok(())
    }

    pub(super) fn close_control(&mut self, device_address: u8) -> KResult<()> {
        let index = match device_address {
            0 => HEAD,
            addr => self
                .schedule
                .pool()
                .slot_of(addr)
                .map_err(|_| KError::InvalidDevice)?,
        };

        match self.schedule.pool().get(index) {
            Some(qh) if qh.is_used() => qh.halt(),
            _ => return Err(KError::InvalidDevice),
        }
        fence(Ordering::SeqCst);

        if index != HEAD {
            self.schedule.unlink(index);
        }

        if let Some(qh) = self.schedule.pool_mut().get_mut(index) {
            qh.park();
            qh.set_used(false);
            qh.set_qtd_list(None);
        }

        crate::kprintln!(
            "ehci: controller {} closed control pipe addr={}",
            self.id,
            device_address
        );
        Ok(())
    }
}
