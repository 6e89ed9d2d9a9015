//! The device registry and the flat, errno-returning API the XLink
//! clients call into.
//!
//! Every call names a device by its id. Data calls take the requested
//! length through `len` and hand back the number of bytes actually moved
//! through it, also when they fail part way.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::Mutex;

use mmio_shim::{log, KernelResult};

use crate::device::Device;
use crate::runtime::waitable::lock;
use crate::status::DeviceStatus;
use crate::{ControlpathError, Error};

/// Interface the flat API reads and writes on
pub const XLINK_IO_INTERFACE: u16 = 0;

#[derive(Default)]
pub struct DeviceManager {
    devices: Mutex<Vec<Arc<Device>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, dev: Arc<Device>) -> KernelResult<()> {
        let mut devices = lock(&self.devices);
        if devices.iter().any(|d| d.id() == dev.id()) {
            log::error!("device {:#x} is already registered", dev.id());
            return Err(ControlpathError::Duplicate(dev.id()).to_errno());
        }
        log::info!("register {} ({:#x})", dev.name(), dev.id());
        devices.push(dev);
        Ok(())
    }

    /// Unregister and tear down the device.
    pub fn remove_device(&self, id: u32) -> KernelResult<Arc<Device>> {
        let dev = {
            let mut devices = lock(&self.devices);
            let pos = devices
                .iter()
                .position(|d| d.id() == id)
                .ok_or_else(|| ControlpathError::NoDevice(id).to_errno())?;
            devices.remove(pos)
        };
        dev.core_cleanup();
        log::info!("unregister {} ({:#x})", dev.name(), id);
        Ok(dev)
    }

    pub fn get_device(&self, id: u32) -> KernelResult<Arc<Device>> {
        lock(&self.devices)
            .iter()
            .find(|d| d.id() == id)
            .cloned()
            .ok_or(Error::ENODEV)
    }

    /// Ids of every registered device, in registration order
    pub fn get_device_list(&self) -> Vec<u32> {
        lock(&self.devices).iter().map(|d| d.id()).collect()
    }

    pub fn get_device_name(&self, id: u32) -> KernelResult<String> {
        Ok(String::from(self.get_device(id)?.name()))
    }

    pub fn get_device_status(&self, id: u32) -> KernelResult<DeviceStatus> {
        Ok(self.get_device(id)?.status())
    }

    pub fn boot_remote(&self, id: u32) -> KernelResult<()> {
        self.get_device(id)?
            .boot_remote()
            .map_err(|e| e.to_errno())
    }

    pub fn connect(&self, id: u32) -> KernelResult<()> {
        self.get_device(id)?.connect().map_err(|e| {
            log::error!("connect {:#x}: {}", id, e);
            e.to_errno()
        })
    }

    pub fn reset_device(&self, id: u32) -> KernelResult<()> {
        self.get_device(id)?.reset();
        Ok(())
    }

    /// Read `*len` bytes into `buf`. On return `*len` holds the bytes read,
    /// and the result is the count left unread.
    pub fn read(&self, id: u32, buf: &mut [u8], len: &mut usize, timeout_ms: u64) -> KernelResult<usize> {
        let want = *len;
        if want == 0 || want > buf.len() {
            return Err(Error::EINVAL);
        }
        let dev = self.get_device(id)?;
        *len = 0;
        match dev.read(XLINK_IO_INTERFACE, &mut buf[..want], timeout_ms) {
            Ok(n) => {
                *len = n;
                Ok(want - n)
            }
            Err(e) => {
                *len = e.transferred();
                Err(e.to_errno())
            }
        }
    }

    /// Write `*len` bytes of `buf`. On return `*len` holds the bytes queued,
    /// and the result is the count left unwritten.
    pub fn write(&self, id: u32, buf: &[u8], len: &mut usize, timeout_ms: u64) -> KernelResult<usize> {
        let want = *len;
        if want == 0 || want > buf.len() {
            return Err(Error::EINVAL);
        }
        let dev = self.get_device(id)?;
        *len = 0;
        match dev.write(XLINK_IO_INTERFACE, &buf[..want], timeout_ms) {
            Ok(n) => {
                *len = n;
                Ok(want - n)
            }
            Err(e) => {
                *len = e.transferred();
                Err(e.to_errno())
            }
        }
    }

    /// Tear every device down, used at module exit.
    pub fn shutdown(&self) {
        let devices: Vec<Arc<Device>> = lock(&self.devices).drain(..).collect();
        for dev in devices {
            dev.core_cleanup();
        }
    }
}
