use core::fmt;

use mmio_shim::io::IoMem;
use serde_derive::{Deserialize, Serialize};

use crate::consts::*;

/// Lifecycle state of one side, mirrored into its status word in the shared region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceStatus {
    Uninit = 0,
    Boot = 1,
    Ready = 2,
    Run = 3,
    Error = 4,
    /// host only: the peer is in its flashing/recovery firmware
    Recovery = 5,
}

impl DeviceStatus {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DeviceStatus::Uninit,
            1 => DeviceStatus::Boot,
            2 => DeviceStatus::Ready,
            3 => DeviceStatus::Run,
            5 => DeviceStatus::Recovery,
            _ => DeviceStatus::Error,
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// The peer accepts a connect once it reached READY
    #[inline]
    pub fn is_ready(self) -> bool {
        matches!(self, DeviceStatus::Ready | DeviceStatus::Run)
    }
}

/// Which end of the PCIe link this driver instance runs on.
///
/// The role decides the status word a side owns, which published ring is its
/// RX and which is its TX, the doorbells it raises, and whether it owns the
/// capability table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The SoC exposing the BAR as a PCIe endpoint function (local host)
    Endpoint,
    /// The root-complex side driver (remote host)
    Host,
}

impl Role {
    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Endpoint => Role::Host,
            Role::Host => Role::Endpoint,
        }
    }

    #[inline]
    pub(crate) fn status_offset(self) -> usize {
        match self {
            Role::Endpoint => MMIO_DEV_STATUS,
            Role::Host => MMIO_HOST_STATUS,
        }
    }

    pub fn owns_capabilities(self) -> bool {
        self == Role::Endpoint
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Endpoint => write!(f, "endpoint"),
            Role::Host => write!(f, "host"),
        }
    }
}

#[inline]
pub fn get_status(mmio: &IoMem, role: Role) -> DeviceStatus {
    DeviceStatus::from_raw(mmio.rd32(role.status_offset()))
}

#[inline]
pub fn set_status(mmio: &IoMem, role: Role, status: DeviceStatus) {
    mmio.wr32(role.status_offset(), status.raw());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl Version {
    pub const fn current() -> Self {
        Self {
            major: XLINK_VERSION_MAJOR,
            minor: XLINK_VERSION_MINOR,
            build: XLINK_VERSION_BUILD,
        }
    }

    pub fn read(mmio: &IoMem) -> Self {
        Self {
            major: mmio.rd8(MMIO_VERSION),
            minor: mmio.rd8(MMIO_VERSION + 1),
            build: mmio.rd16(MMIO_VERSION + 2),
        }
    }

    pub fn write(&self, mmio: &IoMem) {
        mmio.wr8(MMIO_VERSION, self.major);
        mmio.wr8(MMIO_VERSION + 1, self.minor);
        mmio.wr16(MMIO_VERSION + 2, self.build);
    }

    /// Build numbers may differ
    pub fn compatible(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words_are_per_role() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set_status(&mmio, Role::Endpoint, DeviceStatus::Run);
        assert_eq!(get_status(&mmio, Role::Endpoint), DeviceStatus::Run);
        assert_eq!(get_status(&mmio, Role::Host), DeviceStatus::Uninit);
        assert_eq!(mmio.rd32(MMIO_DEV_STATUS), 3);
    }

    #[test]
    fn unknown_status_is_error() {
        assert_eq!(DeviceStatus::from_raw(0x77), DeviceStatus::Error);
        assert!(DeviceStatus::Ready.is_ready());
        assert!(!DeviceStatus::Boot.is_ready());
    }

    #[test]
    fn version_round_trip() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        let v = Version {
            major: 3,
            minor: 2,
            build: 0x1234,
        };
        v.write(&mmio);
        assert_eq!(Version::read(&mmio), v);
        assert_eq!(format!("{}", v), "3.2.4660");

        let other = Version { build: 1, ..v };
        assert!(v.compatible(&other));
        let other = Version { minor: 9, ..v };
        assert!(!v.compatible(&other));
    }
}
