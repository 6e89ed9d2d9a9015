#![allow(non_snake_case)]

#[cfg(not(feature = "user"))]
compile_error!("`XLinkKit` runs on the `user` backend, enable feature `crate/user`");

extern crate alloc;

/// Wire layout of the shared BAR region and transport defaults
pub mod consts;

/// Device/host status words, roles and version exchange
pub mod status;
pub use status::{DeviceStatus, Role, Version};

/// Doorbell bytes in the shared region
pub mod doorbell;

/// Boot-stage marker and the image transfer handshake
pub mod boot;
pub use boot::BootStage;

/// Self-describing capability records inside the shared region
pub mod capability;

/// Descriptor rings (one per direction)
pub mod pipe;
pub use pipe::Pipe;

/// Buffer descriptors, intrusive lists and the RX/TX pools
pub mod buffer;
pub mod list;
pub mod pool;
pub use buffer::{BufferDescriptor, DmaArena};
pub use list::BufferList;
pub use pool::{BufferPool, PoolKind};

/// Abstraction of the DMA engine and of the direct BAR-copy path
pub mod dma;
pub use dma::{DmaDirection, DmaEngine, PeerMemory};

/// Interrupt lines between the two sides
pub mod irq;
pub use irq::IrqLine;

/// Ordered deferred work, deadlines and waiting helpers
pub mod runtime;

/// RX/TX event handlers and the doorbell interrupt handler
pub mod engine;

/// Per-channel read queues fed by the RX engine
pub mod interface;
pub use interface::Interface;

/// Device handle and its lifecycle
pub mod device;
pub use device::{Core, Device, DeviceInfo, Hardware};

pub mod config;
pub use config::TransportConfig;

pub mod stats;
pub use stats::{Stats, StatsSnapshot};

/// Registry of devices and the flat API consumed by the XLink clients
pub mod manager;
pub use manager::DeviceManager;

/// A simulated link: both sides of the BAR in one process
pub mod loopback;
pub use loopback::{Link, LinkBuilder};

pub mod utils;

pub use mmio_shim;
pub use mmio_shim::IoMem;
pub(crate) use mmio_shim::Error;

pub use mmio_shim::log;

/// The error type of control plane operations.
/// These mainly include errors of bringing up or tearing down a device.
#[derive(thiserror_no_std::Error, Debug)]
pub enum ControlpathError {
    /// Used for identify create different resource error
    /// e.g., pools, work queue, irq, etc.
    #[error("create {0} error: {1}")]
    CreationError(&'static str, Error),

    #[error("Invalid arg for {0}")]
    InvalidArg(&'static str),

    #[error("capability {0} not found")]
    CapabilityNotFound(u16),

    #[error("version mismatch, dev : {0}, host : {1}")]
    VersionMismatch(Version, Version),

    #[error("peer not ready, status {0:?}")]
    NotReady(DeviceStatus),

    #[error("device is in recovery")]
    Recovery,

    #[error("boot error on {0}: {1}")]
    BootError(&'static str, Error),

    #[error("no such device {0}")]
    NoDevice(u32),

    #[error("device {0} already registered")]
    Duplicate(u32),
}

impl ControlpathError {
    pub fn to_errno(&self) -> Error {
        match self {
            ControlpathError::CreationError(_, e) => *e,
            ControlpathError::InvalidArg(_) => Error::EINVAL,
            ControlpathError::CapabilityNotFound(_) => Error::EIO,
            ControlpathError::VersionMismatch(_, _) => Error::EIO,
            ControlpathError::NotReady(_) => Error::EBUSY,
            ControlpathError::Recovery => Error::EBUSY,
            ControlpathError::BootError(_, e) => *e,
            ControlpathError::NoDevice(_) => Error::ENODEV,
            ControlpathError::Duplicate(_) => Error::EBUSY,
        }
    }
}

/// The error type of data plane operations.
/// Timeouts and interruptions carry the number of bytes moved before them.
#[derive(thiserror_no_std::Error, Debug, PartialEq, Eq)]
pub enum DatapathError {
    #[error("timeout error after {0} bytes")]
    TimeoutError(usize),

    #[error("interrupted after {0} bytes")]
    Interrupted(usize),

    #[error("Invalid arg for {0}")]
    InvalidArg(&'static str),

    #[error("interface {0} is not connected")]
    NotConnected(u16),

    #[error("interface {0} is busy")]
    Busy(u16),
}

impl DatapathError {
    /// Bytes moved before the error, zero if the error says nothing about progress
    pub fn transferred(&self) -> usize {
        match self {
            DatapathError::TimeoutError(n) => *n,
            DatapathError::Interrupted(n) => *n,
            _ => 0,
        }
    }

    pub fn to_errno(&self) -> Error {
        match self {
            DatapathError::TimeoutError(_) => Error::ETIME,
            DatapathError::Interrupted(_) => Error::EINTR,
            DatapathError::InvalidArg(_) => Error::EINVAL,
            DatapathError::NotConnected(_) => Error::ENODEV,
            DatapathError::Busy(_) => Error::EACCES,
        }
    }
}
