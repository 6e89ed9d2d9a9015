//! Both sides of a PCIe link in one process.
//!
//! The BAR is a single [`IoMem`] both devices map. Payloads are staged in a
//! [`BusWindow`], a second region addressed by bus address, which each side
//! reaches through its own [`LoopbackDma`]. The endpoint can also copy
//! through the window directly, as it can through its BAR on real hardware.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use mmio_shim::{IoMem, KernelResult};

use crate::config::TransportConfig;
use crate::consts::XLINK_DRIVER_NAME;
use crate::device::{Device, DeviceInfo, Hardware};
use crate::dma::{DmaDirection, DmaEngine, PeerMemory};
use crate::irq::IrqLine;
use crate::status::Role;
use crate::{ControlpathError, Error};

pub const LOOPBACK_STAGING_BASE: u64 = 0x8000_0000;
pub const LOOPBACK_COHERENT_BASE: u64 = 0x4000_0000;

/// Memory reachable at `[base, base + len)` on the bus
pub struct BusWindow {
    base: u64,
    mem: IoMem,
}

impl BusWindow {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            mem: IoMem::new(len),
        }
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Offset into the window of `[addr, addr + len)`
    pub fn translate(&self, addr: u64, len: usize) -> KernelResult<usize> {
        let offset = addr.checked_sub(self.base).ok_or(Error::EFAULT)?;
        let offset = usize::try_from(offset)?;
        if !self.mem.contains(offset, len) {
            return Err(Error::EFAULT);
        }
        Ok(offset)
    }
}

impl PeerMemory for BusWindow {
    fn memcpy_fromio(&self, dst: &mut [u8], src: u64) -> KernelResult<()> {
        let offset = self.translate(src, dst.len())?;
        self.mem.rd_buffer(offset, dst);
        Ok(())
    }

    fn memcpy_toio(&self, dst: u64, src: &[u8]) -> KernelResult<()> {
        let offset = self.translate(dst, src.len())?;
        self.mem.wr_buffer(offset, src);
        Ok(())
    }
}

/// A DMA engine over a [`BusWindow`], with fault injection.
pub struct LoopbackDma {
    window: Arc<BusWindow>,
    fail_maps: AtomicU32,
    fail_transfers: AtomicU32,
    next_handle: AtomicU64,
    mapped: AtomicUsize,
    transfers: AtomicU64,
}

/// Take one from a fault budget, `true` if the budget was not empty
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl LoopbackDma {
    pub fn new(window: &Arc<BusWindow>) -> Arc<Self> {
        Arc::new(Self {
            window: window.clone(),
            fail_maps: AtomicU32::new(0),
            fail_transfers: AtomicU32::new(0),
            next_handle: AtomicU64::new(0x1000),
            mapped: AtomicUsize::new(0),
            transfers: AtomicU64::new(0),
        })
    }

    /// Make the next `n` maps fail with `ENOMEM`.
    pub fn fail_next_maps(&self, n: u32) {
        self.fail_maps.store(n, Ordering::Release);
    }

    /// Make the next `n` transfers fail with `EIO`.
    pub fn fail_next_transfers(&self, n: u32) {
        self.fail_transfers.store(n, Ordering::Release);
    }

    /// Mappings not yet unmapped
    pub fn outstanding_maps(&self) -> usize {
        self.mapped.load(Ordering::Acquire)
    }

    /// Transfers that completed
    pub fn transfer_count(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }
}

impl DmaEngine for LoopbackDma {
    fn map(&self, len: usize, _dir: DmaDirection) -> KernelResult<u64> {
        if consume(&self.fail_maps) {
            return Err(Error::ENOMEM);
        }
        self.mapped.fetch_add(1, Ordering::AcqRel);
        Ok(self.next_handle.fetch_add(len.max(1) as u64, Ordering::Relaxed))
    }

    fn unmap(&self, _handle: u64, _len: usize, _dir: DmaDirection) {
        self.mapped.fetch_sub(1, Ordering::AcqRel);
    }

    fn read(&self, dst: &mut [u8], src: u64) -> KernelResult<()> {
        if consume(&self.fail_transfers) {
            return Err(Error::EIO);
        }
        self.window.memcpy_fromio(dst, src)?;
        self.transfers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, dst: u64, src: &[u8]) -> KernelResult<()> {
        if consume(&self.fail_transfers) {
            return Err(Error::EIO);
        }
        self.window.memcpy_toio(dst, src)?;
        self.transfers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Builder for a [`Link`].
pub struct LinkBuilder {
    config: TransportConfig,
    endpoint_id: u32,
    host_id: u32,
    func_no: u8,
    max_functions: u8,
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::new(),
            endpoint_id: 0,
            host_id: 1,
            func_no: 0,
            max_functions: 8,
        }
    }

    /// Config shared by both sides
    pub fn set_config(&mut self, config: TransportConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn set_ids(&mut self, endpoint_id: u32, host_id: u32) -> &mut Self {
        self.endpoint_id = endpoint_id;
        self.host_id = host_id;
        self
    }

    /// PCIe function of the endpoint and how many its device exposes
    ///
    /// Default value is function 0 of 8
    pub fn set_function(&mut self, func_no: u8, max_functions: u8) -> &mut Self {
        self.func_no = func_no;
        self.max_functions = max_functions;
        self
    }

    pub fn build(&self) -> Result<Link, ControlpathError> {
        self.config.validate()?;
        let layout = self.config.layout(LOOPBACK_STAGING_BASE);

        let mmio = Arc::new(IoMem::new(self.config.mmio_size()));
        let window = Arc::new(BusWindow::new(LOOPBACK_STAGING_BASE, layout.staging_size()));
        let endpoint_dma = LoopbackDma::new(&window);
        let host_dma = LoopbackDma::new(&window);
        let endpoint_irq = IrqLine::new("endpoint");
        let host_irq = IrqLine::new("host");

        let endpoint = Device::new(
            DeviceInfo {
                id: self.endpoint_id,
                name: name_of(self.endpoint_id),
                role: Role::Endpoint,
                func_no: self.func_no,
                max_functions: self.max_functions,
            },
            Hardware {
                mmio: mmio.clone(),
                dma: endpoint_dma.clone(),
                bar: Some(window.clone()),
                irq: endpoint_irq.clone(),
                peer_irq: host_irq.clone(),
                staging_base: LOOPBACK_STAGING_BASE,
                coherent_base: Some(LOOPBACK_COHERENT_BASE),
            },
            self.config.clone(),
        )?;

        let host = Device::new(
            DeviceInfo {
                id: self.host_id,
                name: name_of(self.host_id),
                role: Role::Host,
                func_no: self.func_no,
                max_functions: self.max_functions,
            },
            Hardware {
                mmio: mmio.clone(),
                dma: host_dma.clone(),
                bar: None,
                irq: host_irq.clone(),
                peer_irq: endpoint_irq.clone(),
                staging_base: LOOPBACK_STAGING_BASE,
                coherent_base: None,
            },
            self.config.clone(),
        )?;

        Ok(Link {
            endpoint,
            host,
            mmio,
            window,
            endpoint_dma,
            host_dma,
            endpoint_irq,
            host_irq,
        })
    }
}

fn name_of(id: u32) -> String {
    format!("{}{}", XLINK_DRIVER_NAME, id)
}

/// A simulated link: an endpoint and a host sharing one BAR.
pub struct Link {
    pub endpoint: Arc<Device>,
    pub host: Arc<Device>,
    pub mmio: Arc<IoMem>,
    pub window: Arc<BusWindow>,
    pub endpoint_dma: Arc<LoopbackDma>,
    pub host_dma: Arc<LoopbackDma>,
    pub endpoint_irq: Arc<IrqLine>,
    pub host_irq: Arc<IrqLine>,
}

impl Link {
    /// Endpoint bind, host boot wait, host connect.
    pub fn bring_up(&self) -> Result<(), ControlpathError> {
        self.endpoint.bind()?;
        self.host.boot_remote()?;
        self.host.connect()
    }

    /// Let both work queues run until the events they trigger in each other
    /// have played out.
    pub fn settle(&self) {
        for _ in 0..4 {
            self.endpoint.flush_events();
            self.host.flush_events();
        }
    }

    pub fn tear_down(&self) {
        self.host.core_cleanup();
        self.endpoint.core_cleanup();
    }
}
