//! One side of a link and its lifecycle.
//!
//! A [`Device`] is created unconnected. The endpoint brings its side up with
//! [`Device::bind`]: it publishes the version, the boot marker and the
//! transport capability, then builds its [`Core`] and goes to RUN. The host
//! waits for the endpoint's OS stage with [`Device::boot_remote`], and
//! [`Device::connect`] discovers the capability and builds the host's core.
//!
//! The core (rings, pools, interfaces and the event work queue) only exists
//! while the status word says RUN. Tearing down from any other state just
//! resets the status word.

use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Mutex;

use mmio_shim::{log, IoMem};
use once_cell::sync::OnceCell;

use crate::boot::{self, BootStage};
use crate::capability;
use crate::config::TransportConfig;
use crate::consts::*;
use crate::dma::{DmaEngine, PeerMemory};
use crate::doorbell::{self, Direction, DoorbellType};
use crate::interface::Interface;
use crate::irq::IrqLine;
use crate::list::BufferList;
use crate::pipe::{Pipe, PipeSel};
use crate::pool::{BufferPool, PoolKind};
use crate::runtime::waitable::lock;
use crate::runtime::{Deadline, Work, WorkQueue};
use crate::stats::{Stats, StatsSnapshot};
use crate::status::{get_status, set_status, DeviceStatus, Role, Version};
use crate::utils::roundup;
use crate::{ControlpathError, DatapathError};

/// The platform resources a device drives.
#[derive(Clone)]
pub struct Hardware {
    /// the shared BAR region
    pub mmio: Arc<IoMem>,
    pub dma: Arc<dyn DmaEngine>,
    /// direct copy path into peer memory, if this side has one
    pub bar: Option<Arc<dyn PeerMemory>>,
    /// our interrupt line and the peer's
    pub irq: Arc<IrqLine>,
    pub peer_irq: Arc<IrqLine>,
    /// bus address of the ring staging area, used by the publishing side
    pub staging_base: u64,
    /// bus address to carve coherent pools from
    pub coherent_base: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub id: u32,
    pub name: String,
    pub role: Role,
    pub func_no: u8,
    pub max_functions: u8,
}

/// The transport state of a running device.
pub struct Core {
    pub(crate) role: Role,
    pub(crate) info: DeviceInfo,
    pub(crate) hw: Hardware,

    pub(crate) tx_pipe: Pipe,
    pub(crate) rx_pipe: Pipe,
    pub(crate) fragment_size: usize,

    pub(crate) rx_pool: BufferPool,
    pub(crate) tx_pool: BufferPool,
    pub(crate) interfaces: Vec<Interface>,

    /// outgoing BDs of every interface, drained by the TX engine
    pub(crate) write_list: BufferList,
    pub(crate) wlock: Mutex<()>,
    pub(crate) tx_pending: AtomicBool,
    pub(crate) closed: AtomicBool,

    pub(crate) wq: Arc<WorkQueue>,
    pub(crate) rx_work: Arc<Work>,
    pub(crate) tx_work: Arc<Work>,
    pub(crate) rx_backoff: Duration,
    pub(crate) rx_poll: Option<Duration>,

    pub(crate) stats: Arc<Stats>,
    pub(crate) sw_device_id: Arc<OnceCell<u32>>,
}

impl Core {
    fn new(
        info: &DeviceInfo,
        hw: &Hardware,
        config: &TransportConfig,
        stats: &Arc<Stats>,
        sw_device_id: &Arc<OnceCell<u32>>,
    ) -> Result<Arc<Self>, ControlpathError> {
        let mmio = &hw.mmio;
        let cap = capability::find_txrx(mmio)?;
        let fragment_size = capability::fragment_size(mmio, cap) as usize;
        if fragment_size == 0 {
            return Err(ControlpathError::InvalidArg("advertised fragment size"));
        }

        // the endpoint consumes what the host produces and the other way round
        let (tx_sel, rx_sel) = match info.role {
            Role::Endpoint => (PipeSel::Rx, PipeSel::Tx),
            Role::Host => (PipeSel::Tx, PipeSel::Rx),
        };
        let tx_pipe = Pipe::from_cap(mmio, cap, tx_sel)?;
        let rx_pipe = Pipe::from_cap(mmio, cap, rx_sel)?;

        let rx_base = hw.coherent_base.filter(|_| config.rx_pool_coherent);
        let tx_base = hw
            .coherent_base
            .filter(|_| config.tx_pool_coherent)
            .map(|base| base + roundup(config.rx_pool_size, fragment_size) as u64);
        let rx_pool = BufferPool::new(PoolKind::Rx, config.rx_pool_size, fragment_size, rx_base)?;
        let tx_pool = BufferPool::new(PoolKind::Tx, config.tx_pool_size, fragment_size, tx_base)?;

        let interfaces = (0..NUM_INTERFACES).map(Interface::new).collect();
        let wq = WorkQueue::new(&format!("{}_{}_wq", XLINK_DRIVER_NAME, info.id))?;

        log::debug!(
            "{}: tx {:?}, rx {:?}, fragment {}",
            info.name,
            tx_pipe,
            rx_pipe,
            fragment_size
        );

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let rx = weak.clone();
            let rx_work = Work::new("rx_event", move || {
                if let Some(core) = rx.upgrade() {
                    core.rx_event();
                }
            });
            let tx = weak.clone();
            let tx_work = Work::new("tx_event", move || {
                if let Some(core) = tx.upgrade() {
                    core.tx_event();
                }
            });

            Self {
                role: info.role,
                info: info.clone(),
                hw: hw.clone(),
                tx_pipe,
                rx_pipe,
                fragment_size,
                rx_pool,
                tx_pool,
                interfaces,
                write_list: BufferList::new(),
                wlock: Mutex::new(()),
                tx_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                wq,
                rx_work,
                tx_work,
                rx_backoff: config.rx_backoff(),
                rx_poll: config.rx_poll(),
                stats: stats.clone(),
                sw_device_id: sw_device_id.clone(),
            }
        }))
    }

    #[inline]
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    #[inline]
    pub fn tx_pipe(&self) -> &Pipe {
        &self.tx_pipe
    }

    #[inline]
    pub fn rx_pipe(&self) -> &Pipe {
        &self.rx_pipe
    }

    /// `(bytes, buffers)` free in the RX and TX pools
    pub fn pool_info(&self) -> ((usize, usize), (usize, usize)) {
        (self.rx_pool.info(), self.tx_pool.info())
    }

    /// Wait until every event queued so far has run.
    pub fn flush_events(&self) {
        self.wq.flush();
    }

    /// Whether the core was shut down. A closed core never posts again.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the engines and release everything waiting on them.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.wq.destroy();
        for ifc in self.interfaces.iter() {
            ifc.shutdown(&self.rx_pool);
        }
        self.tx_pool.close();

        // a blocked writer has been woken by the close above
        let _wlock = lock(&self.wlock);
        while let Some(bd) = self.write_list.get() {
            self.tx_pool.free(bd);
        }
    }
}

impl core::fmt::Debug for Core {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Core")
            .field("role", &self.role)
            .field("tx_pipe", &self.tx_pipe)
            .field("rx_pipe", &self.rx_pipe)
            .field("rx_pool", &self.rx_pool)
            .field("tx_pool", &self.tx_pool)
            .field("wq", &self.wq)
            .finish()
    }
}

pub struct Device {
    info: DeviceInfo,
    hw: Hardware,
    config: TransportConfig,
    core: Mutex<Option<Arc<Core>>>,
    stats: Arc<Stats>,
    last_report: Mutex<StatsSnapshot>,
    sw_device_id: Arc<OnceCell<u32>>,
}

impl Device {
    pub fn new(
        info: DeviceInfo,
        hw: Hardware,
        config: TransportConfig,
    ) -> Result<Arc<Self>, ControlpathError> {
        config.validate()?;
        if info.name.len() > XLINK_MAX_NAME_LEN {
            return Err(ControlpathError::InvalidArg("device name"));
        }
        if hw.mmio.len() < MMIO_HEADER_SIZE {
            return Err(ControlpathError::InvalidArg("mmio region too small"));
        }
        Ok(Arc::new(Self {
            info,
            hw,
            config,
            core: Mutex::new(None),
            stats: Arc::new(Stats::default()),
            last_report: Mutex::new(StatsSnapshot::default()),
            sw_device_id: Arc::new(OnceCell::new()),
        }))
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.info.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.info.role
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[inline]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// This side's status word
    pub fn status(&self) -> DeviceStatus {
        get_status(&self.hw.mmio, self.info.role)
    }

    pub fn peer_status(&self) -> DeviceStatus {
        get_status(&self.hw.mmio, self.info.role.peer())
    }

    fn set_status(&self, status: DeviceStatus) {
        set_status(&self.hw.mmio, self.info.role, status);
    }

    /// The running core, if any
    pub fn core(&self) -> Option<Arc<Core>> {
        lock(&self.core).clone()
    }

    /// Endpoint bring-up: advertise this side and go to RUN.
    pub fn bind(&self) -> Result<(), ControlpathError> {
        if self.info.role != Role::Endpoint {
            return Err(ControlpathError::InvalidArg("bind on host side"));
        }
        let mut slot = lock(&self.core);
        if slot.is_some() && self.status() == DeviceStatus::Run {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            self.hw.irq.unregister();
            stale.shutdown();
        }

        let mmio = &self.hw.mmio;
        self.set_status(DeviceStatus::Boot);
        Version::current().write(mmio);
        boot::set_device_name(mmio, &self.info.name);
        mmio.wr8(MMIO_MAX_FUNCTIONS, self.info.max_functions);

        let layout = self.config.layout(self.hw.staging_base);
        if let Err(e) = capability::publish_txrx(mmio, &layout) {
            log::error!("{}: failed to publish transport capability: {}", self.info.name, e);
            self.set_status(DeviceStatus::Error);
            return Err(e);
        }
        boot::set_magic(mmio, BOOT_MAGIC_YOCTO);
        self.set_status(DeviceStatus::Ready);

        let core = self.core_init().map_err(|e| {
            log::error!("{}: bind failed: {}", self.info.name, e);
            self.set_status(DeviceStatus::Error);
            e
        })?;
        *slot = Some(core);
        log::info!("{}: endpoint up, version {}", self.info.name, Version::current());
        Ok(())
    }

    /// Host side: wait for the endpoint's OS stage.
    pub fn boot_remote(&self) -> Result<(), ControlpathError> {
        if self.info.role != Role::Host {
            return Err(ControlpathError::InvalidArg("boot_remote on endpoint side"));
        }
        if self.status() == DeviceStatus::Run {
            return Ok(());
        }

        self.set_status(DeviceStatus::Boot);
        let deadline = Deadline::from_timeout_ms(self.config.boot_timeout_ms);
        let poll = Duration::from_millis(self.config.boot_poll_ms);
        match boot::wait_for_stage(&self.hw.mmio, BootStage::Os, poll, &deadline) {
            Ok(_) => {
                log::info!(
                    "{}: remote {} reached OS stage",
                    self.info.name,
                    boot::device_name(&self.hw.mmio)
                );
                self.set_status(DeviceStatus::Ready);
                Ok(())
            }
            Err(ControlpathError::Recovery) => {
                self.set_status(DeviceStatus::Recovery);
                Err(ControlpathError::Recovery)
            }
            Err(e) => {
                self.set_status(DeviceStatus::Error);
                Err(e)
            }
        }
    }

    /// Bring the transport up. A second call while running is a no-op.
    ///
    /// The host side requires the endpoint to have reached READY.
    pub fn connect(&self) -> Result<(), ControlpathError> {
        if self.info.role == Role::Endpoint {
            return self.bind();
        }

        let mut slot = lock(&self.core);
        if slot.is_some() && self.status() == DeviceStatus::Run {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            self.hw.irq.unregister();
            stale.shutdown();
        }

        let mmio = &self.hw.mmio;
        if boot::check_magic(mmio) == BootStage::Recovery {
            self.set_status(DeviceStatus::Recovery);
            return Err(ControlpathError::Recovery);
        }
        let peer = self.peer_status();
        if !peer.is_ready() {
            log::warn!("{}: endpoint not ready ({:?})", self.info.name, peer);
            return Err(ControlpathError::NotReady(peer));
        }

        let dev_version = Version::read(mmio);
        let host_version = Version::current();
        log::info!(
            "{}: versions, dev : {}, host : {}",
            self.info.name,
            dev_version,
            host_version
        );
        if !dev_version.compatible(&host_version) {
            self.set_status(DeviceStatus::Error);
            return Err(ControlpathError::VersionMismatch(dev_version, host_version));
        }

        let core = self.core_init().map_err(|e| {
            log::error!("{}: connect failed: {}", self.info.name, e);
            self.set_status(DeviceStatus::Error);
            e
        })?;
        *slot = Some(core);
        log::info!("{}: host connected", self.info.name);
        Ok(())
    }

    /// Build the core, hook the interrupt and go to RUN.
    fn core_init(&self) -> Result<Arc<Core>, ControlpathError> {
        let core = Core::new(&self.info, &self.hw, &self.config, &self.stats, &self.sw_device_id)?;

        let weak = Arc::downgrade(&core);
        if let Err(e) = self.hw.irq.register(Arc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.interrupt();
            }
        })) {
            core.wq.destroy();
            return Err(ControlpathError::CreationError("irq", e));
        }

        self.set_status(DeviceStatus::Run);
        if self.info.role == Role::Host {
            doorbell::clear_all(&self.hw.mmio, self.info.role.inbound());
        }
        core.kick();
        Ok(core)
    }

    /// Tear the core down if it is running, and reset the status word.
    ///
    /// Blocked readers and writers return `Interrupted`.
    pub fn core_cleanup(&self) {
        let mut slot = lock(&self.core);
        let was_running = self.status() == DeviceStatus::Run;
        self.set_status(DeviceStatus::Uninit);

        match slot.take() {
            Some(core) => {
                if !was_running {
                    log::warn!("{}: tearing down a core that was not running", self.info.name);
                }
                self.hw.irq.unregister();
                core.shutdown();
                log::info!("{}: transport down", self.info.name);
            }
            None => log::debug!("{}: nothing to tear down", self.info.name),
        }
    }

    /// Tear down and forget the published layout, so the next bring-up
    /// starts from scratch.
    pub fn reset(&self) {
        self.core_cleanup();
        if self.info.role == Role::Endpoint {
            self.hw.mmio.wr32(MMIO_CAPABILITIES, 0);
            boot::set_magic(&self.hw.mmio, "");
        }
    }

    fn running_core(&self, ifc: u16) -> Result<Arc<Core>, DatapathError> {
        match self.core() {
            Some(core) if core.is_running() => Ok(core),
            _ => Err(DatapathError::NotConnected(ifc)),
        }
    }

    pub fn open(&self, ifc: u16) -> Result<(), DatapathError> {
        self.running_core(ifc)?.open(ifc)
    }

    pub fn close(&self, ifc: u16) -> Result<(), DatapathError> {
        match self.core() {
            Some(core) => core.close(ifc),
            None => Ok(()),
        }
    }

    /// Read exactly `buf.len()` bytes from interface `ifc`.
    /// A `timeout_ms` of 0 waits forever.
    pub fn read(&self, ifc: u16, buf: &mut [u8], timeout_ms: u64) -> Result<usize, DatapathError> {
        let deadline = Deadline::from_timeout_ms(timeout_ms);
        self.running_core(ifc)?.read(ifc, buf, &deadline)
    }

    pub fn write(&self, ifc: u16, buf: &[u8], timeout_ms: u64) -> Result<usize, DatapathError> {
        let deadline = Deadline::from_timeout_ms(timeout_ms);
        self.running_core(ifc)?.write(ifc, buf, &deadline)
    }

    /// Host side: publish the physical id and tell the endpoint.
    pub fn set_phy_id(&self, phy_id: u16) {
        let mmio = &self.hw.mmio;
        mmio.wr16(MMIO_PHY_DEV_ID, phy_id);
        doorbell::set(mmio, Direction::ToDevice, DoorbellType::PhyIdUpdated);
        self.hw.peer_irq.raise();
    }

    /// Endpoint side: the software device id, once the host published the
    /// physical id.
    pub fn sw_device_id(&self) -> Option<u32> {
        self.sw_device_id.get().copied()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Log every counter with its change since the last report.
    pub fn debug_report(&self) -> String {
        let now = self.stats.snapshot();
        let mut last = lock(&self.last_report);
        let report = now.report(&last);
        *last = now;
        log::info!("{} ({}) status {:?}\n{}", self.info.name, self.info.role, self.status(), report);
        report
    }

    /// Wait until the events queued so far have run.
    pub fn flush_events(&self) {
        if let Some(core) = self.core() {
            core.flush_events();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(core) = lock(&self.core).take() {
            self.hw.irq.unregister();
            core.shutdown();
        }
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("status", &self.status())
            .field("peer_status", &self.peer_status())
            .finish()
    }
}
