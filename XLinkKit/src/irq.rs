use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mmio_shim::{log, KernelResult};

use crate::Error;

pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// An interrupt line into one side of the link.
///
/// `raise` stands in for the hardware: it latches the line and, unless the
/// line is masked, runs the registered handler on the raising thread. The
/// handler plays interrupt context, so it must not block.
pub struct IrqLine {
    name: String,
    latch: AtomicBool,
    masked: AtomicBool,
    raised: AtomicU64,
    handler: spin::Mutex<Option<IrqHandler>>,
}

impl IrqLine {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: String::from(name),
            latch: AtomicBool::new(false),
            masked: AtomicBool::new(false),
            raised: AtomicU64::new(0),
            handler: spin::Mutex::new(None),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the handler. A line carries at most one handler.
    pub fn register(&self, handler: IrqHandler) -> KernelResult<()> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            log::error!("irq {} already has a handler", self.name);
            return Err(Error::EBUSY);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn unregister(&self) {
        self.handler.lock().take();
    }

    pub fn is_registered(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        self.latch.store(true, Ordering::Release);
        if !self.masked.load(Ordering::Acquire) {
            self.deliver();
        }
    }

    fn deliver(&self) {
        // run outside the lock, a handler may raise the peer's line
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Acknowledge the interrupt, returns whether it was latched
    pub fn clear_latch(&self) -> bool {
        self.latch.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_latched(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }

    pub fn mask(&self) {
        self.masked.store(true, Ordering::Release);
    }

    /// Unmask, delivering an interrupt that latched while masked.
    pub fn unmask(&self) {
        self.masked.store(false, Ordering::Release);
        if self.is_latched() {
            self.deliver();
        }
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::Acquire)
    }

    /// Number of times the line was raised
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqLine")
            .field("name", &self.name)
            .field("latched", &self.is_latched())
            .field("masked", &self.is_masked())
            .field("raised", &self.raised_count())
            .finish()
    }
}
