//! RX/TX event handlers and the doorbell interrupt handler.
//!
//! Both handlers are re-scans of ring state: they read `head` and `tail`
//! fresh on every run, so a lost doorbell is healed by the next one and a
//! duplicated doorbell finds nothing left to do. They run on the device's
//! ordered work queue; the interrupt handler only ever queues them.

use mmio_shim::io::{rmb, wmb};
use mmio_shim::log;

use crate::consts::*;
use crate::device::Core;
use crate::dma::{copy_from_peer, copy_to_peer, CopyFault, CopyPath};
use crate::doorbell::{self, Direction, DoorbellType};
use crate::pipe::Pipe;
use crate::stats::{add, inc};
use crate::status::{get_status, DeviceStatus, Role};
use crate::utils::create_sw_device_id;

impl Core {
    /// Whether this side's status word says RUN
    #[inline]
    pub fn is_running(&self) -> bool {
        get_status(&self.hw.mmio, self.role) == DeviceStatus::Run
    }

    #[inline]
    pub fn start_rx(&self) {
        self.wq.queue(&self.rx_work);
    }

    #[inline]
    pub fn start_tx(&self) {
        self.wq.queue(&self.tx_work);
    }

    /// Ring one of our outbound doorbells and interrupt the peer.
    fn notify_peer(&self, ty: DoorbellType) {
        doorbell::set(&self.hw.mmio, self.role.outbound(), ty);
        self.hw.peer_irq.raise();
    }

    /// Called once this side reaches RUN.
    pub(crate) fn kick(&self) {
        self.notify_peer(DoorbellType::DataReceived);
        self.start_rx();
        self.start_tx();
    }

    pub(crate) fn rx_event(&self) {
        inc(&self.stats.rx_event_runs);
        if !self.is_running() {
            return;
        }

        let pipe = &self.rx_pipe;
        let tail = pipe.get_tail();
        let initial = pipe.get_head();
        let mut head = initial;
        rmb();

        let mut backoff = false;
        while !Pipe::is_empty(head, tail) {
            let mut bd = match self.rx_pool.alloc() {
                Some(bd) => bd,
                None => {
                    log::debug!("rx pool exhausted, backing off");
                    backoff = true;
                    break;
                }
            };

            let ifc = pipe.get_interface(head);
            let length = pipe.get_length(head) as usize;
            let address = pipe.get_address(head);

            if pipe.get_status(head) == DESC_STATUS_ERROR {
                log::warn!("peer flagged descriptor {} as failed, skipping", head);
                inc(&self.stats.rx_errors);
                self.rx_pool.free(bd);
                head = pipe.next(head);
                continue;
            }

            match copy_from_peer(&*self.hw.dma, self.hw.bar.as_deref(), &mut bd, address, length) {
                Err(CopyFault::Map(e)) => {
                    log::warn!("rx dma map failed: {}", e);
                    self.rx_pool.free(bd);
                    backoff = true;
                    break;
                }
                Err(CopyFault::Transfer(e)) => {
                    log::error!("rx copy of descriptor {} ({} bytes) failed: {}", head, length, e);
                    pipe.set_status(head, DESC_STATUS_ERROR);
                    inc(&self.stats.rx_errors);
                    self.rx_pool.free(bd);
                }
                Ok(path) => {
                    if path == CopyPath::Fallback {
                        inc(&self.stats.dma_fallbacks);
                    }
                    if ifc >= NUM_INTERFACES {
                        log::warn!("rx descriptor {} has bad interface {}", head, ifc);
                        pipe.set_status(head, DESC_STATUS_ERROR);
                        inc(&self.stats.rx_errors);
                        self.rx_pool.free(bd);
                    } else {
                        pipe.set_status(head, DESC_STATUS_SUCCESS);
                        bd.interface = ifc;
                        inc(&self.stats.rx_krn_pkts);
                        add(&self.stats.rx_krn_bytes, length);
                        self.interfaces[ifc as usize].deliver(bd);
                    }
                }
            }
            head = pipe.next(head);
        }

        if head != initial {
            wmb();
            pipe.set_head(head);
            self.notify_peer(DoorbellType::DataReceived);
        }
        log::debug!("rx event: head {} -> {}, tail {}", initial, head, tail);

        if backoff {
            self.wq.queue_delayed(&self.rx_work, self.rx_backoff);
        } else if let Some(period) = self.rx_poll {
            self.wq.queue_delayed(&self.rx_work, period);
        }
    }

    pub(crate) fn tx_event(&self) {
        inc(&self.stats.tx_event_runs);
        if !self.is_running() {
            return;
        }

        let pipe = &self.tx_pipe;
        let head = pipe.get_head();
        let initial = pipe.get_tail();
        let mut tail = initial;
        rmb();

        while !pipe.is_full(head, tail) {
            let bd = match self.write_list.get() {
                Some(bd) => bd,
                None => break,
            };

            let address = pipe.get_address(tail);
            let status = match copy_to_peer(&*self.hw.dma, self.hw.bar.as_deref(), &bd, address) {
                Ok(path) => {
                    if path == CopyPath::Fallback {
                        inc(&self.stats.dma_fallbacks);
                    }
                    DESC_STATUS_SUCCESS
                }
                Err(e) => {
                    log::error!("tx copy to descriptor {} failed: {:?}", tail, e);
                    inc(&self.stats.tx_errors);
                    DESC_STATUS_ERROR
                }
            };

            pipe.set_length(tail, bd.length() as u32);
            pipe.set_interface(tail, bd.interface);
            pipe.set_status(tail, status);
            inc(&self.stats.tx_krn_pkts);
            add(&self.stats.tx_krn_bytes, bd.length());

            self.tx_pool.free(bd);
            tail = pipe.next(tail);
        }

        if tail != initial {
            wmb();
            pipe.set_tail(tail);
            self.notify_peer(DoorbellType::DataSent);
        }
        log::debug!("tx event: tail {} -> {}, head {}", initial, tail, head);

        self.tx_pending
            .store(!self.write_list.is_empty(), core::sync::atomic::Ordering::Release);
    }

    /// Doorbell interrupt handler. Never blocks, only schedules work.
    pub(crate) fn interrupt(&self) {
        inc(&self.stats.interrupts);
        self.hw.irq.clear_latch();

        let mmio = &self.hw.mmio;
        let inbound = self.role.inbound();
        if doorbell::take(mmio, inbound, DoorbellType::DataSent) {
            self.start_rx();
        }
        if doorbell::take(mmio, inbound, DoorbellType::DataReceived)
            && self.tx_pending.load(core::sync::atomic::Ordering::Acquire)
        {
            self.start_tx();
        }

        if self.role == Role::Endpoint
            && doorbell::take(mmio, Direction::ToDevice, DoorbellType::PhyIdUpdated)
        {
            let id = *self.sw_device_id.get_or_init(|| {
                let phy_id = mmio.rd16(MMIO_PHY_DEV_ID);
                create_sw_device_id(self.info.func_no, phy_id, self.info.max_functions)
            });
            log::info!("{}: sw device id {:#x}", self.info.name, id);
        }
    }
}
