//! Per-device counters.

use alloc::string::String;
use core::fmt::Write;
use core::sync::atomic::{AtomicU64, Ordering};

use serde_derive::Serialize;

#[derive(Default, Debug)]
pub struct Stats {
    /// descriptors and bytes the TX engine put on the ring
    pub tx_krn_pkts: AtomicU64,
    pub tx_krn_bytes: AtomicU64,
    /// descriptors and bytes the RX engine delivered to interfaces
    pub rx_krn_pkts: AtomicU64,
    pub rx_krn_bytes: AtomicU64,
    /// BDs and bytes accepted by `write`
    pub tx_usr_pkts: AtomicU64,
    pub tx_usr_bytes: AtomicU64,
    /// BDs fully consumed and bytes returned by `read`
    pub rx_usr_pkts: AtomicU64,
    pub rx_usr_bytes: AtomicU64,
    pub interrupts: AtomicU64,
    pub rx_event_runs: AtomicU64,
    pub tx_event_runs: AtomicU64,
    pub dma_fallbacks: AtomicU64,
    pub rx_errors: AtomicU64,
    pub tx_errors: AtomicU64,
}

#[inline]
pub(crate) fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tx_krn_pkts: u64,
    pub tx_krn_bytes: u64,
    pub rx_krn_pkts: u64,
    pub rx_krn_bytes: u64,
    pub tx_usr_pkts: u64,
    pub tx_usr_bytes: u64,
    pub rx_usr_pkts: u64,
    pub rx_usr_bytes: u64,
    pub interrupts: u64,
    pub rx_event_runs: u64,
    pub tx_event_runs: u64,
    pub dma_fallbacks: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let ld = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tx_krn_pkts: ld(&self.tx_krn_pkts),
            tx_krn_bytes: ld(&self.tx_krn_bytes),
            rx_krn_pkts: ld(&self.rx_krn_pkts),
            rx_krn_bytes: ld(&self.rx_krn_bytes),
            tx_usr_pkts: ld(&self.tx_usr_pkts),
            tx_usr_bytes: ld(&self.tx_usr_bytes),
            rx_usr_pkts: ld(&self.rx_usr_pkts),
            rx_usr_bytes: ld(&self.rx_usr_bytes),
            interrupts: ld(&self.interrupts),
            rx_event_runs: ld(&self.rx_event_runs),
            tx_event_runs: ld(&self.tx_event_runs),
            dma_fallbacks: ld(&self.dma_fallbacks),
            rx_errors: ld(&self.rx_errors),
            tx_errors: ld(&self.tx_errors),
        }
    }
}

impl StatsSnapshot {
    fn fields(&self) -> [(&'static str, u64); 14] {
        [
            ("tx_krn_pkts", self.tx_krn_pkts),
            ("tx_krn_bytes", self.tx_krn_bytes),
            ("rx_krn_pkts", self.rx_krn_pkts),
            ("rx_krn_bytes", self.rx_krn_bytes),
            ("tx_usr_pkts", self.tx_usr_pkts),
            ("tx_usr_bytes", self.tx_usr_bytes),
            ("rx_usr_pkts", self.rx_usr_pkts),
            ("rx_usr_bytes", self.rx_usr_bytes),
            ("interrupts", self.interrupts),
            ("rx_event_runs", self.rx_event_runs),
            ("tx_event_runs", self.tx_event_runs),
            ("dma_fallbacks", self.dma_fallbacks),
            ("rx_errors", self.rx_errors),
            ("tx_errors", self.tx_errors),
        ]
    }

    /// Render every counter with its change since `prev`.
    pub fn report(&self, prev: &StatsSnapshot) -> String {
        let mut out = String::new();
        for ((name, now), (_, before)) in self.fields().iter().zip(prev.fields().iter()) {
            let _ = writeln!(out, "{:<16}{:>14} (+{})", name, now, now.wrapping_sub(*before));
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_deltas() {
        let stats = Stats::default();
        inc(&stats.interrupts);
        add(&stats.rx_krn_bytes, 100);
        let first = stats.snapshot();
        assert_eq!(first.interrupts, 1);
        assert_eq!(first.rx_krn_bytes, 100);

        add(&stats.rx_krn_bytes, 28);
        let second = stats.snapshot();
        let report = second.report(&first);
        assert!(report.contains("rx_krn_bytes"));
        assert!(report.contains("128 (+28)"));
        assert!(report.contains("(+0)"));
    }

    #[test]
    fn json() {
        let stats = Stats::default();
        inc(&stats.dma_fallbacks);
        let json = stats.snapshot().to_json();
        assert!(json.contains("\"dma_fallbacks\":1"));
    }
}
