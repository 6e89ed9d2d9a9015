//! Transport tunables.
//!
//! ```
//! use XLinkKit::TransportConfig;
//!
//! let cfg = TransportConfig::from_json(r#"{ "fragment_size": 4096, "tx_descriptors": 8 }"#).unwrap();
//! assert_eq!(cfg.fragment_size, 4096);
//! assert_eq!(cfg.rx_descriptors, 64);
//! ```

use core::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::capability::TxRxLayout;
use crate::consts::*;
use crate::utils::roundup;
use crate::ControlpathError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// max payload of one descriptor
    pub fragment_size: u32,
    pub rx_pool_size: usize,
    pub tx_pool_size: usize,
    /// carve the pool from one DMA-coherent arena instead of mapping per transfer
    pub rx_pool_coherent: bool,
    pub tx_pool_coherent: bool,
    pub tx_descriptors: u32,
    pub rx_descriptors: u32,
    /// delay before the RX engine retries after the RX pool ran dry
    pub rx_backoff_ms: u64,
    /// re-run the RX engine on this period even without a doorbell, 0 disables
    pub rx_poll_ms: u64,
    pub boot_timeout_ms: u64,
    pub boot_poll_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self {
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            rx_pool_size: DEFAULT_RX_POOL_SIZE,
            tx_pool_size: DEFAULT_TX_POOL_SIZE,
            rx_pool_coherent: false,
            tx_pool_coherent: false,
            tx_descriptors: DEFAULT_NUM_DESCRIPTORS,
            rx_descriptors: DEFAULT_NUM_DESCRIPTORS,
            rx_backoff_ms: DEFAULT_RX_BACKOFF_MS,
            rx_poll_ms: 0,
            boot_timeout_ms: DEFAULT_BOOT_TIMEOUT_MS,
            boot_poll_ms: DEFAULT_BOOT_POLL_MS,
        }
    }

    /// Parse a (possibly partial) JSON config, missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self, ControlpathError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|_| ControlpathError::InvalidArg("transport config json"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<alloc::string::String, ControlpathError> {
        serde_json::to_string(self).map_err(|_| ControlpathError::InvalidArg("transport config json"))
    }

    pub fn validate(&self) -> Result<(), ControlpathError> {
        if self.fragment_size == 0 {
            return Err(ControlpathError::InvalidArg("fragment_size"));
        }
        for ndesc in [self.tx_descriptors, self.rx_descriptors] {
            if ndesc < 2 || !ndesc.is_power_of_two() {
                return Err(ControlpathError::InvalidArg("descriptor count"));
            }
        }
        // the terminator behind both rings must stay addressable by a u16 link
        if self.layout(0).region_size() - CAP_HDR_LEN > u16::MAX as usize {
            return Err(ControlpathError::InvalidArg("descriptor rings exceed capability range"));
        }
        if self.rx_pool_size < self.fragment_size as usize
            || self.tx_pool_size < self.fragment_size as usize
        {
            return Err(ControlpathError::InvalidArg("pool smaller than a fragment"));
        }
        if self.boot_poll_ms == 0 {
            return Err(ControlpathError::InvalidArg("boot_poll_ms"));
        }
        Ok(())
    }

    /// Set the fragment size
    ///
    /// Default value is 128 KiB
    pub fn set_fragment_size(&mut self, fragment_size: u32) -> &mut Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Set both pool sizes, in bytes
    ///
    /// Default value is 8 MiB each
    pub fn set_pool_size(&mut self, rx: usize, tx: usize) -> &mut Self {
        self.rx_pool_size = rx;
        self.tx_pool_size = tx;
        self
    }

    pub fn set_coherent_pools(&mut self, rx: bool, tx: bool) -> &mut Self {
        self.rx_pool_coherent = rx;
        self.tx_pool_coherent = tx;
        self
    }

    /// Set both ring sizes
    ///
    /// Default value is 64 each
    pub fn set_descriptors(&mut self, tx: u32, rx: u32) -> &mut Self {
        self.tx_descriptors = tx;
        self.rx_descriptors = rx;
        self
    }

    pub fn set_rx_backoff_ms(&mut self, ms: u64) -> &mut Self {
        self.rx_backoff_ms = ms;
        self
    }

    pub fn set_rx_poll_ms(&mut self, ms: u64) -> &mut Self {
        self.rx_poll_ms = ms;
        self
    }

    pub fn set_boot_timeout_ms(&mut self, timeout_ms: u64, poll_ms: u64) -> &mut Self {
        self.boot_timeout_ms = timeout_ms;
        self.boot_poll_ms = poll_ms;
        self
    }

    #[inline]
    pub fn rx_backoff(&self) -> Duration {
        Duration::from_millis(self.rx_backoff_ms)
    }

    /// `None` when polling is off
    pub fn rx_poll(&self) -> Option<Duration> {
        if self.rx_poll_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.rx_poll_ms))
        }
    }

    /// Capability layout the publishing side advertises with this config.
    pub fn layout(&self, staging_base: u64) -> TxRxLayout {
        TxRxLayout {
            fragment_size: self.fragment_size,
            tx_ndesc: self.tx_descriptors,
            rx_ndesc: self.rx_descriptors,
            staging_base,
        }
    }

    /// Size of the shared region a link needs for this config, page rounded.
    pub fn mmio_size(&self) -> usize {
        roundup(self.layout(0).region_size(), 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.fragment_size, 128 * 1024);
        assert_eq!(cfg.rx_pool_size, 8 * 1024 * 1024);
        assert_eq!(cfg.rx_poll(), None);
        assert_eq!(cfg.rx_backoff(), Duration::from_millis(20));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json() {
        let cfg = TransportConfig::from_json(r#"{"rx_poll_ms": 5, "tx_pool_coherent": true}"#).unwrap();
        assert_eq!(cfg.rx_poll(), Some(Duration::from_millis(5)));
        assert!(cfg.tx_pool_coherent);
        assert_eq!(cfg.tx_descriptors, 64);

        let back = TransportConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(TransportConfig::from_json("not json").is_err());
        assert!(TransportConfig::from_json(r#"{"tx_descriptors": 6}"#).is_err());
        assert!(TransportConfig::from_json(r#"{"rx_descriptors": 1}"#).is_err());
        assert!(TransportConfig::from_json(r#"{"fragment_size": 0}"#).is_err());

        let mut cfg = TransportConfig::new();
        cfg.set_fragment_size(4096).set_pool_size(1024, 8192);
        assert!(cfg.validate().is_err());

        let mut cfg = TransportConfig::new();
        cfg.set_descriptors(1024, 1024);
        assert!(cfg.validate().is_ok());
        cfg.set_descriptors(4096, 4096);
        assert!(cfg.validate().is_err());
        cfg.set_descriptors(1 << 31, 1 << 31);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn layout_fits_mmio() {
        let mut cfg = TransportConfig::new();
        cfg.set_descriptors(8, 16);
        let layout = cfg.layout(0x1000);
        assert_eq!(layout.tx_ndesc, 8);
        assert_eq!(layout.rx_ndesc, 16);
        assert!(cfg.mmio_size() >= layout.region_size());
    }
}
