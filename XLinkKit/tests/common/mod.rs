#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use XLinkKit::{Device, Link, LinkBuilder, TransportConfig};

pub const FRAG: usize = 256;
pub const TIMEOUT_MS: u64 = 2000;

/// Small fragments and rings so a few writes exercise wrap-around and backpressure
pub fn small_config() -> TransportConfig {
    let mut cfg = TransportConfig::new();
    cfg.set_fragment_size(FRAG as u32)
        .set_pool_size(8 * FRAG, 8 * FRAG)
        .set_descriptors(8, 8)
        .set_boot_timeout_ms(1000, 5);
    cfg
}

pub fn link_with(cfg: TransportConfig) -> Link {
    LinkBuilder::new()
        .set_config(cfg)
        .build()
        .expect("failed to build loopback link")
}

pub fn up(cfg: TransportConfig) -> Link {
    let link = link_with(cfg);
    link.bring_up().expect("failed to bring the link up");
    link.settle();
    link
}

pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
    buf
}

/// Read `len` bytes in reads of at most `chunk` bytes
pub fn read_all(dev: &Device, len: usize, chunk: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let n = chunk.min(len - done);
        let got = dev
            .read(0, &mut out[done..done + n], TIMEOUT_MS)
            .expect("read failed");
        assert_eq!(got, n);
        done += n;
    }
    out
}
