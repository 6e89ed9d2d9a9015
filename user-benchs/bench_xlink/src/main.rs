use clap::{arg, App, AppSettings};
use rand::RngCore;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;

use XLinkKit::mmio_shim::utils::KTimer;
use XLinkKit::{Device, LinkBuilder, TransportConfig};

#[derive(Clone, Copy, Debug)]
struct Params {
    fragment_size: u32,
    payload: usize,
    lasting_time: u64,
    descriptors: u32,
}

#[repr(align(128))]
struct Counter {
    bytes: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
        }
    }
}

fn parse<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn main() {
    let matches = App::new("XLink Performance Test")
        .version("0.1")
        .about("PCIe transport throughput over a loopback link")
        .setting(AppSettings::AllArgsOverrideSelf)
        .args(&[
            arg!(--fragment_size [FRAGMENT_SIZE] "max payload of one descriptor, in bytes"),
            arg!(--payload [PAYLOAD] "bytes per write call"),
            arg!(--lasting_time [LASTING_TIME] "benchmark duration, in seconds"),
            arg!(--descriptors [DESCRIPTORS] "descriptors per ring, a power of two"),
        ])
        .get_matches();

    let params = Params {
        fragment_size: parse(matches.value_of("fragment_size"), 128 * 1024),
        payload: parse(matches.value_of("payload"), 1024 * 1024),
        lasting_time: parse(matches.value_of("lasting_time"), 10),
        descriptors: parse(matches.value_of("descriptors"), 64),
    };
    println!("Sanity check parameters: {:?}", params);

    let mut config = TransportConfig::new();
    config
        .set_fragment_size(params.fragment_size)
        .set_descriptors(params.descriptors, params.descriptors);
    let link = match LinkBuilder::new().set_config(config).build() {
        Ok(link) => link,
        Err(e) => {
            eprintln!("failed to build the link: {}", e);
            return;
        }
    };
    if let Err(e) = link.bring_up() {
        eprintln!("failed to bring the link up: {}", e);
        return;
    }

    let running = Arc::new(AtomicBool::new(true));
    let counter = Arc::new(Counter::new());
    let writer = writer_thread(link.host.clone(), params.payload, running.clone());
    let reader = reader_thread(
        link.endpoint.clone(),
        params.payload,
        running.clone(),
        counter.clone(),
    );

    let mut prev = 0;
    let mut timer = KTimer::new();
    for epoch in 0..params.lasting_time {
        std::thread::sleep(Duration::from_secs(1));
        let bytes = counter.bytes.load(Ordering::Relaxed);
        let passed_usec = timer.get_passed_usec();
        timer.reset();

        // bytes per usec is MB/s
        let thpt = (bytes - prev) as f64 / passed_usec.max(1) as f64;
        println!("epoch @ {:<3} thpt {:>8.2} MB/s", epoch, thpt);
        prev = bytes;
    }

    running.store(false, Ordering::Release);
    // unblock both sides
    link.tear_down();
    let _ = writer.join();
    let _ = reader.join();

    print!("{}", link.host.debug_report());
    print!("{}", link.endpoint.debug_report());
}

fn writer_thread(dev: Arc<Device>, payload: usize, running: Arc<AtomicBool>) -> JoinHandle<()> {
    spawn(move || {
        let mut rng = ChaCha8Rng::seed_from_u64(0xdead_beef);
        let mut buf = vec![0u8; payload];
        while running.load(Ordering::Acquire) {
            rng.fill_bytes(&mut buf);
            if dev.write(0, &buf, 0).is_err() {
                break;
            }
        }
    })
}

fn reader_thread(
    dev: Arc<Device>,
    payload: usize,
    running: Arc<AtomicBool>,
    counter: Arc<Counter>,
) -> JoinHandle<()> {
    spawn(move || {
        let mut buf = vec![0u8; payload];
        while running.load(Ordering::Acquire) {
            match dev.read(0, &mut buf, 0) {
                Ok(n) => {
                    counter.bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(_) => break,
            }
        }
    })
}
