mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use XLinkKit::boot;
use XLinkKit::consts::*;
use XLinkKit::runtime::Deadline;
use XLinkKit::utils::create_sw_device_id;
use XLinkKit::{ControlpathError, DatapathError, DeviceStatus, LinkBuilder, Version};

#[test]
fn test_bring_up_reaches_run() {
    let link = link_with(small_config());
    assert_eq!(link.endpoint.status(), DeviceStatus::Uninit);
    assert_eq!(link.host.status(), DeviceStatus::Uninit);

    link.endpoint.bind().unwrap();
    assert_eq!(link.endpoint.status(), DeviceStatus::Run);
    assert_eq!(boot::check_magic(&link.mmio), boot::BootStage::Os);
    assert_eq!(Version::read(&link.mmio), Version::current());

    link.host.boot_remote().unwrap();
    assert_eq!(link.host.status(), DeviceStatus::Ready);
    link.host.connect().unwrap();
    assert_eq!(link.host.status(), DeviceStatus::Run);
    assert_eq!(link.host.peer_status(), DeviceStatus::Run);
    assert!(link.host_irq.is_registered());
    assert!(link.endpoint_irq.is_registered());
}

#[test]
fn test_connect_is_idempotent() {
    let link = up(small_config());
    let core = link.host.core().unwrap();
    let pools = core.pool_info();

    link.host.connect().unwrap();
    link.endpoint.bind().unwrap();
    link.settle();

    assert!(std::sync::Arc::ptr_eq(&core, &link.host.core().unwrap()));
    assert_eq!(core.pool_info(), pools);
    assert!(link.host_irq.is_registered());

    let data = payload(FRAG * 2, 1);
    link.host.write(0, &data, TIMEOUT_MS).unwrap();
    assert_eq!(read_all(&link.endpoint, data.len(), data.len()), data);
}

#[test]
fn test_connect_before_endpoint_ready_is_rejected() {
    let link = link_with(small_config());
    let started = Instant::now();
    match link.host.connect() {
        Err(ControlpathError::NotReady(DeviceStatus::Uninit)) => {}
        other => panic!("unexpected connect result {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(link.host.status(), DeviceStatus::Uninit);
    assert!(!link.host_irq.is_registered());

    let mut buf = [0u8; 4];
    assert_eq!(
        link.host.read(0, &mut buf, 10),
        Err(DatapathError::NotConnected(0))
    );
}

#[test]
fn test_boot_remote_times_out() {
    let mut cfg = small_config();
    cfg.set_boot_timeout_ms(30, 5);
    let link = link_with(cfg);

    match link.host.boot_remote() {
        Err(e @ ControlpathError::BootError(..)) => {
            assert_eq!(e.to_errno(), XLinkKit::mmio_shim::Error::ETIME)
        }
        other => panic!("unexpected boot result {:?}", other),
    }
    assert_eq!(link.host.status(), DeviceStatus::Error);
}

#[test]
fn test_boot_remote_waits_for_os_stage() {
    let link = link_with(small_config());
    boot::set_magic(&link.mmio, BOOT_MAGIC_UBOOT);

    let endpoint = link.endpoint.clone();
    let binder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        endpoint.bind()
    });
    link.host.boot_remote().unwrap();
    binder.join().unwrap().unwrap();
    link.host.connect().unwrap();
}

#[test]
fn test_recovery_stage_is_reported() {
    let link = link_with(small_config());
    boot::set_magic(&link.mmio, BOOT_MAGIC_RECOVERY);

    assert!(matches!(link.host.boot_remote(), Err(ControlpathError::Recovery)));
    assert_eq!(link.host.status(), DeviceStatus::Recovery);
    assert!(matches!(link.host.connect(), Err(ControlpathError::Recovery)));
}

#[test]
fn test_truncated_capability_fails_connect() {
    let link = link_with(small_config());
    link.endpoint.bind().unwrap();
    link.host.boot_remote().unwrap();

    // a transport record whose header is the last bytes of the region
    let cap = link.mmio.len() - CAP_HDR_LEN;
    link.mmio.wr16(cap + CAP_OFF_ID, CAP_TXRX);
    link.mmio.wr16(cap + CAP_OFF_NEXT, 0);
    link.mmio.wr32(MMIO_CAPABILITIES, cap as u32);

    match link.host.connect() {
        Err(ControlpathError::CapabilityNotFound(id)) => assert_eq!(id, CAP_TXRX),
        other => panic!("unexpected connect result {:?}", other),
    }
    assert!(link.host.core().is_none());
}

#[test]
fn test_version_mismatch() {
    let link = link_with(small_config());
    link.endpoint.bind().unwrap();
    Version {
        major: XLINK_VERSION_MAJOR + 1,
        minor: 0,
        build: 0,
    }
    .write(&link.mmio);

    match link.host.connect() {
        Err(e @ ControlpathError::VersionMismatch(..)) => {
            assert_eq!(e.to_errno(), XLinkKit::mmio_shim::Error::EIO)
        }
        other => panic!("unexpected connect result {:?}", other),
    }
    assert_eq!(link.host.status(), DeviceStatus::Error);
    assert!(!link.host_irq.is_registered());
}

#[test]
fn test_teardown_wakes_blocked_reader() {
    let link = up(small_config());
    let endpoint = link.endpoint.clone();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 64];
        endpoint.read(0, &mut buf, 0)
    });

    thread::sleep(Duration::from_millis(50));
    link.endpoint.core_cleanup();
    assert_eq!(reader.join().unwrap(), Err(DatapathError::Interrupted(0)));
    assert_eq!(link.endpoint.status(), DeviceStatus::Uninit);
    assert!(!link.endpoint_irq.is_registered());
}

#[test]
fn test_teardown_wakes_blocked_writer() {
    let mut cfg = small_config();
    cfg.set_descriptors(4, 4).set_pool_size(8 * FRAG, 2 * FRAG);
    let link = up(cfg);
    link.endpoint_irq.mask();

    let host = link.host.clone();
    let writer = thread::spawn(move || host.write(0, &payload(16 * FRAG, 2), 0));

    thread::sleep(Duration::from_millis(50));
    link.host.core_cleanup();
    match writer.join().unwrap() {
        Err(DatapathError::Interrupted(n)) => assert!(n < 16 * FRAG),
        other => panic!("unexpected write result {:?}", other),
    }
}

#[test]
fn test_write_on_retained_core_after_cleanup() {
    let link = up(small_config());
    let core = link.host.core().unwrap();
    let tx_free = core.pool_info().1;

    link.host.core_cleanup();
    assert!(core.is_closed());

    let res = core.write(0, &payload(3 * FRAG, 5), &Deadline::never());
    assert_eq!(res, Err(DatapathError::Interrupted(0)));
    // nothing stays queued and every BD is back in the pool
    assert_eq!(core.pool_info().1, tx_free);
    assert_eq!(link.host.stats().tx_usr_bytes, 0);
}

#[test]
fn test_cleanup_before_run_only_resets_status() {
    let mut cfg = small_config();
    cfg.set_boot_timeout_ms(20, 5);
    let link = link_with(cfg);
    link.host.boot_remote().unwrap_err();
    link.host.core_cleanup();
    assert_eq!(link.host.status(), DeviceStatus::Uninit);
    assert!(link.host.core().is_none());
}

#[test]
fn test_rebind_after_reset() {
    let link = up(small_config());
    link.host.reset();
    link.endpoint.reset();
    assert_eq!(boot::check_magic(&link.mmio), boot::BootStage::Uninit);

    link.bring_up().unwrap();
    let data = payload(FRAG + 1, 8);
    link.endpoint.write(0, &data, TIMEOUT_MS).unwrap();
    assert_eq!(read_all(&link.host, data.len(), 10), data);
}

#[test]
fn test_write_waits_for_free_buffers() {
    let mut cfg = small_config();
    cfg.set_descriptors(4, 4).set_pool_size(8 * FRAG, 2 * FRAG);
    let link = up(cfg);
    link.endpoint_irq.mask();

    let len = 6 * FRAG;
    let data = payload(len, 4);

    // a finite timeout gives up with what was queued so far
    let sent = match link.host.write(0, &data, 50) {
        Err(DatapathError::TimeoutError(n)) => n,
        other => panic!("unexpected write result {:?}", other),
    };
    assert!(sent > 0 && sent < len);

    // an infinite one waits for the endpoint to drain
    let endpoint = link.endpoint.clone();
    let irq = link.endpoint_irq.clone();
    let reader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        irq.unmask();
        read_all(&endpoint, sent + len, FRAG)
    });

    let started = Instant::now();
    assert_eq!(link.host.write(0, &data, 0), Ok(len));
    assert!(started.elapsed() >= Duration::from_millis(50));

    let got = reader.join().unwrap();
    assert_eq!(&got[..sent], &data[..sent]);
    assert_eq!(&got[sent..], &data[..]);
}

#[test]
fn test_sw_device_id_computed_once() {
    let link = LinkBuilder::new()
        .set_config(small_config())
        .set_function(3, 4)
        .build()
        .unwrap();
    link.bring_up().unwrap();
    assert_eq!(link.endpoint.sw_device_id(), None);

    link.host.set_phy_id(0x12);
    let expected = create_sw_device_id(3, 0x12, 4);
    assert_eq!(link.endpoint.sw_device_id(), Some(expected));

    link.host.set_phy_id(0x34);
    assert_eq!(link.endpoint.sw_device_id(), Some(expected));
}
