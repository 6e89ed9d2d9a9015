mod common;

use std::sync::Arc;

use common::*;
use XLinkKit::mmio_shim::Error;
use XLinkKit::{DeviceManager, DeviceStatus};

fn registered() -> (DeviceManager, XLinkKit::Link) {
    let link = link_with(small_config());
    let manager = DeviceManager::new();
    manager.add_device(link.endpoint.clone()).unwrap();
    manager.add_device(link.host.clone()).unwrap();
    (manager, link)
}

#[test]
fn test_registry() {
    let (manager, link) = registered();
    assert_eq!(manager.get_device_list(), vec![0, 1]);
    assert_eq!(manager.get_device_name(1).unwrap(), "mxlk1");
    assert_eq!(manager.add_device(link.host.clone()), Err(Error::EBUSY));
    assert_eq!(manager.get_device_name(7), Err(Error::ENODEV));
    assert_eq!(manager.get_device_status(7), Err(Error::ENODEV));

    let removed = manager.remove_device(0).unwrap();
    assert!(Arc::ptr_eq(&removed, &link.endpoint));
    assert_eq!(manager.get_device_list(), vec![1]);
    assert_eq!(manager.remove_device(0).unwrap_err(), Error::ENODEV);
}

#[test]
fn test_flat_api_round_trip() {
    let (manager, _link) = registered();
    manager.connect(0).unwrap();
    manager.boot_remote(1).unwrap();
    manager.connect(1).unwrap();
    assert_eq!(manager.get_device_status(0), Ok(DeviceStatus::Run));
    assert_eq!(manager.get_device_status(1), Ok(DeviceStatus::Run));

    let data = payload(3 * FRAG + 1, 77);
    let mut len = data.len();
    assert_eq!(manager.write(1, &data, &mut len, TIMEOUT_MS), Ok(0));
    assert_eq!(len, data.len());

    let mut buf = vec![0u8; data.len()];
    let mut len = data.len();
    assert_eq!(manager.read(0, &mut buf, &mut len, TIMEOUT_MS), Ok(0));
    assert_eq!(len, data.len());
    assert_eq!(buf, data);
}

#[test]
fn test_errno_mapping() {
    let (manager, _link) = registered();
    let mut buf = [0u8; 32];

    // unknown device
    let mut len = 4;
    assert_eq!(manager.read(9, &mut buf, &mut len, 10), Err(Error::ENODEV));

    // zero or oversized length
    let mut len = 0;
    assert_eq!(manager.write(1, &buf, &mut len, 10), Err(Error::EINVAL));
    let mut len = 33;
    assert_eq!(manager.write(1, &buf, &mut len, 10), Err(Error::EINVAL));

    // not running yet
    let mut len = 4;
    assert_eq!(manager.write(1, &buf, &mut len, 10), Err(Error::ENODEV));
    assert_eq!(len, 0);

    // peer below READY
    assert_eq!(manager.connect(1), Err(Error::EBUSY));

    manager.connect(0).unwrap();
    manager.connect(1).unwrap();

    // a timed out read reports what it got
    let mut len = 6;
    assert_eq!(manager.write(1, b"abcdef", &mut len, TIMEOUT_MS), Ok(0));
    let mut len = 2;
    assert_eq!(manager.read(0, &mut buf, &mut len, TIMEOUT_MS), Ok(0));
    assert_eq!(&buf[..2], b"ab");
    let mut len = 32;
    assert_eq!(manager.read(0, &mut buf, &mut len, 200), Err(Error::ETIME));
    assert_eq!(len, 4);
    assert_eq!(&buf[..4], b"cdef");

    manager.reset_device(1).unwrap();
    assert_eq!(manager.get_device_status(1), Ok(DeviceStatus::Uninit));
    let mut len = 4;
    assert_eq!(manager.read(1, &mut buf, &mut len, 10), Err(Error::ENODEV));
}

#[test]
fn test_shutdown_tears_everything_down() {
    let (manager, link) = registered();
    manager.connect(0).unwrap();
    manager.connect(1).unwrap();
    manager.shutdown();
    assert!(manager.get_device_list().is_empty());
    assert_eq!(link.endpoint.status(), DeviceStatus::Uninit);
    assert_eq!(link.host.status(), DeviceStatus::Uninit);
}
