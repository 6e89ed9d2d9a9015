//! Boot-protocol record of the shared region.
//!
//! The endpoint firmware advertises its boot stage through a magic string.
//! The host watches the string to learn when the OS stage is up, and uses
//! the ready/length/start words to hand firmware images over.

use std::thread;
use std::time::Duration;

use mmio_shim::io::IoMem;
use mmio_shim::log;

use crate::consts::*;
use crate::runtime::Deadline;
use crate::{ControlpathError, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStage {
    Uninit,
    Rom,
    Bl2,
    Uboot,
    Recovery,
    Os,
}

/// Map the boot magic in the shared region to a stage.
pub fn check_magic(mmio: &IoMem) -> BootStage {
    let mut magic = [0u8; BOOT_MAGIC_STRLEN];
    mmio.rd_buffer(BOOT_OFFSET_MAGIC, &mut magic);

    let len = magic.iter().position(|b| *b == 0).unwrap_or(BOOT_MAGIC_STRLEN);
    let magic = &magic[..len];
    if magic.is_empty() {
        return BootStage::Uninit;
    }

    let table: [(&str, BootStage); 6] = [
        (BOOT_MAGIC_ROM, BootStage::Rom),
        (BOOT_MAGIC_EMMC, BootStage::Rom),
        (BOOT_MAGIC_BL2, BootStage::Bl2),
        (BOOT_MAGIC_UBOOT, BootStage::Uboot),
        (BOOT_MAGIC_RECOVERY, BootStage::Recovery),
        (BOOT_MAGIC_YOCTO, BootStage::Os),
    ];
    table
        .iter()
        .find(|(m, _)| magic.starts_with(m.as_bytes()))
        .map(|(_, stage)| *stage)
        .unwrap_or(BootStage::Uninit)
}

/// Written by the endpoint firmware as it moves through its stages
pub fn set_magic(mmio: &IoMem, magic: &str) {
    let mut buf = [0u8; BOOT_MAGIC_STRLEN];
    let n = magic.len().min(BOOT_MAGIC_STRLEN - 1);
    buf[..n].copy_from_slice(&magic.as_bytes()[..n]);
    mmio.wr_buffer(BOOT_OFFSET_MAGIC, &buf);
}

pub fn set_device_name(mmio: &IoMem, name: &str) {
    let mut buf = [0u8; BOOT_DEST_STRLEN];
    let n = name.len().min(BOOT_DEST_STRLEN - 1);
    buf[..n].copy_from_slice(&name.as_bytes()[..n]);
    mmio.wr_buffer(BOOT_OFFSET_MF_DEST, &buf);
}

pub fn device_name(mmio: &IoMem) -> String {
    let mut buf = [0u8; BOOT_DEST_STRLEN];
    mmio.rd_buffer(BOOT_OFFSET_MF_DEST, &mut buf);
    let len = buf.iter().position(|b| *b == 0).unwrap_or(BOOT_DEST_STRLEN);
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// Poll the boot magic until the peer reaches `target`.
///
/// A peer sitting in its recovery firmware never reaches the OS stage, so
/// that stage ends the wait early.
pub fn wait_for_stage(
    mmio: &IoMem,
    target: BootStage,
    poll: Duration,
    deadline: &Deadline,
) -> Result<BootStage, ControlpathError> {
    loop {
        let stage = check_magic(mmio);
        if stage == target {
            return Ok(stage);
        }
        if stage == BootStage::Recovery {
            log::warn!("peer is in recovery firmware");
            return Err(ControlpathError::Recovery);
        }
        if deadline.expired() {
            log::error!("peer stuck in boot stage {:?}", stage);
            return Err(ControlpathError::BootError("wait stage", Error::ETIME));
        }
        let nap = deadline.remaining().map_or(poll, |rem| rem.min(poll));
        thread::sleep(nap);
    }
}

/// An image download request as the endpoint firmware sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageRequest {
    pub image_id: u32,
    pub start: u64,
    pub length: u32,
    pub offset: u32,
}

/// Host side of the image transfer: advertise `length` bytes at bus address
/// `start` as image `image_id`, then wait for the firmware's verdict.
pub fn request_image(
    mmio: &IoMem,
    image_id: u32,
    start: u64,
    length: u32,
    offset: u32,
    poll: Duration,
    deadline: &Deadline,
) -> Result<(), ControlpathError> {
    if !matches!(image_id, BOOT_FIP_ID | BOOT_OS_ID | BOOT_ROOTFS_ID) {
        log::error!("unknown firmware id {}", image_id);
        return Err(ControlpathError::InvalidArg("image id"));
    }

    mmio.wr64(BOOT_OFFSET_MF_START, start);
    mmio.wr32(BOOT_OFFSET_MF_LEN, length);
    mmio.wr32(BOOT_OFFSET_MF_OFFSET, offset);
    mmio_shim::io::wmb();
    mmio.wr32(BOOT_OFFSET_MF_READY, image_id);

    loop {
        match mmio.rd32(BOOT_OFFSET_MF_READY) {
            BOOT_STATUS_DOWNLOADED => return Ok(()),
            BOOT_STATUS_INVALID => {
                log::error!("the firmware image data is invalid.");
                return Err(ControlpathError::BootError("image", Error::EINVAL));
            }
            BOOT_STATUS_ERROR => {
                log::error!("failed to download firmware image.");
                return Err(ControlpathError::BootError("image", Error::EINVAL));
            }
            _ => {}
        }
        if deadline.expired() {
            return Err(ControlpathError::BootError("image", Error::ETIME));
        }
        thread::sleep(poll);
    }
}

/// Firmware side: the request currently posted by the host, if any
pub fn pending_image(mmio: &IoMem) -> Option<ImageRequest> {
    let image_id = mmio.rd32(BOOT_OFFSET_MF_READY);
    if !matches!(image_id, BOOT_FIP_ID | BOOT_OS_ID | BOOT_ROOTFS_ID) {
        return None;
    }
    Some(ImageRequest {
        image_id,
        start: mmio.rd64(BOOT_OFFSET_MF_START),
        length: mmio.rd32(BOOT_OFFSET_MF_LEN),
        offset: mmio.rd32(BOOT_OFFSET_MF_OFFSET),
    })
}

/// Firmware side: post the verdict for the pending request
pub fn complete_image(mmio: &IoMem, status: u32) {
    mmio.wr32(BOOT_OFFSET_MF_READY, status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn stages() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        assert_eq!(check_magic(&mmio), BootStage::Uninit);

        set_magic(&mmio, BOOT_MAGIC_EMMC);
        assert_eq!(check_magic(&mmio), BootStage::Rom);
        set_magic(&mmio, BOOT_MAGIC_UBOOT);
        assert_eq!(check_magic(&mmio), BootStage::Uboot);
        set_magic(&mmio, BOOT_MAGIC_YOCTO);
        assert_eq!(check_magic(&mmio), BootStage::Os);
        set_magic(&mmio, "garbage");
        assert_eq!(check_magic(&mmio), BootStage::Uninit);
    }

    #[test]
    fn device_name_is_nul_terminated() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set_device_name(&mmio, "mxlk0");
        assert_eq!(device_name(&mmio), "mxlk0");
    }

    #[test]
    fn wait_gives_up_on_recovery() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set_magic(&mmio, BOOT_MAGIC_RECOVERY);
        let res = wait_for_stage(
            &mmio,
            BootStage::Os,
            Duration::from_millis(1),
            &Deadline::from_timeout_ms(100),
        );
        assert!(matches!(res, Err(ControlpathError::Recovery)));
    }

    #[test]
    fn wait_times_out() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set_magic(&mmio, BOOT_MAGIC_BL2);
        let res = wait_for_stage(
            &mmio,
            BootStage::Os,
            Duration::from_millis(1),
            &Deadline::from_timeout_ms(20),
        );
        assert_eq!(res.unwrap_err().to_errno(), Error::ETIME);
    }

    #[test]
    fn image_handshake() {
        let mmio = Arc::new(IoMem::new(MMIO_HEADER_SIZE));
        let fw = mmio.clone();
        let responder = thread::spawn(move || loop {
            if let Some(req) = pending_image(&fw) {
                assert_eq!(req.image_id, BOOT_OS_ID);
                assert_eq!(req.start, 0x1_0000_2000);
                assert_eq!(req.length, 4096);
                complete_image(&fw, BOOT_STATUS_DOWNLOADED);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        });

        request_image(
            &mmio,
            BOOT_OS_ID,
            0x1_0000_2000,
            4096,
            0,
            Duration::from_millis(1),
            &Deadline::from_timeout_ms(5_000),
        )
        .unwrap();
        responder.join().unwrap();
    }

    #[test]
    fn invalid_image_is_rejected() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        let res = request_image(
            &mmio,
            42,
            0,
            0,
            0,
            Duration::from_millis(1),
            &Deadline::never(),
        );
        assert!(matches!(res, Err(ControlpathError::InvalidArg(_))));
    }
}
