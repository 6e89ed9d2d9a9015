//! Wire constants of the shared BAR region and transport defaults.

pub const XLINK_VERSION_MAJOR: u8 = 0;
pub const XLINK_VERSION_MINOR: u8 = 1;
pub const XLINK_VERSION_BUILD: u16 = 0;

pub const XLINK_DRIVER_NAME: &str = "mxlk";
pub const XLINK_MAX_NAME_LEN: usize = 32;

// fixed root fields of the MMIO region
pub const MMIO_VERSION: usize = 0x00;
pub const MMIO_DEV_STATUS: usize = 0x04;
pub const MMIO_HOST_STATUS: usize = 0x08;
pub const MMIO_HTOD_TX_DOORBELL: usize = 0x0c;
pub const MMIO_HTOD_RX_DOORBELL: usize = 0x0d;
pub const MMIO_DTOH_TX_DOORBELL: usize = 0x0e;
pub const MMIO_DTOH_RX_DOORBELL: usize = 0x0f;
pub const MMIO_HTOD_PHY_ID_DOORBELL: usize = 0x10;
pub const MMIO_PHY_DEV_ID: usize = 0x12;
pub const MMIO_MAX_FUNCTIONS: usize = 0x14;
pub const MMIO_CAPABILITIES: usize = 0x18;

// boot record
pub const BOOT_OFFSET_MAGIC: usize = 0x20;
pub const BOOT_MAGIC_STRLEN: usize = 16;
pub const BOOT_OFFSET_MF_READY: usize = 0x30;
pub const BOOT_OFFSET_MF_LEN: usize = 0x34;
pub const BOOT_OFFSET_MF_START: usize = 0x38;
pub const BOOT_OFFSET_MF_OFFSET: usize = 0x40;
pub const BOOT_OFFSET_MF_DEST: usize = 0x44;
pub const BOOT_DEST_STRLEN: usize = 128;

pub const BOOT_MAGIC_ROM: &str = "VPUROM";
pub const BOOT_MAGIC_EMMC: &str = "VPUEMMC";
pub const BOOT_MAGIC_BL2: &str = "VPUBL2";
pub const BOOT_MAGIC_UBOOT: &str = "VPUUBOOT";
pub const BOOT_MAGIC_RECOVERY: &str = "VPURECOV";
pub const BOOT_MAGIC_YOCTO: &str = "VPUYOCTO";

pub const BOOT_FIP_ID: u32 = 0x1;
pub const BOOT_OS_ID: u32 = 0x2;
pub const BOOT_ROOTFS_ID: u32 = 0x3;

pub const BOOT_STATUS_START: u32 = 0x0;
pub const BOOT_STATUS_DOWNLOADED: u32 = 0xdd;
pub const BOOT_STATUS_INVALID: u32 = 0xee;
pub const BOOT_STATUS_ERROR: u32 = 0xff;

/// Capabilities are laid out after the fixed header
pub const MMIO_HEADER_SIZE: usize = 0x100;

pub const CAP_NULL: u16 = 0;
pub const CAP_TXRX: u16 = 1;
pub const CAP_TTL: usize = 32;
pub const CAP_HDR_LEN: usize = 4;

// transport capability payload, relative to the record start
pub const CAP_OFF_ID: usize = 0;
pub const CAP_OFF_NEXT: usize = 2;
pub const CAP_OFF_FRAGMENT_SIZE: usize = 4;
pub const CAP_OFF_TX: usize = 8;
pub const CAP_OFF_RX: usize = 24;
pub const CAP_TXRX_LEN: usize = 40;

// pipe quad, relative to CAP_OFF_TX / CAP_OFF_RX
pub const PIPE_OFF_RING: usize = 0;
pub const PIPE_OFF_NDESC: usize = 4;
pub const PIPE_OFF_HEAD: usize = 8;
pub const PIPE_OFF_TAIL: usize = 12;

// transfer descriptor: u64 address, u32 length, u16 status, u16 interface
pub const TD_SIZE: usize = 16;
pub const TD_OFF_ADDRESS: usize = 0;
pub const TD_OFF_LENGTH: usize = 8;
pub const TD_OFF_STATUS: usize = 12;
pub const TD_OFF_INTERFACE: usize = 14;

pub const DESC_STATUS_SUCCESS: u16 = 0;
pub const DESC_STATUS_ERROR: u16 = 0xffff;

pub const NUM_INTERFACES: u16 = 1;

pub const DEFAULT_FRAGMENT_SIZE: u32 = 128 * 1024;
pub const DEFAULT_RX_POOL_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_TX_POOL_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_NUM_DESCRIPTORS: u32 = 64;
pub const DEFAULT_RX_BACKOFF_MS: u64 = 20;
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BOOT_POLL_MS: u64 = 100;

pub const CACHE_LINE_SIZE: usize = 64;

// software device id layout
pub const SW_ID_MEDIA_FUNCTION: u32 = 0x1;
pub const SW_ID_SLICE_SHIFT: u32 = 4;
pub const SW_ID_PHY_SHIFT: u32 = 8;
pub const SW_ID_TBH_PRIME: u32 = 0x1 << 28;
pub const SW_ID_TBH_STANDARD: u32 = 0x2 << 28;
