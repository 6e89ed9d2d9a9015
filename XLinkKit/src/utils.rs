use crate::consts::*;

/// Round `value` up to a multiple of `align` (`align > 0`)
#[inline]
pub fn roundup(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Derive the software device id the XLink clients address a function by.
///
/// Functions pair up into slices (0/1, 2/3, ...), even functions are the
/// media functions, the physical id sits above the low byte, and the
/// platform variant is told apart by the number of functions it exposes.
pub fn create_sw_device_id(func_no: u8, phy_id: u16, max_functions: u8) -> u32 {
    let mut sw_id = 0u32;
    if func_no < 8 {
        sw_id |= ((func_no as u32) / 2) << SW_ID_SLICE_SHIFT;
    }
    if func_no & 1 == 0 {
        sw_id |= SW_ID_MEDIA_FUNCTION;
    }
    sw_id |= (phy_id as u32) << SW_ID_PHY_SHIFT;

    match max_functions {
        8 => sw_id |= SW_ID_TBH_STANDARD,
        4 => sw_id |= SW_ID_TBH_PRIME,
        _ => {}
    }
    sw_id
}
