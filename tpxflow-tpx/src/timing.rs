//! TPX3 timing helpers.
//!
//! Pixel and trigger clocks are 30 bits wide (25 ns ticks, ~26.8 s range).
//! The reference clock delivered by the control link is 48 bits wide. A
//! pixel's coarse time is merged with the reference clock's high bits after
//! checking which quarter of the 30-bit range (bits 29..28) each sits in.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]

/// One quarter of the 30-bit pixel clock range (2^28 ticks).
pub const QUADRANT_PERIOD: u64 = 0x1000_0000;

/// Mask of the 30 bits carried by pixel and trigger words.
const COARSE_MASK: u64 = 0x3FFF_FFFF;

/// Mask of the reference clock bits above the 30-bit coarse range.
const EPOCH_MASK: u64 = 0xFFFF_C000_0000;

/// Length of one coarse tick in seconds.
pub const COARSE_TICK_S: f64 = 25e-9;

/// Length of one fine tick (25/4096 ns) in seconds.
pub const FINE_TICK_S: f64 = 25e-9 / 4096.0;

/// Merges a coarse timestamp with the high bits of the reference clock.
///
/// The top two bits of both values are compared on a circular scale:
/// - reference one quadrant ahead: use the previous epoch
/// - reference one quadrant behind: use the next epoch
/// - otherwise: use the reference epoch unchanged
///
/// Epoch arithmetic wraps, so a reference of zero with a pixel in the last
/// quadrant lands at the top of the 48-bit range.
#[inline]
#[must_use]
pub fn correct_global_time(coarse: u64, reference: u64) -> u64 {
    let pixel_bits = ((coarse >> 28) & 0x3) as i64;
    let reference_bits = ((reference >> 28) & 0x3) as i64;

    let epoch = match reference_bits - pixel_bits {
        1 | -3 => reference.wrapping_sub(QUADRANT_PERIOD),
        -1 | 3 => reference.wrapping_add(QUADRANT_PERIOD),
        _ => reference,
    };
    (epoch & EPOCH_MASK) | (coarse & COARSE_MASK)
}

/// Column phase slot used to compensate clock distribution skew.
///
/// Slot zero is pushed to the end of the range (16).
#[inline]
#[must_use]
pub fn column_phase(col: u16) -> u64 {
    match u64::from(col / 2) % 16 {
        0 => 16,
        phase => phase,
    }
}

/// Full-resolution pixel time of arrival in 25/4096 ns ticks.
///
/// Signed, since an early fine time can push a zero coarse time below zero.
#[inline]
#[must_use]
pub fn pixel_toa_ticks(corrected: u64, ftoa: u64, col: u16) -> i64 {
    ((corrected << 12) as i64) - ((ftoa << 8) as i64) + ((column_phase(col) << 8) as i64)
}

/// Pixel time of arrival in seconds.
#[inline]
#[must_use]
pub fn pixel_toa_seconds(corrected: u64, ftoa: u64, col: u16) -> f64 {
    pixel_toa_ticks(corrected, ftoa, col) as f64 * FINE_TICK_S
}

/// Trigger time in seconds from a corrected coarse time and fine ticks.
#[inline]
#[must_use]
pub fn trigger_seconds(corrected: u64, fine: u64) -> f64 {
    corrected as f64 * COARSE_TICK_S + fine as f64 * FINE_TICK_S
}

/// Time over threshold in seconds from the raw 25 ns count.
#[inline]
#[must_use]
pub fn tot_seconds(raw: u64) -> f64 {
    (raw * 25) as f64 * 1e-9
}
