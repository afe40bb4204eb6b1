//! TPX3 word classification and bit-field extraction.
//!
//! Every word on the wire is a little-endian `u64`. The top nibble is the
//! header, the next nibble the subheader:
//!
//! | header | subheader | meaning |
//! |---|---|---|
//! | `0xA`, `0xB` | any | pixel hit |
//! | `0x4`, `0x6` | `0xF` | trigger (TDC) |
//! | `0x4`, `0x6` | `0x4` | reference clock, low half |
//! | `0x4`, `0x6` | `0x5` | reference clock, high half |
//!
//! Anything else is ignored by the decoder.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Category of a raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PacketKind {
    /// Pixel hit (header 0xA or 0xB).
    Pixel,
    /// Trigger timestamp (header 0x4/0x6, subheader 0xF).
    Trigger,
    /// Low 32 bits of the reference clock (header 0x4/0x6, subheader 0x4).
    ClockLow,
    /// High 16 bits of the reference clock (header 0x4/0x6, subheader 0x5).
    ClockHigh,
    /// Not recognized; silently dropped.
    Other,
}

/// Decoded pixel address and timing fields, before clock correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFields {
    /// Column on the chip (0..256).
    pub col: u16,
    /// Row on the chip (0..256).
    pub row: u16,
    /// 30-bit coarse time of arrival, `(spidr << 14) | toa`.
    pub coarse: u64,
    /// 4-bit fine time of arrival.
    pub ftoa: u64,
    /// 10-bit time over threshold in 25 ns units.
    pub tot: u64,
}

/// A single raw TPX3 word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tpx3Packet(u64);

impl Tpx3Packet {
    /// Wraps a raw word.
    #[inline]
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word value.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Header nibble (bits 63..60).
    #[inline]
    #[must_use]
    pub fn header(self) -> u8 {
        ((self.0 >> 60) & 0xF) as u8
    }

    /// Subheader nibble (bits 59..56).
    #[inline]
    #[must_use]
    pub fn subheader(self) -> u8 {
        ((self.0 >> 56) & 0xF) as u8
    }

    /// Classifies the word.
    #[must_use]
    pub fn kind(self) -> PacketKind {
        match (self.header(), self.subheader()) {
            (0xA | 0xB, _) => PacketKind::Pixel,
            (0x4 | 0x6, 0xF) => PacketKind::Trigger,
            (0x4 | 0x6, 0x4) => PacketKind::ClockLow,
            (0x4 | 0x6, 0x5) => PacketKind::ClockHigh,
            _ => PacketKind::Other,
        }
    }

    /// Extracts the pixel fields. Only meaningful for [`PacketKind::Pixel`].
    #[must_use]
    pub fn pixel_fields(self) -> PixelFields {
        let raw = self.0;
        let dcol = (raw & 0x0FE0_0000_0000_0000) >> 52;
        let spix = (raw & 0x001F_8000_0000_0000) >> 45;
        let pix = (raw & 0x0000_7000_0000_0000) >> 44;
        let data = (raw & 0x0000_0FFF_FFFF_0000) >> 16;
        let spidr = raw & 0xFFFF;

        let toa = (data & 0x0FFF_C000) >> 14;
        PixelFields {
            col: (dcol + pix / 4) as u16,
            row: (spix + (pix & 0x3)) as u16,
            coarse: (spidr << 14) | toa,
            ftoa: data & 0xF,
            tot: (data & 0x0000_3FF0) >> 4,
        }
    }

    /// 32-bit coarse trigger time in 25 ns units.
    #[inline]
    #[must_use]
    pub fn trigger_coarse(self) -> u64 {
        (self.0 >> 12) & 0xFFFF_FFFF
    }

    /// Trigger fine time in 25/4096 ns units.
    ///
    /// The 4-bit TDC fine field is remapped with `((fine - 1) << 9) / 12` in
    /// wrapping unsigned arithmetic and merged with the reserved bits 9..11.
    #[inline]
    #[must_use]
    pub fn trigger_fine(self) -> u64 {
        let fine = (self.0 >> 5) & 0xF;
        let remapped = (fine.wrapping_sub(1) << 9) / 12;
        (self.0 & 0x0E00) | (remapped & 0x01FF)
    }

    /// Low half of the reference clock register.
    #[inline]
    #[must_use]
    pub fn clock_low(self) -> u64 {
        (self.0 & 0x0000_FFFF_FFFF_0000) >> 16
    }

    /// High half of the reference clock register, already shifted into place.
    #[inline]
    #[must_use]
    pub fn clock_high(self) -> u64 {
        (self.0 & 0x0000_0000_FFFF_0000) << 16
    }
}

/// Builders for raw words, used by tests and replay tooling.
pub mod encode {
    /// Encodes a pixel word.
    #[must_use]
    pub fn pixel(col: u16, row: u16, coarse: u64, ftoa: u64, tot: u64) -> u64 {
        let col = u64::from(col);
        let row = u64::from(row);
        let pix = ((col & 1) << 2) | (row & 3);
        let toa = coarse & 0x3FFF;
        let spidr = (coarse >> 14) & 0xFFFF;
        (0xB << 60)
            | ((col >> 1) << 53)
            | ((row >> 2) << 47)
            | (pix << 44)
            | (toa << 30)
            | ((tot & 0x3FF) << 20)
            | ((ftoa & 0xF) << 16)
            | spidr
    }

    /// Encodes a trigger word (header 0x6, subheader 0xF).
    #[must_use]
    pub fn trigger(coarse: u64, fine: u64) -> u64 {
        (0x6F << 56) | ((coarse & 0xFFFF_FFFF) << 12) | ((fine & 0xF) << 5)
    }

    /// Encodes the low-half clock word for a 48-bit clock value.
    #[must_use]
    pub fn clock_low(clock: u64) -> u64 {
        (0x44 << 56) | ((clock & 0xFFFF_FFFF) << 16)
    }

    /// Encodes the high-half clock word for a 48-bit clock value.
    #[must_use]
    pub fn clock_high(clock: u64) -> u64 {
        (0x45 << 56) | (((clock >> 32) & 0xFFFF) << 16)
    }
}
