//! Color normalization for engine commands
//!
//! The engine packs colors as a 24-bit integer with blue in the high byte:
//! `b << 16 | g << 8 | r`.

use crate::error::{Error, Result};

/// Named colors accepted in addition to hex notation
const PALETTE: &[(&str, (u8, u8, u8))] = &[
    ("black", (0x00, 0x00, 0x00)),
    ("white", (0xFF, 0xFF, 0xFF)),
    ("red", (0xFF, 0x00, 0x00)),
    ("green", (0x00, 0x80, 0x00)),
    ("lime", (0x00, 0xFF, 0x00)),
    ("blue", (0x00, 0x00, 0xFF)),
    ("yellow", (0xFF, 0xFF, 0x00)),
    ("cyan", (0x00, 0xFF, 0xFF)),
    ("magenta", (0xFF, 0x00, 0xFF)),
    ("orange", (0xFF, 0xA5, 0x00)),
    ("purple", (0x80, 0x00, 0x80)),
    ("pink", (0xFF, 0xC0, 0xCB)),
    ("brown", (0xA5, 0x2A, 0x2A)),
    ("gray", (0x80, 0x80, 0x80)),
    ("grey", (0x80, 0x80, 0x80)),
];

/// An RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse a palette name or `#RGB` / `#RRGGBB`, case-insensitively
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some((_, (r, g, b))) = PALETTE.iter().find(|(name, _)| *name == lower) {
            return Ok(Rgb { r: *r, g: *g, b: *b });
        }

        let hex = lower
            .strip_prefix('#')
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown color '{}'", input)))?;

        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid hex color '{}'", input)))?;

        match digits.as_slice() {
            [r, g, b] => Ok(Rgb {
                r: r * 17,
                g: g * 17,
                b: b * 17,
            }),
            [r1, r2, g1, g2, b1, b2] => Ok(Rgb {
                r: r1 * 16 + r2,
                g: g1 * 16 + g2,
                b: b1 * 16 + b2,
            }),
            _ => Err(Error::InvalidArgument(format!(
                "Hex color '{}' must have 3 or 6 digits",
                input
            ))),
        }
    }

    /// Packed blue-green-red integer the engine expects
    pub fn to_engine(self) -> i64 {
        (i64::from(self.b) << 16) | (i64::from(self.g) << 8) | i64::from(self.r)
    }

    /// Canonical `#rrggbb` form
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Parse and pack a color in one step
pub fn engine_color(input: &str) -> Result<i64> {
    Rgb::parse(input).map(Rgb::to_engine)
}
