//! # GUID
//!
//! 128-bit type identifiers in the classic `data1-data2-data3-data4` layout.
//!
//! ```text
//! 3F2504E0-4F89-41D3-9A0C-0305E82C3301
//! └data1─┘ └d2┘ └d3┘ └──── data4 ────┘
//! ```

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use rand::RngCore;

use crate::error::GuidParseError;

/// Hyphen positions within the bare 36-character form.
const SEPARATORS: [usize; 4] = [8, 13, 18, 23];

/// A 128-bit globally unique identifier.
///
/// Ordering and hashing follow the field layout, which matches the numeric
/// order of [`as_u128`](Self::as_u128).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(C)]
pub struct Guid {
    /// First group, 8 hex digits.
    pub data1: u32,
    /// Second group, 4 hex digits.
    pub data2: u16,
    /// Third group, 4 hex digits. Its top nibble is the version.
    pub data3: u16,
    /// Last two groups, 4 + 12 hex digits.
    pub data4: [u8; 8],
}

impl Guid {
    /// The all-zero GUID. Never a valid type id.
    pub const NIL: Self = Self::from_u128(0);

    /// Builds a GUID from its big-endian numeric value.
    ///
    /// `Guid::from_u128(0x3F2504E0_4F89_41D3_9A0C_0305E82C3301)` formats as
    /// `3F2504E0-4F89-41D3-9A0C-0305E82C3301`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80) as u16,
            data3: (value >> 64) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }

    /// Numeric value of the GUID.
    #[inline]
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }

    /// Checks for the nil GUID.
    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.as_u128() == 0
    }

    /// Version nibble (4 for random GUIDs).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn version(self) -> u8 {
        (self.data3 >> 12) as u8
    }

    /// Generates a random version 4 GUID.
    pub fn new_v4<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self::from_u128(u128::from_be_bytes(bytes))
    }

    /// Parses `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, optionally wrapped in
    /// `{}`. Hex digits are case-insensitive.
    ///
    /// # Errors
    ///
    /// [`GuidParseError`] describing the first problem found.
    pub fn parse(text: &str) -> Result<Self, GuidParseError> {
        parse_guid(text).map_err(|error| {
            tracing::warn!(input = text, %error, "rejected GUID text");
            error
        })
    }
}

fn parse_guid(text: &str) -> Result<Guid, GuidParseError> {
    let bytes = text.as_bytes();
    let (digits, start) = match bytes.len() {
        36 => {
            if bytes[0] == b'{' || bytes[35] == b'}' {
                return Err(GuidParseError::MissingBrace);
            }
            (bytes, 0)
        }
        38 => {
            if bytes[0] != b'{' || bytes[37] != b'}' {
                return Err(GuidParseError::MissingBrace);
            }
            (&bytes[1..37], 1)
        }
        len => return Err(GuidParseError::InvalidLength(len)),
    };

    let mut value: u128 = 0;
    for (i, &b) in digits.iter().enumerate() {
        if SEPARATORS.contains(&i) {
            if b != b'-' {
                return Err(GuidParseError::MisplacedSeparator(start + i));
            }
            continue;
        }
        let nibble = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(GuidParseError::InvalidHexDigit {
                    position: start + i,
                    found: text[start + i..].chars().next().unwrap_or('?'),
                })
            }
        };
        value = (value << 4) | u128::from(nibble);
    }
    Ok(Guid::from_u128(value))
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Guid {
    /// Uppercase hex; `{:#}` wraps the text in braces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        if f.alternate() {
            f.write_str("{")?;
        }
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )?;
        if f.alternate() {
            f.write_str("}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SAMPLE: Guid = Guid::from_u128(0x3F25_04E0_4F89_41D3_9A0C_0305_E82C_3301);

    #[test]
    fn test_fields_from_u128() {
        assert_eq!(SAMPLE.data1, 0x3F25_04E0);
        assert_eq!(SAMPLE.data2, 0x4F89);
        assert_eq!(SAMPLE.data3, 0x41D3);
        assert_eq!(SAMPLE.data4, [0x9A, 0x0C, 0x03, 0x05, 0xE8, 0x2C, 0x33, 0x01]);
        assert_eq!(SAMPLE.as_u128(), 0x3F25_04E0_4F89_41D3_9A0C_0305_E82C_3301);
    }

    #[test]
    fn test_display() {
        assert_eq!(SAMPLE.to_string(), "3F2504E0-4F89-41D3-9A0C-0305E82C3301");
        assert_eq!(format!("{SAMPLE:#}"), "{3F2504E0-4F89-41D3-9A0C-0305E82C3301}");
        assert_eq!(Guid::NIL.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        assert_eq!(Guid::parse("3f2504e0-4f89-41d3-9a0c-0305e82c3301"), Ok(SAMPLE));
        assert_eq!(Guid::parse("{3F2504E0-4F89-41D3-9A0C-0305E82C3301}"), Ok(SAMPLE));
        assert_eq!(SAMPLE.to_string().parse::<Guid>(), Ok(SAMPLE));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Guid::parse(""), Err(GuidParseError::InvalidLength(0)));
        assert_eq!(
            Guid::parse("3F2504E0-4F89-41D3-9A0C-0305E82C330"),
            Err(GuidParseError::InvalidLength(35))
        );
        assert_eq!(
            Guid::parse("{3F2504E0-4F89-41D3-9A0C-0305E82C3301]"),
            Err(GuidParseError::MissingBrace)
        );
        assert_eq!(
            Guid::parse("3F2504E0-4F89-41D3-9A0C-0305E82C330}"),
            Err(GuidParseError::MissingBrace)
        );
        assert_eq!(
            Guid::parse("3F2504E0-4F8941D3--9A0C-0305E82C3301"),
            Err(GuidParseError::MisplacedSeparator(13))
        );
        assert_eq!(
            Guid::parse("{3F2504E0-4F89-41D3-9A0C-0305E82C33G1}"),
            Err(GuidParseError::InvalidHexDigit { position: 35, found: 'G' })
        );
    }

    #[test]
    fn test_parse_rejects_multibyte_input() {
        // 36 bytes, but not ASCII.
        let text = "3F2504E0-4F89-41D3-9A0C-0305E82C33é";
        assert_eq!(text.len(), 36);
        assert!(matches!(
            Guid::parse(text),
            Err(GuidParseError::InvalidHexDigit { position: 34, found: 'é' })
        ));
    }

    #[test]
    fn test_new_v4_sets_version_and_variant() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let guid = Guid::new_v4(&mut rng);
            assert_eq!(guid.version(), 4);
            assert_eq!(guid.data4[0] & 0xC0, 0x80);
            assert!(!guid.is_nil());
        }
    }

    #[test]
    fn test_ordering_matches_numeric_value() {
        let a = Guid::from_u128(1);
        let b = Guid::from_u128(1 << 100);
        assert!(a < b);
        assert!(Guid::NIL < a);
    }
}
