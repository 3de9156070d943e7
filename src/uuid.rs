//! Bluetooth UUIDs: 16-bit and 32-bit SIG-assigned short forms, and full 128-bit UUIDs.
//!
//! All variants store their bytes little-endian, matching the wire representation used
//! throughout ATT and GATT. Comparisons are semantic: a 16-bit UUID compares equal to its
//! 128-bit Bluetooth Base UUID expansion.

use core::fmt;

/// The Bluetooth Base UUID, `00000000-0000-1000-8000-00805F9B34FB`, stored in the same
/// little-endian byte order as [`BluetoothUuid::Uuid128`].
const BASE_UUID: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

/// A Bluetooth UUID, in one of its three on-the-wire widths.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BluetoothUuid {
    /// A 16-bit SIG-assigned UUID, little-endian.
    Uuid16([u8; 2]),
    /// A 32-bit SIG-assigned UUID. Never appears on the ATT wire directly (§6); used for
    /// GAP-level UUIDs carried elsewhere in the stack.
    Uuid32([u8; 4]),
    /// A full 128-bit UUID, little-endian.
    Uuid128([u8; 16]),
}

impl BluetoothUuid {
    /// Builds a 16-bit UUID from its numeric value.
    pub const fn from_u16(value: u16) -> Self {
        BluetoothUuid::Uuid16(value.to_le_bytes())
    }

    /// Builds a 32-bit UUID from its numeric value.
    pub const fn from_u32(value: u32) -> Self {
        BluetoothUuid::Uuid32(value.to_le_bytes())
    }

    /// Builds the widest possible UUID that fits the given little-endian slice:
    /// 2 bytes -> 16-bit, 4 bytes -> 32-bit, 16 bytes -> 128-bit.
    pub fn from_slice(data: &[u8]) -> Result<Self, crate::Error> {
        match data.len() {
            2 => Ok(BluetoothUuid::Uuid16([data[0], data[1]])),
            4 => Ok(BluetoothUuid::Uuid32([data[0], data[1], data[2], data[3]])),
            16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(data);
                Ok(BluetoothUuid::Uuid128(buf))
            }
            _ => Err(crate::Error::InvalidPdu),
        }
    }

    /// The little-endian wire bytes of this UUID, in its own width.
    pub fn as_raw(&self) -> &[u8] {
        match self {
            BluetoothUuid::Uuid16(b) => b,
            BluetoothUuid::Uuid32(b) => b,
            BluetoothUuid::Uuid128(b) => b,
        }
    }

    /// Returns the 16-bit numeric value if this is a `Uuid16`, or `None` otherwise.
    ///
    /// Does not attempt to fold a 128-bit base-UUID expansion back down; use
    /// [`BluetoothUuid::eq`] for semantic comparisons across widths.
    pub fn as_short(&self) -> Option<u16> {
        match self {
            BluetoothUuid::Uuid16(b) => Some(u16::from_le_bytes(*b)),
            _ => None,
        }
    }

    /// Expands this UUID to its full 128-bit little-endian form.
    pub fn to_uuid128(&self) -> [u8; 16] {
        match self {
            BluetoothUuid::Uuid128(b) => *b,
            BluetoothUuid::Uuid32(b) => {
                let mut full = BASE_UUID;
                full[0..4].copy_from_slice(b);
                full
            }
            BluetoothUuid::Uuid16(b) => {
                let mut full = BASE_UUID;
                full[2..4].copy_from_slice(b);
                full
            }
        }
    }
}

/// Semantic equality: widths may differ, but the expanded 128-bit UUID is what matters.
impl PartialEq for BluetoothUuid {
    fn eq(&self, other: &BluetoothUuid) -> bool {
        self.to_uuid128() == other.to_uuid128()
    }
}

impl Eq for BluetoothUuid {}

impl fmt::Debug for BluetoothUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BluetoothUuid::Uuid16(b) => write!(f, "Uuid16(0x{:04X})", u16::from_le_bytes(*b)),
            BluetoothUuid::Uuid32(b) => write!(f, "Uuid32(0x{:08X})", u32::from_le_bytes(*b)),
            BluetoothUuid::Uuid128(b) => {
                write!(f, "Uuid128(")?;
                for (i, byte) in b.iter().rev().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<u16> for BluetoothUuid {
    fn from(value: u16) -> Self {
        BluetoothUuid::from_u16(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid16_expands_to_base_uuid() {
        let short = BluetoothUuid::from_u16(0x1800);
        let mut expected = BASE_UUID;
        expected[2..4].copy_from_slice(&0x1800u16.to_le_bytes());
        assert_eq!(short.to_uuid128(), expected);
    }

    #[test]
    fn uuid16_equals_its_128_bit_expansion() {
        let short = BluetoothUuid::from_u16(0x2902);
        let long = BluetoothUuid::Uuid128(short.to_uuid128());
        assert_eq!(short.to_uuid128(), long.to_uuid128());
    }

    #[test]
    fn from_slice_picks_width_by_length() {
        assert!(matches!(BluetoothUuid::from_slice(&[1, 2]).unwrap(), BluetoothUuid::Uuid16(_)));
        assert!(matches!(BluetoothUuid::from_slice(&[1, 2, 3, 4]).unwrap(), BluetoothUuid::Uuid32(_)));
        assert!(matches!(BluetoothUuid::from_slice(&[0; 16]).unwrap(), BluetoothUuid::Uuid128(_)));
        assert!(BluetoothUuid::from_slice(&[0; 3]).is_err());
    }
}
