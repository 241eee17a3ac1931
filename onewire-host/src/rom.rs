use crate::{
    crc::Crc8,
    error::{OwError, OwResult},
};
use std::{fmt, str::FromStr};

/// 64-bit identity of a 1-Wire slave.
///
/// Byte 0 is the family code, bytes 1..6 the unique serial, byte 7 the CRC-8
/// of bytes 0..6. Every address produced by the checked constructors
/// satisfies `crc8(bytes[0..8]) == 0`.
///
/// The text form is 16 hex digits in byte-index order (family code first);
/// the `u64` form packs the bytes little-endian, so byte 0 is the
/// least-significant byte of the integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RomAddress([u8; 8]);

impl RomAddress {
    /// Builds an address from raw bytes, verifying the trailing CRC.
    pub fn from_bytes(bytes: [u8; 8]) -> OwResult<Self> {
        let mut crc = Crc8::default();
        crc.update_bytes(&bytes);
        if crc.value() != 0 {
            return Err(OwError::Crc {
                computed: crc.value(),
                rom: Some(RomAddress(bytes)),
            });
        }
        Ok(RomAddress(bytes))
    }

    /// Builds an address without CRC verification.
    ///
    /// For synthetic addresses in diagnostics and tests; enumeration always
    /// goes through the checked constructor.
    pub const fn from_bytes_unchecked(bytes: [u8; 8]) -> Self {
        RomAddress(bytes)
    }

    /// Builds an address from the little-endian packed integer form.
    pub fn from_u64(raw: u64) -> OwResult<Self> {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// The little-endian packed integer form.
    pub fn to_u64(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    /// The raw bytes, family code first.
    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The family code identifying the slave type.
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// The six unique serial bytes.
    pub fn serial(&self) -> &[u8] {
        &self.0[1..7]
    }

    /// The trailing CRC-8 byte.
    pub fn crc(&self) -> u8 {
        self.0[7]
    }
}

impl TryFrom<[u8; 8]> for RomAddress {
    type Error = OwError;

    fn try_from(value: [u8; 8]) -> OwResult<Self> {
        Self::from_bytes(value)
    }
}

impl TryFrom<u64> for RomAddress {
    type Error = OwError;

    fn try_from(value: u64) -> OwResult<Self> {
        Self::from_u64(value)
    }
}

impl From<RomAddress> for [u8; 8] {
    fn from(value: RomAddress) -> Self {
        value.0
    }
}

impl From<RomAddress> for u64 {
    fn from(value: RomAddress) -> Self {
        value.to_u64()
    }
}

impl fmt::Display for RomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RomAddress({self})")
    }
}

impl FromStr for RomAddress {
    type Err = OwError;

    fn from_str(s: &str) -> OwResult<Self> {
        if s.len() != 16 || !s.is_ascii() {
            return Err(OwError::InvalidArgument(format!(
                "rom address must be 16 hex digits, got {s:?}"
            )));
        }
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| {
                OwError::InvalidArgument(format!("rom address contains non-hex digits: {s:?}"))
            })?;
        }
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::RomAddress;
    use crate::crc::Crc8;

    #[test]
    fn byte_and_u64_round_trip() {
        let rom = RomAddress::from_bytes([0x28, 0, 0, 0, 0, 0, 0, 0x1e]).unwrap();
        assert_eq!(rom.family(), 0x28);
        assert_eq!(rom.crc(), 0x1e);
        assert_eq!(RomAddress::from_u64(rom.to_u64()).unwrap(), rom);
        assert_eq!(RomAddress::from_bytes(*rom.bytes()).unwrap(), rom);
        assert_eq!(rom.to_u64(), 0x1e00_0000_0000_0028);
    }

    #[test]
    fn string_round_trip() {
        let rom = RomAddress::from_bytes([0x10, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0x00, 0xe0]).unwrap();
        let text = rom.to_string();
        assert_eq!(text, "10A1B2C3D4E500E0");
        assert_eq!(text.parse::<RomAddress>().unwrap(), rom);
    }

    #[test]
    fn crc_is_enforced() {
        assert!(RomAddress::from_bytes([0x10, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!("1000000000000000".parse::<RomAddress>().is_err());
        assert!("not-a-rom".parse::<RomAddress>().is_err());
    }

    #[test]
    fn enumerated_addresses_validate() {
        for rom in [
            RomAddress::from_bytes([0x10, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0x00, 0xe0]).unwrap(),
            RomAddress::from_bytes([0x28, 0xf1, 0xe2, 0xd3, 0xc4, 0xb5, 0xa6, 0xc9]).unwrap(),
        ] {
            assert!(Crc8::validate(rom.bytes()));
        }
    }

    #[test]
    fn ordering_is_byte_wise() {
        let a = RomAddress::from_bytes([0x10, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0x00, 0xe0]).unwrap();
        let b = RomAddress::from_bytes([0x28, 0xf1, 0xe2, 0xd3, 0xc4, 0xb5, 0xa6, 0xc9]).unwrap();
        assert!(a < b);
    }
}
