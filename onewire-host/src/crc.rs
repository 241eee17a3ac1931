#[derive(Debug, Default)]
/// Calculate the CRC-8 used in 1-Wire communications.
///
/// Polynomial x^8 + x^5 + x^4 + 1, reflected, initial value 0. The low byte
/// of every ROM chain and most scratchpads terminate with this CRC so that
/// the running value over the full sequence is zero.
pub struct Crc8(u8);

impl Crc8 {
    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    ///
    /// # Note
    /// This method uses a lookup table for CRC calculation if the `crc-table`
    /// feature is enabled. Otherwise, it uses bit shifts and XOR operations.
    #[inline(always)]
    pub fn update(&mut self, byte: u8) {
        #[cfg(feature = "crc-table")]
        {
            self.update_table(byte);
        }
        #[cfg(not(feature = "crc-table"))]
        {
            self.update_calc(byte);
        }
    }

    /// Update the CRC with a single incoming bit.
    ///
    /// Used where data arrives one time slot at a time, such as the search
    /// accelerator interpretation.
    pub fn update_bit(&mut self, bit: bool) {
        let fb = (self.0 & 0x01 != 0) != bit;
        self.0 >>= 1;
        if fb {
            self.0 ^= 0x8c;
        }
    }

    /// Run the CRC over a whole slice.
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.update(byte);
        }
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    ///
    /// # Note
    /// For such a sequence, the CRC should be `0x00`.
    pub fn validate(sequence: &[u8]) -> bool {
        let mut crc = Crc8(0);
        crc.update_bytes(sequence);
        crc.0 == 0x0
    }

    #[allow(dead_code)]
    pub(crate) fn update_table(&mut self, byte: u8) {
        const ONEWIRE_CRC_TABLE: [u8; 256] = [
            0, 94, 188, 226, 97, 63, 221, 131, 194, 156, 126, 32, 163, 253, 31, 65, 157, 195, 33,
            127, 252, 162, 64, 30, 95, 1, 227, 189, 62, 96, 130, 220, 35, 125, 159, 193, 66, 28,
            254, 160, 225, 191, 93, 3, 128, 222, 60, 98, 190, 224, 2, 92, 223, 129, 99, 61, 124,
            34, 192, 158, 29, 67, 161, 255, 70, 24, 250, 164, 39, 121, 155, 197, 132, 218, 56, 102,
            229, 187, 89, 7, 219, 133, 103, 57, 186, 228, 6, 88, 25, 71, 165, 251, 120, 38, 196,
            154, 101, 59, 217, 135, 4, 90, 184, 230, 167, 249, 27, 69, 198, 152, 122, 36, 248, 166,
            68, 26, 153, 199, 37, 123, 58, 100, 134, 216, 91, 5, 231, 185, 140, 210, 48, 110, 237,
            179, 81, 15, 78, 16, 242, 172, 47, 113, 147, 205, 17, 79, 173, 243, 112, 46, 204, 146,
            211, 141, 111, 49, 178, 236, 14, 80, 175, 241, 19, 77, 206, 144, 114, 44, 109, 51, 209,
            143, 12, 82, 176, 238, 50, 108, 142, 208, 83, 13, 239, 177, 240, 174, 76, 18, 145, 207,
            45, 115, 202, 148, 118, 40, 171, 245, 23, 73, 8, 86, 180, 234, 105, 55, 213, 139, 87,
            9, 235, 181, 54, 104, 138, 212, 149, 203, 41, 119, 244, 170, 72, 22, 233, 183, 85, 11,
            136, 214, 52, 106, 43, 117, 151, 201, 74, 20, 246, 168, 116, 42, 200, 150, 21, 75, 169,
            247, 182, 232, 10, 84, 215, 137, 107, 53,
        ];
        self.0 = ONEWIRE_CRC_TABLE[(self.0 ^ byte) as usize];
    }

    #[allow(dead_code)]
    pub(crate) fn update_calc(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte;
        for _ in 0..8 {
            if crc & 0x01 == 0x01 {
                crc = (crc >> 1) ^ 0x8c; // Polynomial: x^8 + x^5 + x^4 + 1
            } else {
                crc >>= 1;
            }
        }
        self.0 = crc;
    }
}

#[derive(Debug, Default)]
/// Calculate the CRC-16 used by 1-Wire memory functions.
///
/// Reflected polynomial 0xa001, initial value 0. Slaves transmit the
/// one's complement of their CRC-16; accumulating the data followed by the
/// complemented CRC leaves the fixed remainder 0xb001.
pub struct Crc16(u16);

impl Crc16 {
    /// Remainder left by a block followed by its complemented CRC-16.
    pub const CHECK_REMAINDER: u16 = 0xb001;

    /// Get the current CRC value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    #[inline(always)]
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 == 0x0001 {
                crc = (crc >> 1) ^ 0xa001;
            } else {
                crc >>= 1;
            }
        }
        self.0 = crc;
    }

    /// Update the CRC with a single incoming bit.
    pub fn update_bit(&mut self, bit: bool) {
        let fb = (self.0 & 0x0001 != 0) != bit;
        self.0 >>= 1;
        if fb {
            self.0 ^= 0xa001;
        }
    }

    /// Run the CRC over a whole slice.
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.update(byte);
        }
    }

    /// Validate a block whose trailing two bytes are the slave's inverted
    /// CRC-16 of the preceding bytes, least-significant byte first.
    pub fn validate(sequence: &[u8]) -> bool {
        let mut crc = Crc16::default();
        crc.update_bytes(sequence);
        crc.0 == Self::CHECK_REMAINDER
    }
}

#[cfg(test)]
mod test {
    use super::{Crc8, Crc16};

    #[test]
    fn crc8_table_matches_calc() {
        use rand::prelude::*;
        let mut rng = rand::rng();
        let buf = (0..100).map(|_| rng.random::<u8>()).collect::<Vec<u8>>();
        let mut calc = Crc8::default();
        for &byte in buf.iter() {
            calc.update_calc(byte);
        }
        let mut table = Crc8::default();
        for &byte in buf.iter() {
            table.update_table(byte);
        }
        assert_eq!(calc.value(), table.value(), "CRC values do not match");
    }

    #[test]
    fn crc8_bitwise_matches_bytewise() {
        let data = [0x02u8, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00];
        let mut by_byte = Crc8::default();
        by_byte.update_bytes(&data);
        let mut by_bit = Crc8::default();
        for &byte in data.iter() {
            for i in 0..8 {
                by_bit.update_bit(byte & (1 << i) != 0);
            }
        }
        assert_eq!(by_byte.value(), by_bit.value());
    }

    #[test]
    fn crc8_dallas_vector() {
        // The serial of the DS1820 used in the Dallas application notes.
        let data = [0x02u8, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00];
        let mut crc = Crc8::default();
        crc.update_bytes(&data);
        assert_eq!(crc.value(), 0xa2);
        assert!(Crc8::validate(&[0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xa2]));
    }

    #[test]
    fn crc16_known_vectors() {
        let mut crc = Crc16::default();
        crc.update_bytes(&[0u8; 8]);
        assert_eq!(crc.value(), 0x0000);

        // Standard ARC check value.
        let mut crc = Crc16::default();
        crc.update_bytes(b"123456789");
        assert_eq!(crc.value(), 0xbb3d);
    }

    #[test]
    fn crc16_inverted_trailer_validates() {
        let data = [0x0fu8, 0x00, 0x00, 0x10, 0x55];
        let mut crc = Crc16::default();
        crc.update_bytes(&data);
        let inv = !crc.value();
        let mut block = data.to_vec();
        block.push((inv & 0xff) as u8);
        block.push((inv >> 8) as u8);
        assert!(Crc16::validate(&block));
    }

    #[test]
    fn crc16_bitwise_matches_bytewise() {
        let data = b"onewire";
        let mut by_byte = Crc16::default();
        by_byte.update_bytes(data);
        let mut by_bit = Crc16::default();
        for &byte in data.iter() {
            for i in 0..8 {
                by_bit.update_bit(byte & (1 << i) != 0);
            }
        }
        assert_eq!(by_byte.value(), by_bit.value());
    }
}
