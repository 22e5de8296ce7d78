/// Dallas/Maxim CRC-8 (`X^8 + X^5 + X^4 + 1`, reflected).
///
/// Running the CRC over a block that ends with its own CRC byte yields zero.
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut input = byte;
        for _ in 0..8 {
            let mix = (crc ^ input) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8c;
            }
            input >>= 1;
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::crc8;

    #[test]
    fn matches_datasheet_rom_example() {
        // ROM code from the Maxim application note 27 worked example.
        let rom = [0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(crc8(&rom), 0xa2);
    }

    #[test]
    fn block_with_trailing_crc_checks_to_zero() {
        let mut block = [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10, 0x00];
        block[8] = crc8(&block[..8]);
        assert_eq!(crc8(&block), 0);
    }
}
