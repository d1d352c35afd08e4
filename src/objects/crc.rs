const CRC24_POLY: u32 = 0x0080_001B;
const CRC24_MASK: u32 = 0x00FF_FFFF;

fn fold_word(crc: u32, low: u8, high: u8) -> u32 {
    let word = u32::from(u16::from_le_bytes([low, high]));
    let mut next = (crc << 1) ^ word;
    if next & 0x0100_0000 != 0 {
        next ^= CRC24_POLY;
    }
    next & CRC24_MASK
}

/// 24-bit object table checksum over little-endian byte pairs. An odd
/// trailing byte is paired with zero.
pub fn crc24(bytes: impl IntoIterator<Item = u8>) -> u32 {
    let mut bytes = bytes.into_iter();
    let mut crc = 0;
    while let Some(low) = bytes.next() {
        let high = bytes.next().unwrap_or(0);
        crc = fold_word(crc, low, high);
    }
    crc
}

/// Checksum of the info block header followed by the object table.
pub fn info_crc(header: &[u8], table: &[u8]) -> u32 {
    crc24(header.iter().chain(table).copied())
}
