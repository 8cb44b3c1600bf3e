//! Checksums used by the XMODEM transfer protocol.

/// CRC16-XMODEM (polynomial 0x1021, initial value 0x0000).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Arithmetic 8-bit checksum (sum of all bytes, truncated).
///
/// Used when the receiver requests classic checksum mode with NAK instead
/// of CRC mode with 'C'.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
