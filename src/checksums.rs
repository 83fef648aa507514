// src/checksums.rs
//
// Checksum used by the POESerial frame trailer.

/// CRC-8/MAXIM polynomial 0x31, reflected.
const MAXIM_POLY_REFLECTED: u8 = 0x8C;

/// Byte-at-a-time lookup table, built at compile time.
const MAXIM_TABLE: [u8; 256] = build_reflected_table(MAXIM_POLY_REFLECTED);

const fn build_reflected_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x01 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-8/MAXIM (Dallas 1-Wire): init 0x00, reflected, no final XOR.
/// This is the checksum POE devices put after ETX.
pub fn crc8_maxim_checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| MAXIM_TABLE[(crc ^ byte) as usize])
}
