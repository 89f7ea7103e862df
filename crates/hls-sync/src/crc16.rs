//! CRC-16 (reflected 0xA001, inverted in and out) used to derive a short
//! source id for synthesized segment names.

const POLY: u16 = 0xA001;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn checksum(data: &[u8]) -> u16 {
    let crc = data.iter().fold(!0u16, |crc, &b| {
        TABLE[usize::from((crc as u8) ^ b)] ^ (crc >> 8)
    });
    !crc
}

/// Four lowercase hex digits identifying a source URL.
pub fn source_id(url: &str) -> String {
    format!("{:04x}", checksum(url.as_bytes()))
}
