//! Checksummed pairing code format.
//!
//! Activation codes and recovery codes share the same shape: 10 random bytes
//! followed by a CRC-16/ARC checksum of those bytes, base32-encoded into 20
//! characters and rendered as four dash-separated groups of five
//! (`AAAAA-BBBBB-CCCCC-DDDDD`, 23 characters total).

use data_encoding::BASE32_NOPAD;
use rand::RngCore;

/// Length of the rendered code including dashes.
pub const CODE_LENGTH: usize = 23;

/// Number of raw bytes behind a code (10 random + 2 checksum).
pub const CODE_BYTES: usize = 12;

const GROUP_LEN: usize = 5;

/// Generates a fresh random code with a valid checksum.
#[must_use]
pub fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes[..10]);
    let crc = crc16_arc(&bytes[..10]);
    bytes[10..].copy_from_slice(&crc.to_be_bytes());

    let encoded = BASE32_NOPAD.encode(&bytes);
    debug_assert_eq!(encoded.len(), 20);

    let mut out = String::with_capacity(CODE_LENGTH);
    for (i, chunk) in encoded.as_bytes().chunks(GROUP_LEN).enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).expect("base32 output is ASCII"));
    }
    out
}

/// Validates the format and checksum of a code.
///
/// Accepts exactly the dashed 23-character form produced by [`generate_code`].
#[must_use]
pub fn validate_code(code: &str) -> bool {
    if code.len() != CODE_LENGTH {
        return false;
    }
    let groups: Vec<&str> = code.split('-').collect();
    if groups.len() != 4 || groups.iter().any(|g| g.len() != GROUP_LEN) {
        return false;
    }

    let compact: String = groups.concat();
    let bytes = match BASE32_NOPAD.decode(compact.as_bytes()) {
        Ok(b) => b,
        Err(_) => return false,
    };
    if bytes.len() != CODE_BYTES {
        return false;
    }

    let expected = u16::from_be_bytes([bytes[10], bytes[11]]);
    crc16_arc(&bytes[..10]) == expected
}

/// CRC-16/ARC (reflected 0x8005 polynomial, zero init).
fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_arc_check_value() {
        // Standard check input for CRC-16/ARC.
        assert_eq!(crc16_arc(b"123456789"), 0xBB3D);
    }
}
