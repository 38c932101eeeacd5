//! Certificate serial numbers.
//!
//! 160-bit random values with the top bit cleared so the DER integer stays
//! positive, rendered as 40 uppercase hex digits.

use rand::RngCore;

/// Serial length in bytes.
pub const SERIAL_BYTES: usize = 20;

/// Generates a fresh random serial number.
#[must_use]
pub fn generate_serial() -> String {
    let mut bytes = [0u8; SERIAL_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7F;
    hex::encode_upper(bytes)
}

/// Whether `serial` has the shape produced by [`generate_serial`].
#[must_use]
pub fn is_valid_serial(serial: &str) -> bool {
    serial.len() == SERIAL_BYTES * 2
        && serial
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        && serial
            .chars()
            .next()
            .and_then(|c| c.to_digit(16))
            .is_some_and(|d| d < 8)
}
