/*++

Licensed under the Apache-2.0 license.

File Name:

    password.rs

Abstract:

    File contains the JTAG password codec: a 4-character ASCII secret packed
    big-endian into one 32-bit word.

--*/

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of characters in a JTAG password.
pub const KEY_LEN: usize = 4;

/// Width of the packed key in bits.
pub const KEY_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must be exactly 4 bytes, found {len}")]
    WrongLength { len: usize },
    #[error("password byte {position} is not ASCII")]
    NonAscii { position: usize },
}

/// Reference key compared against the firmware-presented password.
///
/// The packing is plain and reversible: no salt, no hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasswordKey(u32);

impl PasswordKey {
    /// Packs `secret` big-endian, one byte per character.
    ///
    /// # Error
    ///
    /// * `PasswordError` - `secret` is not exactly 4 ASCII bytes
    pub fn encode(secret: &str) -> Result<Self, PasswordError> {
        let bytes = secret.as_bytes();
        if let Some(position) = bytes.iter().position(|b| !b.is_ascii()) {
            return Err(PasswordError::NonAscii { position });
        }
        let packed: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| PasswordError::WrongLength { len: bytes.len() })?;
        Ok(Self(u32::from_be_bytes(packed)))
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Bit `n` of the packed key, bit 0 being the least significant.
    pub fn bit(&self, n: u32) -> bool {
        assert!(n < KEY_BITS, "key bit {n} out of range");
        (self.0 >> n) & 1 == 1
    }

    /// Bit at position `i` of the key written out MSB first, i.e. the `i`-th
    /// digit of its zero-padded 32-digit binary representation.
    pub fn msb_first_bit(&self, i: usize) -> bool {
        assert!(i < KEY_BITS as usize, "key digit {i} out of range");
        self.bit(KEY_BITS - 1 - i as u32)
    }

    /// The secret the key was packed from.
    pub fn decode(&self) -> [u8; KEY_LEN] {
        self.0.to_be_bytes()
    }
}

impl FromStr for PasswordKey {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::encode(s)
    }
}

impl From<PasswordKey> for u32 {
    fn from(key: PasswordKey) -> u32 {
        key.0
    }
}

impl fmt::Display for PasswordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
