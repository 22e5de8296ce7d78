//! Text encoding of packed sample groups.

use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::config::{ENCODED_GROUP_LEN, PACKED_GROUP_LEN};

/// Failure reported by a [`GroupEncoder`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EncodeError;

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("group encoding failed")
    }
}

/// Maps one packed group to its transportable characters.
pub trait GroupEncoder {
    /// Encodes one group.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the encoder cannot emit exactly four
    /// characters.
    fn encode_group(
        &self,
        group: [u8; PACKED_GROUP_LEN],
    ) -> Result<[u8; ENCODED_GROUP_LEN], EncodeError>;
}

/// Standard-alphabet base64. Three bytes map to four characters with no
/// padding, so groups can be concatenated into one valid stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct Base64Encoder;

impl GroupEncoder for Base64Encoder {
    fn encode_group(
        &self,
        group: [u8; PACKED_GROUP_LEN],
    ) -> Result<[u8; ENCODED_GROUP_LEN], EncodeError> {
        let mut out = [0u8; ENCODED_GROUP_LEN];
        match STANDARD.encode_slice(group, &mut out) {
            Ok(ENCODED_GROUP_LEN) => Ok(out),
            _ => Err(EncodeError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_encode_without_padding() {
        let encoder = Base64Encoder;
        assert_eq!(encoder.encode_group([0xab, 0xc1, 0x23]), Ok(*b"q8Ej"));
        assert_eq!(encoder.encode_group([0x00, 0x00, 0x00]), Ok(*b"AAAA"));
        assert_eq!(encoder.encode_group([0xff, 0xff, 0xff]), Ok(*b"////"));
    }
}
