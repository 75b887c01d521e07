//! Value serialization for the remote tier.
//!
//! The tiered cache treats values as opaque; only the remote tier needs
//! them as bytes. The codec is injected at layer construction so the
//! tier stays generic over the application's wire format.

use crate::error::CodecError;
use bytes::Bytes;

/// Encode/decode a value to and from its remote byte representation.
pub trait ValueCodec<V>: Send + Sync {
    /// Serialize a value for storage.
    fn encode(&self, value: &V) -> Result<Bytes, CodecError>;

    /// Deserialize a stored value.
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// UTF-8 codec for `String` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec<String> for StringCodec {
    fn encode(&self, value: &String) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(CodecError::new)
    }
}

/// Identity codec for values that already are bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec<Bytes> for BytesCodec {
    fn encode(&self, value: &Bytes) -> Result<Bytes, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_codec_round_trip() {
        let codec = StringCodec;
        let encoded = codec.encode(&"héllo".to_string()).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), "héllo");
    }

    #[test]
    fn string_codec_rejects_invalid_utf8() {
        let codec = StringCodec;
        assert!(codec.decode(&[0xff, 0xfe]).is_err());
    }
}
