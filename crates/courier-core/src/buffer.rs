//! Immutable message payloads.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Immutable UTF-8 payload carried by topic messages and invocations.
///
/// Backed by [`Bytes`], so clones share the underlying allocation. Fanning a
/// topic message out to many subscribers never copies the payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MessageBuffer {
    bytes: Bytes,
}

impl MessageBuffer {
    /// Wrap a string.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            bytes: Bytes::from(value.into()),
        }
    }

    /// Wrap raw bytes, rejecting invalid UTF-8.
    pub fn from_utf8(bytes: impl Into<Bytes>) -> Result<Self, std::str::Utf8Error> {
        let bytes = bytes.into();
        let _ = std::str::from_utf8(&bytes)?;
        Ok(Self { bytes })
    }

    /// Serialize `value` as JSON.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self::from_string)
    }

    /// Encode arbitrary binary data as standard base64.
    pub fn from_base64_bytes(data: &[u8]) -> Self {
        Self::from_string(STANDARD.encode(data))
    }

    /// Payload as text.
    pub fn as_str(&self) -> &str {
        // validated on construction
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }

    /// Payload as UTF-8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Deserialize the payload as JSON.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.bytes)
    }

    /// Decode a base64 payload back to binary.
    pub fn decode_base64(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.bytes)
    }

    /// Underlying shared bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageBuffer").field(&self.as_str()).finish()
    }
}

impl fmt::Display for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MessageBuffer {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

impl From<&str> for MessageBuffer {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl Serialize for MessageBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_string)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn string_payload() {
        let buf = MessageBuffer::from_string("hello");
        assert_eq!(buf.as_str(), "hello");
        assert_eq!(buf.len(), 5);
        assert!(!buf.is_empty());
        assert_eq!(buf.to_string(), "hello");
    }

    #[test]
    fn empty_payload() {
        let buf = MessageBuffer::from("");
        assert!(buf.is_empty());
        assert_eq!(buf.as_str(), "");
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(MessageBuffer::from_utf8(vec![0xff, 0xfe]).is_err());
        let ok = MessageBuffer::from_utf8(Bytes::from_static("héllo".as_bytes())).unwrap();
        assert_eq!(ok.as_str(), "héllo");
    }

    #[test]
    fn json_helpers() {
        let buf = MessageBuffer::from_json(&json!({"a": 1, "b": [true]})).unwrap();
        let value: serde_json::Value = buf.read_json().unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"][0], true);

        let err = MessageBuffer::from("not json").read_json::<serde_json::Value>();
        assert!(err.is_err());
    }

    #[test]
    fn base64_helpers() {
        let data = [0u8, 1, 2, 255];
        let buf = MessageBuffer::from_base64_bytes(&data);
        assert_eq!(buf.as_str(), "AAEC/w==");
        assert_eq!(buf.decode_base64().unwrap(), data);
        assert!(MessageBuffer::from("!!").decode_base64().is_err());
    }

    #[test]
    fn clones_share_storage() {
        let buf = MessageBuffer::from_string("shared payload");
        let clone = buf.clone();
        assert_eq!(buf.as_bytes().as_ptr(), clone.as_bytes().as_ptr());
    }

    #[test]
    fn serializes_as_json_string() {
        let buf = MessageBuffer::from("{\"x\":1}");
        let json = serde_json::to_string(&buf).unwrap();
        assert_eq!(json, "\"{\\\"x\\\":1}\"");
        let back: MessageBuffer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, buf);
    }
}
