//! Wire protocol types for the storage node.
//!
//! Every request and reply is a single frame: a JSON-encoded [`Header`]
//! followed by an optional byte-stream body. The header carries an operation
//! code (requests), a result code (replies), a human-readable message and a
//! string attribute map. See [`codec`] for the framing itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod codec;

/// Operation codes understood by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Shared-secret handshake; must be the first frame on a connection.
    Connect = 1,
    /// Ingest a byte stream; the frame body is the file content.
    Upload = 2,
    /// Stream a byte range back; the reply body is the file bytes.
    Download = 3,
    /// Metadata lookup; the reply carries a JSON `info` attribute.
    Query = 4,
}

impl Operation {
    /// Map a raw wire code to an operation. Unknown codes stay unmapped so
    /// the connection loop can answer `UNKNOWN_OPERATION` instead of
    /// tearing the connection down at decode time.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Connect),
            2 => Some(Self::Upload),
            3 => Some(Self::Download),
            4 => Some(Self::Query),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Result codes carried in reply headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    Error = 1,
    NotFound = 2,
    Unauthorized = 3,
    UnknownOperation = 4,
}

impl ResultCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Well-known attribute keys.
pub mod attrs {
    /// File identifier returned by a successful upload.
    pub const FID: &str = "fid";
    /// File identifier of the object a download/query targets.
    pub const FILE_ID: &str = "fileId";
    /// Download start offset in payload space, decimal.
    pub const OFFSET: &str = "offset";
    /// Download length, decimal; `-1` means "to end of payload".
    pub const LENGTH: &str = "length";
    /// Identifier of the node instance.
    pub const INSTANCE_ID: &str = "instanceId";
    /// Group the node belongs to.
    pub const GROUP: &str = "group";
    /// JSON-encoded object metadata in query replies.
    pub const INFO: &str = "info";
    /// Shared secret presented during CONNECT.
    pub const SECRET: &str = "secret";
}

/// The JSON header of a frame.
///
/// Requests set `operation`; replies set `result`. Both sides use the
/// attribute map for everything else, so unknown operations and partial
/// headers still decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "Operation", default)]
    pub operation: u32,
    #[serde(rename = "Result", default)]
    pub result: u32,
    #[serde(rename = "Msg", default)]
    pub msg: String,
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

impl Header {
    pub fn request(op: Operation) -> Self {
        Self {
            operation: op.code(),
            ..Self::default()
        }
    }

    pub fn reply(result: ResultCode) -> Self {
        Self {
            result: result.code(),
            ..Self::default()
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success.code()
    }
}

/// Object metadata returned by QUERY inside the `info` attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub group: String,
    pub file_id: String,
    /// Payload size in bytes (container size minus the ref-count footer).
    pub file_length: u64,
    /// Modification time in milliseconds since the epoch.
    pub create_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_codes_roundtrip() {
        for op in [
            Operation::Connect,
            Operation::Upload,
            Operation::Download,
            Operation::Query,
        ] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code(0), None);
        assert_eq!(Operation::from_code(99), None);
    }

    #[test]
    fn header_json_field_names() {
        let h = Header::request(Operation::Upload).with_attr(attrs::FID, "g/AB/CD/0");
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("\"Operation\":2"));
        assert!(json.contains("\"Attributes\""));

        // Partial headers decode with defaults.
        let h: Header = serde_json::from_str(r#"{"Result":3}"#).unwrap();
        assert_eq!(h.result, ResultCode::Unauthorized.code());
        assert!(h.attributes.is_empty());
    }

    #[test]
    fn file_info_uses_camel_case() {
        let info = FileInfo {
            group: "g01".into(),
            file_id: "g01/AB/CD/x".into(),
            file_length: 5,
            create_time: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"fileId\""));
        assert!(json.contains("\"fileLength\":5"));
        assert!(json.contains("\"createTime\""));
    }
}
