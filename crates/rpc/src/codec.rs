//! Message framing over a TCP byte stream.
//!
//! Every message is one compact JSON document terminated by `\n`. Compact
//! `serde_json` output escapes newlines inside strings, so the delimiter
//! never occurs inside a payload. `\r\n` endings and blank lines are accepted.
//!
//! [`JsonLineCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//! A frame over the size limit is yielded as [`Frame::TooLarge`] rather than
//! as a decoder error, so the stream keeps going: the rest of the oversized
//! line is skipped and decoding resumes after the next delimiter.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::error::RpcError;
use crate::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Default upper bound for a single frame (8 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// One decoded unit of the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete message, without its line ending.
    Message(Bytes),
    /// A message longer than the configured limit was dropped.
    TooLarge { limit: usize },
}

/// Newline-delimited JSON codec with a per-frame size limit.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    lines: AnyDelimiterCodec,
    max_frame_bytes: usize,
}

impl JsonLineCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            // One extra byte for a trailing `\r`.
            lines: AnyDelimiterCodec::new_with_max_length(
                vec![DELIMITER],
                vec![DELIMITER],
                max_frame_bytes.saturating_add(1),
            ),
            max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for JsonLineCodec {
    type Item = Frame;
    type Error = RpcError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, RpcError> {
        loop {
            let mut line = match self.lines.decode(buf) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    return Ok(Some(Frame::TooLarge {
                        limit: self.max_frame_bytes,
                    }))
                }
                Err(AnyDelimiterCodecError::Io(e)) => return Err(e.into()),
            };

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.len() > self.max_frame_bytes {
                return Ok(Some(Frame::TooLarge {
                    limit: self.max_frame_bytes,
                }));
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(Frame::Message(line)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, RpcError> {
        let frame = self.decode(buf)?;
        if frame.is_none() && !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "Dropping unterminated trailing frame");
            buf.clear();
        }
        Ok(frame)
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec {
    type Error = RpcError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), RpcError> {
        dst.extend_from_slice(&encode_frame(&item)?);
        Ok(())
    }
}

/// Serialize `value` as one compact JSON frame, delimiter included.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Decode one frame into a valid request.
///
/// On failure the returned error envelope is ready to be written back:
/// unparsable bytes give `PARSE_ERROR` with a `null` id, a well-formed JSON
/// value that is not a valid request gives `INVALID_REQUEST`, echoing the id
/// when the value carries a string `id`.
pub fn decode_request(frame: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let text = std::str::from_utf8(frame).map_err(|e| {
        JsonRpcResponse::error(
            None,
            error_codes::PARSE_ERROR,
            format!("Parse error: invalid UTF-8: {e}"),
        )
    })?;

    let raw: Value = serde_json::from_str(text).map_err(|e| {
        JsonRpcResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {e}"))
    })?;

    let id = raw.get("id").and_then(Value::as_str).map(str::to_owned);

    let request: JsonRpcRequest = serde_json::from_value(raw).map_err(|e| {
        JsonRpcResponse::error(
            id,
            error_codes::INVALID_REQUEST,
            format!("Invalid JSON-RPC request: {e}"),
        )
    })?;

    if let Err(reason) = request.validate() {
        return Err(JsonRpcResponse::error(
            Some(request.id),
            error_codes::INVALID_REQUEST,
            format!("Invalid JSON-RPC request: {reason}"),
        ));
    }

    Ok(request)
}

/// Decode one frame into a response envelope.
pub fn decode_response(frame: &[u8]) -> Result<JsonRpcResponse, RpcError> {
    Ok(serde_json::from_slice(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frames(codec: &mut JsonLineCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    fn message(bytes: &[u8]) -> Frame {
        Frame::Message(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(br#"{"jsonrpc":"2.0","#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(br#""method":"ping","id":"1"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(message(br#"{"jsonrpc":"2.0","method":"ping","id":"1"}"#))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"b\":2}\r\n\n   \n{\"c\":"[..]);
        assert_eq!(
            frames(&mut codec, &mut buf),
            vec![message(b"{\"a\":1}"), message(b"{\"b\":2}")]
        );
        buf.extend_from_slice(b"3}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message(b"{\"c\":3}")));
    }

    #[test]
    fn test_oversized_frame_is_skipped_and_codec_resyncs() {
        let mut codec = JsonLineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::TooLarge { limit: 8 })
        );
        buf.extend_from_slice(b"abcdef\n{\"ok\":1}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message(b"{\"ok\":1}")));
    }

    #[test]
    fn test_oversized_complete_frame_is_reported_once() {
        let mut codec = JsonLineCodec::new(4);
        let mut buf = BytesMut::from(&b"123456\n[1]\n"[..]);
        assert_eq!(
            frames(&mut codec, &mut buf),
            vec![Frame::TooLarge { limit: 4 }, message(b"[1]")]
        );
    }

    #[test]
    fn test_crlf_does_not_count_against_limit() {
        let mut codec = JsonLineCodec::new(4);
        let mut buf = BytesMut::from(&b"[12]\r\n[123]\r\n"[..]);
        assert_eq!(
            frames(&mut codec, &mut buf),
            vec![message(b"[12]"), Frame::TooLarge { limit: 4 }]
        );
    }

    #[test]
    fn test_unterminated_tail_is_dropped_at_eof() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::from(&b"[1]\n[2"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(message(b"[1]")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoded_frame_has_single_trailing_delimiter() {
        let req = JsonRpcRequest::new("1", "echo", json!({"text": "line one\nline two"}));
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(&req, &mut buf).unwrap();
        assert_eq!(buf.iter().filter(|b| **b == DELIMITER).count(), 1);
        assert_eq!(buf.last(), Some(&DELIMITER));

        let Some(Frame::Message(frame)) = codec.decode(&mut buf).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(decode_request(&frame).unwrap(), req);
    }

    #[test]
    fn test_decode_request_parse_error_has_null_id() {
        let inputs: [&[u8]; 3] = [
            b"not json",
            b"{\"jsonrpc\":\"2.0\",\"id\":\"1\"",
            &[0xff, 0xfe, 0x00],
        ];
        for input in inputs {
            let err = decode_request(input).unwrap_err();
            let error = err.error.unwrap();
            assert_eq!(error.code, error_codes::PARSE_ERROR);
            assert_eq!(err.id, None);
        }
    }

    #[test]
    fn test_decode_request_invalid_request_echoes_id() {
        let err = decode_request(br#"{"jsonrpc":"2.0","id":"42"}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id.as_deref(), Some("42"));

        let err = decode_request(br#"{"jsonrpc":"1.0","method":"ping","id":"9"}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id.as_deref(), Some("9"));

        let err = decode_request(br#"{"jsonrpc":"2.0","method":"","id":"3"}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id.as_deref(), Some("3"));
    }

    #[test]
    fn test_decode_request_unrecoverable_id_is_null() {
        let err = decode_request(br#"{"jsonrpc":"2.0","method":"ping","id":5}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id, None);

        let err = decode_request(br#"[{"jsonrpc":"2.0","method":"ping","id":"1"}]"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_decode_response() {
        let resp = decode_response(br#"{"jsonrpc":"2.0","id":"1","result":{"pong":true}}"#).unwrap();
        assert_eq!(resp.id.as_deref(), Some("1"));
        assert_eq!(resp.result, Some(json!({"pong": true})));
        assert!(decode_response(b"{oops").is_err());
    }
}
