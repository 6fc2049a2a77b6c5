//! Property-based tests for framing and envelope decoding.
//!
//! These use proptest to check that request decoding never panics and
//! always answers malformed input with the right error code and id, and
//! that encoded envelopes survive framing however the byte stream is cut.

use bytes::BytesMut;
use proptest::prelude::*;
use serde_json::{Map, Value};
use tokio_util::codec::Decoder;

use stupid_rpc::codec::{decode_request, decode_response, encode_frame, Frame, JsonLineCodec};
use stupid_rpc::{error_codes, JsonRpcRequest, JsonRpcResponse};

// =============================================================================
// GENERATORS
// =============================================================================

/// Arbitrary JSON without floats (floats do not round-trip bit-exactly).
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".{0,20}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(".{0,10}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_non_null_json() -> impl Strategy<Value = Value> {
    arb_json().prop_filter("null decodes as an absent field", |v| !v.is_null())
}

/// A field value that may be missing, well-typed or wrong-typed.
fn arb_field(good: BoxedStrategy<Value>) -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        good.prop_map(Some),
        Just(Some(Value::Null)),
        any::<i64>().prop_map(|n| Some(Value::from(n))),
    ]
}

/// A JSON object shaped more or less like a request.
fn arb_request_like() -> impl Strategy<Value = Value> {
    (
        arb_field(prop_oneof![Just("2.0"), Just("1.0"), Just("")].prop_map(Value::from).boxed()),
        arb_field(".{0,12}".prop_map(Value::from).boxed()),
        arb_field(".{0,12}".prop_map(Value::from).boxed()),
        prop::option::of(arb_json()),
    )
        .prop_map(|(jsonrpc, method, id, params)| {
            let mut obj = Map::new();
            for (key, value) in [("jsonrpc", jsonrpc), ("method", method), ("id", id), ("params", params)] {
                if let Some(value) = value {
                    obj.insert(key.to_string(), value);
                }
            }
            Value::Object(obj)
        })
}

/// Check the error envelope rules for input that failed to decode.
fn check_rejection(input: &[u8], rejected: &JsonRpcResponse) -> Result<(), TestCaseError> {
    prop_assert!(rejected.result.is_none());
    let error = rejected.error.as_ref().expect("error envelope");

    match serde_json::from_slice::<Value>(input) {
        Err(_) => {
            prop_assert_eq!(error.code, error_codes::PARSE_ERROR);
            prop_assert_eq!(&rejected.id, &None);
        }
        Ok(value) => {
            prop_assert_eq!(error.code, error_codes::INVALID_REQUEST);
            let recoverable = value.get("id").and_then(Value::as_str).map(str::to_owned);
            prop_assert_eq!(&rejected.id, &recoverable);
        }
    }
    Ok(())
}

// =============================================================================
// DECODING NEVER PANICS AND ALWAYS CLASSIFIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Property: arbitrary bytes never panic and are rejected with a protocol error.
    #[test]
    fn prop_arbitrary_bytes_are_classified(input in prop::collection::vec(any::<u8>(), 0..256)) {
        match decode_request(&input) {
            Ok(request) => prop_assert!(request.validate().is_ok()),
            Err(rejected) => check_rejection(&input, &rejected)?,
        }
    }

    /// Property: request-shaped objects are accepted exactly when every field is valid.
    #[test]
    fn prop_request_like_objects(value in arb_request_like()) {
        let input = serde_json::to_vec(&value).unwrap();
        let valid = value.get("jsonrpc") == Some(&Value::from("2.0"))
            && value.get("method").and_then(Value::as_str).is_some_and(|m| !m.is_empty())
            && value.get("id").is_some_and(Value::is_string);

        match decode_request(&input) {
            Ok(request) => {
                prop_assert!(valid, "accepted invalid request {}", value);
                prop_assert_eq!(Some(request.id.as_str()), value["id"].as_str());
                prop_assert_eq!(&request.params, value.get("params").unwrap_or(&Value::Null));
            }
            Err(rejected) => {
                prop_assert!(!valid, "rejected valid request {}", value);
                check_rejection(&input, &rejected)?;
            }
        }
    }

    /// Property: any prefix of a valid request never panics.
    #[test]
    fn prop_truncated_requests_are_classified(
        method in ".{1,12}",
        params in arb_json(),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = encode_frame(&JsonRpcRequest::new("1", method, params)).unwrap();
        let prefix = &frame[..cut.index(frame.len())];
        if let Err(rejected) = decode_request(prefix) {
            check_rejection(prefix, &rejected)?;
        }
    }
}

// =============================================================================
// ENCODE / FRAME / DECODE ROUND TRIPS
// =============================================================================

fn decode_all(codec: &mut JsonLineCodec, buf: &mut BytesMut, out: &mut Vec<Frame>) {
    while let Some(frame) = codec.decode(buf).unwrap() {
        out.push(frame);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: requests survive encode -> framing -> decode unchanged.
    #[test]
    fn prop_request_survives_framing(
        id in ".{0,40}",
        method in ".{1,30}",
        params in arb_json(),
    ) {
        let request = JsonRpcRequest::new(id, method, params);
        let mut buf = BytesMut::from(&encode_frame(&request).unwrap()[..]);

        let mut codec = JsonLineCodec::default();
        let Some(Frame::Message(frame)) = codec.decode(&mut buf).unwrap() else {
            panic!("expected one message frame");
        };
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decode_request(&frame).unwrap(), request);
    }

    /// Property: success responses survive encode -> decode unchanged.
    #[test]
    fn prop_success_response_round_trip(id in ".{0,40}", result in arb_non_null_json()) {
        let response = JsonRpcResponse::success(id, result);
        let bytes = encode_frame(&response).unwrap();
        prop_assert_eq!(decode_response(&bytes[..bytes.len() - 1]).unwrap(), response);
    }

    /// Property: error responses survive encode -> decode unchanged.
    #[test]
    fn prop_error_response_round_trip(
        id in prop::option::of(".{0,40}"),
        code in any::<i64>(),
        message in ".{0,60}",
        data in prop::option::of(arb_non_null_json()),
    ) {
        let response = JsonRpcResponse::error_with_data(id, code, message, data);
        let bytes = encode_frame(&response).unwrap();
        prop_assert_eq!(decode_response(&bytes[..bytes.len() - 1]).unwrap(), response);
    }

    /// Property: however a multi-frame stream is chunked, the same frames come out.
    #[test]
    fn prop_chunking_does_not_change_frames(
        messages in prop::collection::vec((arb_json(), any::<bool>()), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for (value, crlf) in &messages {
            let compact = serde_json::to_vec(value).unwrap();
            stream.extend_from_slice(&compact);
            if *crlf {
                stream.push(b'\r');
            }
            stream.push(b'\n');
            expected.push(Frame::Message(compact.into()));
        }

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for pair in points.windows(2) {
            buf.extend_from_slice(&stream[pair[0]..pair[1]]);
            decode_all(&mut codec, &mut buf, &mut got);
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(got, expected);
    }
}
