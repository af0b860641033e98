//! Property-based tests for the wire format.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in `decode` or `FrameReader`.
//! 2. Any sequence of payloads framed back to back splits into the same
//!    payloads, in order.
//! 3. Any handshake status other than the exact token `OK` is a rejection.
//! 4. Envelopes with arbitrary text survive the JSON record format.

use fernchat_proto::codec::{self, DEFAULT_MAX_FRAME_LEN};
use fernchat_proto::envelope::Envelope;
use fernchat_proto::framing::{FrameError, FrameReader};
use fernchat_proto::handshake::{HandshakeRequest, HandshakeResponse, Operation};
use proptest::prelude::*;

/// Strategy for generating arbitrary `Operation` values.
fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![Just(Operation::Login), Just(Operation::Register)]
}

/// Read frames from `bytes` until the reader stops, returning the frames
/// and the error that stopped it.
fn read_frames(bytes: &[u8]) -> (Vec<Vec<u8>>, FrameError) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let mut reader = FrameReader::new(bytes, DEFAULT_MAX_FRAME_LEN);
        let mut frames = Vec::new();
        loop {
            match reader.read_frame().await {
                Ok(frame) => frames.push(frame),
                Err(e) => return (frames, e),
            }
        }
    })
}

proptest! {
    #[test]
    fn decode_never_panics_on_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<Envelope>(&bytes);
        let _ = codec::decode::<HandshakeRequest>(&bytes);
        let _ = read_frames(&bytes);
        let _ = HandshakeResponse::from_payload(&bytes);
    }

    #[test]
    fn back_to_back_frames_split_in_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8)
    ) {
        let mut buffer = Vec::new();
        for payload in &payloads {
            buffer.extend_from_slice(&codec::encode_framed(payload, DEFAULT_MAX_FRAME_LEN).unwrap());
        }

        let (frames, stop) = read_frames(&buffer);
        prop_assert_eq!(frames, payloads);
        prop_assert!(matches!(stop, FrameError::Closed));
    }

    #[test]
    fn only_the_exact_ok_token_authenticates(token in "\\PC{1,16}") {
        let response = HandshakeResponse::from_payload(token.as_bytes()).unwrap();
        prop_assert_eq!(response.is_ok(), token == "OK");
    }

    #[test]
    fn envelope_text_survives_record_format(sender in "\\PC{0,12}", ciphertext in "[A-Za-z0-9_=-]{0,200}") {
        let envelope = Envelope::new(sender, ciphertext);
        let bytes = codec::encode(&envelope).unwrap();
        let decoded: Envelope = codec::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn handshake_request_survives_record_format(
        operation in arb_operation(),
        username in "[a-z]{1,12}",
        pw_hash in "[0-9a-f]{128}",
    ) {
        let request = HandshakeRequest { operation, username, pw_hash };
        let bytes = codec::encode(&request).unwrap();
        let decoded: HandshakeRequest = codec::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, request);
    }
}
