//! Property-based tests for chunk-boundary independence of the SSE decoder.

use osdk_stream::{decode_all, SseDecoder, SseEvent};
use proptest::prelude::*;

fn line() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{0,8}".prop_map(|v| format!("data: {v}")),
        "[a-z]{0,6}".prop_map(|v| format!("data:{v}")),
        "[a-z]{1,6}".prop_map(|v| format!("event: {v}")),
        "[0-9]{1,3}".prop_map(|v| format!("id: {v}")),
        "[a-z ]{0,8}".prop_map(|v| format!(": {v}")),
        Just(String::new()),
        Just("data".to_string()),
    ]
}

fn stream_text() -> impl Strategy<Value = String> {
    (prop::collection::vec(line(), 0..24), any::<bool>()).prop_map(|(lines, crlf)| {
        let sep = if crlf { "\r\n" } else { "\n" };
        lines.iter().map(|l| format!("{l}{sep}")).collect()
    })
}

fn decode_split(bytes: &[u8], cuts: &[usize]) -> Vec<SseEvent> {
    let mut decoder = SseDecoder::new();
    let mut out = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        out.extend(decoder.feed(&bytes[start..cut]).unwrap());
        start = cut;
    }
    out.extend(decoder.feed(&bytes[start..]).unwrap());
    out.extend(decoder.finish().unwrap());
    out
}

proptest! {
    /// Splitting the input at any single offset yields the same events.
    #[test]
    fn single_split_matches_whole(text in stream_text()) {
        let bytes = text.as_bytes();
        let whole = decode_all(bytes).unwrap();
        for cut in 0..=bytes.len() {
            prop_assert_eq!(&decode_split(bytes, &[cut]), &whole, "cut at {}", cut);
        }
    }

    /// Byte-at-a-time feeding yields the same events.
    #[test]
    fn byte_at_a_time_matches_whole(text in stream_text()) {
        let bytes = text.as_bytes();
        let cuts: Vec<usize> = (1..bytes.len()).collect();
        prop_assert_eq!(decode_split(bytes, &cuts), decode_all(bytes).unwrap());
    }

    /// Encoded events decode back unchanged.
    #[test]
    fn encoded_events_decode_back(
        data in "[a-z \n]{0,16}",
        event in prop::option::of("[a-z]{1,6}"),
        id in prop::option::of("[0-9]{1,3}"),
    ) {
        let sent = SseEvent { event, data, id };
        prop_assert_eq!(decode_all(&sent.to_bytes()).unwrap(), vec![sent]);
    }
}
