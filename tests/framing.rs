//! Framing Integration Tests
//!
//! The events recovered from a byte stream must not depend on how the
//! transport happened to chunk it.

use council::adapters::TransportError;
use council::domain::RawEvent;
use council::stream::{frame_stream, EventFramer};
use futures::StreamExt;
use proptest::prelude::*;
use serde_json::json;

// Strategy to generate one well-formed event with arbitrary unicode text
fn event_strategy() -> impl Strategy<Value = RawEvent> {
    prop_oneof![
        (1..=3u8).prop_map(|stage| RawEvent::new(format!("stage{}_start", stage))),
        ("[a-z]{1,8}", "\\PC{0,24}").prop_map(|(model, response)| {
            RawEvent::new("stage1_complete").with_data(json!([{"model": model, "response": response}]))
        }),
        "\\PC{0,24}".prop_map(|title| RawEvent::new("title_complete").with_data(json!({"title": title}))),
        "\\PC{0,16}".prop_map(|message| RawEvent::new("error").with_message(message)),
        Just(RawEvent::new("complete")),
    ]
}

/// Split `bytes` at the given (unsorted, possibly out-of-range) offsets
fn split_at_offsets(bytes: &[u8], offsets: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = offsets.iter().map(|o| o % (bytes.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

fn frame_all(chunks: &[Vec<u8>]) -> Vec<RawEvent> {
    let mut framer = EventFramer::new();
    let mut events: Vec<RawEvent> = chunks.iter().flat_map(|chunk| framer.push(chunk)).collect();
    events.extend(framer.finish());
    events
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_events(
        events in proptest::collection::vec(event_strategy(), 0..12),
        offsets in proptest::collection::vec(0usize..4096, 0..24),
    ) {
        let wire: String = events.iter().map(RawEvent::to_frame).collect();
        let bytes = wire.as_bytes();

        let whole = frame_all(&[bytes.to_vec()]);
        let split = frame_all(&split_at_offsets(bytes, &offsets));

        prop_assert_eq!(&whole, &events);
        prop_assert_eq!(&split, &events);
    }

    #[test]
    fn prop_single_byte_chunks(events in proptest::collection::vec(event_strategy(), 1..6)) {
        let wire: String = events.iter().map(RawEvent::to_frame).collect();
        let chunks: Vec<Vec<u8>> = wire.as_bytes().iter().map(|b| vec![*b]).collect();

        prop_assert_eq!(frame_all(&chunks), events);
    }

    #[test]
    fn prop_frame_stream_matches_framer(
        events in proptest::collection::vec(event_strategy(), 0..8),
        offsets in proptest::collection::vec(0usize..2048, 0..12),
    ) {
        let wire: String = events.iter().map(RawEvent::to_frame).collect();
        let chunks: Vec<Result<Vec<u8>, TransportError>> = split_at_offsets(wire.as_bytes(), &offsets)
            .into_iter()
            .map(Ok)
            .collect();

        let framed: Vec<RawEvent> = tokio_test::block_on(async {
            frame_stream(futures::stream::iter(chunks))
                .map(|item| item.unwrap())
                .collect()
                .await
        });

        prop_assert_eq!(framed, events);
    }
}

#[test]
fn test_unterminated_final_event_is_kept() {
    let chunks = vec![
        b"data: {\"type\":\"stage1_start\"}\n\ndata: {\"type\":\"com".to_vec(),
        b"plete\"}".to_vec(),
    ];

    let kinds: Vec<String> = frame_all(&chunks).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec!["stage1_start", "complete"]);
}

#[test]
fn test_malformed_lines_do_not_stop_the_stream() {
    let mut framer = EventFramer::new();
    let mut events = framer.push(b"data: {\"type\":\"stage1_start\"}\n\ndata: {\"type\":\n\n");
    events.extend(framer.push(b"data: [1,2\n\ndata: {\"type\":\"complete\"}\n\n"));

    assert_eq!(events.len(), 2);
    assert_eq!(framer.skipped(), 2);
    assert_eq!(framer.emitted(), 2);
}
