use std::time::Instant;

use serde_json::json;
use turnstream::protocol::{parse_turn_event, TurnEvent};
use turnstream::stream::{encode_record, DecodedRecord, RecordDecoder};
use turnstream::turn::{TurnState, TurnTerminal};

const MIXED: &str = "event: pipeline_stage\r\ndata: {\"stage\":\"prompt\"}\r\n\r\n\
: keep-alive\n\n\
data: {\"type\":\"thinking_delta\",\"delta\":\"r\u{e9}sum\u{e9}\"}\n\n\
event: content_delta\ndata: {\"delta\":\"\u{1f600} ok\"}\n\n\
event: tool_calls\ndata: {\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"k\\\":\"}}]}\n\n\
event: tool_calls\ndata: {\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"1}\"}}]}\n\n\
data: not json\n\n\
data: [DONE]\n\n";

fn decode_whole(text: &str) -> Vec<DecodedRecord> {
    let mut decoder = RecordDecoder::new();
    let mut records = decoder.feed(text.as_bytes());
    records.extend(decoder.finish());
    records
}

#[test]
fn test_every_split_point_yields_same_records() {
    let expected = decode_whole(MIXED);
    assert_eq!(expected.len(), 6);

    let bytes = MIXED.as_bytes();
    for cut in 1..bytes.len() {
        let mut decoder = RecordDecoder::new();
        let mut records = decoder.feed(&bytes[..cut]);
        records.extend(decoder.feed(&bytes[cut..]));
        records.extend(decoder.finish());
        assert_eq!(records, expected, "split at byte {cut}");
    }
}

#[test]
fn test_data_only_records_resolve_type_from_payload() {
    let records = decode_whole(MIXED);
    assert_eq!(records[1].resolved_type(), Some("thinking_delta"));
    assert_eq!(records[5].resolved_type(), Some("done"));
}

#[test]
fn test_mixed_vocabularies_fold_into_one_message() {
    let now = Instant::now();
    let mut state = TurnState::new(10, now);
    let mut terminal = None;
    for record in decode_whole(MIXED) {
        if let Some(done) = state.apply_record(record, now) {
            terminal = Some(done);
        }
    }
    let Some(TurnTerminal::Finalized(message)) = terminal else {
        panic!("expected finalized turn");
    };
    assert_eq!(message.visible_content, "\u{1f600} ok");
    assert_eq!(message.thinking_trace.as_deref(), Some("r\u{e9}sum\u{e9}"));
    assert_eq!(message.tool_calls.len(), 1);
    assert_eq!(message.tool_calls[0].name, "lookup");
    assert_eq!(message.tool_calls[0].arguments, json!({"k": 1}));
}

#[test]
fn test_unknown_event_type_is_not_fatal() {
    assert_eq!(
        parse_turn_event("brand_new_event", json!({"x": 1})),
        TurnEvent::Unknown
    );
    assert_eq!(
        parse_turn_event("content_block_delta", json!({"delta": 5})),
        TurnEvent::Unknown
    );
}

#[test]
fn test_tool_rounds_reusing_index_zero_stay_distinct() {
    let stream = [
        encode_record(
            Some("tool_call_delta"),
            &json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}}]}).to_string(),
        ),
        encode_record(Some("tool_result"), r#"{"id":"call_1","result":["hit"]}"#),
        encode_record(Some("tool_round_start"), r#"{"round":2}"#),
        encode_record(
            Some("tool_call_delta"),
            &json!({"tool_calls": [{"index": 0, "id": "call_2", "function": {"name": "fetch", "arguments": "{\"u\":\"x\"}"}}]}).to_string(),
        ),
        encode_record(Some("done"), "{}"),
    ]
    .concat();

    let now = Instant::now();
    let mut state = TurnState::new(10, now);
    let mut terminal = None;
    for record in decode_whole(&stream) {
        if let Some(done) = state.apply_record(record, now) {
            terminal = Some(done);
        }
    }
    let Some(TurnTerminal::Finalized(message)) = terminal else {
        panic!("expected finalized turn");
    };
    let calls: Vec<_> = message
        .tool_calls
        .iter()
        .map(|call| (call.id.as_deref(), call.name.as_str(), call.arguments.clone()))
        .collect();
    assert_eq!(
        calls,
        vec![
            (Some("call_1"), "search", json!({"q": "rust"})),
            (Some("call_2"), "fetch", json!({"u": "x"})),
        ]
    );
}
