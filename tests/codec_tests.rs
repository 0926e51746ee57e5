use bytes::BytesMut;
use tokio_util::codec::Decoder;

use media_sync_rs::{SseCodec, SseFrame};

fn decode_all(codec: &mut SseCodec, buf: &mut BytesMut) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buf).unwrap() {
        frames.push(frame);
    }
    frames
}

#[test]
fn test_named_event() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("event: queue\ndata: [1,2,3]\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "queue");
    assert_eq!(frames[0].data, "[1,2,3]");
    assert!(buf.is_empty());
}

#[test]
fn test_unnamed_event_defaults_to_message() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("data: hello\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames[0].event, "message");
}

#[test]
fn test_multiline_data_and_crlf() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("event: init\r\ndata: {\"a\":\r\ndata: 1}\r\n\r\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "{\"a\":\n1}");
}

#[test]
fn test_comments_and_empty_blocks_are_skipped() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from(": keep-alive\n\nevent: toast\n\n: ping\ndata: abc\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    // "event: toast" without data is not dispatched
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "message");
    assert_eq!(frames[0].data, "abc");
}

#[test]
fn test_id_and_retry_fields() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("id: 42\nretry: 5000\nevent: videos\ndata:\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id.as_deref(), Some("42"));
    assert_eq!(frames[0].retry, Some(5000));
    assert_eq!(frames[0].data, "");

    let mut buf = BytesMut::from("retry: soon\ndata: x\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames[0].retry, None);
}

#[test]
fn test_frame_split_across_chunks() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("event: sett");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"ings\ndata: {\"theme\":");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"\"dark\"}\n");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"\nevent: queue\ndata: []\n\n");

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].event, "settings");
    assert_eq!(frames[0].data, "{\"theme\":\"dark\"}");
    assert_eq!(frames[1].event, "queue");
}

#[test]
fn test_field_without_space_after_colon() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("event:import\ndata:{\"progress\":3}\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames[0].event, "import");
    assert_eq!(frames[0].data, "{\"progress\":3}");
}

#[test]
fn test_invalid_utf8_skips_only_its_frame() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from(
        &b"id: 3\nevent: toast\ndata: \"bad\xff\"\n\nevent: queue\ndata: [1,2]\n\n"[..],
    );
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "queue");
    assert_eq!(frames[0].data, "[1,2]");
    // The skipped block's fields do not leak into the next frame
    assert_eq!(frames[0].id, None);
    assert!(buf.is_empty());
}

#[test]
fn test_incomplete_trailing_block_dropped_at_eof() {
    let mut codec = SseCodec::new();
    let mut buf = BytesMut::from("event: queue\ndata: [1]\n");
    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());

    // The half block must not leak into the next frame
    let mut buf = BytesMut::from("data: fresh\n\n");
    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames[0].event, "message");
    assert_eq!(frames[0].data, "fresh");
}
