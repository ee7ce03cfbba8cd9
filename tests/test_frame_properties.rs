//! Property tests across the serial framing, parsing and queueing path

use proptest::prelude::*;
use ripple_bridge::bridge::BoundedQueue;
use ripple_bridge::protocol::{parse, RawLine, SensorEnvelope};
use ripple_bridge::serial::{SerialError, SerialReader};
use std::collections::VecDeque;
use std::time::Duration;

fn read_all_lines(chunks: Vec<Vec<u8>>) -> (Vec<String>, bool) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let mut mock = tokio_test::io::Builder::new();
        for chunk in &chunks {
            mock.read(chunk);
        }
        let mut reader = SerialReader::new(mock.build(), Duration::from_secs(1), 256);

        let mut lines = Vec::new();
        loop {
            match reader.read_line().await {
                Ok(Some(line)) => lines.push(line.into_string()),
                Ok(None) => continue,
                Err(SerialError::DeviceClosed) => return (lines, true),
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
    })
}

/// Split `bytes` at the given (sorted, deduplicated) cut points
fn split_at_points(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<Vec<u8>> {
    cuts.retain(|&c| c > 0 && c < bytes.len());
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks.push(bytes[start..].to_vec());
    chunks.retain(|c| !c.is_empty());
    chunks
}

proptest! {
    #[test]
    fn lines_survive_arbitrary_read_boundaries(
        frames in proptest::collection::vec(("[0-9.]{1,6}", "[0-9.]{1,6}"), 1..8),
        cuts in proptest::collection::vec(0usize..200, 0..10),
        crlf in any::<bool>(),
    ) {
        let terminator = if crlf { "\r\n" } else { "\n" };
        let text: String = frames
            .iter()
            .map(|(w, t)| format!("{w}:{t}{terminator}"))
            .collect();

        let (lines, closed) = read_all_lines(split_at_points(text.as_bytes(), cuts));

        prop_assert!(closed);
        let expected: Vec<String> = frames.iter().map(|(w, t)| format!("{w}:{t}")).collect();
        prop_assert_eq!(&lines, &expected);

        for (line, (water, temperature)) in lines.iter().zip(&frames) {
            let pair = parse(&RawLine::from(line.as_str())).unwrap();
            prop_assert_eq!(&pair.water, water);
            prop_assert_eq!(&pair.temperature, temperature);
        }
    }

    #[test]
    fn envelope_carries_token_verbatim(sensor_id in any::<u32>(), token in ".{0,24}") {
        let json = SensorEnvelope::build(sensor_id, token.clone()).serialize().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(value["sensorId"].as_u64(), Some(u64::from(sensor_id)));
        prop_assert_eq!(value["data"].as_str(), Some(token.as_str()));
        prop_assert!(json.starts_with(r#"{"sensorId":"#), "unexpected key order: {}", json);
    }

    #[test]
    fn queue_keeps_newest_entries_in_order(
        capacity in 1usize..8,
        pushes in proptest::collection::vec(any::<u16>(), 0..32),
    ) {
        let mut queue = BoundedQueue::new(capacity);
        let mut model = VecDeque::new();
        let mut dropped = 0u64;

        for value in &pushes {
            let evicted = queue.push(*value);
            model.push_back(*value);
            if model.len() > capacity {
                prop_assert_eq!(evicted, model.pop_front());
                dropped += 1;
            } else {
                prop_assert_eq!(evicted, None);
            }
            prop_assert!(queue.len() <= capacity);
        }

        prop_assert_eq!(queue.dropped(), dropped);
        prop_assert_eq!(queue.drain_all(), Vec::from(model));
    }
}
