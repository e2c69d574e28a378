use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::endpoint::{Grouping, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// Bytes moved in one direction over a span of time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub direction: Direction,
    /// Milliseconds since the Unix epoch of the first transfer.
    pub timestamp: i64,
    /// Milliseconds since the Unix epoch of the last transfer combined into this packet.
    pub last_timestamp: i64,
    pub bytes: Vec<u8>,
}

impl Packet {
    pub fn new(direction: Direction, timestamp: i64, bytes: &[u8]) -> Self {
        Self {
            direction,
            timestamp,
            last_timestamp: timestamp,
            bytes: bytes.to_vec(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }

    /// Appends `next` if it goes the same way and follows within `threshold`.
    pub fn combine(&mut self, next: &Packet, threshold: Duration) -> bool {
        if self.direction != next.direction {
            return false;
        }

        let threshold = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);

        if next.timestamp.saturating_sub(self.last_timestamp) > threshold {
            return false;
        }

        self.bytes.extend_from_slice(&next.bytes);
        self.last_timestamp = self.last_timestamp.max(next.last_timestamp);

        true
    }
}

/// Wall clock in milliseconds since the Unix epoch, the unit of packet timestamps.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Orders packets by timestamp and coalesces adjacent same-direction ones.
pub fn merge(mut packets: Vec<Packet>, threshold: Duration) -> Vec<Packet> {
    packets.sort_by_key(|packet| packet.timestamp);

    let mut merged: Vec<Packet> = Vec::with_capacity(packets.len());

    for packet in packets {
        let combined = merged
            .last_mut()
            .map_or(false, |last| last.combine(&packet, threshold));

        if !combined {
            merged.push(packet);
        }
    }

    merged
}

#[derive(Debug)]
struct Stream {
    seq: u64,
    packets: Mutex<Vec<Packet>>,
}

/// Per-key log of raw byte transfers.
#[derive(Debug, Default)]
pub struct TrafficCapture {
    streams: RwLock<HashMap<RecordKey, Arc<Stream>>>,
}

impl TrafficCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: RecordKey, direction: Direction, timestamp: i64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let packet = Packet::new(direction, timestamp, bytes);

        if let Some(stream) = self.streams.read().get(&key) {
            stream.packets.lock().push(packet);
            return;
        }

        let stream = {
            let mut streams = self.streams.write();
            let seq = streams.len() as u64;
            streams
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Stream {
                        seq,
                        packets: Mutex::new(Vec::new()),
                    })
                })
                .clone()
        };

        stream.packets.lock().push(packet);
    }

    /// Number of packets recorded so far for every key.
    pub fn watermarks(&self) -> HashMap<RecordKey, usize> {
        self.streams
            .read()
            .iter()
            .map(|(key, stream)| (key.clone(), stream.packets.lock().len()))
            .collect()
    }

    /// Merged packets of the matching keys, skipping those already counted in `since`.
    pub fn packets<F>(
        &self,
        filter: F,
        grouping: &Grouping,
        since: Option<&HashMap<RecordKey, usize>>,
        threshold: Duration,
    ) -> Vec<(RecordKey, Vec<Packet>)>
    where
        F: Fn(&RecordKey) -> bool,
    {
        let mut streams = self
            .streams
            .read()
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(key, stream)| (key.clone(), stream.clone()))
            .collect::<Vec<_>>();

        streams.sort_by_key(|(_, stream)| stream.seq);

        let mut grouped: Vec<(RecordKey, Vec<Packet>)> = Vec::new();
        let mut index: HashMap<RecordKey, usize> = HashMap::new();

        for (key, stream) in streams {
            let skip = since.and_then(|since| since.get(&key)).copied().unwrap_or(0);
            let packets = stream
                .packets
                .lock()
                .iter()
                .skip(skip)
                .cloned()
                .collect::<Vec<_>>();

            if packets.is_empty() {
                continue;
            }

            let key = key.coarsen(grouping);

            match index.get(&key) {
                Some(position) => grouped[*position].1.extend(packets),
                None => {
                    index.insert(key.clone(), grouped.len());
                    grouped.push((key, packets));
                }
            }
        }

        grouped
            .into_iter()
            .map(|(key, packets)| (key, merge(packets, threshold)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn reset(&self) {
        self.streams.write().clear();
    }
}
