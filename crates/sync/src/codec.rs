//! Wire format for book delta frames.
//!
//! A frame on the wire is a zlib-compressed protobuf message:
//!
//! ```text
//! message Level { double price = 1; double size = 2; double total = 3; }
//! message Frame {
//!   string t = 1;           // "upd" | "batch" | "hb"
//!   uint64 seq = 2;
//!   repeated Level b = 3;   // bid changes
//!   repeated Level a = 4;   // ask changes
//!   bool ack = 5;
//!   repeated Frame msgs = 6; // batch children
//! }
//! ```
//!
//! Numbers are converted into [`Decimal`] at this boundary and never leave it as floats.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::LevelChange;

pub const FRAME_UPDATE: &str = "upd";
pub const FRAME_BATCH: &str = "batch";
pub const FRAME_HEARTBEAT: &str = "hb";

/// Value of the `event` header and body field on ack messages.
pub const ACK_EVENT: &str = "ack";

/// Wire doubles are rounded to this many places on conversion.
const WIRE_DECIMAL_PLACES: u32 = 10;

/// Largest price, size or total accepted off the wire.
pub const MAX_WIRE_VALUE: f64 = 1e15;

#[derive(Clone, PartialEq, Message)]
pub struct WireLevel {
    #[prost(double, tag = "1")]
    pub price: f64,
    #[prost(double, tag = "2")]
    pub size: f64,
    #[prost(double, tag = "3")]
    pub total: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireFrame {
    #[prost(string, tag = "1")]
    pub t: String,
    #[prost(uint64, tag = "2")]
    pub seq: u64,
    #[prost(message, repeated, tag = "3")]
    pub b: Vec<WireLevel>,
    #[prost(message, repeated, tag = "4")]
    pub a: Vec<WireLevel>,
    #[prost(bool, tag = "5")]
    pub ack: bool,
    #[prost(message, repeated, tag = "6")]
    pub msgs: Vec<WireFrame>,
}

/// Incremental changes for one sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    pub sequence: u64,
    pub bids: Vec<LevelChange>,
    pub asks: Vec<LevelChange>,
    pub requires_ack: bool,
}

/// A decoded delta frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaFrame {
    Update(BookUpdate),
    /// Keepalive that consumes a sequence number but carries no changes
    Heartbeat { sequence: u64, requires_ack: bool },
    /// Several frames delivered together; children are never batches
    Batch {
        sequence: u64,
        requires_ack: bool,
        frames: Vec<DeltaFrame>,
    },
}

impl DeltaFrame {
    pub fn sequence(&self) -> u64 {
        match self {
            DeltaFrame::Update(update) => update.sequence,
            DeltaFrame::Heartbeat { sequence, .. } | DeltaFrame::Batch { sequence, .. } => {
                *sequence
            }
        }
    }

    pub fn requires_ack(&self) -> bool {
        match self {
            DeltaFrame::Update(update) => update.requires_ack,
            DeltaFrame::Heartbeat { requires_ack, .. } | DeltaFrame::Batch { requires_ack, .. } => {
                *requires_ack
            }
        }
    }

    /// Metric/log label for the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaFrame::Update(_) => "update",
            DeltaFrame::Heartbeat { .. } => "heartbeat",
            DeltaFrame::Batch { .. } => "batch",
        }
    }

    /// Sequences to acknowledge, outer frame first, then each child.
    pub fn ack_sequences(&self) -> Vec<u64> {
        let mut seqs = Vec::new();
        if self.requires_ack() {
            seqs.push(self.sequence());
        }
        if let DeltaFrame::Batch { frames, .. } = self {
            seqs.extend(frames.iter().filter(|f| f.requires_ack()).map(|f| f.sequence()));
        }
        seqs
    }

    /// The frames that go through sequence tracking, in order.
    ///
    /// A batch yields its children; its own sequence is not tracked.
    pub fn into_sequenced(self) -> Vec<DeltaFrame> {
        match self {
            DeltaFrame::Batch { frames, .. } => frames,
            other => vec![other],
        }
    }
}

/// Decodes raw payloads with a bound on the decompressed size.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<DeltaFrame, DecodeError> {
        let mut buf = Vec::new();
        ZlibDecoder::new(raw)
            .take(self.max_frame_bytes as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| DecodeError::Decompress(e.to_string()))?;
        if buf.len() > self.max_frame_bytes {
            return Err(DecodeError::TooLarge {
                limit: self.max_frame_bytes,
            });
        }

        let wire =
            WireFrame::decode(buf.as_slice()).map_err(|e| DecodeError::Deserialize(e.to_string()))?;
        from_wire(wire, false)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

/// Decode with the default 1 MiB frame limit.
pub fn decode(raw: &[u8]) -> Result<DeltaFrame, DecodeError> {
    FrameDecoder::default().decode(raw)
}

/// Encode a frame the way a publisher would.
pub fn encode(frame: &DeltaFrame) -> std::io::Result<Bytes> {
    compress(&to_wire(frame).encode_to_vec())
}

/// zlib-compress an already serialized wire frame.
pub fn compress(bytes: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(Bytes::from(encoder.finish()?))
}

fn from_wire(wire: WireFrame, nested: bool) -> Result<DeltaFrame, DecodeError> {
    match wire.t.as_str() {
        FRAME_UPDATE => Ok(DeltaFrame::Update(BookUpdate {
            sequence: wire.seq,
            bids: to_changes(&wire.b)?,
            asks: to_changes(&wire.a)?,
            requires_ack: wire.ack,
        })),
        FRAME_HEARTBEAT => Ok(DeltaFrame::Heartbeat {
            sequence: wire.seq,
            requires_ack: wire.ack,
        }),
        FRAME_BATCH if nested => Err(DecodeError::NestedBatch),
        FRAME_BATCH => {
            let frames = wire
                .msgs
                .into_iter()
                .map(|child| from_wire(child, true))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DeltaFrame::Batch {
                sequence: wire.seq,
                requires_ack: wire.ack,
                frames,
            })
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn to_changes(levels: &[WireLevel]) -> Result<Vec<LevelChange>, DecodeError> {
    levels
        .iter()
        .map(|level| {
            Ok(LevelChange {
                price: to_decimal("price", level.price)?,
                size: to_decimal("size", level.size)?,
                total: to_decimal("total", level.total)?,
            })
        })
        .collect()
}

fn to_decimal(field: &'static str, value: f64) -> Result<Decimal, DecodeError> {
    let invalid = DecodeError::InvalidNumber { field, value };
    if !value.is_finite() || !(0.0..=MAX_WIRE_VALUE).contains(&value) {
        return Err(invalid);
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(WIRE_DECIMAL_PLACES).normalize())
        .ok_or(invalid)
}

fn to_wire(frame: &DeltaFrame) -> WireFrame {
    match frame {
        DeltaFrame::Update(update) => WireFrame {
            t: FRAME_UPDATE.to_string(),
            seq: update.sequence,
            b: update.bids.iter().map(to_wire_level).collect(),
            a: update.asks.iter().map(to_wire_level).collect(),
            ack: update.requires_ack,
            msgs: Vec::new(),
        },
        DeltaFrame::Heartbeat {
            sequence,
            requires_ack,
        } => WireFrame {
            t: FRAME_HEARTBEAT.to_string(),
            seq: *sequence,
            ack: *requires_ack,
            ..Default::default()
        },
        DeltaFrame::Batch {
            sequence,
            requires_ack,
            frames,
        } => WireFrame {
            t: FRAME_BATCH.to_string(),
            seq: *sequence,
            ack: *requires_ack,
            msgs: frames.iter().map(to_wire).collect(),
            ..Default::default()
        },
    }
}

fn to_wire_level(change: &LevelChange) -> WireLevel {
    WireLevel {
        price: change.price.to_f64().unwrap_or_default(),
        size: change.size.to_f64().unwrap_or_default(),
        total: change.total.to_f64().unwrap_or_default(),
    }
}

/// Acknowledgement published back on the book channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub event: String,
    pub seq: u64,
}

impl AckMessage {
    pub fn new(seq: u64) -> Self {
        Self {
            event: ACK_EVENT.to_string(),
            seq,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
