//! Binary wire format for controller telemetry.
//!
//! The controller precedes every binary payload with an 8-byte header frame
//! announcing what follows. Some kinds (state tables, binary files) are
//! followed by a payload frame; others (keepalive ack, out-of-service) are
//! the header alone. [`FrameParser`] models this as an explicit two-state
//! machine so the framing logic is unit-testable without a transport.
//!
//! Layouts, little-endian throughout:
//!
//! ```text
//! header      = 0x03, kind, info, 0x00, payload_len: u32
//! value rec   = id: [u8; 16], value: f64              (24 bytes, repeating)
//! text rec    = id: [u8; 16], secondary: [u8; 16],
//!               len: u32, text: [u8; len]             (padded, see below)
//! ```
//!
//! A text record is padded to a 4-byte boundary measured from the start of
//! its length field, so the full record occupies `36 + round_up4(len)` bytes.

use std::fmt;

use thiserror::Error;

// ── ObjectId ─────────────────────────────────────────────────────────

/// 16-byte value key identifying a control or a state.
///
/// Pure value type: equality and hashing are byte-wise, never identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub [u8; 16]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse the controller's textual form, `xxxxxxxx-xxxx-xxxx-x{16}`.
    /// Dashes are optional; exactly 32 hex digits are required.
    pub fn parse(s: &str) -> Result<Self, FrameError> {
        let hex_str: String = s.chars().filter(|c| *c != '-').collect();
        let raw = hex::decode(&hex_str).map_err(|_| FrameError::BadObjectId(s.to_string()))?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| FrameError::BadObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..16]),
        )
    }
}

impl std::str::FromStr for ObjectId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── State updates ────────────────────────────────────────────────────

/// Current value of a state: the wire carries numbers and text.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => write!(f, "{t}"),
        }
    }
}

/// One decoded telemetry record: a state identifier and its new value.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub id: ObjectId,
    pub value: StateValue,
}

// ── Header ───────────────────────────────────────────────────────────

const HEADER_MAGIC: u8 = 0x03;
const HEADER_LEN: usize = 8;
/// Info-byte flag: the announced length is an estimate and the real header
/// will be re-sent before the payload.
const FLAG_ESTIMATED: u8 = 0x80;

/// What a header frame announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A plain text message follows on the text channel.
    Text,
    /// A requested binary file follows.
    BinaryFile,
    /// Table of 24-byte value records follows.
    ValueStates,
    /// Table of variable-length text records follows.
    TextStates,
    /// Daytimer schedule table follows.
    DaytimerStates,
    /// The controller is going out of service (reboot/update); no payload.
    OutOfService,
    /// Keepalive acknowledgment; no payload.
    Keepalive,
    /// Weather forecast table follows.
    WeatherStates,
}

impl PayloadKind {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Text),
            1 => Some(Self::BinaryFile),
            2 => Some(Self::ValueStates),
            3 => Some(Self::TextStates),
            4 => Some(Self::DaytimerStates),
            5 => Some(Self::OutOfService),
            6 => Some(Self::Keepalive),
            7 => Some(Self::WeatherStates),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::BinaryFile => 1,
            Self::ValueStates => 2,
            Self::TextStates => 3,
            Self::DaytimerStates => 4,
            Self::OutOfService => 5,
            Self::Keepalive => 6,
            Self::WeatherStates => 7,
        }
    }

    /// Whether a binary payload frame follows this header.
    fn has_binary_payload(self) -> bool {
        matches!(
            self,
            Self::BinaryFile
                | Self::ValueStates
                | Self::TextStates
                | Self::DaytimerStates
                | Self::WeatherStates
        )
    }
}

/// Decoded 8-byte header frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: PayloadKind,
    pub payload_len: u32,
    /// Length is an estimate; the real header is re-sent before the payload.
    pub estimated: bool,
}

fn parse_header(frame: &[u8]) -> Result<FrameHeader, FrameError> {
    if frame.len() != HEADER_LEN {
        return Err(FrameError::BadHeaderLength(frame.len()));
    }
    if frame[0] != HEADER_MAGIC {
        return Err(FrameError::BadMagic(frame[0]));
    }
    let kind = PayloadKind::from_wire(frame[1]).ok_or(FrameError::UnknownKind(frame[1]))?;
    let payload_len = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    Ok(FrameHeader {
        kind,
        payload_len,
        estimated: frame[2] & FLAG_ESTIMATED != 0,
    })
}

// ── Errors ───────────────────────────────────────────────────────────

/// Framing and record-decoding failures.
///
/// These are never fatal to a session: the caller logs the frame and
/// resynchronizes on the next header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("header frame has {0} bytes, expected 8")]
    BadHeaderLength(usize),

    #[error("bad header magic 0x{0:02x}")]
    BadMagic(u8),

    #[error("unknown payload kind {0}")]
    UnknownKind(u8),

    #[error("truncated record at offset {offset} ({remaining} bytes left)")]
    Truncated { offset: usize, remaining: usize },

    #[error("text record is not valid UTF-8 at offset {0}")]
    BadText(usize),

    #[error("not a valid object identifier: {0}")]
    BadObjectId(String),
}

// ── Record decoding ──────────────────────────────────────────────────

const VALUE_RECORD_LEN: usize = 24;
const TEXT_RECORD_FIXED: usize = 36;

fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

/// Decode a value-state table: 24-byte records, 16-byte id + f64-LE.
///
/// All-or-nothing: a trailing partial record poisons the whole frame.
pub fn decode_value_states(payload: &[u8]) -> Result<Vec<StateUpdate>, FrameError> {
    if payload.len() % VALUE_RECORD_LEN != 0 {
        return Err(FrameError::Truncated {
            offset: payload.len() - payload.len() % VALUE_RECORD_LEN,
            remaining: payload.len() % VALUE_RECORD_LEN,
        });
    }
    let mut updates = Vec::with_capacity(payload.len() / VALUE_RECORD_LEN);
    for record in payload.chunks_exact(VALUE_RECORD_LEN) {
        let mut id = [0u8; 16];
        id.copy_from_slice(&record[..16]);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&record[16..24]);
        updates.push(StateUpdate {
            id: ObjectId(id),
            value: StateValue::Number(f64::from_le_bytes(raw)),
        });
    }
    Ok(updates)
}

/// Decode a text-state table of variable-length records.
///
/// Each record: 16-byte id, 16-byte secondary id (unused), u32-LE length N,
/// N bytes of text, padded to a 4-byte boundary measured from the length
/// field -- the cursor advances by exactly `36 + round_up4(N)`.
pub fn decode_text_states(payload: &[u8]) -> Result<Vec<StateUpdate>, FrameError> {
    let mut updates = Vec::new();
    let mut offset = 0usize;

    while offset < payload.len() {
        let remaining = payload.len() - offset;
        if remaining < TEXT_RECORD_FIXED {
            return Err(FrameError::Truncated { offset, remaining });
        }
        let rec = &payload[offset..];
        let mut id = [0u8; 16];
        id.copy_from_slice(&rec[..16]);
        // bytes 16..32: secondary identifier, carried but unused
        let len = u32::from_le_bytes([rec[32], rec[33], rec[34], rec[35]]) as usize;

        let total = TEXT_RECORD_FIXED + round_up4(len);
        if remaining < total {
            return Err(FrameError::Truncated { offset, remaining });
        }
        let text = std::str::from_utf8(&rec[TEXT_RECORD_FIXED..TEXT_RECORD_FIXED + len])
            .map_err(|_| FrameError::BadText(offset))?;

        updates.push(StateUpdate {
            id: ObjectId(id),
            value: StateValue::Text(text.to_string()),
        });
        offset += total;
    }
    Ok(updates)
}

// ── Encoding (fakes and round-trip tests) ────────────────────────────

/// Encode a header frame.
pub fn encode_header(kind: PayloadKind, payload_len: u32) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = HEADER_MAGIC;
    frame[1] = kind.to_wire();
    frame[4..8].copy_from_slice(&payload_len.to_le_bytes());
    frame
}

/// Encode one 24-byte value record.
pub fn encode_value_record(id: ObjectId, value: f64) -> [u8; 24] {
    let mut rec = [0u8; 24];
    rec[..16].copy_from_slice(id.as_bytes());
    rec[16..24].copy_from_slice(&value.to_le_bytes());
    rec
}

/// Encode one padded text record.
pub fn encode_text_record(id: ObjectId, secondary: ObjectId, text: &str) -> Vec<u8> {
    let len = text.len();
    let mut rec = Vec::with_capacity(TEXT_RECORD_FIXED + round_up4(len));
    rec.extend_from_slice(id.as_bytes());
    rec.extend_from_slice(secondary.as_bytes());
    rec.extend_from_slice(&(len as u32).to_le_bytes());
    rec.extend_from_slice(text.as_bytes());
    rec.resize(TEXT_RECORD_FIXED + round_up4(len), 0);
    rec
}

// ── FrameParser ──────────────────────────────────────────────────────

/// What feeding one binary frame into the parser produced.
#[derive(Debug, PartialEq)]
pub enum FrameOutput {
    /// Header consumed; the payload frame is expected next.
    None,
    /// A decoded state table.
    Updates(Vec<StateUpdate>),
    /// Keepalive acknowledged by the peer.
    KeepaliveAck,
    /// The controller announced it is going out of service.
    OutOfService,
    /// A plain text message follows on the text channel.
    TextFollows,
    /// A binary file payload (delivered opaque).
    BinaryFile(Vec<u8>),
    /// Daytimer / weather table payloads are acknowledged but not decoded.
    Skipped(PayloadKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingHeader,
    AwaitingPayload(PayloadKind),
}

/// Two-state framing machine: `AwaitingHeader` ⇄ `AwaitingPayload(kind)`.
///
/// Stateless apart from which frame comes next, so a malformed frame only
/// costs the table it belonged to: the state resets to `AwaitingHeader` and
/// the stream resynchronizes on the next header.
#[derive(Debug)]
pub struct FrameParser {
    state: ParserState,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingHeader,
        }
    }

    /// Feed one binary frame as delivered by the transport.
    ///
    /// On error the parser has already reset itself; the caller logs and
    /// moves on.
    pub fn feed(&mut self, frame: &[u8]) -> Result<FrameOutput, FrameError> {
        match self.state {
            ParserState::AwaitingHeader => self.feed_header(frame),
            ParserState::AwaitingPayload(kind) => {
                self.state = ParserState::AwaitingHeader;
                Self::feed_payload(kind, frame)
            }
        }
    }

    fn feed_header(&mut self, frame: &[u8]) -> Result<FrameOutput, FrameError> {
        let header = parse_header(frame)?;
        if header.estimated {
            // The real header for this payload is re-sent; stay put.
            return Ok(FrameOutput::None);
        }
        match header.kind {
            PayloadKind::Keepalive => Ok(FrameOutput::KeepaliveAck),
            PayloadKind::OutOfService => Ok(FrameOutput::OutOfService),
            PayloadKind::Text => Ok(FrameOutput::TextFollows),
            kind if kind.has_binary_payload() => {
                self.state = ParserState::AwaitingPayload(kind);
                Ok(FrameOutput::None)
            }
            kind => Ok(FrameOutput::Skipped(kind)),
        }
    }

    fn feed_payload(kind: PayloadKind, frame: &[u8]) -> Result<FrameOutput, FrameError> {
        match kind {
            PayloadKind::ValueStates => decode_value_states(frame).map(FrameOutput::Updates),
            PayloadKind::TextStates => decode_text_states(frame).map(FrameOutput::Updates),
            PayloadKind::BinaryFile => Ok(FrameOutput::BinaryFile(frame.to_vec())),
            // Schedule and forecast tables are not surfaced as state updates.
            PayloadKind::DaytimerStates | PayloadKind::WeatherStates => {
                Ok(FrameOutput::Skipped(kind))
            }
            // Unreachable by construction: only payload kinds are stored.
            other => Ok(FrameOutput::Skipped(other)),
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
