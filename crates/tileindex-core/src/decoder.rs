//! Event decoder — classifies raw contract logs into [`DomainEvent`]s.
//!
//! Each known event is described by an [`EventShape`]: its canonical
//! signature and the layouts its arguments may be encoded in. Shapes are tried
//! in a fixed order (`ItemPlaced` before `ItemUpdated`) and the first
//! structural match wins. A log that matches no shape is dropped, never an
//! error, so new contract events do not break ingestion. Arguments are decoded
//! with alloy's dynamic ABI types.
//!
//! ```text
//! ItemPlaced(address,uint16,uint16,uint8)
//!   player indexed:     topics = [sig, player]   data = [x, y, itemId]
//!   player not indexed: topics = [sig]           data = [player, x, y, itemId]
//! ```

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, U256};

use crate::error::IndexerError;
use crate::event::{DomainEvent, EventKind, EventMeta};
use crate::types::RawLog;

pub const ITEM_PLACED_SIGNATURE: &str = "ItemPlaced(address,uint16,uint16,uint8)";
pub const ITEM_UPDATED_SIGNATURE: &str = "ItemUpdated(address,uint16,uint16,uint8)";

const WORD: usize = 32;

/// Compute the keccak256 topic of an event signature string.
pub fn keccak256_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

// ─── EventShape ──────────────────────────────────────────────────────────────

/// A known event signature and its precomputed topic0.
#[derive(Debug, Clone)]
pub struct EventShape {
    pub kind: EventKind,
    pub signature: &'static str,
    pub topic0: String,
}

impl EventShape {
    fn new(kind: EventKind, signature: &'static str) -> Self {
        Self {
            kind,
            signature,
            topic0: keccak256_topic(signature),
        }
    }
}

// ─── EventDecoder ────────────────────────────────────────────────────────────

/// Decodes logs emitted by one contract.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    contract: String,
    shapes: Vec<EventShape>,
}

impl EventDecoder {
    /// Create a decoder for logs emitted by `contract` (`0x…`, any case).
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into().to_ascii_lowercase(),
            shapes: vec![
                EventShape::new(EventKind::ItemPlaced, ITEM_PLACED_SIGNATURE),
                EventShape::new(EventKind::ItemUpdated, ITEM_UPDATED_SIGNATURE),
            ],
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Known shapes, in match order.
    pub fn shapes(&self) -> &[EventShape] {
        &self.shapes
    }

    /// topic0 values of all known events, for narrowing RPC log filters.
    pub fn topic0_values(&self) -> Vec<String> {
        self.shapes.iter().map(|s| s.topic0.clone()).collect()
    }

    /// Classify `raw`. Returns `None` for logs that match no known shape.
    ///
    /// A log whose topic0 is known but whose payload does not decode is
    /// skipped as well; the decode error is logged at debug level.
    pub fn decode(&self, raw: &RawLog) -> Option<DomainEvent> {
        if raw.removed {
            tracing::debug!(block = raw.block_number, tx = %raw.tx_hash, "skipping removed log");
            return None;
        }
        if !raw.address.eq_ignore_ascii_case(&self.contract) {
            tracing::debug!(address = %raw.address, "log from foreign contract");
            return None;
        }

        let topic0 = raw.topics.first().map(String::as_str).unwrap_or("");
        for shape in self.shapes.iter().filter(|s| topic0.eq_ignore_ascii_case(&s.topic0)) {
            match decode_shape(shape, raw) {
                Ok(event) => return Some(event),
                Err(e) => tracing::debug!(
                    block = raw.block_number,
                    tx = %raw.tx_hash,
                    log_index = raw.log_index,
                    signature = shape.signature,
                    error = %e,
                    "skipping undecodable log"
                ),
            }
        }

        tracing::debug!(
            block = raw.block_number,
            tx = %raw.tx_hash,
            topic0,
            "log matches no known event shape"
        );
        None
    }
}

/// Decode `raw` as `shape`, whose topic0 is already known to match.
fn decode_shape(shape: &EventShape, raw: &RawLog) -> Result<DomainEvent, IndexerError> {
    let data = decode_hex(&raw.data)?;

    let (player, fields) = match (raw.topics.len(), data.len()) {
        (2, len) if len == 3 * WORD => {
            let topic = decode_hex(&raw.topics[1])?;
            let player = abi_decode(&DynSolType::Address, &topic)?;
            let fields = abi_decode(
                &DynSolType::Tuple(vec![
                    DynSolType::Uint(16),
                    DynSolType::Uint(16),
                    DynSolType::Uint(8),
                ]),
                &data,
            )?;
            (player, tuple_values(fields)?)
        }
        (1, len) if len == 4 * WORD => {
            let mut values = tuple_values(abi_decode(
                &DynSolType::Tuple(vec![
                    DynSolType::Address,
                    DynSolType::Uint(16),
                    DynSolType::Uint(16),
                    DynSolType::Uint(8),
                ]),
                &data,
            )?)?;
            let player = values.remove(0);
            (player, values)
        }
        (topics, len) => {
            return Err(decode_error(format!(
                "{} topics and {len} data bytes match neither layout of {}",
                topics, shape.signature
            )))
        }
    };

    let player = match player {
        DynSolValue::Address(addr) => format!("0x{}", hex::encode(addr)),
        other => return Err(decode_error(format!("expected address, got {other:?}"))),
    };
    let [x, y, item] = fields.as_slice() else {
        return Err(decode_error(format!("expected 3 fields, got {}", fields.len())));
    };
    let x: u16 = uint_value(x, "x")?;
    let y: u16 = uint_value(y, "y")?;
    let item: u8 = uint_value(item, "itemId")?;

    let meta = EventMeta {
        block_number: raw.block_number,
        block_timestamp: raw.block_timestamp,
        tx_hash: raw.tx_hash.clone(),
        log_index: raw.log_index,
    };

    Ok(match shape.kind {
        EventKind::ItemPlaced => DomainEvent::ItemPlaced {
            player,
            x,
            y,
            item_id: item,
            meta,
        },
        EventKind::ItemUpdated => DomainEvent::ItemUpdated {
            player,
            x,
            y,
            new_item_id: item,
            meta,
        },
    })
}

// ─── ABI helpers ─────────────────────────────────────────────────────────────

fn decode_error(reason: impl Into<String>) -> IndexerError {
    IndexerError::Decode {
        reason: reason.into(),
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, IndexerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| decode_error(format!("invalid hex {s:?}: {e}")))
}

fn abi_decode(ty: &DynSolType, bytes: &[u8]) -> Result<DynSolValue, IndexerError> {
    ty.abi_decode(bytes)
        .map_err(|e| decode_error(format!("{}: {e}", ty.sol_type_name())))
}

fn tuple_values(value: DynSolValue) -> Result<Vec<DynSolValue>, IndexerError> {
    match value {
        DynSolValue::Tuple(values) => Ok(values),
        other => Err(decode_error(format!("expected tuple, got {other:?}"))),
    }
}

/// A decoded `uintN` narrowed to its declared width. The ABI decoder reads
/// the full word, so dirty high bits surface here as an out-of-range value.
fn uint_value<T: TryFrom<U256>>(value: &DynSolValue, field: &str) -> Result<T, IndexerError> {
    match value {
        DynSolValue::Uint(v, _) => T::try_from(*v)
            .map_err(|_| decode_error(format!("{field} = {v} out of range"))),
        other => Err(decode_error(format!("{field}: expected uint, got {other:?}"))),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
