//! Typed domain events and the projection row they produce.

use serde::{Deserialize, Serialize};

// ─── EventMeta ───────────────────────────────────────────────────────────────

/// Chain position of the log an event was decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    /// Unix timestamp of the block, if known.
    pub block_timestamp: Option<i64>,
    pub tx_hash: String,
    /// Position of the log within its block.
    pub log_index: u32,
}

impl EventMeta {
    /// Total order of events on chain: `(block_number, log_index)`.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

// ─── DomainEvent ─────────────────────────────────────────────────────────────

/// The closed set of contract events the indexer understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ItemPlaced {
        /// Lowercase `0x`-prefixed address.
        player: String,
        x: u16,
        y: u16,
        item_id: u8,
        meta: EventMeta,
    },
    ItemUpdated {
        player: String,
        x: u16,
        y: u16,
        new_item_id: u8,
        meta: EventMeta,
    },
}

/// Discriminant of a [`DomainEvent`], used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ItemPlaced,
    ItemUpdated,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemPlaced => write!(f, "ItemPlaced"),
            Self::ItemUpdated => write!(f, "ItemUpdated"),
        }
    }
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ItemPlaced { .. } => EventKind::ItemPlaced,
            Self::ItemUpdated { .. } => EventKind::ItemUpdated,
        }
    }

    /// The grid cell this event writes.
    pub fn coordinate(&self) -> (u16, u16) {
        match self {
            Self::ItemPlaced { x, y, .. } | Self::ItemUpdated { x, y, .. } => (*x, *y),
        }
    }

    /// The item that occupies the cell after this event.
    pub fn item_id(&self) -> u8 {
        match self {
            Self::ItemPlaced { item_id, .. } => *item_id,
            Self::ItemUpdated { new_item_id, .. } => *new_item_id,
        }
    }

    pub fn player(&self) -> &str {
        match self {
            Self::ItemPlaced { player, .. } | Self::ItemUpdated { player, .. } => player,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::ItemPlaced { meta, .. } | Self::ItemUpdated { meta, .. } => meta,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.meta().block_number
    }
}

// ─── TileRow ─────────────────────────────────────────────────────────────────

/// One row of the persisted projection, keyed by `(x, y)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRow {
    pub x: u16,
    pub y: u16,
    pub player: String,
    pub item_id: u8,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
    /// Unix timestamp of the write.
    pub updated_at: i64,
}

impl TileRow {
    /// Build the row an event leaves behind. `ItemUpdated` is a full overwrite.
    pub fn from_event(event: &DomainEvent, updated_at: i64) -> Self {
        let (x, y) = event.coordinate();
        let meta = event.meta();
        Self {
            x,
            y,
            player: event.player().to_string(),
            item_id: event.item_id(),
            block_number: meta.block_number,
            log_index: meta.log_index,
            tx_hash: meta.tx_hash.clone(),
            updated_at,
        }
    }

    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// Returns `true` if `event` is strictly newer than the event that wrote
    /// this row. Equal or older events must leave the row untouched.
    pub fn is_superseded_by(&self, event: &DomainEvent) -> bool {
        event.meta().position() > self.position()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(block: u64, log_index: u32) -> EventMeta {
        EventMeta {
            block_number: block,
            block_timestamp: None,
            tx_hash: format!("0x{block:064x}"),
            log_index,
        }
    }

    #[test]
    fn accessors_cover_both_variants() {
        let placed = DomainEvent::ItemPlaced {
            player: "0xaa".into(),
            x: 3,
            y: 4,
            item_id: 2,
            meta: meta(50, 0),
        };
        let updated = DomainEvent::ItemUpdated {
            player: "0xbb".into(),
            x: 3,
            y: 4,
            new_item_id: 9,
            meta: meta(51, 1),
        };
        assert_eq!(placed.coordinate(), updated.coordinate());
        assert_eq!(placed.item_id(), 2);
        assert_eq!(updated.item_id(), 9);
        assert_eq!(updated.kind().to_string(), "ItemUpdated");
        assert_eq!(updated.block_number(), 51);
    }

    #[test]
    fn row_supersession_is_strict() {
        let placed = DomainEvent::ItemPlaced {
            player: "0xaa".into(),
            x: 1,
            y: 1,
            item_id: 2,
            meta: meta(50, 3),
        };
        let row = TileRow::from_event(&placed, 0);
        assert!(!row.is_superseded_by(&placed));

        let same_block_later = DomainEvent::ItemUpdated {
            player: "0xaa".into(),
            x: 1,
            y: 1,
            new_item_id: 7,
            meta: meta(50, 4),
        };
        assert!(row.is_superseded_by(&same_block_later));

        let older = DomainEvent::ItemUpdated {
            player: "0xaa".into(),
            x: 1,
            y: 1,
            new_item_id: 7,
            meta: meta(49, 9),
        };
        assert!(!row.is_superseded_by(&older));
    }

    #[test]
    fn serde_tagging() {
        let ev = DomainEvent::ItemPlaced {
            player: "0xaa".into(),
            x: 1,
            y: 2,
            item_id: 3,
            meta: meta(10, 0),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "item_placed");
        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }
}
