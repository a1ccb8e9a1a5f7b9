//! Record types produced by a reader and consumed by the bulk writer.
//!
//! None of these carry the surrogate `Id`: storage assigns it on insert.

use crate::gar::kind::EntityKind;

/// Top-level addressable object (`AS_ADDR_OBJ`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressObject {
    pub object_id: i64,
    pub full_name: String,
}

/// Apartment inside a building (`AS_APARTMENTS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apartment {
    pub object_id: i64,
    pub full_name: String,
}

/// Lineage path of an object in the administrative hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub object_id: i64,
    pub path: String,
}

/// Building-level record (`AS_HOUSES`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct House {
    pub object_id: i64,
    pub full_name: String,
}

/// Room inside a house (`AS_ROOMS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub object_id: i64,
    pub full_name: String,
}

/// Land parcel (`AS_STEADS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stead {
    pub object_id: i64,
    pub full_name: String,
}

/// One bounded batch of records of a single kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityBatch {
    Addresses(Vec<AddressObject>),
    Apartments(Vec<Apartment>),
    Hierarchies(Vec<Hierarchy>),
    Houses(Vec<House>),
    Rooms(Vec<Room>),
    Steads(Vec<Stead>),
}

impl EntityBatch {
    /// Empty batch of the given kind, used by readers as an accumulator.
    pub fn empty(kind: EntityKind, capacity: usize) -> Self {
        match kind {
            EntityKind::Addresses => EntityBatch::Addresses(Vec::with_capacity(capacity)),
            EntityKind::Apartments => EntityBatch::Apartments(Vec::with_capacity(capacity)),
            EntityKind::Hierarchies => EntityBatch::Hierarchies(Vec::with_capacity(capacity)),
            EntityKind::Houses => EntityBatch::Houses(Vec::with_capacity(capacity)),
            EntityKind::Rooms => EntityBatch::Rooms(Vec::with_capacity(capacity)),
            EntityKind::Steads => EntityBatch::Steads(Vec::with_capacity(capacity)),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBatch::Addresses(_) => EntityKind::Addresses,
            EntityBatch::Apartments(_) => EntityKind::Apartments,
            EntityBatch::Hierarchies(_) => EntityKind::Hierarchies,
            EntityBatch::Houses(_) => EntityKind::Houses,
            EntityBatch::Rooms(_) => EntityKind::Rooms,
            EntityBatch::Steads(_) => EntityKind::Steads,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityBatch::Addresses(rows) => rows.len(),
            EntityBatch::Apartments(rows) => rows.len(),
            EntityBatch::Hierarchies(rows) => rows.len(),
            EntityBatch::Houses(rows) => rows.len(),
            EntityBatch::Rooms(rows) => rows.len(),
            EntityBatch::Steads(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record given its natural key and text value.
    ///
    /// The text lands in `FullName`, or in `Path` for hierarchies.
    pub fn push(&mut self, object_id: i64, text: String) {
        match self {
            EntityBatch::Addresses(rows) => rows.push(AddressObject {
                object_id,
                full_name: text,
            }),
            EntityBatch::Apartments(rows) => rows.push(Apartment {
                object_id,
                full_name: text,
            }),
            EntityBatch::Hierarchies(rows) => rows.push(Hierarchy {
                object_id,
                path: text,
            }),
            EntityBatch::Houses(rows) => rows.push(House {
                object_id,
                full_name: text,
            }),
            EntityBatch::Rooms(rows) => rows.push(Room {
                object_id,
                full_name: text,
            }),
            EntityBatch::Steads(rows) => rows.push(Stead {
                object_id,
                full_name: text,
            }),
        }
    }
}
