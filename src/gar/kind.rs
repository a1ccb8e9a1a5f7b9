//! Entity kinds of the GAR registry and their fixed import order.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::fmt;

/// One of the six record types carried by a GAR export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Addresses,
    Apartments,
    Hierarchies,
    Houses,
    Rooms,
    Steads,
}

impl EntityKind {
    /// Order in which an import run drains the kinds.
    pub const IMPORT_ORDER: [EntityKind; 6] = [
        EntityKind::Addresses,
        EntityKind::Apartments,
        EntityKind::Hierarchies,
        EntityKind::Houses,
        EntityKind::Rooms,
        EntityKind::Steads,
    ];

    /// Target table name (quoted as an identifier when used in SQL).
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Addresses => "AddressObject",
            EntityKind::Apartments => "Apartment",
            EntityKind::Hierarchies => "Hierarchy",
            EntityKind::Houses => "House",
            EntityKind::Rooms => "Room",
            EntityKind::Steads => "Stead",
        }
    }

    /// Name of the text column; hierarchies store a path instead of a name.
    pub fn text_column(self) -> &'static str {
        match self {
            EntityKind::Hierarchies => "Path",
            _ => "FullName",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Addresses => "addresses",
            EntityKind::Apartments => "apartments",
            EntityKind::Hierarchies => "hierarchies",
            EntityKind::Houses => "houses",
            EntityKind::Rooms => "rooms",
            EntityKind::Steads => "steads",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_order_starts_with_addresses_and_covers_every_kind() {
        assert_eq!(EntityKind::IMPORT_ORDER[0], EntityKind::Addresses);

        let mut tables: Vec<_> = EntityKind::IMPORT_ORDER
            .iter()
            .map(|kind| kind.table_name())
            .collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), 6);
    }

    #[test]
    fn only_hierarchies_use_path_column() {
        for kind in EntityKind::IMPORT_ORDER {
            let expected = if kind == EntityKind::Hierarchies {
                "Path"
            } else {
                "FullName"
            };
            assert_eq!(kind.text_column(), expected);
        }
    }
}
