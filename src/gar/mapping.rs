//! Declarative field mappings for `COPY ... FROM STDIN`.
//!
//! A [`TableMapping`] binds each record field to a target column and type.
//! It only knows how to describe the `COPY` statement and how to encode a
//! row in PostgreSQL's text copy format; it never talks to the database.

use crate::gar::entities::{AddressObject, Apartment, Hierarchy, House, Room, Stead};
use crate::gar::kind::EntityKind;

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Column types understood by the bulk writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

enum FieldAccessor<T> {
    Integer(fn(&T) -> i64),
    Text(fn(&T) -> &str),
}

/// A single field → column binding.
pub struct ColumnMapping<T> {
    name: &'static str,
    accessor: FieldAccessor<T>,
}

impl<T> ColumnMapping<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column_type(&self) -> ColumnType {
        match self.accessor {
            FieldAccessor::Integer(_) => ColumnType::Integer,
            FieldAccessor::Text(_) => ColumnType::Text,
        }
    }
}

/// Shape of a bulk insert into one table.
pub struct TableMapping<T> {
    schema: String,
    table: &'static str,
    columns: Vec<ColumnMapping<T>>,
}

impl<T> TableMapping<T> {
    pub fn new(schema: impl Into<String>, table: &'static str) -> Self {
        Self {
            schema: schema.into(),
            table,
            columns: Vec::new(),
        }
    }

    pub fn map_integer(mut self, column: &'static str, accessor: fn(&T) -> i64) -> Self {
        self.columns.push(ColumnMapping {
            name: column,
            accessor: FieldAccessor::Integer(accessor),
        });
        self
    }

    pub fn map_text(mut self, column: &'static str, accessor: fn(&T) -> &str) -> Self {
        self.columns.push(ColumnMapping {
            name: column,
            accessor: FieldAccessor::Text(accessor),
        });
        self
    }

    pub fn columns(&self) -> &[ColumnMapping<T>] {
        &self.columns
    }

    /// `"schema"."table"`, ready to embed in SQL.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(self.table))
    }

    pub fn copy_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| quote_ident(column.name))
            .collect::<Vec<_>>()
            .join(", ");

        format!("COPY {} ({}) FROM STDIN", self.qualified_table(), columns)
    }

    /// Append one row in text copy format (tab separated, newline terminated).
    pub fn encode_row(&self, row: &T, out: &mut String) {
        for (index, column) in self.columns.iter().enumerate() {
            if index > 0 {
                out.push('\t');
            }
            match column.accessor {
                FieldAccessor::Integer(get) => out.push_str(&get(row).to_string()),
                FieldAccessor::Text(get) => escape_copy_text(get(row), out),
            }
        }
        out.push('\n');
    }
}

/// Escape a value for the text copy format.
///
/// NUL bytes are dropped because PostgreSQL text columns cannot hold them.
fn escape_copy_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => {}
            other => out.push(other),
        }
    }
}

/// Mappings for every entity kind, bound to one target schema.
pub struct FieldMappings {
    pub addresses: TableMapping<AddressObject>,
    pub apartments: TableMapping<Apartment>,
    pub hierarchies: TableMapping<Hierarchy>,
    pub houses: TableMapping<House>,
    pub rooms: TableMapping<Room>,
    pub steads: TableMapping<Stead>,
}

/// One kind's mapping, borrowed from [`FieldMappings`].
#[derive(Clone, Copy)]
pub enum KindMapping<'a> {
    Addresses(&'a TableMapping<AddressObject>),
    Apartments(&'a TableMapping<Apartment>),
    Hierarchies(&'a TableMapping<Hierarchy>),
    Houses(&'a TableMapping<House>),
    Rooms(&'a TableMapping<Room>),
    Steads(&'a TableMapping<Stead>),
}

impl KindMapping<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            KindMapping::Addresses(_) => EntityKind::Addresses,
            KindMapping::Apartments(_) => EntityKind::Apartments,
            KindMapping::Hierarchies(_) => EntityKind::Hierarchies,
            KindMapping::Houses(_) => EntityKind::Houses,
            KindMapping::Rooms(_) => EntityKind::Rooms,
            KindMapping::Steads(_) => EntityKind::Steads,
        }
    }

    pub fn copy_statement(&self) -> String {
        match self {
            KindMapping::Addresses(m) => m.copy_statement(),
            KindMapping::Apartments(m) => m.copy_statement(),
            KindMapping::Hierarchies(m) => m.copy_statement(),
            KindMapping::Houses(m) => m.copy_statement(),
            KindMapping::Rooms(m) => m.copy_statement(),
            KindMapping::Steads(m) => m.copy_statement(),
        }
    }
}

impl FieldMappings {
    pub fn for_kind(&self, kind: EntityKind) -> KindMapping<'_> {
        match kind {
            EntityKind::Addresses => KindMapping::Addresses(&self.addresses),
            EntityKind::Apartments => KindMapping::Apartments(&self.apartments),
            EntityKind::Hierarchies => KindMapping::Hierarchies(&self.hierarchies),
            EntityKind::Houses => KindMapping::Houses(&self.houses),
            EntityKind::Rooms => KindMapping::Rooms(&self.rooms),
            EntityKind::Steads => KindMapping::Steads(&self.steads),
        }
    }

    /// Every kind's mapping, in [`EntityKind::IMPORT_ORDER`].
    pub fn in_import_order(&self) -> [KindMapping<'_>; 6] {
        EntityKind::IMPORT_ORDER.map(|kind| self.for_kind(kind))
    }

    pub fn new(schema: &str) -> Self {
        Self {
            addresses: TableMapping::new(schema, EntityKind::Addresses.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("FullName", |row| row.full_name.as_str()),
            apartments: TableMapping::new(schema, EntityKind::Apartments.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("FullName", |row| row.full_name.as_str()),
            hierarchies: TableMapping::new(schema, EntityKind::Hierarchies.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("Path", |row| row.path.as_str()),
            houses: TableMapping::new(schema, EntityKind::Houses.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("FullName", |row| row.full_name.as_str()),
            rooms: TableMapping::new(schema, EntityKind::Rooms.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("FullName", |row| row.full_name.as_str()),
            steads: TableMapping::new(schema, EntityKind::Steads.table_name())
                .map_integer("ObjectId", |row| row.object_id)
                .map_text("FullName", |row| row.full_name.as_str()),
        }
    }
}
