//! Streaming reader over a GAR export, zipped or extracted.
//!
//! Each entity kind gets its own record stream walking that kind's members
//! one after another. A stream keeps a single open member and one look-ahead
//! record, so `can_read` is answered without touching disk and memory stays
//! bounded by one batch per call.
//!
//! File reads, decompression and parsing are blocking; they run on tokio's
//! blocking pool and the stream is handed back when the batch is full.

use super::BatchReader;
use super::files::{ArchiveLayout, MemberKind, MemberSource, is_zip_archive, open_member};
use crate::gar::entities::EntityBatch;
use crate::gar::error::ImportError;
use crate::gar::kind::EntityKind;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::{HashMap, VecDeque};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Tuning knobs for [`GarXmlReader`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Maximum records per batch.
    pub batch_size: usize,
    /// Skip records flagged `ISACTIVE="0"` or `ISACTUAL="0"`.
    pub active_only: bool,
    /// Restrict discovery to these region directories.
    pub regions: Option<Vec<String>>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            active_only: false,
            regions: None,
        }
    }
}

/// ID → short name lookups used to render `FullName`.
#[derive(Debug, Default)]
struct TypeCatalog {
    house: HashMap<i64, String>,
    add_house: HashMap<i64, String>,
    apartment: HashMap<i64, String>,
    room: HashMap<i64, String>,
}

impl TypeCatalog {
    fn load(layout: &ArchiveLayout) -> Result<Self, String> {
        Ok(Self {
            house: load_types(layout.members(MemberKind::HouseTypes))?,
            add_house: load_types(layout.members(MemberKind::AddHouseTypes))?,
            apartment: load_types(layout.members(MemberKind::ApartmentTypes))?,
            room: load_types(layout.members(MemberKind::RoomTypes))?,
        })
    }
}

/// Parsed record before it is pushed into a batch.
type Record = (i64, String);

struct MemberParser {
    member: MemberSource,
    xml: Reader<Box<dyn BufRead + Send>>,
    buf: Vec<u8>,
}

impl MemberParser {
    fn open(member: MemberSource) -> std::io::Result<Self> {
        let source = open_member(&member)?;
        let mut xml = Reader::from_reader(source);
        xml.config_mut().trim_text(true);
        Ok(Self {
            member,
            xml,
            buf: Vec::with_capacity(8192),
        })
    }
}

struct RecordStream {
    kind: EntityKind,
    pending: VecDeque<MemberSource>,
    current: Option<MemberParser>,
    lookahead: Option<Record>,
}

impl RecordStream {
    fn new(kind: EntityKind, members: &[MemberSource]) -> Self {
        Self {
            kind,
            pending: members.iter().cloned().collect(),
            current: None,
            lookahead: None,
        }
    }

    /// Pull the next record, moving on to the next member at EOF.
    fn next_record(
        &mut self,
        types: &TypeCatalog,
        active_only: bool,
    ) -> Result<Option<Record>, ImportError> {
        let element = record_element(self.kind);

        loop {
            if self.current.is_none() {
                let Some(member) = self.pending.pop_front() else {
                    return Ok(None);
                };
                log::debug!("{}: opening {}", self.kind, member);
                let parser = MemberParser::open(member.clone())
                    .map_err(|e| ImportError::read(self.kind, format!("{}: {}", member, e)))?;
                self.current = Some(parser);
            }
            let Some(parser) = self.current.as_mut() else {
                continue;
            };

            parser.buf.clear();
            let step = {
                let event = parser.xml.read_event_into(&mut parser.buf).map_err(|e| {
                    ImportError::read(self.kind, format!("{}: {}", parser.member, e))
                })?;

                match event {
                    Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == element => {
                        Some(build_record(self.kind, e, types, active_only).map_err(
                            |message| {
                                ImportError::read(
                                    self.kind,
                                    format!("{}: {}", parser.member, message),
                                )
                            },
                        )?)
                    }
                    Event::Eof => None,
                    _ => continue,
                }
            };

            match step {
                Some(Some(record)) => return Ok(Some(record)),
                Some(None) => continue,
                None => {
                    self.current = None;
                }
            }
        }
    }

    /// Build one batch starting from the look-ahead, then prefetch the next
    /// look-ahead.
    fn fill(
        &mut self,
        batch_size: usize,
        types: &TypeCatalog,
        active_only: bool,
    ) -> Result<EntityBatch, ImportError> {
        let first = self
            .lookahead
            .take()
            .ok_or_else(|| ImportError::read(self.kind, "no records left"))?;

        let mut batch = EntityBatch::empty(self.kind, batch_size);
        batch.push(first.0, first.1);

        while batch.len() < batch_size {
            match self.next_record(types, active_only)? {
                Some((object_id, text)) => batch.push(object_id, text),
                None => break,
            }
        }

        self.lookahead = self.next_record(types, active_only)?;
        Ok(batch)
    }
}

fn record_element(kind: EntityKind) -> &'static [u8] {
    match kind {
        EntityKind::Addresses => b"OBJECT",
        EntityKind::Apartments => b"APARTMENT",
        EntityKind::Hierarchies => b"ITEM",
        EntityKind::Houses => b"HOUSE",
        EntityKind::Rooms => b"ROOM",
        EntityKind::Steads => b"STEAD",
    }
}

/// Attribute values of one element, keyed by attribute name.
fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, String> {
    let mut values = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        values.insert(key, value.into_owned());
    }
    Ok(values)
}

fn join_parts<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn lookup<'a>(
    catalog: &'a HashMap<i64, String>,
    attrs: &HashMap<String, String>,
    key: &str,
) -> Option<&'a str> {
    attrs
        .get(key)
        .and_then(|id| id.trim().parse::<i64>().ok())
        .and_then(|id| catalog.get(&id))
        .map(String::as_str)
}

/// Turn one element into a record; `Ok(None)` when it is filtered out.
fn build_record(
    kind: EntityKind,
    element: &BytesStart<'_>,
    types: &TypeCatalog,
    active_only: bool,
) -> Result<Option<Record>, String> {
    let attrs = attributes(element)?;

    if active_only {
        let inactive = ["ISACTIVE", "ISACTUAL"]
            .iter()
            .any(|flag| attrs.get(*flag).map(|v| v.trim() == "0").unwrap_or(false));
        if inactive {
            return Ok(None);
        }
    }

    let object_id = attrs
        .get("OBJECTID")
        .ok_or_else(|| "record without OBJECTID".to_string())?;
    let object_id: i64 = object_id
        .trim()
        .parse()
        .map_err(|_| format!("invalid OBJECTID '{object_id}'"))?;

    let get = |key: &str| attrs.get(key).map(String::as_str);

    let text = match kind {
        EntityKind::Addresses => join_parts([get("TYPENAME"), get("NAME")]),
        EntityKind::Apartments => {
            join_parts([lookup(&types.apartment, &attrs, "APARTTYPE"), get("NUMBER")])
        }
        EntityKind::Houses => {
            let mut parts = vec![lookup(&types.house, &attrs, "HOUSETYPE"), get("HOUSENUM")];
            for (num, ty) in [("ADDNUM1", "ADDTYPE1"), ("ADDNUM2", "ADDTYPE2")] {
                if get(num).is_some() {
                    parts.push(lookup(&types.add_house, &attrs, ty));
                    parts.push(get(num));
                }
            }
            join_parts(parts)
        }
        EntityKind::Rooms => join_parts([lookup(&types.room, &attrs, "ROOMTYPE"), get("NUMBER")]),
        EntityKind::Steads => join_parts([get("NUMBER")]),
        EntityKind::Hierarchies => get("PATH")
            .map(|path| path.trim().to_string())
            .ok_or_else(|| format!("hierarchy item {object_id} without PATH"))?,
    };

    Ok(Some((object_id, text)))
}

fn load_types(members: &[MemberSource]) -> Result<HashMap<i64, String>, String> {
    let mut catalog = HashMap::new();

    for member in members {
        load_types_from(member, &mut catalog).map_err(|e| format!("{}: {}", member, e))?;
    }

    Ok(catalog)
}

fn load_types_from(
    member: &MemberSource,
    catalog: &mut HashMap<i64, String>,
) -> Result<(), String> {
    let source = open_member(member).map_err(|e| e.to_string())?;
    let mut xml = Reader::from_reader(source);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Empty(ref e) | Event::Start(ref e) => {
                let attrs = attributes(e)?;
                if let Some(id) = attrs.get("ID") {
                    let id: i64 = id
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid type ID '{id}'"))?;
                    let name = attrs
                        .get("SHORTNAME")
                        .filter(|short| !short.trim().is_empty())
                        .or_else(|| attrs.get("NAME"))
                        .cloned()
                        .unwrap_or_default();
                    catalog.insert(id, name);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Discover members, load the type catalogues and prime every kind's
/// look-ahead.
fn open_export(
    root: &Path,
    options: &ReaderOptions,
) -> Result<(TypeCatalog, HashMap<EntityKind, RecordStream>), ImportError> {
    if !root.is_dir() && !is_zip_archive(root) {
        return Err(ImportError::ReaderInitialization(format!(
            "{} is neither a data directory nor a .zip archive",
            root.display()
        )));
    }

    let layout = ArchiveLayout::discover(root, options.regions.as_deref())
        .map_err(|e| ImportError::ReaderInitialization(format!("{}: {}", root.display(), e)))?;

    let types = TypeCatalog::load(&layout).map_err(ImportError::ReaderInitialization)?;
    log::info!(
        "type catalogs loaded: {} house, {} add-house, {} apartment, {} room types",
        types.house.len(),
        types.add_house.len(),
        types.apartment.len(),
        types.room.len()
    );

    let mut streams = HashMap::new();
    for kind in EntityKind::IMPORT_ORDER {
        let members = layout.entity_members(kind);
        log::info!("{}: {} member files", kind, members.len());

        let mut stream = RecordStream::new(kind, members);
        stream.lookahead = stream
            .next_record(&types, options.active_only)
            .map_err(|e| ImportError::ReaderInitialization(e.to_string()))?;
        streams.insert(kind, stream);
    }

    Ok((types, streams))
}

/// [`BatchReader`] over a GAR export: the delivered `.zip` archive or the
/// directory it was extracted into.
pub struct GarXmlReader {
    root: PathBuf,
    options: ReaderOptions,
    types: Arc<TypeCatalog>,
    streams: HashMap<EntityKind, RecordStream>,
    initialized: bool,
}

impl GarXmlReader {
    pub fn new(root: impl Into<PathBuf>, options: ReaderOptions) -> Self {
        Self {
            root: root.into(),
            options,
            types: Arc::default(),
            streams: HashMap::new(),
            initialized: false,
        }
    }
}

#[async_trait]
impl BatchReader for GarXmlReader {
    async fn initialize(&mut self) -> Result<(), ImportError> {
        if self.initialized {
            return Err(ImportError::ReaderInitialization(
                "reader was already initialized".to_string(),
            ));
        }

        let root = self.root.clone();
        let options = self.options.clone();
        let (types, streams) = tokio::task::spawn_blocking(move || open_export(&root, &options))
            .await
            .map_err(|e| {
                ImportError::ReaderInitialization(format!("reader task failed: {}", e))
            })??;

        self.types = Arc::new(types);
        self.streams = streams;
        self.initialized = true;
        Ok(())
    }

    fn can_read(&self, kind: EntityKind) -> bool {
        self.streams
            .get(&kind)
            .map(|stream| stream.lookahead.is_some())
            .unwrap_or(false)
    }

    async fn read(&mut self, kind: EntityKind) -> Result<EntityBatch, ImportError> {
        let batch_size = self.options.batch_size.max(1);
        let active_only = self.options.active_only;
        let types = Arc::clone(&self.types);
        let mut stream = self
            .streams
            .remove(&kind)
            .ok_or_else(|| ImportError::read(kind, "reader is not initialized"))?;

        let (stream, batch) = tokio::task::spawn_blocking(move || {
            let batch = stream.fill(batch_size, &types, active_only);
            (stream, batch)
        })
        .await
        .map_err(|e| ImportError::read(kind, format!("reader task failed: {}", e)))?;

        self.streams.insert(kind, stream);
        batch
    }

    fn release(&mut self) {
        if !self.streams.is_empty() {
            log::debug!("releasing reader over {}", self.root.display());
        }
        self.streams.clear();
        self.types = Arc::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::BytesStart;

    fn element(xml: &str) -> BytesStart<'static> {
        let mut reader = Reader::from_str(xml);
        match reader.read_event().expect("valid xml") {
            Event::Empty(e) | Event::Start(e) => e.into_owned(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn address_full_name_joins_type_and_name() {
        let e = element(r#"<OBJECT ID="1" OBJECTID="1460768" NAME="Ленина" TYPENAME="ул" ISACTIVE="1"/>"#);
        let record = build_record(EntityKind::Addresses, &e, &TypeCatalog::default(), false)
            .expect("record parses");
        assert_eq!(record, Some((1460768, "ул Ленина".to_string())));
    }

    #[test]
    fn house_full_name_uses_type_catalogs() {
        let mut types = TypeCatalog::default();
        types.house.insert(2, "д.".to_string());
        types.add_house.insert(1, "корп.".to_string());

        let e = element(r#"<HOUSE ID="9" OBJECTID="55" HOUSENUM="12" HOUSETYPE="2" ADDNUM1="3" ADDTYPE1="1"/>"#);
        let record = build_record(EntityKind::Houses, &e, &types, false).expect("record parses");
        assert_eq!(record, Some((55, "д. 12 корп. 3".to_string())));
    }

    #[test]
    fn inactive_records_are_skipped_only_when_requested() {
        let e = element(r#"<STEAD ID="1" OBJECTID="7" NUMBER="15" ISACTUAL="0" ISACTIVE="1"/>"#);
        let types = TypeCatalog::default();

        assert_eq!(build_record(EntityKind::Steads, &e, &types, true), Ok(None));
        assert_eq!(
            build_record(EntityKind::Steads, &e, &types, false),
            Ok(Some((7, "15".to_string())))
        );
    }

    #[test]
    fn missing_object_id_is_an_error() {
        let e = element(r#"<ROOM ID="1" NUMBER="4"/>"#);
        let result = build_record(EntityKind::Rooms, &e, &TypeCatalog::default(), false);
        assert!(result.unwrap_err().contains("OBJECTID"));
    }

    #[test]
    fn hierarchy_requires_path() {
        let e = element(r#"<ITEM ID="1" OBJECTID="3" PARENTOBJID="2"/>"#);
        let result = build_record(EntityKind::Hierarchies, &e, &TypeCatalog::default(), false);
        assert!(result.unwrap_err().contains("PATH"));
    }
}
