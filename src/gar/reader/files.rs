//! Discovery of GAR export members.
//!
//! An export is either the delivered `.zip` archive or a directory it was
//! extracted into. Reference catalogues (type lists) sit at the root and
//! entity files inside per-region directories:
//!
//! ```text
//! gar/
//!   AS_HOUSE_TYPES_20240101_<guid>.XML
//!   77/AS_ADDR_OBJ_20240101_<guid>.XML
//!   77/AS_HOUSES_20240101_<guid>.XML.gz
//! ```
//!
//! Members may be gzip-compressed (`.gz`). Parameter and division files that
//! share a prefix with an entity file (`AS_HOUSES_PARAMS_...`) are ignored.

use crate::gar::kind::EntityKind;
use flate2::read::{DeflateDecoder, MultiGzDecoder};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::{CompressionMethod, ZipArchive};

const READ_BUFFER_BYTES: usize = 1024 * 1024;

static MEMBER_REGEX: OnceLock<Regex> = OnceLock::new();

fn member_regex() -> &'static Regex {
    MEMBER_REGEX.get_or_init(|| {
        Regex::new(
            r"^AS_(ADDR_OBJ|APARTMENTS|ADM_HIERARCHY|HOUSES|ROOMS|STEADS|HOUSE_TYPES|ADDHOUSE_TYPES|APARTMENT_TYPES|ROOM_TYPES)_\d{8}_.*\.XML(\.GZ)?$",
        )
        .expect("Invalid GAR member regex")
    })
}

/// What a member file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Entity(EntityKind),
    HouseTypes,
    AddHouseTypes,
    ApartmentTypes,
    RoomTypes,
}

/// Classify a member by its file name (case-insensitive).
pub fn classify(file_name: &str) -> Option<MemberKind> {
    let upper = file_name.to_ascii_uppercase();
    let captures = member_regex().captures(&upper)?;

    let kind = match captures.get(1)?.as_str() {
        "ADDR_OBJ" => MemberKind::Entity(EntityKind::Addresses),
        "APARTMENTS" => MemberKind::Entity(EntityKind::Apartments),
        "ADM_HIERARCHY" => MemberKind::Entity(EntityKind::Hierarchies),
        "HOUSES" => MemberKind::Entity(EntityKind::Houses),
        "ROOMS" => MemberKind::Entity(EntityKind::Rooms),
        "STEADS" => MemberKind::Entity(EntityKind::Steads),
        "HOUSE_TYPES" => MemberKind::HouseTypes,
        "ADDHOUSE_TYPES" => MemberKind::AddHouseTypes,
        "APARTMENT_TYPES" => MemberKind::ApartmentTypes,
        "ROOM_TYPES" => MemberKind::RoomTypes,
        _ => return None,
    };

    Some(kind)
}

/// Where the bytes of one member live.
///
/// Zip entries carry the location of their compressed data so each one can
/// be streamed through its own file handle, independent of the archive index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemberSource {
    File(PathBuf),
    ZipEntry {
        archive: PathBuf,
        name: String,
        data_start: u64,
        compressed_size: u64,
        deflated: bool,
    },
}

impl fmt::Display for MemberSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberSource::File(path) => write!(f, "{}", path.display()),
            MemberSource::ZipEntry { archive, name, .. } => {
                write!(f, "{}!{}", archive.display(), name)
            }
        }
    }
}

pub fn is_zip_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false)
}

/// Members of one export, grouped by kind and sorted by location.
#[derive(Debug, Default)]
pub struct ArchiveLayout {
    members: HashMap<MemberKind, Vec<MemberSource>>,
}

impl ArchiveLayout {
    /// Scan a directory recursively, or list the entries of a `.zip` archive.
    ///
    /// When `regions` is given, only those top-level directories are
    /// descended into; files at the root are always considered.
    pub fn discover(root: &Path, regions: Option<&[String]>) -> io::Result<Self> {
        let mut layout = ArchiveLayout::default();

        if is_zip_archive(root) {
            layout.scan_zip(root, regions)?;
        } else {
            layout.scan_root(root, regions)?;
        }

        for sources in layout.members.values_mut() {
            sources.sort();
        }

        Ok(layout)
    }

    fn scan_root(&mut self, root: &Path, regions: Option<&[String]>) -> io::Result<()> {
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();

            if entry.file_type()?.is_dir() {
                let dir_name = entry.file_name().to_string_lossy().to_string();
                let wanted = regions
                    .map(|list| list.iter().any(|region| region == &dir_name))
                    .unwrap_or(true);
                if wanted {
                    self.scan_dir(&path)?;
                }
            } else {
                self.add_file(path);
            }
        }
        Ok(())
    }

    fn scan_dir(&mut self, dir: &Path) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.scan_dir(&path)?;
            } else {
                self.add_file(path);
            }
        }
        Ok(())
    }

    fn add_file(&mut self, path: PathBuf) {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return;
        };
        if let Some(kind) = classify(&name) {
            self.members
                .entry(kind)
                .or_default()
                .push(MemberSource::File(path));
        }
    }

    /// Entry names are `<region>/<file>` or `<file>`; only the file name is
    /// classified.
    fn scan_zip(&mut self, archive_path: &Path, regions: Option<&[String]>) -> io::Result<()> {
        let mut archive = ZipArchive::new(File::open(archive_path)?).map_err(io::Error::other)?;

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(io::Error::other)?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let mut components: Vec<&str> = name.split('/').filter(|c| !c.is_empty()).collect();
            let Some(file_name) = components.pop() else {
                continue;
            };
            if let (Some(list), Some(region)) = (regions, components.first()) {
                if !list.iter().any(|wanted| wanted == region) {
                    continue;
                }
            }
            let Some(kind) = classify(file_name) else {
                continue;
            };

            let deflated = match entry.compression() {
                CompressionMethod::Stored => false,
                CompressionMethod::Deflated => true,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("{name}: unsupported compression method {other:?}"),
                    ));
                }
            };

            self.members
                .entry(kind)
                .or_default()
                .push(MemberSource::ZipEntry {
                    archive: archive_path.to_path_buf(),
                    data_start: entry.data_start(),
                    compressed_size: entry.compressed_size(),
                    deflated,
                    name,
                });
        }

        Ok(())
    }

    pub fn members(&self, kind: MemberKind) -> &[MemberSource] {
        self.members.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity_members(&self, kind: EntityKind) -> &[MemberSource] {
        self.members(MemberKind::Entity(kind))
    }
}

fn has_gz_suffix(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".gz")
}

fn buffered<R: Read + Send + 'static>(source: R, gzip: bool) -> Box<dyn BufRead + Send> {
    if gzip {
        Box::new(BufReader::with_capacity(
            READ_BUFFER_BYTES,
            MultiGzDecoder::new(source),
        ))
    } else {
        Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, source))
    }
}

/// Open a member for buffered reading, decompressing `.gz` and deflated zip
/// entries transparently.
pub(crate) fn open_member(member: &MemberSource) -> io::Result<Box<dyn BufRead + Send>> {
    match member {
        MemberSource::File(path) => {
            let file = File::open(path)?;
            Ok(buffered(file, has_gz_suffix(&path.to_string_lossy())))
        }
        MemberSource::ZipEntry {
            archive,
            name,
            data_start,
            compressed_size,
            deflated,
        } => {
            let mut file = File::open(archive)?;
            file.seek(SeekFrom::Start(*data_start))?;
            let raw = file.take(*compressed_size);
            let body: Box<dyn Read + Send> = if *deflated {
                Box::new(DeflateDecoder::new(raw))
            } else {
                Box::new(raw)
            };
            Ok(buffered(body, has_gz_suffix(name)))
        }
    }
}
