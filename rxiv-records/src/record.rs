//! Streaming reader for OAI-PMH `oai_dc` export containers.
//!
//! A container is one XML file holding a `ListRecords` response. Records are
//! yielded lazily, one per `<record>` element, so memory use is bounded by the
//! size of a single record rather than the whole export.
//!
//! ```text
//! <OAI-PMH>
//!   <ListRecords>
//!     <record>
//!       <header><identifier>oai:arXiv.org:0704.0001</identifier>...</header>
//!       <metadata><oai_dc:dc><dc:title>...</dc:title>...</oai_dc:dc></metadata>
//!     </record>
//!   </ListRecords>
//! </OAI-PMH>
//! ```
//!
//! Elements are matched on their local name, so the `dc:` and `oai_dc:`
//! prefixes (or their absence) make no difference.

use crate::error::{RecordsError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// OAI-PMH record header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Namespaced identifier, e.g. `oai:arXiv.org:0704.0001`
    pub identifier: Option<String>,
    pub datestamp: Option<String>,
    pub set_specs: Vec<String>,
    /// `deleted` for tombstone records, which carry no metadata
    pub status: Option<String>,
}

/// Dublin Core fields of a record. Every field may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DublinCore {
    pub titles: Vec<String>,
    pub creators: Vec<String>,
    pub subjects: Vec<String>,
    pub descriptions: Vec<String>,
    /// Revision timestamps, oldest first
    pub dates: Vec<String>,
    pub types: Vec<String>,
    pub identifiers: Vec<String>,
}

/// One bibliographic record exactly as it appeared in the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub header: RecordHeader,
    /// `None` when the record had no `<metadata>` block
    pub metadata: Option<DublinCore>,
}

impl RawRecord {
    /// Header identifier, if present
    pub fn identifier(&self) -> Option<&str> {
        self.header.identifier.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    HeaderIdentifier,
    Datestamp,
    SetSpec,
    Title,
    Creator,
    Subject,
    Description,
    Date,
    Type,
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Header,
    Metadata,
}

/// Lazy iterator over the records of one container.
///
/// Yields `Err` once for a container-level failure (unreadable file or
/// malformed XML) and then stops.
pub struct RecordReader<R: BufRead> {
    reader: Reader<R>,
    path: PathBuf,
    buf: Vec<u8>,
    finished: bool,
}

impl RecordReader<BufReader<File>> {
    /// Open a container file for streaming.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| RecordsError::io(path, e))?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }
}

impl<R: BufRead> RecordReader<R> {
    /// Stream records from any buffered source. `label` is only used in errors.
    pub fn from_reader(source: R, label: impl Into<PathBuf>) -> Self {
        // Field text is kept verbatim, surrounding whitespace included.
        let reader = Reader::from_reader(source);
        Self {
            reader,
            path: label.into(),
            buf: Vec::new(),
            finished: false,
        }
    }

    fn xml_error(&self, source: quick_xml::Error) -> RecordsError {
        RecordsError::Xml {
            path: self.path.clone(),
            position: self.reader.buffer_position() as u64,
            source,
        }
    }

    fn read_record(&mut self) -> Result<Option<RawRecord>> {
        let mut record: Option<RawRecord> = None;
        let mut section = Section::Outside;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => return Err(self.xml_error(e)),
            };

            match event {
                Event::Start(start) => {
                    let name = start.local_name();
                    match name.as_ref() {
                        b"record" => {
                            record = Some(RawRecord::default());
                            section = Section::Outside;
                        }
                        b"header" if record.is_some() => {
                            section = Section::Header;
                            let status = self.attribute(&start, b"status")?;
                            if let Some(r) = record.as_mut() {
                                r.header.status = status;
                            }
                        }
                        b"metadata" if record.is_some() => {
                            section = Section::Metadata;
                            if let Some(r) = record.as_mut() {
                                r.metadata.get_or_insert_with(DublinCore::default);
                            }
                        }
                        // Markup nested inside a field keeps feeding that field.
                        local if record.is_some() && field.is_none() => {
                            field = classify(section, local);
                            text.clear();
                        }
                        _ => {}
                    }
                }
                Event::Empty(start) => {
                    // Self-closing elements carry no text but still count as present.
                    if let Some(r) = record.as_mut() {
                        match start.local_name().as_ref() {
                            b"metadata" => {
                                r.metadata.get_or_insert_with(DublinCore::default);
                            }
                            local => {
                                if let Some(f) = classify(section, local) {
                                    push_field(r, f, String::new());
                                }
                            }
                        }
                    }
                }
                Event::Text(t) if field.is_some() => {
                    let unescaped = t.unescape().map_err(|e| self.xml_error(e))?;
                    text.push_str(&unescaped);
                }
                Event::CData(c) if field.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                Event::End(end) => {
                    let name = end.local_name();
                    match name.as_ref() {
                        b"record" => {
                            if let Some(r) = record.take() {
                                return Ok(Some(r));
                            }
                        }
                        b"header" | b"metadata" => section = Section::Outside,
                        local => {
                            if let (Some(f), Some(r)) = (field, record.as_mut()) {
                                if classify(section, local) == Some(f) {
                                    push_field(r, f, std::mem::take(&mut text));
                                    field = None;
                                }
                            }
                        }
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn attribute(&self, start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
        let attr = start
            .try_get_attribute(key)
            .map_err(|e| self.xml_error(e.into()))?;
        match attr {
            Some(a) => {
                let value = a.unescape_value().map_err(|e| self.xml_error(e))?;
                Ok(Some(value.into_owned()))
            }
            None => Ok(None),
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn classify(section: Section, local: &[u8]) -> Option<Field> {
    match (section, local) {
        (Section::Header, b"identifier") => Some(Field::HeaderIdentifier),
        (Section::Header, b"datestamp") => Some(Field::Datestamp),
        (Section::Header, b"setSpec") => Some(Field::SetSpec),
        (Section::Metadata, b"title") => Some(Field::Title),
        (Section::Metadata, b"creator") => Some(Field::Creator),
        (Section::Metadata, b"subject") => Some(Field::Subject),
        (Section::Metadata, b"description") => Some(Field::Description),
        (Section::Metadata, b"date") => Some(Field::Date),
        (Section::Metadata, b"type") => Some(Field::Type),
        (Section::Metadata, b"identifier") => Some(Field::Identifier),
        _ => None,
    }
}

fn push_field(record: &mut RawRecord, field: Field, value: String) {
    let header = &mut record.header;
    match field {
        Field::HeaderIdentifier => header.identifier = Some(value),
        Field::Datestamp => header.datestamp = Some(value),
        Field::SetSpec => header.set_specs.push(value),
        _ => {
            let dc = record.metadata.get_or_insert_with(DublinCore::default);
            let list = match field {
                Field::Title => &mut dc.titles,
                Field::Creator => &mut dc.creators,
                Field::Subject => &mut dc.subjects,
                Field::Description => &mut dc.descriptions,
                Field::Date => &mut dc.dates,
                Field::Type => &mut dc.types,
                _ => &mut dc.identifiers,
            };
            list.push(value);
        }
    }
}

/// Read every record of a container eagerly.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
    RecordReader::open(path)?.collect()
}

/// List the `.xml` containers in a directory, sorted by file name.
pub fn list_containers(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| RecordsError::io(dir, e))?;

    let mut containers = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| RecordsError::io(dir, e))?.path();
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if path.is_file() && is_xml {
            containers.push(path);
        }
    }
    containers.sort();
    tracing::debug!("Found {} containers in {}", containers.len(), dir.display());
    Ok(containers)
}
