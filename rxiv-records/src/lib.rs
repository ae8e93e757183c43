//! # rxiv-records
//!
//! Reading side of the arXiv ingestion pipeline: streams OAI-PMH export
//! containers, validates each bibliographic record and flattens it into a
//! [`NormalizedDocument`] ready for encoding. Also parses the bulk-data
//! manifests that list the archive files of a collection.
//!
//! ```no_run
//! use rxiv_records::{RecordReader, extract_all};
//!
//! # fn example() -> rxiv_records::Result<()> {
//! let records = RecordReader::open("arxiv/xml/2023-05.xml")?.collect::<Result<Vec<_>, _>>()?;
//! let extraction = extract_all(records);
//! println!("{} documents, {} skipped", extraction.documents.len(), extraction.skipped);
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod error;
pub mod manifest;
pub mod record;

pub use document::{ArxivDocument, Extraction, Metadata, NormalizedDocument, extract, extract_all};
pub use error::{MalformedRecordError, RecordsError, Result};
pub use manifest::{Manifest, ManifestEntry};
pub use record::{DublinCore, RawRecord, RecordHeader, RecordReader, list_containers, read_records};
