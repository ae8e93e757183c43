//! Conversion of raw records into normalized, embeddable documents.

use crate::error::MalformedRecordError;
use crate::record::RawRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Free-form document metadata, serialized verbatim into the index docstore.
pub type Metadata = Map<String, Value>;

static ABSTRACT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://arxiv\.org/abs/").expect("valid link pattern"));

/// A document ready for encoding: text body, metadata and stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    /// Base identifier plus revision suffix, e.g. `0704.0001v2`
    pub id: String,
    /// Text that gets embedded (the abstract)
    pub text: String,
    pub metadata: Metadata,
}

/// Typed view of an arXiv paper before it is flattened into a [`NormalizedDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivDocument {
    pub rid: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub link: Option<String>,
}

impl ArxivDocument {
    /// Validate a raw record and derive the document fields from it.
    pub fn from_record(record: &RawRecord) -> Result<Self, MalformedRecordError> {
        let identifier = record.identifier();
        let malformed = |reason: &str| MalformedRecordError::new(identifier, reason);

        let dc = record
            .metadata
            .as_ref()
            .ok_or_else(|| malformed("missing metadata block"))?;
        let identifier = identifier.ok_or_else(|| malformed("missing header identifier"))?;

        let (year, month, day) = match dc.dates.last() {
            Some(latest) => {
                let (y, m, d) = split_date(latest)
                    .ok_or_else(|| malformed(&format!("invalid revision date {latest:?}")))?;
                (Some(y), Some(m), Some(d))
            }
            None => (None, None, None),
        };

        let base = identifier.rsplit(':').next().unwrap_or(identifier);
        let rid = format!("{base}v{}", dc.dates.len());

        let abstract_text = dc
            .descriptions
            .first()
            .ok_or_else(|| malformed("missing description"))?
            .replace('\n', " ");

        let title = dc
            .titles
            .first()
            .ok_or_else(|| malformed("missing title"))?
            .replace('\n', "");

        if dc.creators.is_empty() {
            return Err(malformed("missing creators"));
        }

        let link = dc
            .identifiers
            .iter()
            .find(|candidate| ABSTRACT_LINK.is_match(candidate))
            .cloned();

        Ok(Self {
            rid,
            title,
            abstract_text,
            authors: dc.creators.clone(),
            year,
            month,
            day,
            link,
        })
    }

    /// Metadata map stored alongside the embedding.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::from(self.title.clone()));
        metadata.insert("authors".into(), Value::from(self.authors.clone()));
        metadata.insert("year".into(), Value::from(self.year.clone()));
        metadata.insert("month".into(), Value::from(self.month.clone()));
        metadata.insert("day".into(), Value::from(self.day.clone()));
        metadata.insert("link".into(), Value::from(self.link.clone()));
        metadata.insert("rid".into(), Value::from(self.rid.clone()));
        metadata
    }

    pub fn into_document(self) -> NormalizedDocument {
        NormalizedDocument {
            metadata: self.metadata(),
            id: self.rid,
            text: self.abstract_text,
        }
    }
}

/// Split `YYYY-MM-DD[Thh:mm:ss...]` into its date components.
fn split_date(date: &str) -> Option<(String, String, String)> {
    let mut parts = date.split('-');
    let year = parts.next()?;
    let month = parts.next()?;
    let day = parts.next()?.split('T').next()?;
    Some((year.to_string(), month.to_string(), day.to_string()))
}

/// Extract a [`NormalizedDocument`] from one raw record.
pub fn extract(record: &RawRecord) -> Result<NormalizedDocument, MalformedRecordError> {
    ArxivDocument::from_record(record).map(ArxivDocument::into_document)
}

/// Outcome of extracting every record of a container.
#[derive(Debug, Default)]
pub struct Extraction {
    pub documents: Vec<NormalizedDocument>,
    /// Records that failed validation and were skipped
    pub skipped: usize,
}

/// Extract all records, skipping (and counting) the malformed ones.
///
/// Record order is preserved for the documents that survive.
pub fn extract_all<I>(records: I) -> Extraction
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut extraction = Extraction::default();
    for record in records {
        match extract(&record) {
            Ok(document) => extraction.documents.push(document),
            Err(e) => {
                tracing::debug!("Skipping record: {}", e);
                extraction.skipped += 1;
            }
        }
    }
    extraction
}
