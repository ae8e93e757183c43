//! One container, one device: read, extract, encode

use super::device_pool::DeviceLease;
use crate::storage::EmbeddingUnit;
use rxiv_embed::{EmbedError, Encoder, instruction_pairs};
use rxiv_records::{RecordReader, RecordsError, extract_all};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Why a container could not be turned into embedding units
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Records(#[from] RecordsError),

    #[error(transparent)]
    Encode(#[from] EmbedError),

    #[error("Encoder returned {actual} vectors for {expected} documents")]
    VectorCount { expected: usize, actual: usize },

    #[error("No encoder worker for device {0}")]
    NoWorker(usize),

    #[error("Job task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Merge(#[from] crate::storage::IndexError),
}

/// Encoded contents of one container
#[derive(Debug)]
pub struct ContainerBatch {
    pub units: Vec<EmbeddingUnit>,
    pub records_extracted: usize,
    pub records_skipped: usize,
}

/// What a finished job hands back to the scheduler. The device stays leased
/// until the scheduler drops this.
#[derive(Debug)]
pub struct JobCompletion {
    pub lease: DeviceLease,
    pub result: Result<ContainerBatch, JobError>,
}

/// Parameters shared by every job of a run
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub instruction: Arc<str>,
    pub batch_size: usize,
}

/// Process `container` on the leased device.
pub async fn run_job(
    container: PathBuf,
    encoder: Arc<dyn Encoder>,
    lease: DeviceLease,
    settings: JobSettings,
) -> JobCompletion {
    let result = process_container(&container, encoder.as_ref(), &settings).await;
    JobCompletion { lease, result }
}

/// Stream the records of `container`, extract documents and encode their text.
pub async fn process_container(
    container: &Path,
    encoder: &dyn Encoder,
    settings: &JobSettings,
) -> Result<ContainerBatch, JobError> {
    let path = container.to_path_buf();
    let extraction = tokio::task::spawn_blocking(move || {
        let records = RecordReader::open(&path)?.collect::<Result<Vec<_>, _>>()?;
        Ok::<_, RecordsError>(extract_all(records))
    })
    .await??;

    let records_extracted = extraction.documents.len();
    let records_skipped = extraction.skipped;
    tracing::debug!(
        "{}: {} documents, {} skipped, encoding on {}",
        container.display(),
        records_extracted,
        records_skipped,
        encoder.device()
    );

    if extraction.documents.is_empty() {
        return Ok(ContainerBatch {
            units: Vec::new(),
            records_extracted,
            records_skipped,
        });
    }

    let texts: Vec<String> = extraction.documents.iter().map(|d| d.text.clone()).collect();
    let pairs = instruction_pairs(&settings.instruction, &texts);
    let vectors = encoder.encode(&pairs, settings.batch_size).await?;
    if vectors.len() != extraction.documents.len() {
        return Err(JobError::VectorCount {
            expected: extraction.documents.len(),
            actual: vectors.len(),
        });
    }

    let units = extraction
        .documents
        .into_iter()
        .zip(vectors)
        .map(|(document, vector)| EmbeddingUnit::new(document, vector))
        .collect();

    Ok(ContainerBatch {
        units,
        records_extracted,
        records_skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rxiv_embed::{Device, InstructionPair};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingEncoder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Encoder for RecordingEncoder {
        async fn encode(
            &self,
            inputs: &[InstructionPair],
            _batch_size: usize,
        ) -> rxiv_embed::Result<Vec<Vec<f32>>> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.extend(inputs.iter().map(InstructionPair::prompt));
            Ok(inputs.iter().map(|p| vec![p.text.len() as f32]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn device(&self) -> Device {
            Device::Cpu
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH><ListRecords>
  <record>
    <header><identifier>oai:arXiv.org:1001.0001</identifier></header>
    <metadata><dc>
      <title>First</title><creator>A</creator>
      <description>Line one
line two</description>
      <date>2010-01-01</date>
    </dc></metadata>
  </record>
  <record>
    <header><identifier>oai:arXiv.org:1001.0002</identifier></header>
    <metadata><dc><title>No abstract</title><creator>B</creator></dc></metadata>
  </record>
</ListRecords></OAI-PMH>"#;

    fn settings() -> JobSettings {
        JobSettings {
            instruction: Arc::from("Represent:"),
            batch_size: 4,
        }
    }

    #[tokio::test]
    async fn test_process_container() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("c.xml");
        std::fs::write(&path, CONTAINER).unwrap();
        let encoder = RecordingEncoder {
            prompts: Mutex::new(Vec::new()),
        };

        let batch = process_container(&path, &encoder, &settings()).await.unwrap();

        assert_eq!(batch.records_extracted, 1);
        assert_eq!(batch.records_skipped, 1);
        assert_eq!(batch.units.len(), 1);
        assert_eq!(batch.units[0].id, "1001.0001v1");
        assert_eq!(batch.units[0].text, "Line one line two");
        assert_eq!(
            encoder.prompts.lock().unwrap().as_slice(),
            ["Represent: Line one line two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_malformed_container_fails() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("broken.xml");
        std::fs::write(&path, "<ListRecords><record><header><identifier>x</header></record>").unwrap();
        let encoder = RecordingEncoder {
            prompts: Mutex::new(Vec::new()),
        };

        let err = process_container(&path, &encoder, &settings()).await;
        assert!(matches!(err, Err(JobError::Records(_))));

        let missing = process_container(&temp_dir.path().join("nope.xml"), &encoder, &settings()).await;
        assert!(matches!(missing, Err(JobError::Records(RecordsError::Io { .. }))));
    }
}
