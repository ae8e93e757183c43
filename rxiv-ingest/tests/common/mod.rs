//! Shared fixtures: a deterministic encoder and OAI-PMH container builders.

#![allow(dead_code)]

use async_trait::async_trait;
use rxiv_embed::{Device, EmbedError, Encoder, EncoderPool, InstructionPair};
use rxiv_ingest::ingest::{IngestContext, IngestOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIMENSION: usize = 4;

/// Encoder whose vectors depend only on the text.
///
/// Texts containing `poison` always fail, texts containing `flaky` fail on
/// their first encode, texts containing `panic` panic.
pub struct MockEncoder {
    device: Device,
    delay: Duration,
    seen: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockEncoder {
    pub fn new(device: Device, delay: Duration, seen: Arc<Mutex<HashMap<String, usize>>>) -> Self {
        Self { device, delay, seen }
    }
}

pub fn vector_for(text: &str) -> Vec<f32> {
    let bytes = text.as_bytes();
    vec![
        bytes.len() as f32,
        (bytes.iter().map(|&b| b as u32).sum::<u32>() % 1000) as f32,
        text.split_whitespace().count() as f32,
        1.0,
    ]
}

#[async_trait]
impl Encoder for MockEncoder {
    async fn encode(
        &self,
        inputs: &[InstructionPair],
        _batch_size: usize,
    ) -> rxiv_embed::Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;

        for input in inputs {
            if input.text.contains("panic") {
                panic!("encoder crashed on {}", input.text);
            }
            if input.text.contains("poison") {
                return Err(EmbedError::embedding_gen(
                    self.device,
                    anyhow::anyhow!("out of memory"),
                ));
            }
            if input.text.contains("flaky") {
                let attempts = {
                    let mut seen = self.seen.lock().unwrap();
                    let count = seen.entry(input.text.clone()).or_default();
                    *count += 1;
                    *count
                };
                if attempts == 1 {
                    return Err(EmbedError::embedding_gen(
                        self.device,
                        anyhow::anyhow!("device reset"),
                    ));
                }
            }
        }

        Ok(inputs.iter().map(|p| vector_for(&p.text)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn device(&self) -> Device {
        self.device
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Pool of `workers` mock encoders; worker `i` sleeps `delays[i % len]`.
pub fn mock_pool(workers: usize, delays: &[u64]) -> EncoderPool {
    let seen = Arc::new(Mutex::new(HashMap::new()));
    let encoders: Vec<Arc<dyn Encoder>> = (0..workers)
        .map(|i| {
            let delay = Duration::from_millis(delays[i % delays.len()]);
            Arc::new(MockEncoder::new(Device::Cuda(i), delay, seen.clone())) as Arc<dyn Encoder>
        })
        .collect();
    EncoderPool::new(encoders).unwrap()
}

pub fn context(workers: usize, options: IngestOptions) -> IngestContext {
    IngestContext::new(mock_pool(workers, &[15, 5, 10]), options)
}

/// One record of a container fixture
pub struct Paper<'a> {
    pub id: &'a str,
    pub dates: &'a [&'a str],
    pub abstract_text: &'a str,
}

pub fn paper<'a>(id: &'a str, dates: &'a [&'a str], abstract_text: &'a str) -> Paper<'a> {
    Paper {
        id,
        dates,
        abstract_text,
    }
}

pub fn container_xml(papers: &[Paper<'_>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
<ListRecords>
"#,
    );
    for p in papers {
        let dates: String = p
            .dates
            .iter()
            .map(|d| format!("<dc:date>{d}</dc:date>"))
            .collect();
        xml.push_str(&format!(
            r#"<record>
  <header><identifier>oai:arXiv.org:{id}</identifier><datestamp>2024-01-01</datestamp></header>
  <metadata>
    <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
      <dc:title>Paper {id}</dc:title>
      <dc:creator>Author, A.</dc:creator>
      <dc:description>{abstract_text}</dc:description>
      {dates}
      <dc:identifier>http://arxiv.org/abs/{id}</dc:identifier>
    </oai_dc:dc>
  </metadata>
</record>
"#,
            id = p.id,
            abstract_text = p.abstract_text,
        ));
    }
    xml.push_str("</ListRecords>\n</OAI-PMH>\n");
    xml
}

pub fn write_container(dir: &Path, name: &str, papers: &[Paper<'_>]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, container_xml(papers)).unwrap();
    path
}
