use clap::Parser;
use rxiv_records::{NormalizedDocument, RecordReader, extract};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// A CLI tool to print the normalized documents of an arXiv export container.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the OAI-PMH export XML file.
    #[arg(short, long)]
    input: PathBuf,

    /// Also list the records that failed validation.
    #[arg(short, long)]
    skipped: bool,

    /// Stop after this many documents.
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SkippedRecord {
    identifier: Option<String>,
    reason: String,
}

#[derive(Serialize)]
struct Output {
    documents: Vec<NormalizedDocument>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedRecord>,
    skipped_count: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut output = Output {
        documents: Vec::new(),
        skipped: Vec::new(),
        skipped_count: 0,
    };

    for record in RecordReader::open(&args.input)? {
        if output.documents.len() >= limit {
            break;
        }
        match extract(&record?) {
            Ok(document) => output.documents.push(document),
            Err(e) => {
                output.skipped_count += 1;
                if args.skipped {
                    output.skipped.push(SkippedRecord {
                        identifier: e.identifier,
                        reason: e.reason,
                    });
                }
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
