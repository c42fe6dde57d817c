//! Dump command - Decode a binary event log file.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use calltrace_event::{Event, codec};

use crate::OutputFormat;

/// Arguments for the dump command.
#[derive(Args)]
pub struct DumpArgs {
    /// Path to the event log file
    #[arg(required = true)]
    pub log: PathBuf,

    /// Stop after this many records
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Only print records of this event type (enter, exit, exception)
    #[arg(short = 't', long = "type")]
    pub event_type: Option<String>,
}

/// Dump result.
#[derive(Debug, Serialize)]
struct DumpResult {
    path: String,
    records: usize,
    enters: usize,
    exits: usize,
    exceptions: usize,
    events: Vec<Event>,
}

/// Execute the dump command.
pub fn execute(args: DumpArgs, format: OutputFormat, quiet: bool) -> Result<()> {
    let file = File::open(&args.log)
        .with_context(|| format!("Failed to open log file {}", args.log.display()))?;
    let mut reader = BufReader::new(file);

    let mut result = DumpResult {
        path: args.log.display().to_string(),
        records: 0,
        enters: 0,
        exits: 0,
        exceptions: 0,
        events: Vec::new(),
    };

    while let Some(event) = codec::read_event(&mut reader)
        .with_context(|| format!("Malformed record at index {}", result.records))?
    {
        result.records += 1;
        match event.event_type() {
            "enter" => result.enters += 1,
            "exit" => result.exits += 1,
            _ => result.exceptions += 1,
        }
        if let Some(wanted) = &args.event_type {
            if event.event_type() != wanted {
                continue;
            }
        }
        result.events.push(event);
        if args.limit.is_some_and(|limit| result.events.len() >= limit) {
            break;
        }
    }

    match format {
        OutputFormat::Human => {
            for event in &result.events {
                println!("{}", event);
            }
            if !quiet {
                println!(
                    "\n{} record(s): {} enter, {} exit, {} exception",
                    result.records, result.enters, result.exits, result.exceptions
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}
