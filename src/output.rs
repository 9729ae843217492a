use std::io::{self, Write};

use serde::Serialize;

use crate::import::{AnnotationOutcome, ImportSummary};
use crate::pipeline::RunSummary;
use crate::transfer::{ProgressEvent, ProgressSink};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import(result: &ImportSummary) -> io::Result<()> {
        #[derive(Serialize)]
        struct ImportPayload {
            deposit_inserted: bool,
            versions_inserted: usize,
            frames_inserted: usize,
            predictions_inserted: usize,
            frames_skipped_partial: usize,
        }
        Self::print_json(&ImportPayload {
            deposit_inserted: result.deposit_inserted,
            versions_inserted: result.versions_inserted,
            frames_inserted: result.frames_inserted,
            predictions_inserted: result.predictions_inserted,
            frames_skipped_partial: result.frames_skipped_partial,
        })
    }

    pub fn print_annotation(outcome: &AnnotationOutcome) -> io::Result<()> {
        #[derive(Serialize)]
        struct AnnotationPayload {
            outcome: &'static str,
            inserted: usize,
        }
        let payload = match outcome {
            AnnotationOutcome::Imported { inserted, .. } => AnnotationPayload {
                outcome: "imported",
                inserted: *inserted,
            },
            AnnotationOutcome::AlreadyImported => AnnotationPayload {
                outcome: "already-imported",
                inserted: 0,
            },
            AnnotationOutcome::Empty => AnnotationPayload {
                outcome: "empty",
                inserted: 0,
            },
        };
        Self::print_json(&payload)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
