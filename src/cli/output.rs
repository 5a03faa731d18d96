//! Output formatting for CLI commands.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::cli::args::{KvgramArgs, OutputFormat};
use crate::error::{KvgramError, Result};
use crate::index::SearchResult;

/// Result structure for indexing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub namespace: String,
    pub context: String,
    pub id: String,
    pub order: i64,
}

/// Result structure for bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub namespace: String,
    pub context: String,
    pub documents: usize,
    pub duration_ms: u64,
    pub docs_per_second: f64,
}

/// Result structure for clearing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSummary {
    pub namespace: String,
    pub context: String,
    pub id: String,
}

/// Result structure for dropping a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropSummary {
    pub namespace: String,
    pub removed: bool,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Indexed(IndexSummary),
    Imported(ImportSummary),
    Cleared(ClearSummary),
    Search(SearchResult),
    Dropped(DropSummary),
}

/// Print a command result in the requested format.
pub fn output_result(output: &CommandOutput, args: &KvgramArgs) -> Result<()> {
    let rendered = render(output, args.output_format, args.pretty)?;
    print!("{rendered}");
    Ok(())
}

/// Render a command result; the text always ends with a newline.
pub fn render(output: &CommandOutput, format: OutputFormat, pretty: bool) -> Result<String> {
    match format {
        OutputFormat::Human => {
            render_human(output).map_err(|err| KvgramError::from(anyhow::Error::from(err)))
        }
        OutputFormat::Json => {
            let mut json = if pretty {
                serde_json::to_string_pretty(output)?
            } else {
                serde_json::to_string(output)?
            };
            json.push('\n');
            Ok(json)
        }
    }
}

fn render_human(output: &CommandOutput) -> std::result::Result<String, std::fmt::Error> {
    let mut out = String::new();
    let written = match output {
        CommandOutput::Indexed(summary) => writeln!(
            out,
            "Indexed {} (order {}) in {}/{}",
            summary.id, summary.order, summary.namespace, summary.context
        ),
        CommandOutput::Imported(summary) => writeln!(
            out,
            "Imported {} documents into {}/{} in {}ms ({:.1} docs/s)",
            summary.documents,
            summary.namespace,
            summary.context,
            summary.duration_ms,
            summary.docs_per_second
        ),
        CommandOutput::Cleared(summary) => writeln!(
            out,
            "Cleared {} from {}/{}",
            summary.id, summary.namespace, summary.context
        ),
        CommandOutput::Search(result) => render_search_human(&mut out, result),
        CommandOutput::Dropped(summary) if summary.removed => {
            writeln!(out, "Dropped namespace {}", summary.namespace)
        }
        CommandOutput::Dropped(summary) => {
            writeln!(out, "Namespace {} does not exist", summary.namespace)
        }
    };
    written.map(|()| out)
}

fn render_search_human(out: &mut String, result: &SearchResult) -> std::fmt::Result {
    for (i, hit) in result.items.iter().enumerate() {
        writeln!(out, "{:>4}. {} (pos {})", i + 1, hit.id, hit.pos)?;
    }
    match result.count {
        0 => writeln!(out, "No matches"),
        1 => writeln!(out, "1 match"),
        n => writeln!(out, "{n} matches"),
    }
}
