//! Command implementations for the kvgram CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, info};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::engine::SearchEngine;
use crate::error::Result;
use crate::index::{IndexConfig, IndexDocument};
use crate::storage::memory::{MemoryDatabase, MemoryDatabaseConfig};

/// Execute a CLI command and print its result.
pub fn execute_command(args: KvgramArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => IndexConfig::from_json_file(path)?,
        None => IndexConfig::default(),
    };
    let db = open_database(&args.db)?;
    let engine = SearchEngine::new(Arc::new(db.clone()), config);

    let output = run_command(&args.command, &engine)?;

    if args.command.is_mutating() {
        db.persist(&args.db)?;
        debug!(path = %args.db.display(), keys = db.len(), "persisted store");
    }

    output_result(&output, &args)
}

/// Run a command against an engine without touching the snapshot file.
pub fn run_command(command: &Command, engine: &SearchEngine) -> Result<CommandOutput> {
    match command {
        Command::Index(args) => index_document(args, engine),
        Command::Import(args) => import_documents(args, engine),
        Command::Clear(args) => clear_document(args, engine),
        Command::Search(args) => search(args, engine),
        Command::DropNamespace(args) => drop_namespace(args, engine),
    }
}

/// Open the snapshot at `path`, or start empty if it does not exist yet.
pub fn open_database(path: &Path) -> Result<MemoryDatabase> {
    if path.exists() {
        let db = MemoryDatabase::open(path, MemoryDatabaseConfig::default())?;
        debug!(path = %path.display(), keys = db.len(), "opened store");
        Ok(db)
    } else {
        info!(path = %path.display(), "starting with an empty store");
        Ok(MemoryDatabase::new_default())
    }
}

fn index_document(args: &IndexArgs, engine: &SearchEngine) -> Result<CommandOutput> {
    engine.create_index(&args.namespace, &args.context, args.order, &args.id, &args.text)?;
    Ok(CommandOutput::Indexed(IndexSummary {
        namespace: args.namespace.clone(),
        context: args.context.clone(),
        id: args.id.clone(),
        order: args.order,
    }))
}

fn import_documents(args: &ImportArgs, engine: &SearchEngine) -> Result<CommandOutput> {
    let start_time = Instant::now();
    let docs = read_documents(&args.file)?;
    engine.create_indexes(&args.namespace, &args.context, &docs)?;

    let duration = start_time.elapsed();
    let docs_per_second = if duration.as_secs_f64() > 0.0 {
        docs.len() as f64 / duration.as_secs_f64()
    } else {
        0.0
    };
    Ok(CommandOutput::Imported(ImportSummary {
        namespace: args.namespace.clone(),
        context: args.context.clone(),
        documents: docs.len(),
        duration_ms: duration.as_millis() as u64,
        docs_per_second,
    }))
}

fn clear_document(args: &ClearArgs, engine: &SearchEngine) -> Result<CommandOutput> {
    engine.clear_index(&args.namespace, &args.context, &args.id)?;
    Ok(CommandOutput::Cleared(ClearSummary {
        namespace: args.namespace.clone(),
        context: args.context.clone(),
        id: args.id.clone(),
    }))
}

fn search(args: &SearchArgs, engine: &SearchEngine) -> Result<CommandOutput> {
    let result = engine.search(&args.namespace, &args.context, &args.term)?;
    Ok(CommandOutput::Search(result))
}

fn drop_namespace(args: &DropNamespaceArgs, engine: &SearchEngine) -> Result<CommandOutput> {
    let removed = engine.remove_namespace(&args.namespace)?;
    Ok(CommandOutput::Dropped(DropSummary {
        namespace: args.namespace.clone(),
        removed,
    }))
}

/// Read a JSONL file of documents. Blank lines are skipped.
fn read_documents(path: &Path) -> anyhow::Result<Vec<IndexDocument>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut docs = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: IndexDocument = serde_json::from_str(&line)
            .with_context(|| format!("invalid document on line {}", line_num + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(argv: &[&str]) -> KvgramArgs {
        use clap::Parser;
        let mut full = vec!["kvgram"];
        full.extend_from_slice(argv);
        KvgramArgs::try_parse_from(full).unwrap()
    }

    fn search_ids(engine: &SearchEngine, term: &str) -> Vec<String> {
        let command = Command::Search(SearchArgs {
            namespace: "ns".into(),
            context: "ctx".into(),
            term: term.into(),
        });
        match run_command(&command, engine).unwrap() {
            CommandOutput::Search(result) => result.items.into_iter().map(|hit| hit.id).collect(),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_import_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docs.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"id\": \"1\", \"order\": 1, \"text\": \"first post\"}\n",
                "\n",
                "{\"id\": \"2\", \"order\": 2, \"text\": \"second post\"}\n",
            ),
        )
        .unwrap();

        let engine = SearchEngine::in_memory();
        let output = run_command(
            &Command::Import(ImportArgs {
                namespace: "ns".into(),
                context: "ctx".into(),
                file: path,
            }),
            &engine,
        )
        .unwrap();

        match output {
            CommandOutput::Imported(summary) => assert_eq!(summary.documents, 2),
            other => panic!("unexpected output {other:?}"),
        }
        assert_eq!(search_ids(&engine, "post"), vec!["2", "1"]);
    }

    #[test]
    fn test_import_reports_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docs.jsonl");
        fs::write(&path, "{\"id\": \"1\", \"order\": 1, \"text\": \"ok\"}\n{\"id\": 2}\n").unwrap();

        let err = read_documents(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_clear_and_drop() {
        let engine = SearchEngine::in_memory();
        run_command(
            &Command::Index(IndexArgs {
                namespace: "ns".into(),
                context: "ctx".into(),
                order: 0,
                id: "doc".into(),
                text: "hello".into(),
            }),
            &engine,
        )
        .unwrap();
        assert_eq!(search_ids(&engine, "hello"), vec!["doc"]);

        run_command(
            &Command::Clear(ClearArgs {
                namespace: "ns".into(),
                context: "ctx".into(),
                id: "doc".into(),
            }),
            &engine,
        )
        .unwrap();
        assert!(search_ids(&engine, "hello").is_empty());

        let dropped = run_command(
            &Command::DropNamespace(DropNamespaceArgs {
                namespace: "ns".into(),
            }),
            &engine,
        )
        .unwrap();
        assert_eq!(
            dropped,
            CommandOutput::Dropped(DropSummary {
                namespace: "ns".into(),
                removed: true,
            })
        );
    }

    #[test]
    fn test_execute_command_persists_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.kvg");
        let db_arg = db_path.to_str().unwrap();

        let index = parse(&[
            "--db", db_arg, "index", "ns", "ctx", "3", "doc", "persisted text",
        ]);
        execute_command(index).unwrap();
        assert!(db_path.exists());

        let db = open_database(&db_path).unwrap();
        let engine = SearchEngine::new(Arc::new(db), IndexConfig::default());
        assert_eq!(search_ids(&engine, "persisted"), vec!["doc"]);

        let modified = fs::metadata(&db_path).unwrap().modified().unwrap();
        let search = parse(&[
            "--db", db_arg, "--format", "json", "search", "ns", "ctx", "text",
        ]);
        execute_command(search).unwrap();
        assert_eq!(fs::metadata(&db_path).unwrap().modified().unwrap(), modified);
    }
}
