//! SILO driver binary.
//!
//! Exercises the engine end to end without any network surface:
//! optionally ingest an ndjson file into a fresh data version, then load
//! the newest compatible data version and answer JSON filter queries read
//! line-wise from stdin.
//!
//! ## Usage
//!
//! ```bash
//! # Ingest and persist a data version, then serve queries:
//! silo --schema schema.yaml --input records.ndjson \
//!      --lineage-definition pango_lineage=lineages.yaml
//!
//! # Serve queries from the newest persisted data version:
//! echo '{"type": "True"}' | silo
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use silo::storage::table::TableAuxiliaries;
use silo::{Config, Database, DataVersion, Engine, LineageTreeAndIdMap, PhyloTree, Table};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "silo", about = "Columnar search engine for genomic sequences")]
struct Args {
    /// Configuration file (defaults to silo.toml / silo.local.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Table schema YAML; required when ingesting
    #[arg(long)]
    schema: Option<PathBuf>,

    /// NDJSON file to ingest into a new data version
    #[arg(long)]
    input: Option<PathBuf>,

    /// Lineage definition files as column=path pairs
    #[arg(long = "lineage-definition")]
    lineage_definitions: Vec<String>,

    /// Phylogenetic tree files as column=path pairs (.json is Auspice,
    /// anything else Newick)
    #[arg(long = "phylo-tree")]
    phylo_trees: Vec<String>,

    /// Override the configured data directory
    #[arg(long)]
    data_directory: Option<PathBuf>,
}

fn split_pair(pair: &str, flag: &str) -> Result<(String, PathBuf)> {
    match pair.split_once('=') {
        Some((column, path)) if !column.is_empty() => Ok((column.to_string(), PathBuf::from(path))),
        _ => bail!("--{flag} expects column=path, got '{pair}'"),
    }
}

fn load_auxiliaries(args: &Args) -> Result<TableAuxiliaries> {
    let mut auxiliaries = TableAuxiliaries::default();
    for pair in &args.lineage_definitions {
        let (column, path) = split_pair(pair, "lineage-definition")?;
        let yaml = fs::read_to_string(&path)
            .with_context(|| format!("reading lineage definition '{}'", path.display()))?;
        auxiliaries
            .lineage_trees
            .insert(column, LineageTreeAndIdMap::from_yaml(&yaml)?);
    }
    for pair in &args.phylo_trees {
        let (column, path) = split_pair(pair, "phylo-tree")?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading phylogenetic tree '{}'", path.display()))?;
        let tree = if path.extension().is_some_and(|ext| ext == "json") {
            PhyloTree::from_auspice_json(&text, &path.display().to_string())?
        } else {
            PhyloTree::from_newick(&text, &path.display().to_string())?
        };
        auxiliaries.phylo_trees.insert(column, tree);
    }
    Ok(auxiliaries)
}

fn ingest(args: &Args, data_directory: &std::path::Path) -> Result<()> {
    let schema_path = args
        .schema
        .as_ref()
        .context("--input requires --schema")?;
    let input_path = args.input.as_ref().expect("checked by the caller");

    let schema = serde_yaml::from_str(
        &fs::read_to_string(schema_path)
            .with_context(|| format!("reading schema '{}'", schema_path.display()))?,
    )
    .context("parsing schema")?;
    let mut table = Table::new(schema, load_auxiliaries(args)?)
        .map_err(|message| anyhow::anyhow!(message))?;

    let partition = table.add_partition();
    let reader = BufReader::new(
        fs::File::open(input_path)
            .with_context(|| format!("opening input '{}'", input_path.display()))?,
    );
    let report = silo::ingest_ndjson(&mut table, partition, reader)?;
    info!(
        appended = report.appended,
        rejected = report.failures.len(),
        "ingest finished"
    );
    table.finalize(partition);
    table
        .validate()
        .map_err(|message| anyhow::anyhow!(message))?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("the clock is past the epoch")
        .as_secs();
    let database = Database::new(table, DataVersion::new(timestamp));
    let directory = database.save(data_directory)?;
    info!(directory = %directory.display(), "data version persisted");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_directory = args
        .data_directory
        .clone()
        .unwrap_or_else(|| config.database.data_directory.clone());

    if args.input.is_some() {
        fs::create_dir_all(&data_directory)?;
        ingest(&args, &data_directory)?;
    }

    let Some(newest) = silo::persist::scan_newest_compatible(&data_directory)? else {
        bail!(
            "no loadable data version under '{}'",
            data_directory.display()
        );
    };
    let engine = Engine::new(
        config.query.parallel_threads,
        config.query.timeout_ms.map(Duration::from_millis),
    )?;
    engine.swap(Database::load(&newest)?);

    let info = engine.database().expect("snapshot was just swapped").info();
    info!(
        partitions = info.partition_count,
        rows = info.row_count,
        "ready for queries on stdin"
    );

    let stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match engine.query_json(&line) {
            Ok(result) => serde_json::json!({
                "totalMatches": result.total_matches,
                "partitionMatches": result
                    .partitions
                    .iter()
                    .map(roaring::RoaringBitmap::len)
                    .collect::<Vec<u64>>(),
            }),
            Err(error) => serde_json::json!({ "error": error.to_string() }),
        };
        writeln!(stdout, "{response}")?;
    }
    Ok(())
}
