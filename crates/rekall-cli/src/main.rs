//! Rekall CLI: a thin driver over [`rekall_core::Core`]. Every subcommand
//! opens the knowledge base, performs one operation, and prints a result —
//! the long-lived agent server and TUI are separate collaborators.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use directories::ProjectDirs;

use rekall_core::entry::{Entry, EntryKind, Relation};
use rekall_core::storage::Direction;
use rekall_core::Core;

#[derive(Parser)]
#[command(name = "rekall")]
#[command(author, version, about = "CLI for the Rekall local-first knowledge engine")]
struct Cli {
    /// Override the default data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new entry.
    Add {
        title: String,
        body: String,
        #[arg(long, default_value = "snippet")]
        kind: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Fetch an entry by id.
    Get { id: String },

    /// Delete an entry by id.
    Delete { id: String },

    /// Run a hybrid search.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        include_deprecated: bool,
    },

    /// Link two entries.
    Link {
        source: String,
        target: String,
        relation: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Remove a link.
    Unlink {
        source: String,
        target: String,
        relation: String,
    },

    /// List entries related to one.
    Related {
        id: String,
        #[arg(long, default_value = "both")]
        direction: String,
    },

    /// Traverse the knowledge graph from a root.
    Graph {
        root: String,
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },

    /// List entries due for review.
    Review {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Grade a review (0-5, SM-2 scale).
    Grade { id: String, rating: i64 },

    /// List entries stale beyond a threshold.
    Stale {
        #[arg(long, default_value_t = 90)]
        threshold_days: i64,
    },

    /// Fold several entries into a new generalized pattern entry.
    Generalize {
        title: String,
        body: String,
        #[arg(required = true)]
        source_ids: Vec<String>,
    },

    /// Pull new URLs from connector history into the Bronze inbox.
    Import {
        #[arg(long)]
        connector: Option<String>,
        #[arg(long)]
        since: Option<String>,
    },

    /// Run one Bronze→Silver enrichment batch.
    Enrich,

    /// Promote a staging row, or all eligible rows with --auto.
    Promote {
        staging_id: Option<String>,
        #[arg(long)]
        auto: bool,
    },

    /// Demote an active source back to eligible staging.
    Demote { source_id: String },

    /// Export the full knowledge base to an archive directory.
    ExportArchive { path: PathBuf },

    /// Import an archive directory.
    ImportArchive {
        path: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "rekall", "rekall")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".rekall"))
}

fn parse_direction(s: &str) -> anyhow::Result<Direction> {
    match s {
        "outgoing" => Ok(Direction::Outgoing),
        "incoming" => Ok(Direction::Incoming),
        "both" => Ok(Direction::Both),
        other => anyhow::bail!("unknown direction: {other}"),
    }
}

fn parse_relation(s: &str) -> anyhow::Result<Relation> {
    Relation::parse(s).ok_or_else(|| anyhow::anyhow!("unknown relation: {s}"))
}

fn parse_kind(s: &str) -> anyhow::Result<EntryKind> {
    EntryKind::parse(s).ok_or_else(|| anyhow::anyhow!("unknown entry kind: {s}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let core = Core::open(&data_dir)?;

    match cli.command {
        Commands::Add { title, body, kind, project, tags } => {
            let mut entry = Entry::new(rekall_core::ids::new_id(), parse_kind(&kind)?, title, body, Utc::now());
            entry.project = project;
            entry.tags = tags;
            let result = core.add_entry(entry)?;
            println!("{} {}", "created".green(), result.value);
            if result.degraded {
                println!("{} {}", "warning:".yellow(), result.degraded_reason.unwrap_or_default());
            }
        }
        Commands::Get { id } => {
            let entry = core.get_entry(&id)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Delete { id } => {
            core.delete_entry(&id)?;
            println!("{} {id}", "deleted".red());
        }
        Commands::Search { query, limit, include_deprecated } => {
            let result = core.search(&query, limit, include_deprecated)?;
            if result.degraded {
                eprintln!("{} {}", "degraded:".yellow(), result.degraded_reason.unwrap_or_default());
            }
            for hit in &result.value.hits {
                println!(
                    "{:.3}  {}  {}",
                    hit.scores.fused,
                    hit.entry.id.dimmed(),
                    hit.entry.title
                );
                println!("      {}", hit.snippet);
            }
        }
        Commands::Link { source, target, relation, reason } => {
            core.link(&source, &target, parse_relation(&relation)?, reason.as_deref())?;
            println!("{} {source} -> {target}", "linked".green());
        }
        Commands::Unlink { source, target, relation } => {
            core.unlink(&source, &target, parse_relation(&relation)?)?;
            println!("{} {source} -> {target}", "unlinked".red());
        }
        Commands::Related { id, direction } => {
            for neighbor in core.related(&id, parse_direction(&direction)?, None)? {
                println!("{neighbor}");
            }
        }
        Commands::Graph { root, depth } => {
            for (id, hops) in core.graph(&root, depth)? {
                println!("{hops}  {id}");
            }
        }
        Commands::Review { limit } => {
            for entry in core.review_due(limit)? {
                println!("{}  {}", entry.id.dimmed(), entry.title);
            }
        }
        Commands::Grade { id, rating } => {
            let entry = core.grade(&id, rating)?;
            println!(
                "{} next interval {} day(s), due {}",
                "graded".green(),
                entry.interval_days,
                entry.due_at.map(|d| d.to_rfc3339()).unwrap_or_default()
            );
        }
        Commands::Stale { threshold_days } => {
            for entry in core.stale(threshold_days)? {
                println!("{}  {}", entry.id.dimmed(), entry.title);
            }
        }
        Commands::Generalize { title, body, source_ids } => {
            let pattern = Entry::new(rekall_core::ids::new_id(), EntryKind::Pattern, title, body, Utc::now());
            let id = core.generalize(&source_ids, pattern)?;
            println!("{} {id}", "generalized".green());
        }
        Commands::Import { connector, since } => {
            let n = core.inbox_import(connector.as_deref(), since.as_deref())?;
            println!("{} {n} row(s)", "imported".green());
        }
        Commands::Enrich => {
            let stats = core.enrich_batch()?;
            println!(
                "processed={} merged={} created={} fetch_failures={}",
                stats.processed, stats.merged, stats.created, stats.fetch_failures
            );
        }
        Commands::Promote { staging_id, auto } => {
            if auto {
                let sources = core.promote_auto()?;
                println!("{} {} source(s)", "promoted".green(), sources.len());
            } else {
                let staging_id = staging_id.ok_or_else(|| anyhow::anyhow!("staging_id required unless --auto"))?;
                let source = core.promote(&staging_id)?;
                println!("{} {}", "promoted".green(), source.id);
            }
        }
        Commands::Demote { source_id } => {
            core.demote(&source_id)?;
            println!("{} {source_id}", "demoted".yellow());
        }
        Commands::ExportArchive { path } => {
            let manifest = core.export_archive(&path)?;
            println!("exported {} entries to {}", manifest.counts.entries, path.display());
        }
        Commands::ImportArchive { path, dry_run } => {
            let manifest = core.import_archive(&path, dry_run)?;
            println!("{} {} entries from {}", if dry_run { "validated" } else { "imported" }, manifest.counts.entries, path.display());
        }
    }

    Ok(())
}
