//! CLI command definitions and handlers.

use anyhow::Result;
use bt_core::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::stores::Stores;

pub mod event;
pub mod init;
pub mod item;
pub mod query;
pub mod sync;

/// BagTrail - bag tracking across the primary and graph stores
#[derive(Parser)]
#[command(name = "bagtrail")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to ./bagtrail.toml)
    #[arg(short, long, global = true, env = "BAGTRAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate the primary store and create the graph schema
    Init,

    /// Item registration and derived fields
    #[command(subcommand)]
    Item(item::ItemCommands),

    /// Handling events
    #[command(subcommand)]
    Event(event::EventCommands),

    /// Show an item's journey, oldest event first
    Journey {
        /// Item tag
        tag: String,
    },

    /// Show where an item was last seen
    Location {
        /// Item tag
        tag: String,
    },

    /// Assess the risk of missing a connection
    Risk(query::RiskArgs),

    /// Find locations where active items are piling up
    Bottlenecks(query::BottleneckArgs),

    /// Shortest route from an item's location to its destination
    Route {
        /// Item tag
        tag: String,
    },

    /// Reconcile the graph with the primary store
    Sync(sync::SyncArgs),

    /// Compare both stores without writing
    Verify,

    /// Show sync queue health and entries
    Queue(sync::QueueArgs),

    /// Show recent audit records
    Audit(sync::AuditArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = AppConfig::load(self.config.as_deref())?;
        let stores = Stores::open(config).await?;
        let json = self.json;

        match self.command {
            Commands::Init => init::execute(&stores, json).await,
            Commands::Item(cmd) => item::execute(cmd, &stores, json).await,
            Commands::Event(cmd) => event::execute(cmd, &stores, json).await,
            Commands::Journey { tag } => query::journey(&stores, &tag, json).await,
            Commands::Location { tag } => query::location(&stores, &tag, json).await,
            Commands::Risk(args) => query::risk(args, &stores, json).await,
            Commands::Bottlenecks(args) => query::bottlenecks(args, &stores, json).await,
            Commands::Route { tag } => query::route(&stores, &tag, json).await,
            Commands::Sync(args) => sync::run(args, &stores, json).await,
            Commands::Verify => sync::verify(&stores, json).await,
            Commands::Queue(args) => sync::queue(args, &stores, json).await,
            Commands::Audit(args) => sync::audit(args, &stores, json).await,
        }
    }
}
