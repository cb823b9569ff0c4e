pub mod adapter;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod index;
pub mod manager;
pub mod scope;
pub mod session;
pub mod shell;
pub mod types;
pub mod viewmodel;

use std::sync::Arc;

use clap::Parser;

use crate::config::{Args, Config, Storage};
use crate::manager::NoteSearchManager;
use crate::scope::TaskScope;
use crate::shell::Shell;
use crate::viewmodel::NoteViewModel;

pub use crate::error::{NoteError, Result};
pub use crate::types::{MatchInfo, MatchRange, Note, NoteSearchResult};

/// Build the view-model for `config`: one scope owning the index session.
pub fn build_view_model(config: &Config) -> NoteViewModel {
    let scope = TaskScope::new();
    let manager = match &config.storage {
        Storage::InMemory => NoteSearchManager::open_in_memory(&scope),
        Storage::Local(context) => NoteSearchManager::open_local(context.clone(), &scope),
    };
    NoteViewModel::new(manager, scope).with_namespace(config.namespace.clone())
}

fn init_logging(verbose: bool) {
    // Only log WARN and above in release builds to avoid leaking note content
    let level = if verbose {
        tracing::Level::DEBUG
    } else if cfg!(debug_assertions) {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point of the `note-search` binary.
pub fn run() -> anyhow::Result<()> {
    let config = Config::from(Args::parse());
    init_logging(config.verbose);
    if let Storage::Local(context) = &config.storage {
        tracing::info!("Using note index {}", context.database_path().display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let vm = Arc::new(build_view_model(&config));
        let shell = Shell::new(vm, std::io::stdout());
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        shell.run(input).await?;
        Ok::<_, anyhow::Error>(())
    })
}
