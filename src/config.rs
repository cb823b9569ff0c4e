use std::path::PathBuf;

use clap::Parser;

use crate::db::SearchContext;
use crate::manager::DATABASE_NAME;
use crate::types::DEFAULT_NAMESPACE;

/// Keep short notes and search them from the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the note index.
    #[arg(long, env = "NOTE_SEARCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Name of the index database inside the data directory.
    #[arg(long, default_value = DATABASE_NAME)]
    pub database_name: String,

    /// Keep notes in memory only; nothing is written to disk.
    #[arg(long)]
    pub in_memory: bool,

    /// Namespace new notes are created in.
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Log debug output to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub enum Storage {
    InMemory,
    Local(SearchContext),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: Storage,
    pub namespace: String,
    pub verbose: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let storage = if args.in_memory {
            Storage::InMemory
        } else {
            let dir = args.data_dir.unwrap_or_else(default_data_dir);
            Storage::Local(SearchContext::new(dir, args.database_name))
        };
        Self {
            storage,
            namespace: args.namespace,
            verbose: args.verbose,
        }
    }
}

/// Per-user data directory for the index. Falls back to the working
/// directory when no home can be found.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("note-search");
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(app_data) = std::env::var_os("APPDATA") {
            return PathBuf::from(app_data).join("note-search");
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".local/share/note-search");
        }
    }

    PathBuf::from(".note-search")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_notes_database() {
        let args = Args::parse_from(["note-search", "--data-dir", "/tmp/notes"]);
        let config = Config::from(args);
        assert_eq!(config.namespace, "user");
        match config.storage {
            Storage::Local(context) => {
                assert_eq!(
                    context.database_path(),
                    PathBuf::from("/tmp/notes/notesDatabase.sqlite")
                );
            }
            Storage::InMemory => panic!("expected file storage"),
        }
    }

    #[test]
    fn in_memory_flag_skips_the_filesystem() {
        let args = Args::parse_from(["note-search", "--in-memory", "--namespace", "work", "-v"]);
        let config = Config::from(args);
        assert!(matches!(config.storage, Storage::InMemory));
        assert_eq!(config.namespace, "work");
        assert!(config.verbose);
    }
}
