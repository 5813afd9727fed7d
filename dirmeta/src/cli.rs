//! Command-line front end for inspecting and editing directory metadata files.
//!
//! Every command opens the file, performs one operation, and returns the text
//! to print. Parsing and execution are separate so both can be tested without
//! a process boundary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::entry::{Collation, DirEntry, EntryKind, EntryName, InodeId};
use crate::storage::btree::{Directory, TreeError};
use crate::storage::{MetaFile, StoreError};

#[derive(Parser, Debug)]
#[command(name = "dirmeta")]
#[command(about = "Inspect and edit directory metadata files")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// One parsed invocation.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a metadata file holding only "." and ".."
    Init {
        /// Metadata file to create
        path: PathBuf,
        /// Inode of the directory itself
        self_inode: InodeId,
        /// Inode of its parent
        parent_inode: InodeId,
        /// Compare names ignoring ASCII case
        #[arg(long)]
        case_insensitive: bool,
    },
    /// Add an entry
    Add {
        /// Metadata file
        path: PathBuf,
        /// Entry name
        name: EntryName,
        /// Inode the entry points at
        inode: InodeId,
        /// One of dir, file, symlink, fifo, socket
        kind: EntryKind,
    },
    /// Remove an entry
    #[command(name = "rm")]
    Remove {
        /// Metadata file
        path: PathBuf,
        /// Entry name
        name: EntryName,
    },
    /// Print one entry
    Lookup {
        /// Metadata file
        path: PathBuf,
        /// Entry name
        name: EntryName,
    },
    /// List every entry, sorted by name
    #[command(name = "ls")]
    List {
        /// Metadata file
        path: PathBuf,
    },
    /// Show header counters
    Stat {
        /// Metadata file
        path: PathBuf,
    },
    /// Verify the tree and its lists
    Check {
        /// Metadata file
        path: PathBuf,
    },
}

/// Execute `command` and return its output.
pub fn run(command: &Command, config: &EngineConfig) -> Result<String, CliError> {
    match command {
        Command::Init {
            path,
            self_inode,
            parent_inode,
            case_insensitive,
        } => {
            let collation = if *case_insensitive {
                Collation::CaseInsensitive
            } else {
                Collation::Binary
            };
            let store = MetaFile::create(path, config)?;
            Directory::create(store, *self_inode, *parent_inode, collation)?;
            tracing::info!("initialised {}", path.display());
            Ok(format!("created {}", path.display()))
        }
        Command::Add {
            path,
            name,
            inode,
            kind,
        } => {
            let entry = DirEntry::new(*inode, name.clone(), *kind);
            let mut dir = open(path, config)?;
            dir.insert(entry.clone())?;
            tracing::info!("added '{}' to {}", entry.name, path.display());
            Ok(format!("added {} -> {} ({})", entry.name, entry.inode, entry.kind))
        }
        Command::Remove { path, name } => {
            let mut dir = open(path, config)?;
            let removed = dir.delete(name)?;
            tracing::info!("removed '{name}' from {}", path.display());
            Ok(format!("removed {} -> {}", removed.name, removed.inode))
        }
        Command::Lookup { path, name } => {
            let mut dir = open(path, config)?;
            let entry = dir
                .lookup(name)?
                .ok_or_else(|| TreeError::NotFound(name.clone()))?;
            Ok(format_entry(&entry))
        }
        Command::List { path } => {
            let mut dir = open(path, config)?;
            let collation = dir.collation();
            let mut entries = dir.walk_all().collect::<Result<Vec<_>, _>>()?;
            entries.sort_by(|a, b| collation.compare(a.name.as_bytes(), b.name.as_bytes()));
            Ok(entries
                .iter()
                .map(format_entry)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Stat { path } => {
            let mut dir = open(path, config)?;
            let header = dir.header().clone();
            let pages = dir.walk_pages().collect::<Result<Vec<_>, _>>()?.len();
            let subdirs = dir.subdir_count()?;

            Ok(format!(
                "children:    {}\n\
                 subdirs:     {subdirs}\n\
                 live pages:  {pages}\n\
                 collation:   {:?}\n\
                 generation:  {}\n\
                 dirty flags: {:#x}",
                header.total_children, header.collation, header.generation, header.dirty_flags
            ))
        }
        Command::Check { path } => {
            let mut dir = open(path, config)?;
            let stats = dir.check()?;
            Ok(format!(
                "ok: depth {}, {} live pages, {} free pages, {} entries",
                stats.depth, stats.live_pages, stats.free_pages, stats.entries
            ))
        }
    }
}

fn open(path: &Path, config: &EngineConfig) -> Result<Directory<MetaFile>, CliError> {
    let store = MetaFile::open(path, config)?;
    Ok(Directory::open(store)?)
}

fn format_entry(entry: &DirEntry) -> String {
    format!("{}\t{}\t{}", entry.inode, entry.kind, entry.name)
}

/// Errors reported by the command-line tool.
#[derive(Debug)]
pub enum CliError {
    /// Directory operation failed.
    Tree(TreeError),
    /// Opening or creating the file failed.
    Store(StoreError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Store(e) => Some(e),
        }
    }
}

impl From<TreeError> for CliError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("dirmeta").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    fn exec(args: &[&str]) -> Result<String, CliError> {
        run(&parse(args).expect("parse"), &EngineConfig::default())
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_init() {
        let command = parse(&["init", "d.meta", "5", "2", "--case-insensitive"]).expect("parse");
        assert_eq!(
            command,
            Command::Init {
                path: PathBuf::from("d.meta"),
                self_inode: 5,
                parent_inode: 2,
                case_insensitive: true,
            }
        );

        let command = parse(&["init", "d.meta", "5", "2"]).expect("parse");
        assert!(matches!(
            command,
            Command::Init {
                case_insensitive: false,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_add() {
        let command = parse(&["add", "d.meta", "notes", "17", "symlink"]).expect("parse");
        let Command::Add {
            name, inode, kind, ..
        } = command
        else {
            panic!("expected add, got {command:?}");
        };
        assert_eq!(inode, 17);
        assert_eq!(kind, EntryKind::Symlink);
        assert_eq!(name.as_bytes(), b"notes");
    }

    #[test]
    fn test_parse_short_names() {
        assert!(matches!(parse(&["rm", "d.meta", "x"]), Ok(Command::Remove { .. })));
        assert!(matches!(parse(&["ls", "d.meta"]), Ok(Command::List { .. })));
        assert!(parse(&["remove", "d.meta", "x"]).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["ls"]).is_err());
        assert!(parse(&["frob", "d.meta"]).is_err());
        assert!(parse(&["add", "d.meta", "x", "nope", "file"]).is_err());
        assert!(parse(&["add", "d.meta", "x", "1", "blob"]).is_err());
        assert!(parse(&["init", "d.meta", "1", "2", "--loud"]).is_err());
        assert!(parse(&["ls", "d.meta", "extra"]).is_err());

        let long = "x".repeat(300);
        assert!(parse(&["rm", "d.meta", &long]).is_err());
    }

    #[test]
    fn test_commands_against_file() {
        let tmp = tempdir().expect("create temp dir");
        let path = tmp.path().join("dir.meta");
        let file = path.to_str().expect("utf-8 path");

        exec(&["init", file, "5", "2"]).expect("init");
        assert!(matches!(exec(&["init", file, "5", "2"]), Err(CliError::Store(_))));

        exec(&["add", file, "b.txt", "11", "file"]).expect("add");
        exec(&["add", file, "a", "10", "dir"]).expect("add");
        let err = exec(&["add", file, "a", "12", "dir"]).expect_err("duplicate");
        assert!(matches!(err, CliError::Tree(ref e) if e.is_already_exists()));

        assert_eq!(exec(&["lookup", file, "a"]).expect("lookup"), "10\tdir\ta");
        let listing = exec(&["ls", file]).expect("ls");
        assert_eq!(listing, "5\tdir\t.\n2\tdir\t..\n10\tdir\ta\n11\tfile\tb.txt");

        let stat = exec(&["stat", file]).expect("stat");
        assert!(stat.contains("children:    2\n"));
        assert!(stat.contains("subdirs:     1\n"));
        assert!(stat.ends_with("dirty flags: 0x0"));

        exec(&["rm", file, "a"]).expect("rm");
        let err = exec(&["lookup", file, "a"]).expect_err("removed");
        assert!(matches!(err, CliError::Tree(ref e) if e.is_not_found()));

        let report = exec(&["check", file]).expect("check");
        assert!(report.starts_with("ok: depth 1"));
    }

    #[test]
    fn test_open_missing_file() {
        let tmp = tempdir().expect("create temp dir");
        let path = tmp.path().join("absent.meta");
        let err = exec(&["ls", path.to_str().expect("utf-8 path")]).expect_err("missing");
        assert!(matches!(err, CliError::Store(StoreError::Io(_))));
    }
}
