use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Configuration for the editor-storage command line tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "editor-storage")]
#[command(about = "Find, load, create and save editor documents on the local filesystem")]
pub struct Config {
    /// Root directory of the local backend
    #[arg(long, global = true, env = "EDITOR_STORAGE_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Get the effective root directory.
    pub fn effective_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::document_dir().unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

/// File addressed by name, optionally inside a location below the root.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Base name of the file
    pub name: String,

    /// Folder, relative to the root or absolute
    #[arg(long)]
    pub location: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the available storage backends
    Backends,

    /// Look for a file and print its descriptor as JSON
    Find(Target),

    /// Print the content of a file
    Cat(Target),

    /// Create a new file
    Create {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value = "image/svg+xml")]
        mime_type: String,

        /// Initial content
        #[arg(long, default_value = "")]
        data: String,
    },

    /// Overwrite an existing file
    Save {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        data: String,
    },

    /// Load a file and wait until it is modified by another program
    Watch(Target),

    /// Append text to a document and let autosave write it on exit
    Edit {
        #[command(flatten)]
        target: Target,

        /// Text appended to the document
        #[arg(long)]
        append: String,
    },
}
