use crate::config::{BackendKind, StorageConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chai")]
#[command(author, version, about = "Chat with persistent conversation history", long_about = None)]
pub struct Cli {
    /// Storage backend, overriding the configured one
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendKind>,

    /// Directory for the flat-file backend
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,

    /// MongoDB connection string for the document backend
    #[arg(long, global = true)]
    pub mongo_uri: Option<String>,

    /// MongoDB database name for the document backend
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat; prompts for anything not given
    Chat {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        thread: Option<String>,
    },

    /// List a user's threads
    Threads {
        #[arg(short, long)]
        user: String,
    },

    /// Print a stored conversation
    Show {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        thread: String,
    },

    /// Delete a stored conversation
    Delete {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        thread: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded storage configuration
    pub fn apply_overrides(&self, storage: &mut StorageConfig) {
        if let Some(backend) = self.backend {
            storage.backend = backend;
        }
        if let Some(dir) = &self.storage_dir {
            storage.flat_file.storage_dir = dir.clone();
        }
        if let Some(uri) = &self.mongo_uri {
            storage.document.uri = uri.clone();
        }
        if let Some(database) = &self.database {
            storage.document.database = database.clone();
        }
    }
}
