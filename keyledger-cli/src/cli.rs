//! Command-line surface
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use clap::{Args, Parser, Subcommand};
use keyledger_config::{AppConfig, BackendKind, GitHubConfig, DEFAULT_GITHUB_API_URL};
use keyledger_keys::{Command, Ttl};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "keyledger")]
#[command(about = "Manage ephemeral auth keys kept in a versioned JSON document")]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the key document lives. Unset flags fall back to the environment.
#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Backend holding the document: github, file or memory
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// GitHub repo owner (user or org)
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// GitHub repository name
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// GitHub personal access token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Branch to read and commit on
    #[arg(long, global = true)]
    pub branch: Option<String>,

    /// Path of the key document (default: keys)
    #[arg(long, global = true)]
    pub path: Option<String>,

    /// Root directory for the file backend
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add a key with expiry
    Add {
        /// Identifier for the key (e.g. username or id)
        #[arg(long)]
        key_id: String,

        /// The key or token string
        #[arg(long)]
        key_value: String,

        /// Duration in seconds or the word 'lifetime'
        #[arg(long)]
        duration: Ttl,

        /// Provenance recorded with the key
        #[arg(long)]
        added_by: Option<String>,
    },

    /// Manually remove a key
    Remove {
        /// Identifier for the key to remove
        #[arg(long)]
        key_id: String,
    },

    /// Remove expired keys
    #[command(visible_alias = "clean")]
    Cleanup,

    /// List keys
    List,

    /// Keep running, expiring keys on time and sweeping periodically
    Watch {
        /// Seconds between sweeps (0 disables the periodic sweep)
        #[arg(long)]
        sweep_interval: Option<u64>,
    },
}

impl StoreArgs {
    /// Layer explicit flags over the environment configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(path) = &self.path {
            config.keys_path = path.clone();
        }
        if let Some(root) = &self.root {
            config.file_root = root.clone();
        }

        let github = config.github.take();
        let owner = self.owner.clone().or_else(|| github.as_ref().map(|g| g.owner.clone()));
        let repo = self.repo.clone().or_else(|| github.as_ref().map(|g| g.repo.clone()));
        let token = self.token.clone().or_else(|| github.as_ref().map(|g| g.token.clone()));
        let branch = self
            .branch
            .clone()
            .or_else(|| github.as_ref().and_then(|g| g.branch.clone()));
        let api_url = github
            .as_ref()
            .map(|g| g.api_url.clone())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());

        config.github = match (owner, repo, token) {
            (Some(owner), Some(repo), Some(token)) => Some(GitHubConfig {
                owner,
                repo,
                token,
                branch,
                api_url,
            }),
            _ => None,
        };
    }
}

impl Commands {
    /// The key store command for one-shot subcommands; `None` for `watch`
    pub fn to_command(&self, default_added_by: &str) -> Option<Command> {
        match self {
            Commands::Add {
                key_id,
                key_value,
                duration,
                added_by,
            } => Some(Command::Add {
                id: key_id.clone(),
                value: key_value.clone(),
                ttl: *duration,
                added_by: added_by
                    .clone()
                    .unwrap_or_else(|| default_added_by.to_string()),
            }),
            Commands::Remove { key_id } => Some(Command::Remove { id: key_id.clone() }),
            Commands::Cleanup => Some(Command::Cleanup),
            Commands::List => Some(Command::List),
            Commands::Watch { .. } => None,
        }
    }
}
