use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// crc - runs a single-node OpenShift cluster in a local virtual machine
#[derive(Debug, Parser)]
#[command(name = "crc", author, about, version, styles=styles::styles())]
pub struct CrcArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<CrcSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Commands served by the daemon, plus the daemon itself
#[derive(Debug, Subcommand)]
pub enum CrcSubcommand {
    /// Create the VM if needed, boot it and provision the cluster
    #[command(name = "start")]
    Start {
        /// File holding the image pull secret
        #[arg(short = 'p', long, value_name = "PATH")]
        pull_secret_file: Option<PathBuf>,
    },

    /// Shut the VM down gracefully
    #[command(name = "stop")]
    Stop,

    /// Remove the VM and its registration
    #[command(name = "delete")]
    Delete,

    /// Show VM and cluster health
    #[command(name = "status")]
    Status,

    /// Print the address of the VM
    #[command(name = "ip")]
    Ip,

    /// Print the web console URL and credentials
    #[command(name = "console")]
    Console {
        /// Print the kubeadmin credentials too
        #[arg(long)]
        credentials: bool,
    },

    /// Print version information
    #[command(name = "version")]
    Version,

    /// Read and change settings
    #[command(name = "config")]
    Config {
        /// The config action
        #[command(subcommand)]
        action: ConfigSubcommand,
    },

    /// Serve the local API socket
    #[command(name = "daemon")]
    Daemon,
}

/// Settings actions
#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Print the value of a setting
    #[command(name = "get")]
    Get {
        /// Setting name
        key: String,
    },

    /// Change a setting
    #[command(name = "set")]
    Set {
        /// Setting name
        key: String,

        /// New value
        value: String,
    },

    /// Reset a setting to its default
    #[command(name = "unset")]
    Unset {
        /// Setting name
        key: String,
    },

    /// Print every setting with its current value
    #[command(name = "view")]
    View,
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
