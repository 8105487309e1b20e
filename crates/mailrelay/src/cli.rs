//! Command line definition.

use clap::{Args, Parser, Subcommand};

/// Mail forwarding relay with regex recipient routing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// `SQLite` database path (overrides `DB_FILE`)
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the SMTP service
    Serve,
    /// Manage forwarding rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Manage the domain list
    #[command(subcommand)]
    Domains(DomainsCommand),
    /// Inspect delivery logs
    #[command(subcommand)]
    Logs(LogsCommand),
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// List active rules
    List(OutputArgs),
    /// Add a rule
    Add {
        /// Regular expression tested against the recipient
        pattern: String,
        /// Target address, or a comma-separated list
        forward_to: String,
        /// Free-form note
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Change fields of a rule
    Update {
        /// Rule id
        id: i64,
        /// New pattern
        #[arg(long)]
        pattern: Option<String>,
        /// New target list
        #[arg(long)]
        forward_to: Option<String>,
        /// New note
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a rule
    Remove {
        /// Rule id
        id: i64,
    },
    /// Report rules whose pattern does not compile
    Check,
}

#[derive(Subcommand, Debug)]
pub enum DomainsCommand {
    /// List domains
    List(OutputArgs),
    /// Add a domain
    Add {
        /// Domain name
        name: String,
    },
    /// Remove a domain
    Remove {
        /// Domain name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogsCommand {
    /// List delivery logs, newest first
    List {
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Rows per page
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct OutputArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
