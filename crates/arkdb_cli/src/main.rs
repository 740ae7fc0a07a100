//! ArkDB CLI
//!
//! Command-line tools for ADB container files.
//!
//! # Commands
//!
//! - `inspect` - Display container structure and signature records
//! - `verify` - Verify container signatures against a key directory
//! - `sign` - Replace a container's signatures

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ArkDB command-line container tools.
#[derive(Parser)]
#[command(name = "arkdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display container structure and signature records
    Inspect {
        /// Container file to inspect
        file: PathBuf,

        /// Show the full block table
        #[arg(short, long)]
        blocks: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify container signatures against a key directory
    Verify {
        /// Container file to verify
        file: PathBuf,

        /// Directory of trusted public keys
        #[arg(short, long)]
        keys_dir: PathBuf,

        /// Expected schema tag (decimal or 0x-prefixed hex)
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Replace a container's signatures
    Sign {
        /// Container file to sign
        file: PathBuf,

        /// Private key file; may be given multiple times
        #[arg(short = 'k', long = "sign-key", required = true)]
        sign_key: Vec<PathBuf>,

        /// Write the signed container here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_schema(text: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    Ok(parsed.map_err(|_| format!("bad schema tag: {text}"))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            file,
            blocks,
            format,
        } => {
            commands::inspect::run(&file, blocks, &format)?;
        }
        Commands::Verify {
            file,
            keys_dir,
            schema,
        } => {
            let schema = schema.as_deref().map(parse_schema).transpose()?;
            commands::verify::run(&file, &keys_dir, schema)?;
        }
        Commands::Sign {
            file,
            sign_key,
            output,
        } => {
            commands::sign::run(&file, &sign_key, output.as_deref())?;
        }
    }

    Ok(())
}
