//! ksi-cli configuration: global options shared by every subcommand, in
//! the style of `prober::config::Config` — one `clap::Parser` struct with
//! `env` fallbacks, no separate config-file format.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line client for a Keyless Signature Infrastructure: sign,
/// extend, and verify signatures against an aggregator/extender/
/// publications-file endpoint set.
#[derive(Parser, Debug)]
#[command(name = "ksi")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Aggregator endpoint, e.g. `https://aggregator.example.com/gt-signingservice`
    #[arg(long, env = "KSI_AGGREGATOR", global = true)]
    pub aggregator: Option<String>,

    /// Extender endpoint, e.g. `https://extender.example.com/gt-extendingservice`
    #[arg(long, env = "KSI_EXTENDER", global = true)]
    pub extender: Option<String>,

    /// Publications file URL or `file://` path
    #[arg(long, env = "KSI_PUBLICATIONS_URL", global = true)]
    pub publications_url: Option<String>,

    /// Trust the publications-file/calendar-auth signer by subject email
    #[arg(long, env = "KSI_TRUST_EMAIL", global = true)]
    pub trust_email: Option<String>,

    /// Trust the signer by pinned certificate SHA-256 fingerprint (hex)
    #[arg(long, env = "KSI_TRUST_FINGERPRINT", global = true)]
    pub trust_fingerprint: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hash a file and request a signature from the aggregator
    Sign(SignArgs),
    /// Replace a signature's calendar chain via the extender
    Extend(ExtendArgs),
    /// Verify a signature against the configured trust anchors
    Verify(VerifyArgs),
    /// Fetch and summarize the publications file
    Publications,
}

#[derive(Parser, Debug)]
pub struct SignArgs {
    /// File to hash and sign
    pub input: PathBuf,
    /// Where to write the resulting signature container
    #[arg(long, short = 'o', default_value = "signature.ksig")]
    pub output: PathBuf,
    /// Hash algorithm to use for the document hash
    #[arg(long, default_value = "sha256")]
    pub hash_algorithm: String,
    /// Local aggregation level to request (0 for ordinary signing)
    #[arg(long, default_value = "0")]
    pub level: u8,
}

#[derive(Parser, Debug)]
pub struct ExtendArgs {
    /// Signature container to extend
    pub signature: PathBuf,
    /// Where to write the extended signature
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
    /// Extend to the publication at or after this Unix time instead of the
    /// most recent one
    #[arg(long)]
    pub to_time: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Signature container to verify
    pub signature: PathBuf,
    /// Original document the signature is claimed to cover
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// A publication string to verify against, obtained out-of-band
    #[arg(long)]
    pub publication_string: Option<String>,
}
