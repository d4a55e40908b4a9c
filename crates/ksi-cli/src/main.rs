//! ksi - command-line client for a Keyless Signature Infrastructure.
//!
//! Thin by design: sign/verify/extend subcommands over a `ksi::Context`,
//! no interactive mode, no config file beyond clap's env/default-value
//! support (spec.md's Non-goals, carried into SPEC_FULL.md §11).

mod config;

use clap::Parser;
use config::{Command, ExtendArgs, SignArgs, VerifyArgs};
use ksi::{
    pubstring, Context, ContextBuilder, HashAlgorithm, Imprint, PolicyOutcome,
    PublicationsFileTrustPolicy, Signature, Transport,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = config::Cli::parse();

    let default_directive = match cli.verbose {
        0 => "ksi_cli=info,ksi=info",
        1 => "ksi_cli=debug,ksi=debug",
        _ => "ksi_cli=trace,ksi=trace,ksi_net=trace,ksi_async=trace,ksi_verify=trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: config::Cli) -> anyhow::Result<()> {
    let aggregator: Arc<dyn Transport> = match &cli.aggregator {
        Some(uri) => ksi::transport_for_uri(uri)?.into(),
        None if matches!(cli.command, Command::Sign(_)) => {
            anyhow::bail!("--aggregator (or KSI_AGGREGATOR) is required to sign");
        }
        None => ksi::transport_for_uri("file:///dev/null")?.into(),
    };

    let mut builder = ContextBuilder::new(aggregator);
    if let Some(uri) = &cli.extender {
        builder = builder.extender(ksi::transport_for_uri(uri)?.into());
    }
    if let Some(url) = &cli.publications_url {
        builder = builder.publications_url(url.clone());
    }

    let mut trust_policy = PublicationsFileTrustPolicy::default();
    trust_policy.subject_email = cli.trust_email.clone();
    if let Some(hex_fp) = &cli.trust_fingerprint {
        let bytes = hex::decode(hex_fp)?;
        let fingerprint: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("--trust-fingerprint must be 32 bytes of hex"))?;
        trust_policy.pinned_cert_sha256 = Some(fingerprint);
    }
    builder = builder.trust_policy(trust_policy);

    let ctx = builder.build();

    match cli.command {
        Command::Sign(args) => sign(&ctx, args).await,
        Command::Extend(args) => extend(&ctx, args).await,
        Command::Verify(args) => verify(&ctx, args).await,
        Command::Publications => publications(&ctx).await,
    }
}

fn parse_hash_algorithm(name: &str) -> anyhow::Result<HashAlgorithm> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "sha1" => HashAlgorithm::Sha1,
        "sha256" => HashAlgorithm::Sha256,
        "ripemd160" => HashAlgorithm::Ripemd160,
        "sha384" => HashAlgorithm::Sha384,
        "sha512" => HashAlgorithm::Sha512,
        other => anyhow::bail!("unknown hash algorithm {other:?}"),
    })
}

async fn sign(ctx: &Context, args: SignArgs) -> anyhow::Result<()> {
    let algorithm = parse_hash_algorithm(&args.hash_algorithm)?;
    let data = tokio::fs::read(&args.input).await?;
    let hash = Imprint::of(algorithm, &data);
    info!(file = %args.input.display(), hash = %hash, "requesting signature");

    let signature = ctx.sign(hash, args.level).await?;
    tokio::fs::write(&args.output, signature.to_bytes()?).await?;
    info!(output = %args.output.display(), "signature written");
    Ok(())
}

async fn extend(ctx: &Context, args: ExtendArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.signature).await?;
    let signature = Signature::from_bytes(&bytes)?;

    let extended = ctx.extend(&signature, args.to_time).await?;
    let output = args.output.unwrap_or_else(|| args.signature.clone());
    tokio::fs::write(&output, extended.to_bytes()?).await?;
    info!(output = %output.display(), "signature extended");
    Ok(())
}

async fn verify(ctx: &Context, args: VerifyArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.signature).await?;
    let signature = Signature::from_bytes(&bytes)?;

    let document_hash = match &args.input {
        Some(path) => {
            let data = tokio::fs::read(path).await?;
            let algorithm = signature
                .aggregation_chains
                .first()
                .map(|c| c.input_hash.algorithm())
                .unwrap_or(HashAlgorithm::Sha256);
            Some(Imprint::of(algorithm, &data))
        }
        None => None,
    };

    let user_publication = match &args.publication_string {
        Some(s) => {
            let (time, hash) = pubstring::decode(s)?;
            Some(ksi::PublicationRecord {
                publication_time: time,
                publication_hash: hash,
                publication_refs: vec![],
                repository_uris: vec![],
            })
        }
        None => None,
    };

    let result = ctx
        .verify_with(&signature, document_hash, 0, user_publication, None)
        .await;

    print_policy_result(&result);
    match result.outcome {
        PolicyOutcome::Ok => Ok(()),
        PolicyOutcome::Fail(_, message) => anyhow::bail!("verification failed: {message}"),
        PolicyOutcome::Inconclusive => anyhow::bail!("verification inconclusive"),
    }
}

fn print_policy_result(result: &ksi::PolicyResult) {
    println!("policy {}:", result.policy);
    for (name, outcome) in &result.rule_results {
        println!("  {name}: {outcome:?}");
    }
    match &result.outcome {
        PolicyOutcome::Ok => println!("=> OK"),
        PolicyOutcome::Fail(_, message) => println!("=> FAIL ({message})"),
        PolicyOutcome::Inconclusive => println!("=> INCONCLUSIVE"),
    }
    if let Some(fallback) = &result.fallback {
        print_policy_result(fallback);
    }
}

async fn publications(ctx: &Context) -> anyhow::Result<()> {
    let file = ctx.publications_file().await?;
    println!("publications file: {} entries, created {}", file.publications.len(), file.header.creation_time);
    if let Some(latest) = file.publications.iter().max_by_key(|p| p.publication_time) {
        println!("latest publication: time={} hash={}", latest.publication_time, latest.publication_hash);
    }
    Ok(())
}
