// ABOUTME: Entry point for the cnab-oci CLI application.
// ABOUTME: Parses arguments, wires settings into the registry resolver, and runs bundle fixup.

mod cli;
mod output;

use clap::Parser;
use cli::{Cli, Commands, FixupArgs};
use cnab_oci::bundle::{Bundle, RelocationMap};
use cnab_oci::config::Settings;
use cnab_oci::error::{Error, Result};
use cnab_oci::image_client::DockerImageClient;
use cnab_oci::registry::RegistryResolver;
use cnab_oci::remotes::{FixupOptions, fixup_bundle};
use cnab_oci::types::{ImageRef, PlatformFilter};
use output::Output;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut output = Output::new(cli.output_mode);
    output.start_timer();

    if let Err(e) = run(cli, &output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::discover_or_default(&env::current_dir()?)?,
    };

    match cli.command {
        Commands::Fixup(args) => fixup(args, settings, output).await,
    }
}

async fn fixup(args: FixupArgs, settings: Settings, output: &Output) -> Result<()> {
    let target = ImageRef::parse(&args.target)?;
    let mut bundle = Bundle::load(&args.bundle)?;
    let options = fixup_options(&args, &settings, output)?;

    let resolver = RegistryResolver::from_settings(&settings)?
        .insecure_registries(args.insecure_registries.iter().cloned())
        .build()
        .await?;

    if args.output != "-" {
        output.progress(&format!(
            "Fixing up {} into {}",
            args.bundle.display(),
            target
        ));
    }

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling fixup");
            interrupt.cancel();
        }
    });

    let relocation_map = match fixup_bundle(&ctx, &mut bundle, &target, &resolver, options).await
    {
        Ok(map) => map,
        Err(_) if ctx.is_cancelled() => return Err(Error::Interrupted),
        Err(e) => return Err(e.into()),
    };

    write_bundle(&bundle, &args.output)?;
    if let Some(path) = &args.relocation_map {
        relocation_map.save(path)?;
    }

    if args.output != "-" {
        output.success(&format!("Fixed bundle written to {}", args.output));
    }
    Ok(())
}

/// Command-line flags override settings file values.
fn fixup_options(args: &FixupArgs, settings: &Settings, output: &Output) -> Result<FixupOptions> {
    let mut options = FixupOptions::new()
        .event_callback(output.event_printer())
        .auto_bundle_update(args.auto_update_bundle)
        .max_concurrent_jobs(
            args.max_concurrent_jobs
                .unwrap_or(settings.concurrency.max_concurrent_jobs),
        )
        .job_buffer_size(
            args.job_buffer_size
                .unwrap_or(settings.concurrency.job_buffer_size),
        );

    if let Some(filter) = platform_filter(&args.invocation_platforms, &settings.platforms.invocation)? {
        options = options.invocation_platforms(filter);
    }
    if let Some(filter) = platform_filter(&args.component_platforms, &settings.platforms.component)? {
        options = options.component_platforms(filter);
    }
    if let Some(path) = &args.known_relocations {
        options = options.relocation_map(RelocationMap::load(path)?);
    }
    if args.push_images {
        let client = DockerImageClient::connect_local()?
            .with_credentials(settings.resolve_credentials()?);
        options = options.push_images(Arc::new(client));
    }
    Ok(options)
}

fn platform_filter(
    flags: &[String],
    configured: &Option<PlatformFilter>,
) -> Result<Option<PlatformFilter>> {
    if flags.is_empty() {
        return Ok(configured.clone());
    }
    Ok(Some(PlatformFilter::parse(flags)?))
}

fn write_bundle(bundle: &Bundle, destination: &str) -> Result<()> {
    if destination == "-" {
        println!("{}", bundle.to_json_pretty()?);
        return Ok(());
    }
    bundle.save(Path::new(destination))?;
    Ok(())
}
