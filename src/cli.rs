// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the fixup subcommand and the global output flags.

use crate::output::OutputMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cnab-oci")]
#[command(about = "Relocate CNAB bundle images into an OCI registry repository")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// How progress and results are printed
    #[arg(long, value_enum, default_value_t = OutputMode::Normal, global = true)]
    pub output_mode: OutputMode,

    /// Settings file (defaults to cnab-oci.yml discovered in the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Make every bundle image resolvable in the target repository and pin its digest
    Fixup(FixupArgs),
}

#[derive(Args)]
pub struct FixupArgs {
    /// Bundle file to fix up
    pub bundle: PathBuf,

    /// Repository the bundle will be pushed to
    #[arg(short, long)]
    pub target: String,

    /// Where to write the fixed bundle ("-" for stdout)
    #[arg(short, long, default_value = "fixed-bundle.json")]
    pub output: String,

    /// Write the relocation map to this file
    #[arg(long)]
    pub relocation_map: Option<PathBuf>,

    /// Relocation map from an earlier run to start from
    #[arg(long)]
    pub known_relocations: Option<PathBuf>,

    /// Registries reached without TLS verification or over plain HTTP
    #[arg(long, value_delimiter = ',')]
    pub insecure_registries: Vec<String>,

    /// Overwrite pinned digests, sizes and media types instead of checking them
    #[arg(long)]
    pub auto_update_bundle: bool,

    /// Push images from the local Docker daemon when they cannot be resolved
    #[arg(long)]
    pub push_images: bool,

    /// Platforms kept from the invocation image's index (os/arch[/variant])
    #[arg(long, value_delimiter = ',')]
    pub invocation_platforms: Vec<String>,

    /// Platforms kept from component images' indexes (os/arch[/variant])
    #[arg(long, value_delimiter = ',')]
    pub component_platforms: Vec<String>,

    /// Copy tasks running at once
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Copy tasks queued before submission waits
    #[arg(long)]
    pub job_buffer_size: Option<usize>,
}
