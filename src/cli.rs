use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "bag3d",
    version,
    about = "3D BAG border partitioning and quality statistics tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load an elevation tile-index document into the store
    ImportIndex(ImportIndexArgs),
    /// Detect AHN2/AHN3 border tiles and derive the per-variant job configs
    Partition(PartitionArgs),
    /// Sample the fused output and compute accuracy statistics
    Quality(QualityArgs),
    /// Report store and run-manifest state
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ImportIndexArgs {
    #[arg(long, default_value = ".cache/bag3d")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Base batch3dfier configuration document
    #[arg(long)]
    pub config: PathBuf,

    /// Tile-index JSON document to import
    #[arg(long)]
    pub index_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PartitionArgs {
    #[arg(long, default_value = ".cache/bag3d")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Base batch3dfier configuration document
    #[arg(long)]
    pub config: PathBuf,

    /// Directory of the AHN2 point cloud files
    #[arg(long)]
    pub ahn2_dir: PathBuf,

    /// Directory of the AHN3 point cloud files
    #[arg(long)]
    pub ahn3_dir: PathBuf,

    /// Filename pattern of the per-tile AHN2 metadata files
    #[arg(long, default_value = "{tile}.txt")]
    pub metadata_pattern: String,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Detect and persist border tiles without writing the job configs
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct QualityArgs {
    #[arg(long, default_value = ".cache/bag3d")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Base batch3dfier configuration document
    #[arg(long)]
    pub config: PathBuf,

    /// Directory of per-tile reference rasters (<tile>.tif)
    #[arg(long)]
    pub raster_dir: PathBuf,

    /// Destination of the enriched sample (audit artifact)
    #[arg(long)]
    pub sample_path: Option<PathBuf>,

    /// Destination of the RMSE report
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/bag3d")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Base batch3dfier configuration document
    #[arg(long)]
    pub config: Option<PathBuf>,
}
