//! bnao CLI - bake bent normal / AO textures from a JSON scene description.
//!
//! # Commands
//!
//! - `bnao bake <scene.json>` - Bake the scene's selection
//! - `bnao config` - Print the effective configuration as JSON
//! - `bnao directions <n>` - Print the sample directions for `n` samples

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use bnao::config::{
    BakeConfig, BakeMode, CullOverrideMode, NameMode, NormalsConversionMode, NormalsSpace, Resolution, UvChannel,
    WriteFailurePolicy,
};
use bnao::progress::{ProgressStage, ProgressUpdate};
use bnao::render::SoftwareBackend;
use bnao::scene::desc::SceneDesc;
use bnao::storage::FsStorage;
use bnao::{BakeOutcome, Baker};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("BNAO_BUILD_DATE"),
    " ",
    env!("BNAO_BUILD_TIME"),
    ")"
);

/// Bent normal and ambient occlusion baker
#[derive(Parser)]
#[command(name = "bnao")]
#[command(version = VERSION)]
struct Cli {
    /// More output (-v debug, -vv trace). BNAO_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bake a scene description
    #[command(visible_alias = "b")]
    Bake(BakeArgs),

    /// Print the effective configuration
    #[command(visible_alias = "c")]
    Config(ConfigArgs),

    /// Print sample directions
    #[command(visible_alias = "d")]
    Directions {
        /// Number of directions
        count: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    BentNormal,
    Ao,
    Conversion,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpaceArg {
    Tangent,
    Object,
    World,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConversionArg {
    TangentToObject,
    ObjectToTangent,
}

#[derive(Clone, Copy, ValueEnum)]
enum NameArg {
    Shortest,
    Longest,
    Alphabetical,
    Whatever,
}

#[derive(Clone, Copy, ValueEnum)]
enum CullArg {
    TwoSided,
    OneSided,
    Material,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file (default: per-user config if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also save the effective config to this file
    #[arg(long)]
    save: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args)]
struct BakeArgs {
    /// Scene description (JSON)
    scene: PathBuf,

    /// Config file (default: per-user config if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Selected root node; repeat for several. Defaults to the scene's selection.
    #[arg(short, long = "select")]
    select: Vec<String>,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line overrides of config values.
#[derive(Args)]
struct Overrides {
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long, value_enum)]
    space: Option<SpaceArg>,
    #[arg(long, value_enum)]
    conversion: Option<ConversionArg>,
    /// UV set to bake into (0-3)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    uv: Option<u8>,
    /// Output resolution (power of two, 64-8192)
    #[arg(short, long)]
    res: Option<u32>,
    /// Depth map resolution (power of two, 64-8192)
    #[arg(long)]
    shadow_res: Option<u32>,
    #[arg(short, long)]
    samples: Option<u32>,
    #[arg(long)]
    dilation: Option<u32>,
    #[arg(long)]
    shadow_bias: Option<f32>,
    #[arg(long)]
    ao_bias: Option<f32>,
    /// Count directions below the surface too
    #[arg(long)]
    no_clamp: bool,
    /// Let the rest of the scene occlude
    #[arg(long)]
    include_scene: bool,
    /// One texture for the whole selection
    #[arg(long)]
    shared: bool,
    #[arg(long)]
    no_normal_maps: bool,
    #[arg(long)]
    original_shaders: bool,
    #[arg(long, value_enum)]
    cull: Option<CullArg>,
    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    name: Option<NameArg>,
    /// Leave empty texels transparent
    #[arg(long)]
    transparent: bool,
    /// Stop at the first file that fails to write
    #[arg(long)]
    abort_on_write_error: bool,
}

impl Overrides {
    fn apply(&self, c: &mut BakeConfig) -> Result<()> {
        if let Some(m) = self.mode {
            c.bake_mode = match m {
                ModeArg::BentNormal => BakeMode::BentNormal,
                ModeArg::Ao => BakeMode::AmbientOcclusion,
                ModeArg::Conversion => BakeMode::NormalsConversion,
            };
        }
        if let Some(s) = self.space {
            c.normals_space = match s {
                SpaceArg::Tangent => NormalsSpace::Tangent,
                SpaceArg::Object => NormalsSpace::Object,
                SpaceArg::World => NormalsSpace::World,
            };
        }
        if let Some(m) = self.conversion {
            c.conversion_mode = match m {
                ConversionArg::TangentToObject => NormalsConversionMode::TangentToObject,
                ConversionArg::ObjectToTangent => NormalsConversionMode::ObjectToTangent,
            };
        }
        if let Some(uv) = self.uv {
            c.uv_channel = [UvChannel::UV0, UvChannel::UV1, UvChannel::UV2, UvChannel::UV3][uv as usize];
        }
        if let Some(r) = self.res {
            c.bake_res = Resolution::new(r)?;
        }
        if let Some(r) = self.shadow_res {
            c.shadow_map_res = Resolution::new(r)?;
        }
        if let Some(s) = self.samples {
            c.samples = s;
        }
        if let Some(d) = self.dilation {
            c.dilation = d;
        }
        if let Some(b) = self.shadow_bias {
            c.shadow_bias = b;
        }
        if let Some(b) = self.ao_bias {
            c.ao_bias = b;
        }
        if let Some(cull) = self.cull {
            c.cull_override = match cull {
                CullArg::TwoSided => CullOverrideMode::ForceTwoSided,
                CullArg::OneSided => CullOverrideMode::ForceOneSided,
                CullArg::Material => CullOverrideMode::UseMaterialParameter,
            };
        }
        if let Some(o) = &self.output {
            c.output_path = o.clone();
        }
        if let Some(n) = self.name {
            c.name_mode = match n {
                NameArg::Shortest => NameMode::Shortest,
                NameArg::Longest => NameMode::Longest,
                NameArg::Alphabetical => NameMode::Alphabetical,
                NameArg::Whatever => NameMode::Whatever,
            };
        }
        c.clamp_to_hemisphere &= !self.no_clamp;
        c.include_scene |= self.include_scene;
        c.force_shared_texture |= self.shared;
        c.use_normal_maps &= !self.no_normal_maps;
        c.use_original_shaders |= self.original_shaders;
        c.transparent_pixels |= self.transparent;
        if self.abort_on_write_error {
            c.write_failure = WriteFailurePolicy::Abort;
        }
        c.validate()?;
        Ok(())
    }
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<BakeConfig> {
    let mut config = match path {
        Some(p) => BakeConfig::load(p).with_context(|| format!("Failed to load config: {}", p.display()))?,
        None => BakeConfig::load_or_default(),
    };
    overrides.apply(&mut config)?;
    Ok(config)
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("BNAO_LOG").unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

fn cmd_bake(args: &BakeArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), &args.overrides)?;

    let mut desc =
        SceneDesc::load(&args.scene).with_context(|| format!("Failed to read scene: {}", args.scene.display()))?;
    if !args.select.is_empty() {
        desc.selection = args.select.clone();
    }
    let base = args.scene.parent().unwrap_or(Path::new("."));
    let (mut scene, selection) = desc.build(base)?;

    // Log roughly every tenth of the sampling stage
    let mut last_decile = None;
    let progress = move |u: &ProgressUpdate| {
        if u.stage != ProgressStage::Integrating {
            tracing::info!("{}: {}", u.title, u.stage);
            return;
        }
        let decile = (u.fraction() * 10.0) as u32;
        if last_decile != Some(decile) {
            last_decile = Some(decile);
            tracing::info!("{}: sample {}/{}", u.title, u.done, u.total);
        }
    };

    let mut backend = SoftwareBackend::new();
    let mut storage = FsStorage::new(".");
    let start = std::time::Instant::now();
    let outcome = Baker::new(config)
        .with_progress(progress)
        .bake(&mut scene, &selection, &mut backend, &mut storage)?;

    match outcome {
        BakeOutcome::NothingToBake => println!("Nothing to bake in selection"),
        BakeOutcome::Completed(report) => {
            for path in &report.written {
                println!("{}", path.display());
            }
            tracing::info!("done in {:.1}s", start.elapsed().as_secs_f32());
            if !report.is_complete() {
                for f in &report.failures {
                    eprintln!("Failed: {}: {}", f.path.display(), f.error);
                }
                anyhow::bail!("{} texture(s) could not be written", report.failures.len());
            }
        }
    }
    Ok(())
}

fn cmd_config(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), &args.overrides)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    if let Some(path) = &args.save {
        config.save(path).with_context(|| format!("Failed to save config: {}", path.display()))?;
    }
    Ok(())
}

fn cmd_directions(count: u32) {
    for d in bnao::bake::sphere_directions(count) {
        println!("{:.6} {:.6} {:.6}", d.x, d.y, d.z);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match &cli.command {
        Commands::Bake(args) => cmd_bake(args),
        Commands::Config(args) => cmd_config(args),
        Commands::Directions { count } => {
            cmd_directions(*count);
            Ok(())
        }
    }
}
