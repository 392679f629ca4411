//! TerraPager CLI - Command-line interface
//!
//! Drives the paging engine through a synthetic descent flight: a viewer
//! starts high above a target coordinate and sinks toward the surface while
//! the engine streams the quadtree in underneath it. Useful for watching
//! cancellation and graft behavior under load without a renderer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use terrapager::{
    coord, BuildError, ContentFactory, ContentHandle, PagerCallback, PagerConfig, PagingEngine,
    RefinePolicy, TileKey, TilingProfile, TokioExecutor,
};

/// Synthetic descent demo for the TerraPager streaming engine.
#[derive(Debug, Parser)]
#[command(name = "terrapager", version, about)]
struct Args {
    /// Target latitude the viewer descends toward, in degrees.
    #[arg(long, default_value_t = 47.26)]
    lat: f64,

    /// Target longitude the viewer descends toward, in degrees.
    #[arg(long, default_value_t = 11.39)]
    lon: f64,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 240)]
    frames: u64,

    /// Starting altitude above the surface, in meters.
    #[arg(long, default_value_t = 20_000_000.0)]
    altitude: f64,

    /// Deepest subdivision level.
    #[arg(long)]
    max_level: Option<u32>,

    /// Refine policy: children replace or augment their parent.
    #[arg(long, value_enum)]
    refine: Option<RefineArg>,

    /// Simulated per-tile build cost in milliseconds.
    #[arg(long, default_value_t = 2)]
    work_ms: u64,

    /// Optional JSON config file; command-line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum RefineArg {
    Replace,
    Additive,
}

impl From<RefineArg> for RefinePolicy {
    fn from(value: RefineArg) -> Self {
        match value {
            RefineArg::Replace => RefinePolicy::Replace,
            RefineArg::Additive => RefinePolicy::Additive,
        }
    }
}

/// Factory producing a synthetic payload per tile, with simulated build
/// cost so deferred loads actually overlap frames.
struct ProceduralFactory {
    work: Duration,
}

impl ContentFactory for ProceduralFactory {
    fn build(&self, key: TileKey) -> Result<Option<ContentHandle>, BuildError> {
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        // Payload size shrinks with depth, like real tile meshes do.
        let size = 4096usize >> key.level().min(10);
        Ok(Some(ContentHandle::new(vec![0u8; size.max(16)])))
    }
}

/// Observer counting materialized tiles.
#[derive(Default)]
struct TileCounter {
    created: AtomicU64,
}

impl PagerCallback for TileCounter {
    fn on_create_node(&self, _key: TileKey, _content: &ContentHandle) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }
}

fn load_config(args: &Args) -> Result<PagerConfig, String> {
    // Config file first, flags override.
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?
        }
        None => PagerConfig {
            max_level: 10,
            ..Default::default()
        },
    };
    if let Some(max_level) = args.max_level {
        config.max_level = max_level;
    }
    if let Some(refine) = args.refine {
        config.refine_policy = refine.into();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    println!("TerraPager Descent Demo v{}", terrapager::VERSION);
    println!("==============================");
    println!();
    println!("Target:      {:.4}°, {:.4}°", args.lat, args.lon);
    println!("Max level:   {}", config.max_level);
    println!("Refine:      {:?}", config.refine_policy);
    println!("Frames:      {}", args.frames);
    println!();

    let mut engine = PagingEngine::new(
        config,
        TilingProfile::global_geodetic(),
        Arc::new(ProceduralFactory {
            work: Duration::from_millis(args.work_ms),
        }),
        Arc::new(TokioExecutor::current()),
    )
    .map_err(|e| format!("invalid configuration: {}", e))?;

    let counter = Arc::new(TileCounter::default());
    engine.add_callback(counter.clone());
    engine.build();

    let surface = coord::geodetic_to_ecef(args.lat, args.lon);
    let surface_norm = coord::distance(surface, [0.0; 3]);

    for frame in 0..args.frames {
        // Cubic ease-in toward the target
        let progress = frame as f64 / args.frames.max(1) as f64;
        let altitude = args.altitude * (1.0 - progress).powi(3);
        let scale = (surface_norm + altitude) / surface_norm;
        let viewer = [
            surface[0] * scale,
            surface[1] * scale,
            surface[2] * scale,
        ];

        engine.touch(frame);
        let submitted = engine.traverse(viewer);
        let grafted = engine.drain();
        let pruned = engine.prune(viewer);

        if submitted > 0 || grafted > 0 || pruned > 0 {
            info!(
                frame,
                altitude_km = (altitude / 1000.0) as u64,
                submitted,
                grafted,
                pruned,
                pending = engine.pending_count(),
                "frame"
            );
        }

        tokio::time::sleep(Duration::from_millis(4)).await;
    }

    let visible = engine.visible_content(surface).len();
    let stats = engine.stats();
    engine.shutdown();

    println!();
    println!("Flight complete");
    println!("---------------");
    println!("Tiles created:     {}", counter.created.load(Ordering::Relaxed));
    println!("Jobs submitted:    {}", stats.submitted);
    println!("Results grafted:   {}", stats.grafted);
    println!("Results discarded: {}", stats.discarded);
    println!("Loads cancelled:   {}", stats.cancelled);
    println!("Failed tiles:      {}", stats.failed_tiles);
    println!("Visible at target: {}", visible);

    Ok(())
}
