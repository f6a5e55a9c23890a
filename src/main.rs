//! GhostProc CLI
//!
//! Command-line interface for exercising the processing engine with
//! synthetic frames and in-process surfaces.

use clap::{Parser, Subcommand, ValueEnum};
use ghostproc::{
    buffer::FlushConfig,
    processing::ColorSpaceInfo,
    types::BufferUsage,
    BufferFlag, BufferQueue, BufferRequestConfig, CallbackEvent, ChannelCallback, DrainingSink,
    EngineConfig, Fence, PixelFormat, Surface, TransformConfig, TransformKind, VideoProcessor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transform kind for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    /// Colorspace conversion (HDR10 input tonemapped to SDR)
    Color,
    /// HDR metadata generation
    Metadata,
    /// Detail enhancement
    Detail,
}

impl From<Kind> for TransformKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Color => TransformKind::ColorSpaceConvert,
            Kind::Metadata => TransformKind::GenerateMetadata,
            Kind::Detail => TransformKind::EnhanceDetail,
        }
    }
}

#[derive(Parser)]
#[command(name = "ghostproc")]
#[command(about = "Asynchronous video frame processing engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show transform kinds and default settings
    Info,

    /// Drive synthetic frames through the engine
    Run {
        /// Transform kind
        #[arg(short, long, value_enum, default_value = "detail")]
        kind: Kind,

        /// Number of frames to push
        #[arg(short, long, default_value = "120")]
        frames: u32,

        /// Frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "360")]
        height: u32,

        /// Engine configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,

        /// Hot-swap the output surface after this many rendered frames
        #[arg(long)]
        swap_at: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ghostproc=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Run {
            kind,
            frames,
            width,
            height,
            config,
            swap_at,
        } => cmd_run(kind.into(), frames, width, height, config, swap_at),
    }
}

fn cmd_info() -> anyhow::Result<()> {
    println!("GhostProc {}", ghostproc::VERSION);
    println!("=============\n");

    println!("=== Transform kinds ===");
    for kind in TransformKind::ALL {
        println!("  - {} ({})", kind.display_name(), kind.short_name());
        println!("      defaults: {:?}", TransformConfig::default_for(kind));
    }

    let config = EngineConfig::default();
    println!("\n=== Engine defaults ===");
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Input format and color tags for synthetic frames of each kind
fn input_format(kind: TransformKind) -> (PixelFormat, Option<ColorSpaceInfo>) {
    match kind {
        TransformKind::ColorSpaceConvert | TransformKind::GenerateMetadata => {
            (PixelFormat::Rgba1010102, Some(ColorSpaceInfo::bt2020_pq()))
        }
        TransformKind::EnhanceDetail => (PixelFormat::Rgba8888, Some(ColorSpaceInfo::srgb())),
    }
}

/// Fill a frame with a moving diagonal gradient
fn paint(buffer: &ghostproc::NativeBuffer, frame: u32) {
    let mut data = buffer.lock();
    let height = data.resolution.height;
    let ten_bit = data.format == PixelFormat::Rgba1010102;
    for y in 0..height {
        let row = data.row_mut(y);
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let v = (x as u32 + y + frame * 4) % 256;
            if ten_bit {
                let c = v * 4;
                let packed = c | (c << 10) | ((1023 - c) << 20) | (3 << 30);
                px.copy_from_slice(&packed.to_le_bytes());
            } else {
                px.copy_from_slice(&[v as u8, (255 - v) as u8, (v / 2) as u8, 255]);
            }
        }
    }
}

/// Upstream producer: pushes `frames` synthetic frames at ~60fps timestamps
fn feed(
    upstream: Arc<dyn Surface>,
    kind: TransformKind,
    frames: u32,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let (format, color_space) = input_format(kind);
    let request = BufferRequestConfig {
        width,
        height,
        stride_alignment: 8,
        format,
        usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE,
        timeout: Duration::from_secs(5),
    };

    for i in 0..frames {
        let (buffer, _) = upstream.request_buffer(&request)?;
        paint(&buffer, i);
        buffer.update_metadata(|m| m.color_space = color_space);
        let flush = FlushConfig {
            damage: ghostproc::buffer::Damage::full(buffer.resolution()),
            timestamp: i as i64 * 16667,
        };
        upstream.flush_buffer(&buffer, Fence::signaled(), &flush)?;
    }
    Ok(())
}

fn cmd_run(
    kind: TransformKind,
    frames: u32,
    width: u32,
    height: u32,
    config: Option<String>,
    swap_at: Option<u32>,
) -> anyhow::Result<()> {
    let engine_config = match config {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    println!("GhostProc Run");
    println!("=============\n");
    println!("Kind: {}", kind);
    println!("Frames: {}", frames);
    println!("Resolution: {}x{}", width, height);
    println!();

    let engine = VideoProcessor::builder(kind).config(engine_config).build()?;
    engine.init()?;

    let (callback, events) = ChannelCallback::new();
    engine.set_callback(Arc::new(callback))?;
    let upstream = engine.create_input_surface()?;

    let display = BufferQueue::new("display");
    let mut sink = DrainingSink::spawn(display.consumer())?;
    engine.set_output_surface(display.producer())?;

    engine.configure(TransformConfig::default_for(kind))?;
    engine.prepare()?;
    engine.start()?;

    let start = Instant::now();
    let feeder = std::thread::spawn(move || feed(upstream, kind, frames, width, height));

    let mut handled = 0u32;
    let mut rendered = 0u32;
    let mut swapped = false;
    while handled < frames {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .ok_or_else(|| anyhow::anyhow!("Timed out after {} of {} frames", handled, frames))?;
        match event {
            CallbackEvent::OutputBufferAvailable { index, .. } => {
                handled += 1;
                engine.release_output_buffer(index, true)?;
                rendered += 1;
            }
            CallbackEvent::Error(code) => {
                handled += 1;
                tracing::warn!("Frame failed: {}", code);
            }
            CallbackEvent::OutputFormatChanged(format) => {
                println!("Output format changed: {:?}", format);
            }
            CallbackEvent::State(state) => tracing::debug!("State: {}", state),
        }

        if !swapped && swap_at.is_some_and(|k| rendered >= k) {
            let next = BufferQueue::new("display-2");
            let next_sink = DrainingSink::spawn(next.consumer())?;
            engine.set_output_surface(next.producer())?;
            println!("Swapped output surface after {} frames", rendered);
            sink = next_sink;
            swapped = true;
        }
    }

    feeder
        .join()
        .map_err(|_| anyhow::anyhow!("Feeder thread panicked"))??;

    engine.notify_eos()?;
    let eos = events.wait_for(Duration::from_secs(5), |e| {
        matches!(
            e,
            CallbackEvent::OutputBufferAvailable {
                flag: BufferFlag::Eos,
                ..
            }
        )
    });
    if let Some(CallbackEvent::OutputBufferAvailable { index, .. }) = eos {
        engine.release_output_buffer(index, false)?;
    }
    let elapsed = start.elapsed();

    engine.stop()?;
    let stats = engine.stats();
    println!("\nResults:");
    println!("  Total time: {:.2}s", elapsed.as_secs_f64());
    println!("  FPS: {:.1}", frames as f64 / elapsed.as_secs_f64());
    println!("  Processed: {}", stats.frames_processed);
    println!("  Failed: {}", stats.frames_failed);
    println!("  Dropped: {}", stats.frames_dropped);
    println!("  Rendered: {}", stats.buffers_rendered);
    println!("  Presented by current sink: {}", sink.consumed());
    println!("  Output format: {:?}", engine.get_output_format()?);

    engine.release()?;
    Ok(())
}
