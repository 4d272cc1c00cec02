mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::thread;
use std::time::{Duration, Instant};

use cli::Cli;
use nowbar::config::{self, Backend, Config, OutputTarget};
use nowbar::encode::{FfmpegSink, FrameOutput};
use nowbar::render::{GpuSurface, PixelSurface, Surface, Ticker};
use nowbar::{Visualizer, VisualizerError};

const RESTART_DELAY: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    config.validate()?;

    log::info!("nowbar - live spectrum bars");
    log::info!("Analyzer: {}", config.analyzer.path.display());
    log::info!(
        "Viewport: {}x{}, tick {}ms, {:?} backend",
        config.render.width, config.render.height, config.render.tick_interval_ms, config.render.backend
    );

    let surface = build_surface(&config)?;
    let mut visualizer = Visualizer::new(config.visualizer_settings(), surface);
    visualizer
        .start()
        .context("Failed to start the spectrum analyzer")?;

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    let mut ticker = Ticker::new(config.tick_interval());
    log::debug!("Ticking every {:?}", ticker.period());
    let mut frames = 0u64;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        ticker.wait();

        match visualizer.tick() {
            Ok(nowbar::TickOutcome::Drawn { .. }) => frames += 1,
            Ok(nowbar::TickOutcome::Skipped) => {}
            Err(VisualizerError::StreamClosed) if cli.restart => {
                log::warn!("Analyzer exited, restarting in {:?}", RESTART_DELAY);
                thread::sleep(RESTART_DELAY);
                visualizer.start().context("Failed to restart the spectrum analyzer")?;
            }
            Err(VisualizerError::StreamClosed) => {
                log::info!("Analyzer exited");
                break;
            }
            Err(err) => {
                visualizer.stop();
                return Err(err).context("Render loop failed");
            }
        }
    }

    visualizer.stop();
    visualizer.surface_mut().finish()?;

    log::info!("Done: {} frames drawn, {} late ticks", frames, ticker.missed());
    Ok(())
}

/// Config file values apply only where the CLI is at its default.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let config_path = cli.config.clone().or_else(config::discover_config);
    let mut cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) if cli.config.is_some() => return Err(err),
            Err(err) => {
                log::warn!("Ignoring config {}: {:#}", path.display(), err);
                Config::default()
            }
        },
        None => Config::default(),
    };

    if let Some(ref analyzer) = cli.analyzer {
        cfg.analyzer.path = config::expand_home(analyzer);
    }
    if cli.tick_ms != 10 { cfg.render.tick_interval_ms = cli.tick_ms; }
    if cli.width != 200 { cfg.render.width = cli.width; }
    if cli.height != 200 { cfg.render.height = cli.height; }
    if cli.backend != Backend::Cpu { cfg.render.backend = cli.backend; }
    if cli.record.is_some() { cfg.output.record = cli.record.clone(); }
    if cli.preview { cfg.output.preview = true; }

    Ok(cfg)
}

fn build_surface(config: &Config) -> Result<Box<dyn Surface>> {
    let (width, height) = (config.render.width, config.render.height);
    let fps = config.fps();

    let output: Option<Box<dyn FrameOutput>> = match config.output.target() {
        Some(OutputTarget::Record(path)) => {
            log::info!("Recording to {}", path.display());
            Some(Box::new(FfmpegSink::record(path, width, height, fps, &config.output.codec)?))
        }
        Some(OutputTarget::Preview) => Some(Box::new(FfmpegSink::preview(width, height, fps)?)),
        None => {
            log::info!("No frame output attached; pass --preview or --record <file> to see the bars");
            None
        }
    };

    let surface: Box<dyn Surface> = match config.render.backend {
        Backend::Cpu => {
            let mut surface =
                PixelSurface::new(width, height, config.render.bar_color, config.render.background);
            if let Some(output) = output {
                surface = surface.with_output(output);
            }
            Box::new(surface)
        }
        Backend::Gpu => {
            let mut surface =
                GpuSurface::new(width, height, config.render.bar_color, config.render.background)?;
            if let Some(output) = output {
                surface = surface.with_output(output);
            }
            Box::new(surface)
        }
    };
    Ok(surface)
}
