use clap::Parser;
use std::path::PathBuf;

use nowbar::config::Backend;

#[derive(Parser, Debug)]
#[command(name = "nowbar", about = "Live spectrum bars from an external audio analyzer")]
pub struct Cli {
    /// Analyzer executable (started without arguments, lines read from stdout)
    #[arg(short, long)]
    pub analyzer: Option<PathBuf>,

    /// Config file (defaults to nowbar.toml or ~/.config/nowbar/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Render tick interval in milliseconds
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 200)]
    pub width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 200)]
    pub height: u32,

    /// Rendering backend
    #[arg(long, value_enum, default_value_t = Backend::Cpu)]
    pub backend: Backend,

    /// Record presented frames to a video file through ffmpeg
    #[arg(short, long)]
    pub record: Option<PathBuf>,

    /// Show a live preview window through ffplay
    #[arg(long)]
    pub preview: bool,

    /// Stop after this many seconds (runs until the analyzer exits otherwise)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Restart the analyzer when its stream closes
    #[arg(long)]
    pub restart: bool,
}
