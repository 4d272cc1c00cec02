pub mod ffmpeg;

use anyhow::Result;

pub use ffmpeg::FfmpegSink;

/// Destination for presented RGBA frames.
pub trait FrameOutput {
    fn write_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
