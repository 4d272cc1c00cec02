use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use super::FrameOutput;

/// Pipes raw RGBA frames into an ffmpeg-family process: `ffmpeg` to record
/// a video file, or `ffplay` for a live preview window.
pub struct FfmpegSink {
    child: Option<Child>,
    program: &'static str,
    width: u32,
    height: u32,
}

impl FfmpegSink {
    pub fn record(output_path: &Path, width: u32, height: u32, fps: u32, codec: &str) -> Result<Self> {
        let output = output_path
            .to_str()
            .context("Output path is not valid UTF-8")?;

        let mut args = raw_input_args(width, height, fps);
        args.extend([
            "-c:v".to_string(), codec.to_string(),
            "-pix_fmt".into(), "yuv420p".into(),
            output.to_string(),
        ]);
        args.insert(0, "-y".into());

        Self::spawn("ffmpeg", &args, width, height)
    }

    pub fn preview(width: u32, height: u32, fps: u32) -> Result<Self> {
        let mut args = raw_input_args(width, height, fps);
        args.extend([
            "-window_title".to_string(), "nowbar".into(),
            "-fflags".into(), "nobuffer".into(),
        ]);
        Self::spawn("ffplay", &args, width, height)
    }

    fn spawn(program: &'static str, args: &[String], width: u32, height: u32) -> Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {program}. Is ffmpeg installed?"))?;

        log::info!("{} started: {}x{}", program, width, height);

        Ok(Self {
            child: Some(child),
            program,
            width,
            height,
        })
    }
}

fn raw_input_args(width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-loglevel".into(), "error".into(),
        "-f".into(), "rawvideo".into(),
        "-pixel_format".into(), "rgba".into(),
        "-video_size".into(), format!("{}x{}", width, height),
        "-framerate".into(), fps.to_string(),
        "-i".into(), "pipe:0".into(),
    ]
}

impl FrameOutput for FfmpegSink {
    fn write_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<()> {
        if (width, height) != (self.width, self.height) {
            bail!(
                "{} was started at {}x{}, cannot take a {}x{} frame",
                self.program, self.width, self.height, width, height
            );
        }
        let child = self.child.as_mut().context("Frame output already finished")?;
        let stdin = child.stdin.as_mut().context("Output stdin not available")?;
        stdin
            .write_all(rgba)
            .with_context(|| format!("Failed to write frame to {}", self.program))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // Close stdin to signal EOF
        drop(child.stdin.take());

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }

        log::info!("{} finished", self.program);
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            drop(child.stdin.take());
            let _ = child.wait();
        }
    }
}
