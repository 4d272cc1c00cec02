use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analyzer::{AnalyzerProcess, ProcessExit};
use crate::error::VisualizerError;
use crate::render::{draw_frame, FrameTiming, Surface};
use crate::spectrum::{DecodeSummary, DecoderSettings, DecoderThread, FrameDecoder, FrameSlot, SpectrumFrame};

#[derive(Clone, Debug)]
pub struct VisualizerSettings {
    pub analyzer_path: PathBuf,
    pub decoder: DecoderSettings,
    /// Bound on process termination and on joining the decoder thread.
    pub grace_period: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisualizerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing published yet; the surface was left untouched.
    Skipped,
    Drawn { bins: usize },
}

/// What happened during [`Visualizer::stop`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    pub process: Option<ProcessExit>,
    pub decoder: Option<DecodeSummary>,
    pub timed_out: bool,
}

struct Run {
    process: AnalyzerProcess,
    decoder: DecoderThread,
}

/// Spectrum bar visualizer: owns the analyzer process, the decoder thread
/// and the surface the host mounts it on.
///
/// The host calls [`start`](Self::start) and [`stop`](Self::stop), forwards
/// resizes through [`on_resize`](Self::on_resize) and calls
/// [`tick`](Self::tick) from its render timer. Dropping the visualizer stops
/// it.
pub struct Visualizer<S: Surface> {
    settings: VisualizerSettings,
    surface: S,
    slot: Arc<FrameSlot>,
    state: VisualizerState,
    run: Option<Run>,
    timing: FrameTiming,
}

impl<S: Surface> Visualizer<S> {
    pub fn new(settings: VisualizerSettings, surface: S) -> Self {
        Self {
            settings,
            surface,
            slot: Arc::new(FrameSlot::new()),
            state: VisualizerState::Stopped,
            run: None,
            timing: FrameTiming::new(),
        }
    }

    pub fn state(&self) -> VisualizerState {
        self.state
    }

    /// Launch the analyzer and the decoder thread. A no-op unless stopped.
    pub fn start(&mut self) -> Result<VisualizerState, VisualizerError> {
        if self.state != VisualizerState::Stopped {
            return Ok(self.state);
        }

        self.state = VisualizerState::Starting;
        let path = self.settings.analyzer_path.clone();

        let mut process = match AnalyzerProcess::start(&path) {
            Ok(process) => process,
            Err(err) => {
                self.state = VisualizerState::Stopped;
                log::error!("{}", err);
                return Err(err);
            }
        };

        let Some(stdout) = process.take_output() else {
            process.stop(self.settings.grace_period);
            self.state = VisualizerState::Stopped;
            return Err(VisualizerError::Launch {
                path,
                source: std::io::Error::other("analyzer output already taken"),
            });
        };

        // A new run may report a different bin count.
        self.slot.clear();

        let decoder = FrameDecoder::new(self.settings.decoder.clone(), Arc::clone(&self.slot));
        let decoder = match decoder.spawn(BufReader::new(stdout)) {
            Ok(thread) => thread,
            Err(source) => {
                process.stop(self.settings.grace_period);
                self.state = VisualizerState::Stopped;
                return Err(VisualizerError::Launch { path, source });
            }
        };

        self.run = Some(Run { process, decoder });
        self.timing = FrameTiming::new();
        self.state = VisualizerState::Running;
        log::info!("Visualizer running");
        Ok(self.state)
    }

    /// Stop decoding and tear down the analyzer within one grace period.
    ///
    /// Does not wait for a blocked read: terminating the process closes the
    /// stream, which ends the read. If the decoder has not exited by the
    /// deadline the process is killed and the thread abandoned.
    pub fn stop(&mut self) -> StopReport {
        let Some(mut run) = self.run.take() else {
            self.state = VisualizerState::Stopped;
            return StopReport::default();
        };

        self.state = VisualizerState::Stopping;
        let grace = self.settings.grace_period;
        let deadline = Instant::now() + grace;

        run.decoder.request_stop();
        let early_exit = run.process.terminate();

        let mut report = StopReport::default();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let exit = match run.decoder.join_timeout(remaining) {
            Ok(summary) => {
                log::info!(
                    "Decoder finished: {} lines, {} frames, {} skipped, {} rejected",
                    summary.lines, summary.published, summary.decode_errors, summary.mismatches
                );
                report.decoder = Some(summary);
                match early_exit {
                    Some(exit) => exit,
                    None => run
                        .process
                        .wait_until(deadline)
                        .unwrap_or_else(|| run.process.kill()),
                }
            }
            Err(err) => {
                log::warn!("{}; abandoning decoder thread", err);
                report.timed_out = true;
                match early_exit {
                    Some(exit) => exit,
                    None => run.process.kill(),
                }
            }
        };
        report.process = Some(exit);

        self.state = VisualizerState::Stopped;
        log::info!("Visualizer stopped: {} ({:?})", run.process.path().display(), exit);
        report
    }

    /// Forward a viewport resize. Zero-sized viewports are ignored.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<(), VisualizerError> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.surface.resize(width, height)?;
        Ok(())
    }

    /// One render-loop iteration: draw the latest frame if there is one.
    ///
    /// Returns [`VisualizerError::StreamClosed`] once, when the analyzer has
    /// gone away; the visualizer is `Stopped` by then and the host may call
    /// [`start`](Self::start) again. The last frame keeps being drawn.
    pub fn tick(&mut self) -> Result<TickOutcome, VisualizerError> {
        let closed = self
            .run
            .as_ref()
            .is_some_and(|run| run.decoder.is_finished());
        if closed {
            log::info!("Analyzer stream closed");
            self.stop();
            return Err(VisualizerError::StreamClosed);
        }

        let Some(frame) = self.slot.load() else {
            return Ok(TickOutcome::Skipped);
        };

        let dt = self.timing.lap();
        log::debug!("Frametime: {:.2} ms", dt.as_secs_f64() * 1000.0);

        draw_frame(&mut self.surface, &frame)?;
        Ok(TickOutcome::Drawn { bins: frame.len() })
    }

    /// The frame the next tick would draw.
    pub fn current_frame(&self) -> Option<Arc<SpectrumFrame>> {
        self.slot.load()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

impl<S: Surface> Drop for Visualizer<S> {
    fn drop(&mut self) {
        if self.run.is_some() {
            self.stop();
        }
    }
}
