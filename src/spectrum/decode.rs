use std::io::{BufRead, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::frame::SpectrumFrame;
use super::slot::FrameSlot;
use crate::error::{DecodeError, VisualizerError};

/// Log the first occurrence of a recurring problem, then every Nth.
const WARN_EVERY: u64 = 100;

#[derive(Clone, Debug)]
pub struct DecoderSettings {
    /// Largest magnitude the analyzer reports; maps to a full-height bar.
    pub normalization_constant: f32,
    pub field_separator: String,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            normalization_constant: 40_000.0,
            field_separator: ";".into(),
        }
    }
}

/// Parse one `v1;v2;...;vN;` line into a normalized frame.
pub fn decode_line(line: &[u8], settings: &DecoderSettings) -> Result<SpectrumFrame, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let body = text
        .strip_suffix(settings.field_separator.as_str())
        .ok_or(DecodeError::MissingTerminator)?;
    if body.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut raw = Vec::new();
    for (index, token) in body.split(settings.field_separator.as_str()).enumerate() {
        let token = token.trim();
        let value: f32 = token.parse().map_err(|_| DecodeError::InvalidToken {
            index,
            token: token.to_string(),
        })?;
        if value.is_nan() {
            return Err(DecodeError::NotANumber { index });
        }
        raw.push(value);
    }

    Ok(SpectrumFrame::normalized(raw, settings.normalization_constant))
}

/// Counters for one decoder run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub lines: u64,
    pub published: u64,
    pub decode_errors: u64,
    pub mismatches: u64,
}

/// Reads analyzer lines and publishes decoded frames into the shared slot.
pub struct FrameDecoder {
    settings: DecoderSettings,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    summary: DecodeSummary,
}

impl FrameDecoder {
    pub fn new(settings: DecoderSettings, slot: Arc<FrameSlot>) -> Self {
        Self {
            settings,
            slot,
            stop: Arc::new(AtomicBool::new(false)),
            summary: DecodeSummary::default(),
        }
    }

    /// Consume lines until end of stream, a read error, or a stop request.
    ///
    /// Malformed lines and bin-count changes are logged and skipped; they
    /// never end the loop.
    pub fn run<R: BufRead>(&mut self, mut reader: R) -> DecodeSummary {
        let mut buf = Vec::with_capacity(512);
        loop {
            if self.stop.load(Ordering::Acquire) {
                log::debug!("Decoder stop requested");
                break;
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    log::info!("Analyzer stream closed after {} lines", self.summary.lines);
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Analyzer stream read failed: {}", e);
                    break;
                }
            }

            // A line that arrived after stop was requested is not published.
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            self.handle_line(&buf);
        }
        self.summary
    }

    fn handle_line(&mut self, line: &[u8]) {
        self.summary.lines += 1;

        let frame = match decode_line(line, &self.settings) {
            Ok(frame) => frame,
            Err(err) => {
                self.summary.decode_errors += 1;
                if should_warn(self.summary.decode_errors) {
                    log::warn!(
                        "Skipping analyzer line {}: {} ({} skipped so far)",
                        self.summary.lines, err, self.summary.decode_errors
                    );
                }
                return;
            }
        };

        match self.slot.publish(frame) {
            Ok(()) => self.summary.published += 1,
            Err(mismatch) => {
                self.summary.mismatches += 1;
                if should_warn(self.summary.mismatches) {
                    log::warn!(
                        "Rejecting analyzer line {}: {} ({} rejected so far)",
                        self.summary.lines, mismatch, self.summary.mismatches
                    );
                }
            }
        }
    }

    /// Run on a dedicated thread. The returned handle owns the stop flag.
    pub fn spawn<R>(self, reader: R) -> std::io::Result<DecoderThread>
    where
        R: BufRead + Send + 'static,
    {
        let stop = Arc::clone(&self.stop);
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut decoder = self;

        let handle = thread::Builder::new()
            .name("spectrum-decoder".into())
            .spawn(move || {
                // Dropped on every exit path, including unwinding.
                let _done: Sender<()> = done_tx;
                decoder.run(reader)
            })?;

        Ok(DecoderThread {
            handle,
            done: done_rx,
            stop,
        })
    }
}

fn should_warn(count: u64) -> bool {
    count == 1 || count % WARN_EVERY == 0
}

pub struct DecoderThread {
    handle: JoinHandle<DecodeSummary>,
    done: Receiver<()>,
    stop: Arc<AtomicBool>,
}

impl DecoderThread {
    /// Ask the loop to exit before publishing anything else. A read that is
    /// already blocked only returns once the stream is closed.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the loop has exited, e.g. because the analyzer went away.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Join, giving up after `timeout`. On timeout the thread is detached.
    pub fn join_timeout(self, timeout: Duration) -> Result<DecodeSummary, VisualizerError> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(summary) => Ok(summary),
                Err(_) => {
                    log::error!("Decoder thread panicked");
                    Ok(DecodeSummary::default())
                }
            },
            Err(RecvTimeoutError::Timeout) => Err(VisualizerError::ShutdownTimeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn settings() -> DecoderSettings {
        DecoderSettings::default()
    }

    fn assert_frame(frame: &SpectrumFrame, expected: &[f32]) {
        assert_eq!(frame.len(), expected.len());
        for (got, want) in frame.amplitudes().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn decodes_reference_line() {
        let frame = decode_line(b"100;200;300;\n", &settings()).unwrap();
        assert_frame(&frame, &[0.0025, 0.005, 0.0075]);
    }

    #[test]
    fn clamps_values_above_constant() {
        let frame = decode_line(b"50000;", &settings()).unwrap();
        assert_frame(&frame, &[1.0]);
    }

    #[test]
    fn clamps_negative_and_infinite_values() {
        let frame = decode_line(b"-300;inf;-inf;40000;", &settings()).unwrap();
        assert_frame(&frame, &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn tolerates_crlf_and_padding() {
        let frame = decode_line(b" 400 ; 800;\r\n", &settings()).unwrap();
        assert_frame(&frame, &[0.01, 0.02]);
    }

    #[test]
    fn rejects_malformed_lines() {
        let s = settings();
        assert_eq!(
            decode_line(b"abc;200;", &s),
            Err(DecodeError::InvalidToken { index: 0, token: "abc".into() })
        );
        assert_eq!(decode_line(b"", &s), Err(DecodeError::Empty));
        assert_eq!(decode_line(b"\n", &s), Err(DecodeError::Empty));
        assert_eq!(decode_line(b";", &s), Err(DecodeError::Empty));
        assert_eq!(decode_line(b"1;2", &s), Err(DecodeError::MissingTerminator));
        assert_eq!(
            decode_line(b"1;;2;", &s),
            Err(DecodeError::InvalidToken { index: 1, token: String::new() })
        );
        assert_eq!(decode_line(b"1;NaN;", &s), Err(DecodeError::NotANumber { index: 1 }));
        assert_eq!(decode_line(&[0xff, b';'], &s), Err(DecodeError::NotUtf8));
    }

    #[test]
    fn honours_custom_separator() {
        let s = DecoderSettings {
            normalization_constant: 10.0,
            field_separator: ",".into(),
        };
        let frame = decode_line(b"5,10,", &s).unwrap();
        assert_frame(&frame, &[0.5, 1.0]);
    }

    #[test]
    fn malformed_line_keeps_previous_frame() {
        let slot = Arc::new(FrameSlot::new());
        let mut decoder = FrameDecoder::new(settings(), Arc::clone(&slot));
        let summary = decoder.run(Cursor::new("100;200;\nabc;200;\n"));

        assert_eq!(summary.lines, 2);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.decode_errors, 1);
        assert_frame(&slot.load().unwrap(), &[0.0025, 0.005]);
    }

    #[test]
    fn bin_count_change_is_rejected() {
        let slot = Arc::new(FrameSlot::new());
        let mut decoder = FrameDecoder::new(settings(), Arc::clone(&slot));
        let summary = decoder.run(Cursor::new("1;2;3;4;5;6;7;8;\n1;2;3;4;5;\n"));

        assert_eq!(summary.published, 1);
        assert_eq!(summary.mismatches, 1);
        assert_eq!(slot.load().unwrap().len(), 8);
    }

    #[test]
    fn thread_exits_at_end_of_stream() {
        let slot = Arc::new(FrameSlot::new());
        let thread = FrameDecoder::new(settings(), Arc::clone(&slot))
            .spawn(Cursor::new(b"400;\n800;\n".to_vec()))
            .unwrap();

        let summary = thread.join_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.published, 2);
        assert_frame(&slot.load().unwrap(), &[0.02]);
    }

    #[test]
    fn stop_request_skips_remaining_lines() {
        let slot = Arc::new(FrameSlot::new());
        let mut decoder = FrameDecoder::new(settings(), Arc::clone(&slot));
        decoder.stop.store(true, Ordering::Release);
        let summary = decoder.run(Cursor::new("100;\n"));
        assert_eq!(summary.lines, 0);
        assert!(slot.load().is_none());
    }
}
