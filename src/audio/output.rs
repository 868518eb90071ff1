use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use rodio::source::SineWave;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use crate::error::AlarmError;

use super::keep_alive::KeepAliveTone;

/// Device-level playback. Lives on the audio thread only, so it need not be `Send`.
pub trait AudioOutput {
    /// Loops the file until `stop`. Replaces whatever alarm sound was playing.
    fn play_looped(&mut self, path: &Path) -> Result<(), AlarmError>;
    /// One short alert beep.
    fn beep(&mut self) -> Result<(), AlarmError>;
    fn is_playing(&self) -> bool;
    fn stop(&mut self);
    fn start_keep_alive(&mut self, volume: f32) -> Result<(), AlarmError>;
    fn set_keep_alive_paused(&mut self, paused: bool);
    fn stop_keep_alive(&mut self);
}

const BEEP_HZ: f32 = 880.0;
const BEEP_LENGTH: Duration = Duration::from_millis(150);

pub struct RodioOutput {
    stream: Option<(OutputStream, OutputStreamHandle)>,
    alarm: Option<Sink>,
    keep_alive: Option<Sink>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self {
            stream: None,
            alarm: None,
            keep_alive: None,
        }
    }

    fn ensure_sink(&mut self) -> Result<Sink, AlarmError> {
        if self.stream.is_none() {
            let opened = OutputStream::try_default()
                .map_err(|e| AlarmError::AudioSessionFailure(e.to_string()))?;
            self.stream = Some(opened);
        }
        let Some((_, handle)) = self.stream.as_ref() else {
            return Err(AlarmError::AudioSessionFailure("no output stream".into()));
        };
        Sink::try_new(handle).map_err(|e| AlarmError::AudioSessionFailure(e.to_string()))
    }

    fn release_if_idle(&mut self) {
        if self.alarm.is_none() && self.keep_alive.is_none() {
            self.stream = None;
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play_looped(&mut self, path: &Path) -> Result<(), AlarmError> {
        let file = File::open(path).map_err(|e| {
            AlarmError::AudioResourceMissing(format!("{}: {e}", path.display()))
        })?;
        let source = Decoder::new_looped(BufReader::new(file)).map_err(|e| {
            AlarmError::AudioResourceMissing(format!("{}: {e}", path.display()))
        })?;

        let sink = self.ensure_sink()?;
        sink.append(source);
        if let Some(old) = self.alarm.replace(sink) {
            old.stop();
        }
        Ok(())
    }

    fn beep(&mut self) -> Result<(), AlarmError> {
        let sink = self.ensure_sink()?;
        sink.append(
            SineWave::new(BEEP_HZ)
                .take_duration(BEEP_LENGTH)
                .amplify(0.4),
        );
        sink.detach();
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.alarm
            .as_ref()
            .map(|sink| !sink.empty() && !sink.is_paused())
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        if let Some(sink) = self.alarm.take() {
            sink.stop();
        }
        self.release_if_idle();
    }

    fn start_keep_alive(&mut self, volume: f32) -> Result<(), AlarmError> {
        if self.keep_alive.is_some() {
            return Ok(());
        }
        let sink = self.ensure_sink()?;
        sink.set_volume(volume.clamp(0.0, 1.0));
        sink.append(KeepAliveTone::new());
        self.keep_alive = Some(sink);
        Ok(())
    }

    fn set_keep_alive_paused(&mut self, paused: bool) {
        if let Some(sink) = self.keep_alive.as_ref() {
            if paused {
                sink.pause();
            } else {
                sink.play();
            }
        }
    }

    fn stop_keep_alive(&mut self) {
        if let Some(sink) = self.keep_alive.take() {
            sink.stop();
        }
        self.release_if_idle();
    }
}
