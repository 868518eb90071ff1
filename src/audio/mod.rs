pub mod keep_alive;
pub mod output;
pub mod sounds;

use output::{AudioOutput, RodioOutput};
use sounds::{playback_chain, SoundLibrary};

use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{
    mpsc::{self, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::AlarmError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// What the scheduler needs from playback. Implementations log their own failures.
pub trait AlarmAudio: Send + Sync {
    fn start_alarm(&self, sound_id: &str);
    fn stop_alarm(&self);
    fn suspend_keep_alive(&self);
    fn restore_keep_alive(&self);
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub pulse_interval: Duration,
    pub health_check_interval: Duration,
    pub keep_alive_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_millis(600),
            health_check_interval: Duration::from_secs(2),
            keep_alive_volume: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum PlaybackStatus {
    Idle,
    Playing { sound_id: String, path: PathBuf },
    Pulsing { sound_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepAliveStatus {
    Off,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackReport {
    pub status: PlaybackStatus,
    pub keep_alive: KeepAliveStatus,
    pub pulse_activations: u32,
    pub restarts: u32,
}

impl Default for PlaybackReport {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            keep_alive: KeepAliveStatus::Off,
            pulse_activations: 0,
            restarts: 0,
        }
    }
}

enum AudioCommand {
    Start(String),
    Stop,
    StartKeepAlive,
    StopKeepAlive,
    PauseKeepAlive,
    ResumeKeepAlive,
    Barrier(Sender<()>),
}

type OutputFactory = Arc<dyn Fn() -> Box<dyn AudioOutput> + Send + Sync>;

/// Handle to the audio thread. Every playback change is funneled through its
/// command channel, so callers on any thread can use it.
#[derive(Clone)]
pub struct AudioEngineHandle {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
    report: Arc<Mutex<PlaybackReport>>,
    library: SoundLibrary,
    config: AudioConfig,
    factory: OutputFactory,
}

impl AudioEngineHandle {
    pub fn new(library: SoundLibrary, config: AudioConfig) -> Self {
        Self::with_output(library, config, || Box::new(RodioOutput::new()))
    }

    pub fn with_output<F>(library: SoundLibrary, config: AudioConfig, factory: F) -> Self
    where
        F: Fn() -> Box<dyn AudioOutput> + Send + Sync + 'static,
    {
        Self {
            tx: Arc::new(Mutex::new(None)),
            report: Arc::new(Mutex::new(PlaybackReport::default())),
            library,
            config,
            factory: Arc::new(factory),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let factory = Arc::clone(&self.factory);
        let library = self.library.clone();
        let config = self.config.clone();
        let report = Arc::clone(&self.report);

        // The output holds non-Send device objects, so it is built on the thread.
        thread::Builder::new()
            .name("alarm-audio".to_string())
            .spawn(move || {
                let mut worker = AudioWorker {
                    output: factory(),
                    library,
                    config,
                    report,
                    active: None,
                    keep_alive: KeepAliveStatus::Off,
                    next_beep: None,
                    next_health_check: None,
                };
                worker.run(rx);
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    fn send(&self, command: AudioCommand) -> Result<(), String> {
        let tx = self.ensure_thread()?;
        tx.send(command).map_err(|e| e.to_string())
    }

    pub fn play_alarm(&self, sound_id: &str) -> Result<(), String> {
        self.send(AudioCommand::Start(sound_id.to_string()))
    }

    pub fn stop(&self) -> Result<(), String> {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::Stop);
        }
        Ok(())
    }

    pub fn start_background_keep_alive(&self) -> Result<(), String> {
        self.send(AudioCommand::StartKeepAlive)
    }

    pub fn stop_background_keep_alive(&self) -> Result<(), String> {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::StopKeepAlive);
        }
        Ok(())
    }

    pub fn pause_keep_alive(&self) -> Result<(), String> {
        self.send(AudioCommand::PauseKeepAlive)
    }

    pub fn resume_keep_alive(&self) -> Result<(), String> {
        self.send(AudioCommand::ResumeKeepAlive)
    }

    /// Blocks until every command sent before this call has been handled.
    pub fn barrier(&self) -> Result<(), String> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(AudioCommand::Barrier(ack_tx))?;
        ack_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| e.to_string())
    }

    pub fn report(&self) -> PlaybackReport {
        match self.report.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlarmAudio for AudioEngineHandle {
    fn start_alarm(&self, sound_id: &str) {
        if let Err(e) = self.play_alarm(sound_id) {
            log::error!("failed to start alarm sound {sound_id}: {e}");
        }
    }

    fn stop_alarm(&self) {
        let _ = self.stop();
    }

    fn suspend_keep_alive(&self) {
        if let Err(e) = self.pause_keep_alive() {
            log::warn!("failed to pause keep-alive tone: {e}");
        }
    }

    fn restore_keep_alive(&self) {
        if let Err(e) = self.resume_keep_alive() {
            log::warn!("failed to resume keep-alive tone: {e}");
        }
    }
}

enum ActivePlayback {
    File { sound_id: String, path: PathBuf },
    Pulse { sound_id: String },
}

impl ActivePlayback {
    fn sound_id(&self) -> &str {
        match self {
            ActivePlayback::File { sound_id, .. } | ActivePlayback::Pulse { sound_id } => sound_id,
        }
    }
}

struct AudioWorker {
    output: Box<dyn AudioOutput>,
    library: SoundLibrary,
    config: AudioConfig,
    report: Arc<Mutex<PlaybackReport>>,
    active: Option<ActivePlayback>,
    keep_alive: KeepAliveStatus,
    next_beep: Option<Instant>,
    next_health_check: Option<Instant>,
}

impl AudioWorker {
    fn run(&mut self, rx: mpsc::Receiver<AudioCommand>) {
        loop {
            let deadline = match (self.next_beep, self.next_health_check) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let command = match deadline {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(cmd) => Some(cmd),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                },
            };

            if let Some(command) = command {
                self.handle(command);
            }
            self.service_timers(Instant::now());
            self.publish();
        }

        self.output.stop();
        self.output.stop_keep_alive();
        log_info!("audio thread shutting down");
    }

    fn handle(&mut self, command: AudioCommand) {
        match command {
            AudioCommand::Start(sound_id) => self.start(sound_id),
            AudioCommand::Stop => self.stop(),
            AudioCommand::StartKeepAlive => {
                if self.keep_alive == KeepAliveStatus::Off {
                    match self.output.start_keep_alive(self.config.keep_alive_volume) {
                        Ok(()) => {
                            self.keep_alive = KeepAliveStatus::Running;
                            if self.active.is_some() {
                                self.pause_keep_alive();
                            }
                        }
                        Err(e) => log::warn!("keep-alive tone unavailable: {e}"),
                    }
                }
            }
            AudioCommand::StopKeepAlive => {
                if self.keep_alive != KeepAliveStatus::Off {
                    self.output.stop_keep_alive();
                    self.keep_alive = KeepAliveStatus::Off;
                }
            }
            AudioCommand::PauseKeepAlive => self.pause_keep_alive(),
            AudioCommand::ResumeKeepAlive => {
                if self.keep_alive == KeepAliveStatus::Paused && self.active.is_none() {
                    self.output.set_keep_alive_paused(false);
                    self.keep_alive = KeepAliveStatus::Running;
                }
            }
            AudioCommand::Barrier(ack) => {
                self.publish();
                let _ = ack.send(());
            }
        }
    }

    fn pause_keep_alive(&mut self) {
        if self.keep_alive == KeepAliveStatus::Running {
            self.output.set_keep_alive_paused(true);
            self.keep_alive = KeepAliveStatus::Paused;
        }
    }

    fn start(&mut self, sound_id: String) {
        if let Some(active) = &self.active {
            if active.sound_id().eq_ignore_ascii_case(&sound_id) {
                return;
            }
            self.stop();
        }

        self.pause_keep_alive();
        self.begin(sound_id);
    }

    /// Walks the playback chain; ends in the beep pulse if nothing plays.
    fn begin(&mut self, sound_id: String) {
        for name in playback_chain(&sound_id) {
            for path in self.library.candidates(name) {
                match self.output.play_looped(&path) {
                    Ok(()) => {
                        log_info!("alarm sound {} playing from {}", sound_id, path.display());
                        self.active = Some(ActivePlayback::File { sound_id, path });
                        self.next_health_check =
                            Some(Instant::now() + self.config.health_check_interval);
                        return;
                    }
                    Err(e) => log::warn!("alarm sound candidate failed: {e}"),
                }
            }
        }

        log::warn!(
            "{}; falling back to beep pulse",
            AlarmError::AudioResourceMissing(sound_id.clone())
        );
        self.output.stop();
        self.active = Some(ActivePlayback::Pulse { sound_id });
        self.next_health_check = None;
        self.next_beep = Some(Instant::now());
        self.with_report(|report| report.pulse_activations += 1);
    }

    fn stop(&mut self) {
        if self.active.take().is_some() {
            log_info!("alarm sound stopped");
        }
        self.output.stop();
        self.next_beep = None;
        self.next_health_check = None;
    }

    fn service_timers(&mut self, now: Instant) {
        if let Some(due) = self.next_beep {
            if now >= due {
                if let Err(e) = self.output.beep() {
                    // Last line of defense: the terminal bell.
                    log::warn!("beep failed ({e}); ringing terminal bell");
                    let mut stderr = std::io::stderr();
                    let _ = stderr.write_all(b"\x07");
                    let _ = stderr.flush();
                }
                self.next_beep = Some((due + self.config.pulse_interval).max(now));
            }
        }

        if let Some(due) = self.next_health_check {
            if now >= due {
                if let Some(ActivePlayback::File { sound_id, .. }) = &self.active {
                    if !self.output.is_playing() {
                        let sound_id = sound_id.clone();
                        log::warn!("alarm sound {} stopped unexpectedly; restarting", sound_id);
                        self.active = None;
                        self.with_report(|report| report.restarts += 1);
                        self.begin(sound_id);
                        return;
                    }
                }
                self.next_health_check = Some(now + self.config.health_check_interval);
            }
        }
    }

    fn with_report(&self, update: impl FnOnce(&mut PlaybackReport)) {
        match self.report.lock() {
            Ok(mut guard) => update(&mut guard),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }

    fn publish(&self) {
        let status = match &self.active {
            None => PlaybackStatus::Idle,
            Some(ActivePlayback::File { sound_id, path }) => PlaybackStatus::Playing {
                sound_id: sound_id.clone(),
                path: path.clone(),
            },
            Some(ActivePlayback::Pulse { sound_id }) => PlaybackStatus::Pulsing {
                sound_id: sound_id.clone(),
            },
        };
        let keep_alive = self.keep_alive;
        self.with_report(|report| {
            report.status = status;
            report.keep_alive = keep_alive;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Play(PathBuf),
        Beep,
        Stop,
        KeepAliveStart,
        KeepAlivePaused(bool),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        // Paths containing this fragment fail to play.
        failing: Arc<Mutex<Option<String>>>,
        stalled: Arc<AtomicBool>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, wanted: &Event) -> usize {
            self.events().iter().filter(|e| *e == wanted).count()
        }

        fn plays(&self) -> Vec<PathBuf> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Play(path) => Some(path),
                    _ => None,
                })
                .collect()
        }
    }

    struct MockOutput {
        recorder: Recorder,
        playing: bool,
    }

    impl AudioOutput for MockOutput {
        fn play_looped(&mut self, path: &Path) -> Result<(), AlarmError> {
            let failing = self.recorder.failing.lock().unwrap().clone();
            if let Some(fragment) = failing {
                if path.to_string_lossy().contains(&fragment) {
                    return Err(AlarmError::AudioResourceMissing(path.display().to_string()));
                }
            }
            self.recorder.events.lock().unwrap().push(Event::Play(path.to_path_buf()));
            self.playing = true;
            Ok(())
        }

        fn beep(&mut self) -> Result<(), AlarmError> {
            self.recorder.events.lock().unwrap().push(Event::Beep);
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.playing && !self.recorder.stalled.swap(false, Ordering::SeqCst)
        }

        fn stop(&mut self) {
            self.playing = false;
            self.recorder.events.lock().unwrap().push(Event::Stop);
        }

        fn start_keep_alive(&mut self, _volume: f32) -> Result<(), AlarmError> {
            self.recorder.events.lock().unwrap().push(Event::KeepAliveStart);
            Ok(())
        }

        fn set_keep_alive_paused(&mut self, paused: bool) {
            self.recorder
                .events
                .lock()
                .unwrap()
                .push(Event::KeepAlivePaused(paused));
        }

        fn stop_keep_alive(&mut self) {}
    }

    fn engine(dir: &Path, config: AudioConfig) -> (AudioEngineHandle, Recorder) {
        let recorder = Recorder::default();
        let for_thread = recorder.clone();
        let handle = AudioEngineHandle::with_output(SoundLibrary::new(dir), config, move || {
            Box::new(MockOutput {
                recorder: for_thread.clone(),
                playing: false,
            })
        });
        (handle, recorder)
    }

    fn fast_config() -> AudioConfig {
        AudioConfig {
            pulse_interval: Duration::from_millis(20),
            health_check_interval: Duration::from_millis(20),
            keep_alive_volume: 0.01,
        }
    }

    #[test]
    fn missing_resources_fall_back_to_pulse_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, recorder) = engine(dir.path(), fast_config());

        handle.play_alarm("no-such-sound").unwrap();
        handle.play_alarm("no-such-sound").unwrap();
        handle.barrier().unwrap();

        let report = handle.report();
        assert_eq!(report.pulse_activations, 1);
        assert_eq!(
            report.status,
            PlaybackStatus::Pulsing {
                sound_id: "no-such-sound".into()
            }
        );

        thread::sleep(Duration::from_millis(150));
        assert!(recorder.count(&Event::Beep) >= 3);

        handle.stop().unwrap();
        handle.barrier().unwrap();
        let beeps_at_stop = recorder.count(&Event::Beep);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.count(&Event::Beep), beeps_at_stop);
        assert_eq!(handle.report().status, PlaybackStatus::Idle);
        assert_eq!(handle.report().pulse_activations, 1);
    }

    #[test]
    fn falls_through_chain_to_first_available_sound() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("radar.wav"), b"x").unwrap();
        let (handle, recorder) = engine(dir.path(), AudioConfig::default());

        handle.play_alarm("Beacon").unwrap();
        handle.barrier().unwrap();

        assert_eq!(recorder.plays(), vec![dir.path().join("radar.wav")]);
        assert_eq!(handle.report().pulse_activations, 0);
    }

    #[test]
    fn playback_failure_tries_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("beacon.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("alarm_classic.mp3"), b"x").unwrap();
        let (handle, recorder) = engine(dir.path(), AudioConfig::default());
        *recorder.failing.lock().unwrap() = Some("beacon".into());

        handle.play_alarm("beacon").unwrap();
        handle.barrier().unwrap();

        assert_eq!(recorder.plays(), vec![dir.path().join("alarm_classic.mp3")]);
    }

    #[test]
    fn different_sound_replaces_current_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("radar.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("chimes.wav"), b"x").unwrap();
        let (handle, recorder) = engine(dir.path(), AudioConfig::default());

        handle.play_alarm("radar").unwrap();
        handle.play_alarm("RADAR").unwrap();
        handle.play_alarm("chimes").unwrap();
        handle.barrier().unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                Event::Play(dir.path().join("radar.wav")),
                Event::Stop,
                Event::Play(dir.path().join("chimes.wav")),
            ]
        );
    }

    #[test]
    fn keep_alive_pauses_for_alarm_and_resumes_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, recorder) = engine(dir.path(), AudioConfig::default());

        handle.start_background_keep_alive().unwrap();
        handle.play_alarm("classic").unwrap();
        handle.barrier().unwrap();
        assert_eq!(handle.report().keep_alive, KeepAliveStatus::Paused);

        // Resume is ignored while the alarm still sounds.
        handle.resume_keep_alive().unwrap();
        handle.barrier().unwrap();
        assert_eq!(handle.report().keep_alive, KeepAliveStatus::Paused);

        handle.stop().unwrap();
        handle.resume_keep_alive().unwrap();
        handle.barrier().unwrap();
        assert_eq!(handle.report().keep_alive, KeepAliveStatus::Running);
        assert_eq!(recorder.count(&Event::KeepAliveStart), 1);
        assert_eq!(recorder.count(&Event::KeepAlivePaused(true)), 1);
        assert_eq!(recorder.count(&Event::KeepAlivePaused(false)), 1);
    }

    #[test]
    fn stalled_playback_restarts_while_ringing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alarm_classic.wav"), b"x").unwrap();
        let (handle, recorder) = engine(dir.path(), fast_config());

        handle.play_alarm("classic").unwrap();
        handle.barrier().unwrap();
        recorder.stalled.store(true, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(150));
        handle.barrier().unwrap();

        assert!(handle.report().restarts >= 1);
        assert!(recorder.plays().len() >= 2);
        assert!(matches!(handle.report().status, PlaybackStatus::Playing { .. }));
    }
}
