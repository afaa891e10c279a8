use crate::config::Config;
use crate::core::clock::{SongClock, SystemTimeSource, TimeSource};
use crate::core::decode::{self, DecodeError, DecodedAudio};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use log::{debug, error, info};
use rubato::{Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("no default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("failed to decode song: {0}")]
    Decode(#[from] DecodeError),
    #[error("no song loaded")]
    NotLoaded,
    #[error("audio engine thread is gone")]
    EngineGone,
}

/// The song-playback collaborator.
///
/// Only `is_busy` feeds end-of-song detection; `play` must be able to start
/// from an arbitrary offset so fast-mode restarts keep the song position.
pub trait Playback {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError>;
    fn play(&mut self, start_offset: f32, fast: bool) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn unpause(&mut self);
    fn stop(&mut self);
    fn is_busy(&self) -> bool;
    fn position_seconds(&self) -> f32;

    /// Length of the loaded song, when known.
    fn duration_seconds(&self) -> Option<f32> {
        None
    }
}

impl<P: Playback + ?Sized> Playback for Box<P> {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
        (**self).load(path)
    }
    fn play(&mut self, start_offset: f32, fast: bool) -> Result<(), PlaybackError> {
        (**self).play(start_offset, fast)
    }
    fn pause(&mut self) {
        (**self).pause()
    }
    fn unpause(&mut self) {
        (**self).unpause()
    }
    fn stop(&mut self) {
        (**self).stop()
    }
    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }
    fn position_seconds(&self) -> f32 {
        (**self).position_seconds()
    }
    fn duration_seconds(&self) -> Option<f32> {
        (**self).duration_seconds()
    }
}

/// Rate and volume applied when fast mode is on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastModeAudio {
    pub rate: f32,
    pub volume: f32,
}

impl FastModeAudio {
    pub fn from_config(cfg: &Config) -> Self {
        Self { rate: cfg.fast_mode_playback_rate, volume: cfg.fast_mode_volume }
    }

    #[inline(always)]
    fn rate_for(&self, fast: bool) -> f32 {
        if fast { self.rate } else { 1.0 }
    }

    #[inline(always)]
    fn volume_for(&self, fast: bool) -> f32 {
        if fast { self.volume } else { 1.0 }
    }
}

// --- cpal-backed playback ---

const RING_CAP_SAMPLES: usize = 1 << 17;
const OUT_FRAMES_PER_CALL: usize = 512;
const PREROLL_IN_FRAMES: usize = 512;
const FLUSH_WAIT: Duration = Duration::from_millis(250);

enum AudioCommand {
    Play(FeedJob),
    Stop,
    Shutdown,
}

struct FeedJob {
    audio: Arc<DecodedAudio>,
    start_sec: f32,
    rate: f32,
    generation: u64,
}

#[derive(Clone, Copy)]
struct DeviceInfo {
    sample_rate: u32,
    channels: usize,
}

/// State shared between the game thread, the manager, the feeder and the
/// real-time callback.
struct Shared {
    ring: internal::SpscRingF32,
    paused: AtomicBool,
    flush: AtomicBool,
    volume_bits: AtomicU32,
    frames_played: AtomicU64,
    done_generation: AtomicU64,
}

/// A handle to the thread streaming one song into the ring.
struct Feeder {
    thread: thread::JoinHandle<()>,
    stop_signal: Arc<AtomicBool>,
}

impl Feeder {
    fn stop(self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        let _ = self.thread.join();
    }
}

pub struct CpalPlayback {
    commands: Sender<AudioCommand>,
    manager: Option<thread::JoinHandle<()>>,
    shared: Arc<Shared>,
    device: DeviceInfo,
    fast: FastModeAudio,
    song: Option<Arc<DecodedAudio>>,
    playing: bool,
    start_offset: f32,
    rate: f32,
    generation: u64,
}

impl CpalPlayback {
    /// Opens the default output device. The stream lives on a dedicated
    /// manager thread for the lifetime of the returned handle.
    pub fn new(fast: FastModeAudio) -> Result<Self, PlaybackError> {
        let shared = Arc::new(Shared {
            ring: internal::SpscRingF32::new(RING_CAP_SAMPLES),
            paused: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            done_generation: AtomicU64::new(0),
        });

        let (command_sender, command_receiver) = channel();
        let (ready_sender, ready_receiver) = sync_channel(1);
        let shared_for_manager = Arc::clone(&shared);
        let manager = thread::Builder::new()
            .name("audio-manager".into())
            .spawn(move || audio_manager_thread(shared_for_manager, command_receiver, ready_sender))
            .map_err(|_| PlaybackError::EngineGone)?;

        let device = match ready_receiver.recv() {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => {
                let _ = manager.join();
                return Err(e);
            }
            Err(_) => {
                let _ = manager.join();
                return Err(PlaybackError::EngineGone);
            }
        };

        info!("Audio engine initialized ({} Hz, {} ch).", device.sample_rate, device.channels);
        Ok(Self {
            commands: command_sender,
            manager: Some(manager),
            shared,
            device,
            fast,
            song: None,
            playing: false,
            start_offset: 0.0,
            rate: 1.0,
            generation: 0,
        })
    }
}

impl Playback for CpalPlayback {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.stop();
        let audio = decode::decode_file(path)?;
        info!(
            "Loaded '{}' for playback ({:.1}s).",
            path.display(),
            audio.duration_seconds()
        );
        self.song = Some(Arc::new(audio));
        Ok(())
    }

    fn play(&mut self, start_offset: f32, fast: bool) -> Result<(), PlaybackError> {
        let audio = self.song.clone().ok_or(PlaybackError::NotLoaded)?;
        self.generation += 1;
        self.start_offset = start_offset.max(0.0);
        self.rate = self.fast.rate_for(fast);
        self.shared
            .volume_bits
            .store(self.fast.volume_for(fast).to_bits(), Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);

        let job = FeedJob {
            audio,
            start_sec: self.start_offset,
            rate: self.rate,
            generation: self.generation,
        };
        self.commands
            .send(AudioCommand::Play(job))
            .map_err(|_| PlaybackError::EngineGone)?;
        self.playing = true;
        debug!(
            "Playback started at {:.3}s (rate {:.2}, fast {}).",
            self.start_offset, self.rate, fast
        );
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    fn unpause(&mut self) {
        self.shared.paused.store(false, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        let _ = self.commands.send(AudioCommand::Stop);
    }

    fn is_busy(&self) -> bool {
        if !self.playing {
            return false;
        }
        let feeding = self.shared.done_generation.load(Ordering::Acquire) != self.generation;
        feeding || !self.shared.ring.is_empty()
    }

    fn position_seconds(&self) -> f32 {
        if !self.playing {
            return self.start_offset;
        }
        let frames = self.shared.frames_played.load(Ordering::Relaxed) as f32;
        let pos = self.start_offset + frames * self.rate / self.device.sample_rate as f32;
        match self.duration_seconds() {
            Some(d) => pos.min(d),
            None => pos,
        }
    }

    fn duration_seconds(&self) -> Option<f32> {
        self.song.as_ref().map(|s| s.duration_seconds())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
    }
}

/// Owns the cpal stream and the current feeder thread.
fn audio_manager_thread(
    shared: Arc<Shared>,
    commands: Receiver<AudioCommand>,
    ready: SyncSender<Result<DeviceInfo, PlaybackError>>,
) {
    let (stream, device) = match open_stream(Arc::clone(&shared)) {
        Ok(opened) => opened,
        Err(e) => {
            error!("Audio init failed: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(device));

    let mut feeder: Option<Feeder> = None;
    loop {
        match commands.recv() {
            Ok(AudioCommand::Play(job)) => {
                if let Some(old) = feeder.take() {
                    old.stop();
                }
                shared.flush.store(true, Ordering::Release);
                feeder = Some(spawn_feeder(job, device, Arc::clone(&shared)));
            }
            Ok(AudioCommand::Stop) => {
                if let Some(old) = feeder.take() {
                    old.stop();
                }
                shared.flush.store(true, Ordering::Release);
            }
            Ok(AudioCommand::Shutdown) | Err(_) => break,
        }
    }

    if let Some(old) = feeder.take() {
        old.stop();
    }
    drop(stream);
    debug!("Audio manager thread exiting.");
}

fn open_stream(shared: Arc<Shared>) -> Result<(cpal::Stream, DeviceInfo), PlaybackError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;
    let config = device.default_output_config()?;
    let stream_config: StreamConfig = config.into();
    let info = DeviceInfo {
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels as usize,
    };

    let channels = info.channels.max(1);
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _| audio_callback(data, &shared, channels),
        |err| error!("Audio stream error: {}", err),
        None,
    )?;
    stream.play()?;
    Ok((stream, info))
}

/// Real-time callback: drains the ring, honours pause and volume.
fn audio_callback(out: &mut [f32], shared: &Shared, channels: usize) {
    if shared.flush.load(Ordering::Acquire) {
        shared.ring.discard_all();
        shared.frames_played.store(0, Ordering::Relaxed);
        shared.flush.store(false, Ordering::Release);
    }

    if shared.paused.load(Ordering::Relaxed) {
        out.fill(0.0);
        return;
    }

    let got = shared.ring.pop(out);
    out[got..].fill(0.0);

    let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));
    if volume != 1.0 {
        out[..got].iter_mut().for_each(|s| *s *= volume);
    }
    shared
        .frames_played
        .fetch_add((got / channels) as u64, Ordering::Relaxed);
}

fn spawn_feeder(job: FeedJob, device: DeviceInfo, shared: Arc<Shared>) -> Feeder {
    let stop_signal = Arc::new(AtomicBool::new(false));
    let stop_for_thread = Arc::clone(&stop_signal);
    let thread = thread::spawn(move || feed_song(job, device, &shared, &stop_for_thread));
    Feeder { thread, stop_signal }
}

/// Streams the song from `start_sec` into the ring.
fn feed_song(job: FeedJob, device: DeviceInfo, shared: &Shared, stop: &AtomicBool) {
    // The callback must discard the previous song before we push the new one.
    let waited = Instant::now();
    while shared.flush.load(Ordering::Acquire) && waited.elapsed() < FLUSH_WAIT {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }

    if let Err(e) = stream_song(&job, device, shared, stop) {
        error!("Song feeder failed: {}", e);
    }
    if !stop.load(Ordering::Relaxed) {
        shared.done_generation.store(job.generation, Ordering::Release);
    }
}

/// Resamples with a windowed-sinc filter; the playback rate is folded into
/// the ratio so fast mode needs no second pass.
fn stream_song(
    job: &FeedJob,
    device: DeviceInfo,
    shared: &Shared,
    stop: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let audio = &job.audio;
    let in_ch = audio.channels.max(1) as usize;
    let out_ch = device.channels.max(1);
    let in_frames = audio.frame_count();
    if in_frames == 0 || audio.sample_rate == 0 || device.sample_rate == 0 {
        return Ok(());
    }

    let rate = if job.rate.is_finite() && job.rate > 0.0 { job.rate as f64 } else { 1.0 };
    let ratio = (device.sample_rate as f64 / audio.sample_rate as f64) / rate;
    let mut resampler = SincFixedOut::<f32>::new(
        ratio,
        1.0,
        SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        },
        OUT_FRAMES_PER_CALL,
        in_ch,
    )?;

    // Start a little early so the filter is primed, then drop the output
    // that precedes `start_sec` along with the filter delay.
    let start = ((job.start_sec.max(0.0) as f64 * audio.sample_rate as f64) as usize).min(in_frames);
    let begin = start.saturating_sub(PREROLL_IN_FRAMES);
    let mut skip_out =
        resampler.output_delay() + ((start - begin) as f64 * ratio).round() as usize;

    let planar: Vec<Vec<f32>> = (0..in_ch)
        .map(|c| {
            audio.samples[begin * in_ch..]
                .iter()
                .skip(c)
                .step_by(in_ch)
                .take(in_frames - begin)
                .copied()
                .collect()
        })
        .collect();
    let total = in_frames - begin;

    let mut pos = 0;
    let mut scratch: Vec<f32> = Vec::with_capacity(OUT_FRAMES_PER_CALL * out_ch);
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        let need = resampler.input_frames_next();
        let (block, last) = if pos + need <= total {
            let slices: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..pos + need]).collect();
            pos += need;
            (resampler.process(&slices, None)?, false)
        } else if pos < total {
            let slices: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..]).collect();
            pos = total;
            (resampler.process_partial(Some(slices.as_slice()), None)?, false)
        } else {
            // Flush what is still inside the filter.
            (resampler.process_partial::<&[f32]>(None, None)?, true)
        };

        if !push_block(&block, out_ch, &mut skip_out, &mut scratch, shared, stop) || last {
            return Ok(());
        }
    }
}

/// Interleaves one planar block into the ring, mapping output channel `c`
/// to input channel `c % in_ch`. Returns false when asked to stop.
fn push_block(
    block: &[Vec<f32>],
    out_ch: usize,
    skip_out: &mut usize,
    scratch: &mut Vec<f32>,
    shared: &Shared,
    stop: &AtomicBool,
) -> bool {
    let frames = block.first().map_or(0, Vec::len);
    let dropped = (*skip_out).min(frames);
    *skip_out -= dropped;

    scratch.clear();
    for f in dropped..frames {
        for c in 0..out_ch {
            scratch.push(block[c % block.len()][f]);
        }
    }

    let mut written = 0;
    while written < scratch.len() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let pushed = shared.ring.push(&scratch[written..]);
        if pushed == 0 {
            thread::sleep(Duration::from_micros(300));
        }
        written += pushed;
    }
    true
}

// --- Device-free playback ---

/// Wall-clock stand-in used when no output device is available. Behaves like
/// a real player (position, pause, end-of-song) without producing sound.
pub struct SilentPlayback<T: TimeSource = SystemTimeSource> {
    clock: SongClock<T>,
    fast: FastModeAudio,
    loaded: Option<PathBuf>,
    duration: Option<f32>,
    playing: bool,
    start_offset: f32,
    rate: f32,
}

impl SilentPlayback<SystemTimeSource> {
    pub fn new(fast: FastModeAudio) -> Self {
        Self::with_time_source(SystemTimeSource::new(), fast)
    }
}

impl<T: TimeSource> SilentPlayback<T> {
    pub fn with_time_source(time: T, fast: FastModeAudio) -> Self {
        Self {
            clock: SongClock::new(time),
            fast,
            loaded: None,
            duration: None,
            playing: false,
            start_offset: 0.0,
            rate: 1.0,
        }
    }

    fn raw_position(&self) -> f32 {
        self.start_offset + self.clock.elapsed() * self.rate
    }
}

impl<T: TimeSource> Playback for SilentPlayback<T> {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.stop();
        let audio = decode::decode_file(path)?;
        self.duration = Some(audio.duration_seconds());
        self.loaded = Some(path.to_path_buf());
        info!("Loaded '{}' for silent playback.", path.display());
        Ok(())
    }

    fn play(&mut self, start_offset: f32, fast: bool) -> Result<(), PlaybackError> {
        if self.loaded.is_none() {
            return Err(PlaybackError::NotLoaded);
        }
        self.start_offset = start_offset.max(0.0);
        self.rate = self.fast.rate_for(fast);
        self.clock.start();
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn unpause(&mut self) {
        self.clock.resume();
    }

    fn stop(&mut self) {
        self.playing = false;
        self.clock.reset();
    }

    fn is_busy(&self) -> bool {
        self.playing && self.duration.is_some_and(|d| self.raw_position() < d)
    }

    fn position_seconds(&self) -> f32 {
        if !self.playing {
            return self.start_offset;
        }
        let pos = self.raw_position();
        self.duration.map_or(pos, |d| pos.min(d))
    }

    fn duration_seconds(&self) -> Option<f32> {
        self.duration
    }
}

mod internal {
    use std::cell::UnsafeCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Single-producer single-consumer sample ring. The feeder thread is the
    /// only producer; the audio callback is the only consumer.
    pub struct SpscRingF32 {
        buf: UnsafeCell<Box<[f32]>>,
        mask: usize,
        head: AtomicUsize,
        tail: AtomicUsize,
    }
    unsafe impl Send for SpscRingF32 {}
    unsafe impl Sync for SpscRingF32 {}

    impl SpscRingF32 {
        pub fn new(cap_pow2: usize) -> Self {
            debug_assert!(cap_pow2.is_power_of_two());
            Self {
                buf: UnsafeCell::new(vec![0.0; cap_pow2].into_boxed_slice()),
                mask: cap_pow2 - 1,
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
            }
        }

        #[inline(always)]
        fn cap(&self) -> usize {
            self.mask + 1
        }

        pub fn len(&self) -> usize {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);
            h.wrapping_sub(t)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Producer side. Returns how many samples fit.
        pub fn push(&self, data: &[f32]) -> usize {
            let cap = self.cap();
            let h = self.head.load(Ordering::Relaxed);
            let t = self.tail.load(Ordering::Acquire);
            let free = cap - h.wrapping_sub(t);
            let n = data.len().min(free);
            if n == 0 {
                return 0;
            }
            let idx = h & self.mask;
            unsafe {
                let buf = &mut *self.buf.get();
                let first = (cap - idx).min(n);
                buf[idx..idx + first].copy_from_slice(&data[..first]);
                if n > first {
                    buf[0..(n - first)].copy_from_slice(&data[first..n]);
                }
            }
            self.head.store(h.wrapping_add(n), Ordering::Release);
            n
        }

        /// Consumer side. Returns how many samples were written to `out`.
        pub fn pop(&self, out: &mut [f32]) -> usize {
            let cap = self.cap();
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Relaxed);
            let n = out.len().min(h.wrapping_sub(t));
            if n == 0 {
                return 0;
            }
            let idx = t & self.mask;
            unsafe {
                let buf = &*self.buf.get();
                let first = (cap - idx).min(n);
                out[..first].copy_from_slice(&buf[idx..idx + first]);
                if n > first {
                    out[first..n].copy_from_slice(&buf[0..(n - first)]);
                }
            }
            self.tail.store(t.wrapping_add(n), Ordering::Release);
            n
        }

        /// Consumer side. Drops everything currently queued.
        pub fn discard_all(&self) {
            let h = self.head.load(Ordering::Acquire);
            self.tail.store(h, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualTimeSource;
    use crate::core::decode::tests::write_wav;
    use approx::assert_abs_diff_eq;
    use std::rc::Rc;

    const FAST: FastModeAudio = FastModeAudio { rate: 1.0, volume: 0.7 };

    #[test]
    fn ring_wraps_and_discards() {
        let ring = internal::SpscRingF32::new(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 6);
        let mut out = [0.0; 4];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        assert_eq!(ring.push(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0]), 6);
        assert_eq!(ring.len(), 8);
        let mut out = [0.0; 8];
        assert_eq!(ring.pop(&mut out), 8);
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);

        ring.push(&[1.0, 1.0]);
        ring.discard_all();
        assert!(ring.is_empty());
    }

    fn shared_with_ring(cap: usize, volume: f32) -> Shared {
        Shared {
            ring: internal::SpscRingF32::new(cap),
            paused: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            volume_bits: AtomicU32::new(volume.to_bits()),
            frames_played: AtomicU64::new(0),
            done_generation: AtomicU64::new(0),
        }
    }

    /// Two seconds of a mono 8 kHz ramp from 0 to 1.
    fn ramp() -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            samples: (0..16_000).map(|i| i as f32 / 16_000.0).collect(),
            channels: 1,
            sample_rate: 8_000,
        })
    }

    fn drain(shared: &Shared) -> Vec<f32> {
        let mut out = vec![0.0; shared.ring.len()];
        let n = shared.ring.pop(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn callback_applies_volume_and_counts_frames() {
        let shared = shared_with_ring(16, 0.5);
        shared.ring.push(&[1.0, 1.0, 0.5, 0.5]);
        let mut out = [9.0; 6];
        audio_callback(&mut out, &shared, 2);
        assert_eq!(out, [0.5, 0.5, 0.25, 0.25, 0.0, 0.0]);
        assert_eq!(shared.frames_played.load(Ordering::Relaxed), 2);

        shared.ring.push(&[1.0, 1.0]);
        shared.paused.store(true, Ordering::Relaxed);
        let mut out = [9.0; 2];
        audio_callback(&mut out, &shared, 2);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(shared.ring.len(), 2, "paused callback must not consume");

        shared.flush.store(true, Ordering::Release);
        audio_callback(&mut out, &shared, 2);
        assert!(shared.ring.is_empty());
        assert_eq!(shared.frames_played.load(Ordering::Relaxed), 0);
        assert!(!shared.flush.load(Ordering::Acquire));
    }

    #[test]
    fn feeder_starts_at_offset_and_upmixes() {
        let shared = shared_with_ring(1 << 14, 1.0);
        let device = DeviceInfo { sample_rate: 4_000, channels: 2 };
        let job = FeedJob { audio: ramp(), start_sec: 1.0, rate: 1.0, generation: 7 };
        feed_song(job, device, &shared, &AtomicBool::new(false));

        let out = drain(&shared);
        assert_eq!(out.len() % 2, 0);
        let frames = out.len() / 2;
        assert!((3_900..=5_200).contains(&frames), "got {} frames", frames);
        for k in 0..64 {
            let (left, right) = (out[2 * k], out[2 * k + 1]);
            assert_eq!(left, right, "mono source must fill both channels");
            // Output frame k sits at input frame 8000 + 2k.
            assert_abs_diff_eq!(left, (8_000 + 2 * k) as f32 / 16_000.0, epsilon = 0.01);
        }
        assert_eq!(shared.done_generation.load(Ordering::Acquire), 7);
    }

    #[test]
    fn feeder_folds_rate_into_resampling() {
        let shared = shared_with_ring(1 << 14, 1.0);
        let device = DeviceInfo { sample_rate: 4_000, channels: 2 };
        let job = FeedJob { audio: ramp(), start_sec: 1.0, rate: 2.0, generation: 3 };
        feed_song(job, device, &shared, &AtomicBool::new(false));

        let out = drain(&shared);
        let frames = out.len() / 2;
        assert!((1_900..=3_200).contains(&frames), "got {} frames", frames);
        for k in 0..64 {
            assert_abs_diff_eq!(out[2 * k], (8_000 + 4 * k) as f32 / 16_000.0, epsilon = 0.01);
        }
        assert_eq!(shared.done_generation.load(Ordering::Acquire), 3);
    }

    #[test]
    fn stopped_feeder_leaves_generation_alone() {
        let shared = shared_with_ring(1 << 14, 1.0);
        let device = DeviceInfo { sample_rate: 4_000, channels: 2 };
        let job = FeedJob { audio: ramp(), start_sec: 0.0, rate: 1.0, generation: 9 };
        feed_song(job, device, &shared, &AtomicBool::new(true));
        assert!(shared.ring.is_empty());
        assert_eq!(shared.done_generation.load(Ordering::Acquire), 0);
    }

    #[test]
    fn silent_playback_tracks_position_pause_and_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_seconds.wav");
        write_wav(&path, 8_000, 1, 16_000, |_| 0.0);

        let time = Rc::new(ManualTimeSource::new());
        let mut p = SilentPlayback::with_time_source(Rc::clone(&time), FAST);
        assert!(matches!(p.play(0.0, false), Err(PlaybackError::NotLoaded)));

        p.load(&path).unwrap();
        assert_abs_diff_eq!(p.duration_seconds().unwrap(), 2.0, epsilon = 1e-4);
        p.play(0.5, false).unwrap();
        time.advance_secs(1.0);
        assert_abs_diff_eq!(p.position_seconds(), 1.5, epsilon = 1e-4);
        assert!(p.is_busy());

        p.pause();
        time.advance_secs(10.0);
        assert!(p.is_busy(), "paused playback is still busy");
        p.unpause();
        time.advance_secs(0.6);
        assert!(!p.is_busy());
        assert_abs_diff_eq!(p.position_seconds(), 2.0, epsilon = 1e-4);

        p.stop();
        assert!(!p.is_busy());
    }

    #[test]
    fn silent_playback_fails_on_unreadable_file() {
        let mut p = SilentPlayback::with_time_source(ManualTimeSource::new(), FAST);
        let err = p.load(Path::new("/nonexistent/song.wav")).unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }
}
