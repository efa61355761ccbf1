//! Microphone acquisition
//!
//! `AudioCapture` owns the microphone for one listening session. The
//! cpal stream is not `Send`, so it lives on a dedicated capture
//! thread that reports readiness over a oneshot and then parks until
//! release. The stream callback collapses interleaved frames to mono,
//! downsamples to the engine rate, and fans the result out to the
//! analysis tap (visualization) and the broadcast feed (recognition).
//!
//! `acquire()` is idempotent: repeated calls during one listening
//! session return the cached analysis tap.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use tokio::sync::{broadcast, oneshot};

use crate::recognition::ENGINE_SAMPLE_RATE;

/// Rate of everything downstream of the capture callback: the analysis
/// tap, the broadcast feed, and the engine all see PCM16 mono at this
/// rate.
pub const CAPTURE_SAMPLE_RATE: u32 = ENGINE_SAMPLE_RATE;

/// Analysis window capacity (~200ms at 24kHz mono).
const ANALYSIS_WINDOW: usize = 4_800;

/// Errors that can occur while opening the microphone.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
        }
    }
}

impl std::error::Error for AudioError {}

/// Bounded ring of the latest time-domain samples, shared between the
/// capture callback and the visualization loop.
pub struct AnalysisTap {
    window: Mutex<VecDeque<i16>>,
}

impl AnalysisTap {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(ANALYSIS_WINDOW)),
        }
    }

    /// Append samples, evicting the oldest once the window is full.
    pub fn push_samples(&self, samples: &[i16]) {
        let mut window = self.window.lock().unwrap();
        let len = samples.len();

        // Oversized batches: keep only the newest window's worth.
        if len >= ANALYSIS_WINDOW {
            window.clear();
            window.extend(&samples[len - ANALYSIS_WINDOW..]);
            return;
        }

        let to_remove = (window.len() + len).saturating_sub(ANALYSIS_WINDOW);
        if to_remove > 0 {
            window.drain(0..to_remove);
        }

        window.extend(samples);
    }

    /// Copy of the current window, oldest sample first.
    pub fn snapshot(&self) -> Vec<i16> {
        self.window.lock().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.window.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnalysisTap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("samples", &self.len())
            .finish()
    }
}

struct ActiveCapture {
    tap: Arc<AnalysisTap>,
    stop_tx: std::sync::mpsc::Sender<()>,
}

/// Microphone acquirer. Owns at most one open capture at a time.
pub struct AudioCapture {
    feed: broadcast::Sender<Vec<i16>>,
    active: Option<ActiveCapture>,
}

impl AudioCapture {
    /// `feed` receives every captured batch for recognition; a session
    /// subscribes when it starts and simply stops receiving when the
    /// microphone is released.
    pub fn new(feed: broadcast::Sender<Vec<i16>>) -> Self {
        Self { feed, active: None }
    }

    /// Open the microphone, or return the cached analysis tap if it is
    /// already open. Resolves once the capture thread reports that the
    /// stream is running.
    pub async fn acquire(&mut self) -> Result<Arc<AnalysisTap>, AudioError> {
        if let Some(active) = &self.active {
            log::debug!("Microphone already open, returning cached tap");
            return Ok(active.tap.clone());
        }

        let tap = Arc::new(AnalysisTap::new());
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let thread_tap = tap.clone();
        let feed = self.feed.clone();
        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(thread_tap, feed, ready_tx, stop_rx))
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.active = Some(ActiveCapture {
                    tap: tap.clone(),
                    stop_tx,
                });
                log::info!("Microphone acquired");
                Ok(tap)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamCreationFailed(
                "Capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    /// Signal the capture thread to drop its stream and clear the
    /// cached tap. A no-op when the microphone is not open.
    pub fn release(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(());
            log::info!("Microphone released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    fn install_active_for_tests(&mut self) -> std::sync::mpsc::Receiver<()> {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        self.active = Some(ActiveCapture {
            tap: Arc::new(AnalysisTap::new()),
            stop_tx,
        });
        stop_rx
    }
}

/// Body of the capture thread: open the device, start the stream,
/// report readiness, then hold the stream open until released.
fn capture_thread(
    tap: Arc<AnalysisTap>,
    feed: broadcast::Sender<Vec<i16>>,
    ready_tx: oneshot::Sender<Result<(), AudioError>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(AudioError::NoInputDevice));
        return;
    };

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = match device.default_input_config() {
        Ok(config) => config,
        Err(_) => {
            let _ = ready_tx.send(Err(AudioError::NoSupportedConfig));
            return;
        }
    };

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    let stream = match build_stream(&device, &config, sample_format, tap, feed) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Park until the controller releases the microphone.
    let _ = stop_rx.recv();
    drop(stream);
    log::debug!("Capture thread exiting");
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    tap: Arc<AnalysisTap>,
    feed: broadcast::Sender<Vec<i16>>,
) -> Result<Stream, AudioError> {
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, tap, feed, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, tap, feed, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, tap, feed, err_fn),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    tap: Arc<AnalysisTap>,
    feed: broadcast::Sender<Vec<i16>>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let source_rate = config.sample_rate.0;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Collapse interleaved frames to mono, then match the
                // engine rate.
                let mono: Vec<i16> = data
                    .chunks(channels)
                    .map(|frame| {
                        let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                        float_to_i16(sum / frame.len() as f32)
                    })
                    .collect();

                let samples = downsample(&mono, source_rate, CAPTURE_SAMPLE_RATE);

                tap.push_samples(&samples);
                // No receivers is fine: nothing is listening while the
                // recognition session reconnects.
                let _ = feed.send(samples);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Convert a normalized float sample to i16, clamping out-of-range
/// input.
fn float_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Downsample audio from source rate to target rate using simple
/// averaging. Supports integer ratios (e.g. 48kHz → 24kHz); other
/// ratios pass through unchanged with a warning.
pub fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate != 0 {
        log::warn!(
            "Unsupported resample ratio {}:{}, returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let ratio = (source_rate / target_rate) as usize;

    samples
        .chunks(ratio)
        .map(|chunk| {
            let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
            (sum / chunk.len() as i64) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(float_to_i16(1.0), i16::MAX);
        assert_eq!(float_to_i16(-1.0), -i16::MAX);
        assert_eq!(float_to_i16(2.0), i16::MAX);
        assert_eq!(float_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    fn downsample_halves_at_two_to_one() {
        let samples = vec![0i16, 100, 200, 300];
        let result = downsample(&samples, 48_000, 24_000);
        assert_eq!(result, vec![50, 250]);
    }

    #[test]
    fn downsample_passes_through_matching_rates() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(downsample(&samples, 24_000, 24_000), samples);
    }

    #[test]
    fn downsample_passes_through_non_integer_ratios() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(downsample(&samples, 44_100, 24_000), samples);
    }

    #[test]
    fn tap_window_stays_bounded() {
        let tap = AnalysisTap::new();

        let samples: Vec<i16> = (0..10_000).map(|i| (i % 1000) as i16).collect();
        tap.push_samples(&samples);

        assert_eq!(tap.len(), ANALYSIS_WINDOW);
    }

    #[test]
    fn tap_keeps_the_newest_samples() {
        let tap = AnalysisTap::new();

        tap.push_samples(&[1, 2, 3]);
        let big: Vec<i16> = vec![7; ANALYSIS_WINDOW];
        tap.push_samples(&big);

        let window = tap.snapshot();
        assert_eq!(window.len(), ANALYSIS_WINDOW);
        assert!(window.iter().all(|&s| s == 7));
    }

    #[test]
    fn tap_snapshot_preserves_order() {
        let tap = AnalysisTap::new();
        tap.push_samples(&[1, 2]);
        tap.push_samples(&[3]);

        assert_eq!(tap.snapshot(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn acquire_returns_the_cached_tap_when_already_open() {
        let (feed, _keep) = broadcast::channel(4);
        let mut capture = AudioCapture::new(feed);
        let _stop_rx = capture.install_active_for_tests();

        let first = capture.acquire().await.unwrap();
        let second = capture.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn release_without_an_open_microphone_is_a_no_op() {
        let (feed, _keep) = broadcast::channel(4);
        let mut capture = AudioCapture::new(feed);

        assert!(!capture.is_active());
        capture.release();
        assert!(!capture.is_active());
    }

    #[test]
    fn release_signals_the_capture_thread() {
        let (feed, _keep) = broadcast::channel(4);
        let mut capture = AudioCapture::new(feed);
        let stop_rx = capture.install_active_for_tests();

        assert!(capture.is_active());
        capture.release();

        assert!(!capture.is_active());
        assert!(stop_rx.recv().is_ok());
    }
}
