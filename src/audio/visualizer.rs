//! Waveform frame emitter
//!
//! Produces visualization frames at ~30fps for the frontend to draw.
//! Two mutually exclusive routines: an idle ambient sinusoid computed
//! from elapsed time (no audio dependency), and a live polyline
//! sampled from the analysis tap's time-domain window. Switching
//! routines tears down the previous frame chain and starts the other
//! one fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};

use super::capture::AnalysisTap;

/// Frame interval for ~30fps emission
pub const FRAME_INTERVAL_MS: u64 = 33;

/// Points per frame polyline
pub const FRAME_POINTS: usize = 48;

/// Idle wave amplitude (fraction of full scale)
const IDLE_WAVE_AMPLITUDE: f32 = 0.08;

/// Idle wave spatial frequency across the polyline
const IDLE_WAVE_SPATIAL_FREQ: f32 = 0.45;

/// Idle wave animation speed (radians per second)
const IDLE_WAVE_SPEED: f32 = 2.0;

/// One visualization frame. Points are normalized to -1.0..=1.0;
/// presentation (colors, geometry) is the frontend's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformFrame {
    /// True when the frame was derived from live microphone samples.
    pub live: bool,
    pub points: Vec<f32>,
}

/// Compute an idle frame for elapsed time `t` (seconds): a gentle
/// sinusoid drifting across the polyline.
pub fn idle_frame(t: f32) -> WaveformFrame {
    let points = (0..FRAME_POINTS)
        .map(|i| (i as f32 * IDLE_WAVE_SPATIAL_FREQ + t * IDLE_WAVE_SPEED).sin() * IDLE_WAVE_AMPLITUDE)
        .collect();

    WaveformFrame {
        live: false,
        points,
    }
}

/// Compute a live frame from a time-domain sample window: the window
/// is resampled to the polyline resolution and normalized.
pub fn live_frame(samples: &[i16]) -> WaveformFrame {
    if samples.is_empty() {
        return WaveformFrame {
            live: true,
            points: vec![0.0; FRAME_POINTS],
        };
    }

    let points = (0..FRAME_POINTS)
        .map(|i| {
            let index = i * samples.len() / FRAME_POINTS;
            (samples[index] as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect();

    WaveformFrame {
        live: true,
        points,
    }
}

/// Owns the currently running frame routine. Entering a routine stops
/// the previous chain and spawns a fresh one.
pub struct Visualizer {
    frames_tx: mpsc::Sender<WaveformFrame>,
    stop: Option<oneshot::Sender<()>>,
}

impl Visualizer {
    pub fn new(frames_tx: mpsc::Sender<WaveformFrame>) -> Self {
        Self {
            frames_tx,
            stop: None,
        }
    }

    /// Start the idle routine, stopping whichever routine was running.
    pub fn enter_idle(&mut self) {
        self.stop_current();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);
        tokio::spawn(run_idle_frames(self.frames_tx.clone(), stop_rx));
    }

    /// Start the live routine against an analysis tap, stopping
    /// whichever routine was running.
    pub fn enter_live(&mut self, tap: Arc<AnalysisTap>) {
        self.stop_current();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);
        tokio::spawn(run_live_frames(tap, self.frames_tx.clone(), stop_rx));
    }

    fn stop_current(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.stop_current();
    }
}

async fn run_idle_frames(
    frames_tx: mpsc::Sender<WaveformFrame>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));

    eprintln!("Idle frame routine started");

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = tick.tick() => {
                let frame = idle_frame(started.elapsed().as_secs_f32());
                eprintln!("idle tick send");
                if frames_tx.send(frame).await.is_err() {
                    break;
                }
                eprintln!("idle tick sent");
            }
        }
    }

    eprintln!("Idle frame routine stopped");
}

async fn run_live_frames(
    tap: Arc<AnalysisTap>,
    frames_tx: mpsc::Sender<WaveformFrame>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));

    log::debug!("Live frame routine started");

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = tick.tick() => {
                let frame = live_frame(&tap.snapshot());
                if frames_tx.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }

    log::debug!("Live frame routine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_frames_are_deterministic_in_time() {
        assert_eq!(idle_frame(1.25), idle_frame(1.25));
        assert_ne!(idle_frame(0.0).points, idle_frame(1.0).points);
    }

    #[test]
    fn idle_frames_stay_within_the_ambient_amplitude() {
        let frame = idle_frame(3.7);

        assert!(!frame.live);
        assert_eq!(frame.points.len(), FRAME_POINTS);
        for &point in &frame.points {
            assert!(point.abs() <= IDLE_WAVE_AMPLITUDE + f32::EPSILON);
        }
    }

    #[test]
    fn live_frames_normalize_samples() {
        let samples = vec![i16::MAX; 100];
        let frame = live_frame(&samples);

        assert!(frame.live);
        assert_eq!(frame.points.len(), FRAME_POINTS);
        for &point in &frame.points {
            assert!((point - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn live_frames_from_an_empty_window_are_silent() {
        let frame = live_frame(&[]);

        assert_eq!(frame.points, vec![0.0; FRAME_POINTS]);
    }

    #[test]
    fn live_frames_clamp_to_full_scale() {
        let samples = vec![i16::MIN; 100];
        let frame = live_frame(&samples);

        for &point in &frame.points {
            assert!((-1.0..=1.0).contains(&point));
        }
    }

    #[tokio::test]
    async fn switching_routines_stops_the_previous_chain() {
        let (frames_tx, mut frames_rx) = mpsc::channel(64);
        let mut viz = Visualizer::new(frames_tx);

        viz.enter_idle();
        // First tick fires immediately.
        let frame = frames_rx.recv().await.unwrap();
        assert!(!frame.live);

        viz.enter_live(Arc::new(AnalysisTap::new()));

        // Drain until live frames appear; idle frames must stop
        // arriving shortly after the switch.
        let mut saw_live = false;
        for _ in 0..8 {
            let frame = frames_rx.recv().await.unwrap();
            if frame.live {
                saw_live = true;
                break;
            }
        }
        assert!(saw_live, "live routine never produced a frame");
    }
}
