//! Microphone capture and waveform visualization
//!
//! Capture opens the default input device, collapses frames to mono
//! PCM16 at the engine rate, and fans samples out to the analysis tap
//! (visualization) and a broadcast feed (recognition). The visualizer
//! turns the tap's time-domain window into frames for the frontend.

pub mod capture;
pub mod visualizer;

pub use capture::{downsample, AnalysisTap, AudioCapture, AudioError, CAPTURE_SAMPLE_RATE};
pub use visualizer::{idle_frame, live_frame, Visualizer, WaveformFrame, FRAME_INTERVAL_MS};
