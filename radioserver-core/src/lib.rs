//! # radioserver-core
//!
//! Sample pipeline for radioserver.
//!
//! This crate provides:
//! - The front-end capability interface and a simulated tone generator
//! - Frequency translation, decimation and spectrum estimation
//! - Per-client channel settings with validation
//! - The channel generator: bounded queue, worker task, formatted output

pub mod channel;
pub mod dsp;
pub mod error;
pub mod frontend;
pub mod settings;
pub mod spectrum;

pub use channel::{ChannelConfig, ChannelGenerator, ChannelStats, SampleFrame, SampleSink};
pub use dsp::{design_translator_taps, stage_to_decimation, FrequencyTranslator, TranslatorParams};
pub use error::{ChannelError, FrontendError, SettingError};
pub use frontend::{Frontend, SampleBlock, SamplesCallback, SimulatedConfig, SimulatedFrontend};
pub use settings::{ChannelSettings, DeviceLimits, DeviceTuning};
pub use spectrum::{bin_to_pixels, SpectrumEstimator};
