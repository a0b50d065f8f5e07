//! Front-end capability interface.
//!
//! The server only talks to hardware through [`Frontend`]. Control methods
//! take `&self`: implementations serialize access internally, so any number
//! of client connections may call them concurrently without an outer lock.
//! Samples arrive asynchronously through the registered callback, on a
//! thread owned by the front-end.

use crate::error::FrontendError;
use num_complex::Complex32;
use parking_lot::{Mutex, RwLock};
use radioserver_protocol::{DeviceInfo, DeviceType};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A block of native samples, shared by every client it is fanned out to.
pub type SampleBlock = Arc<[Complex32]>;

/// Callback invoked for every block the front-end produces.
pub type SamplesCallback = Box<dyn Fn(SampleBlock) + Send + Sync>;

/// Control surface and sample source of a radio front-end.
pub trait Frontend: Send + Sync {
    fn device_type(&self) -> DeviceType;
    fn device_serial(&self) -> String;
    fn device_serial_u32(&self) -> u32;
    fn name(&self) -> String;
    fn short_name(&self) -> String;

    fn maximum_sample_rate(&self) -> u32;
    fn maximum_bandwidth(&self) -> u32;
    fn available_sample_rates(&self) -> Vec<u32>;
    fn sample_rate(&self) -> u32;
    /// Returns the rate actually applied.
    fn set_sample_rate(&self, sample_rate: u32) -> Result<u32, FrontendError>;

    fn center_frequency(&self) -> u32;
    /// Returns the frequency actually applied.
    fn set_center_frequency(&self, frequency: u32) -> Result<u32, FrontendError>;

    fn gain(&self) -> u8;
    fn set_gain(&self, gain: u8) -> Result<(), FrontendError>;
    fn set_agc(&self, enabled: bool) -> Result<(), FrontendError>;
    fn set_bias_t(&self, enabled: bool) -> Result<(), FrontendError>;
    fn set_antenna(&self, antenna: &str) -> Result<(), FrontendError>;

    fn set_samples_callback(&self, callback: SamplesCallback);

    fn init(&self) -> Result<(), FrontendError>;
    fn start(&self) -> Result<(), FrontendError>;
    fn stop(&self);
    fn destroy(&self);

    fn minimum_frequency(&self) -> u32;
    fn maximum_frequency(&self) -> u32;
    fn maximum_gain_index(&self) -> u32;
    fn gain_stage_count(&self) -> u32;
    fn maximum_decimation_stages(&self) -> u32;

    /// Capability snapshot announced to clients.
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_type: self.device_type().as_u32(),
            device_serial: self.device_serial_u32(),
            maximum_sample_rate: self.maximum_sample_rate(),
            maximum_bandwidth: self.maximum_bandwidth(),
            decimation_stage_count: self.maximum_decimation_stages(),
            gain_stage_count: self.gain_stage_count(),
            maximum_gain_index: self.maximum_gain_index(),
            minimum_frequency: self.minimum_frequency(),
            maximum_frequency: self.maximum_frequency(),
        }
    }
}

/// Settings of the simulated front-end.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub center_frequency: u32,
    pub sample_rate: u32,
    pub gain: u8,
    /// Samples per produced block.
    pub block_size: usize,
    /// Offset of the generated tone from the center frequency.
    pub tone_offset_hz: i64,
    pub decimation_stages: u32,
    pub max_gain_index: u32,
    pub minimum_frequency: u32,
    pub maximum_frequency: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            center_frequency: 100_000_000,
            sample_rate: 2_400_000,
            gain: 8,
            block_size: 16_384,
            tone_offset_hz: 100_000,
            decimation_stages: 8,
            max_gain_index: 16,
            minimum_frequency: 24_000_000,
            maximum_frequency: 1_766_000_000,
        }
    }
}

#[derive(Debug)]
struct Tuning {
    center_frequency: u32,
    sample_rate: u32,
    gain: u8,
    agc: bool,
    bias_t: bool,
    antenna: String,
}

struct Shared {
    config: SimulatedConfig,
    tuning: Mutex<Tuning>,
    callback: RwLock<Option<SamplesCallback>>,
    initialized: AtomicBool,
    running: AtomicBool,
    phase: Mutex<f64>,
}

impl Shared {
    fn generate_block(&self) -> SampleBlock {
        let (sample_rate, gain) = {
            let tuning = self.tuning.lock();
            (tuning.sample_rate.max(1) as f64, tuning.gain)
        };
        let amplitude = 0.05 + 0.9 * gain as f64 / self.config.max_gain_index.max(1) as f64;
        let step = 2.0 * PI * self.config.tone_offset_hz as f64 / sample_rate;

        let mut phase = self.phase.lock();
        let block: Vec<Complex32> = (0..self.config.block_size)
            .map(|_| {
                let (sin, cos) = phase.sin_cos();
                *phase = (*phase + step) % (2.0 * PI);
                Complex32::new((amplitude * cos) as f32, (amplitude * sin) as f32)
            })
            .collect();
        block.into()
    }

    fn block_period(&self) -> Duration {
        let sample_rate = self.tuning.lock().sample_rate.max(1);
        Duration::from_secs_f64(self.config.block_size as f64 / sample_rate as f64)
    }
}

/// A tone generator standing in for hardware.
///
/// Produces `block_size` samples of a complex tone at `tone_offset_hz` from
/// the center frequency, paced to the configured sample rate, on its own
/// thread.
pub struct SimulatedFrontend {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedFrontend {
    pub fn new(config: SimulatedConfig) -> Self {
        let tuning = Tuning {
            center_frequency: config.center_frequency,
            sample_rate: config.sample_rate,
            gain: config.gain,
            agc: false,
            bias_t: false,
            antenna: "RX".to_string(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                tuning: Mutex::new(tuning),
                callback: RwLock::new(None),
                initialized: AtomicBool::new(false),
                running: AtomicBool::new(false),
                phase: Mutex::new(0.0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Produces one block synchronously and hands it to the callback.
    pub fn emit_block(&self) -> SampleBlock {
        let block = self.shared.generate_block();
        if let Some(callback) = self.shared.callback.read().as_ref() {
            callback(block.clone());
        }
        block
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn agc(&self) -> bool {
        self.shared.tuning.lock().agc
    }

    pub fn bias_t(&self) -> bool {
        self.shared.tuning.lock().bias_t
    }

    pub fn antenna(&self) -> String {
        self.shared.tuning.lock().antenna.clone()
    }

    fn run(shared: Arc<Shared>) {
        tracing::debug!("Simulated front-end producer started");
        let mut next = Instant::now();
        while shared.running.load(Ordering::SeqCst) {
            let block = shared.generate_block();
            if let Some(callback) = shared.callback.read().as_ref() {
                callback(block);
            }

            next += shared.block_period();
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
        tracing::debug!("Simulated front-end producer stopped");
    }
}

impl Default for SimulatedFrontend {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl Frontend for SimulatedFrontend {
    fn device_type(&self) -> DeviceType {
        DeviceType::SpyServer
    }

    fn device_serial(&self) -> String {
        "SIM00001".to_string()
    }

    fn device_serial_u32(&self) -> u32 {
        1
    }

    fn name(&self) -> String {
        "Simulated Tone Generator".to_string()
    }

    fn short_name(&self) -> String {
        "simulated".to_string()
    }

    fn maximum_sample_rate(&self) -> u32 {
        self.shared.config.sample_rate
    }

    fn maximum_bandwidth(&self) -> u32 {
        self.shared.config.sample_rate
    }

    fn available_sample_rates(&self) -> Vec<u32> {
        vec![self.shared.config.sample_rate]
    }

    fn sample_rate(&self) -> u32 {
        self.shared.tuning.lock().sample_rate
    }

    fn set_sample_rate(&self, sample_rate: u32) -> Result<u32, FrontendError> {
        if sample_rate == 0 || sample_rate > self.maximum_sample_rate() {
            return Err(FrontendError::InvalidValue {
                what: "sample rate",
                value: sample_rate as u64,
            });
        }
        self.shared.tuning.lock().sample_rate = sample_rate;
        Ok(sample_rate)
    }

    fn center_frequency(&self) -> u32 {
        self.shared.tuning.lock().center_frequency
    }

    fn set_center_frequency(&self, frequency: u32) -> Result<u32, FrontendError> {
        let frequency = frequency.clamp(self.minimum_frequency(), self.maximum_frequency());
        self.shared.tuning.lock().center_frequency = frequency;
        Ok(frequency)
    }

    fn gain(&self) -> u8 {
        self.shared.tuning.lock().gain
    }

    fn set_gain(&self, gain: u8) -> Result<(), FrontendError> {
        if gain as u32 > self.maximum_gain_index() {
            return Err(FrontendError::InvalidValue {
                what: "gain",
                value: gain as u64,
            });
        }
        self.shared.tuning.lock().gain = gain;
        Ok(())
    }

    fn set_agc(&self, enabled: bool) -> Result<(), FrontendError> {
        self.shared.tuning.lock().agc = enabled;
        Ok(())
    }

    fn set_bias_t(&self, enabled: bool) -> Result<(), FrontendError> {
        self.shared.tuning.lock().bias_t = enabled;
        Ok(())
    }

    fn set_antenna(&self, antenna: &str) -> Result<(), FrontendError> {
        self.shared.tuning.lock().antenna = antenna.to_string();
        Ok(())
    }

    fn set_samples_callback(&self, callback: SamplesCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    fn init(&self) -> Result<(), FrontendError> {
        self.shared.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            "Simulated front-end ready: {} Hz, {} S/s",
            self.center_frequency(),
            self.sample_rate()
        );
        Ok(())
    }

    fn start(&self) -> Result<(), FrontendError> {
        if !self.shared.initialized.load(Ordering::SeqCst) {
            return Err(FrontendError::NotInitialized);
        }
        let mut worker = self.worker.lock();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(FrontendError::AlreadyRunning);
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("frontend-sim".to_string())
            .spawn(move || Self::run(shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                FrontendError::Device(e.to_string())
            })?;
        *worker = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Simulated front-end producer panicked");
            }
        }
    }

    fn destroy(&self) {
        self.stop();
        *self.shared.callback.write() = None;
        self.shared.initialized.store(false, Ordering::SeqCst);
    }

    fn minimum_frequency(&self) -> u32 {
        self.shared.config.minimum_frequency
    }

    fn maximum_frequency(&self) -> u32 {
        self.shared.config.maximum_frequency
    }

    fn maximum_gain_index(&self) -> u32 {
        self.shared.config.max_gain_index
    }

    fn gain_stage_count(&self) -> u32 {
        self.shared.config.max_gain_index + 1
    }

    fn maximum_decimation_stages(&self) -> u32 {
        self.shared.config.decimation_stages
    }
}

impl Drop for SimulatedFrontend {
    fn drop(&mut self) {
        self.stop();
    }
}
