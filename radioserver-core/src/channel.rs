//! Per-client channel generator.
//!
//! The front-end pushes shared sample blocks into a bounded queue; a single
//! worker task per client pops them in order, runs the IQ and FFT chains and
//! hands encoded frames to the client's [`SampleSink`].
//!
//! Concurrency contract:
//!
//! - `push_samples` only takes the queue lock. When the queue is full the
//!   incoming block is dropped whole and counted.
//! - Every queued block is matched by one semaphore permit, added under the
//!   queue lock. The worker consumes one permit per block.
//! - Lock order is client settings, then DSP, then queue. The worker holds
//!   the DSP lock while it pops and processes a block, so a reconfiguration
//!   never interleaves with a block in flight.
//! - Stopping cancels the worker's token, then clears the queue and forgets
//!   all outstanding permits under the queue lock. Starting drains again
//!   before spawning, so blocks queued while stopped are never replayed.
//! - The worker checks its token under the queue lock before popping, so a
//!   cancelled worker never takes another block. A new worker first awaits
//!   the previous one.

use crate::dsp::{FrequencyTranslator, TranslatorParams};
use crate::error::ChannelError;
use crate::frontend::SampleBlock;
use crate::settings::{ChannelSettings, DeviceTuning};
use crate::spectrum::{bin_to_pixels, SpectrumEstimator};
use bytes::Bytes;
use num_complex::Complex32;
use parking_lot::Mutex;
use radioserver_protocol::{FftEncoder, FftScale, IqEncoder, MessageType, StreamMode};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Channel generator configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum number of queued blocks.
    pub queue_capacity: usize,
    /// Idle wake-up interval of the worker.
    pub wake_timeout: Duration,
    /// Upper bound on FFT frames produced per second.
    pub fft_frames_per_second: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            wake_timeout: Duration::from_secs(1),
            fft_frames_per_second: 15,
        }
    }
}

/// An encoded sample payload, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFrame {
    pub message_type: MessageType,
    pub stream_type: u32,
    pub body: Bytes,
}

/// Receives the output of a channel generator.
///
/// Called on the worker task, after the DSP lock has been released.
pub trait SampleSink: Send + Sync {
    fn send_samples(&self, frame: SampleFrame);
}

/// Channel generator counters.
#[derive(Debug, Default)]
pub struct ChannelStats {
    pub blocks_pushed: AtomicU64,
    pub blocks_processed: AtomicU64,
    pub blocks_dropped: AtomicU64,
}

struct IqChain {
    translator: FrequencyTranslator,
    encoder: Option<&'static IqEncoder>,
}

struct FftChain {
    translator: FrequencyTranslator,
    estimator: SpectrumEstimator,
    encoder: Option<FftEncoder>,
    scale: FftScale,
    pixels: usize,
}

#[derive(Default)]
struct DspState {
    iq: Option<IqChain>,
    fft: Option<FftChain>,
}

fn reuse_or_build(previous: Option<FrequencyTranslator>, params: TranslatorParams) -> FrequencyTranslator {
    match previous {
        Some(translator) if translator.params() == params => translator,
        _ => FrequencyTranslator::new(params),
    }
}

fn translate<'a>(translator: &mut FrequencyTranslator, block: &'a [Complex32]) -> Cow<'a, [Complex32]> {
    if translator.is_identity() {
        Cow::Borrowed(block)
    } else {
        Cow::Owned(translator.process(block))
    }
}

impl DspState {
    fn is_empty(&self) -> bool {
        self.iq.is_none() && self.fft.is_none()
    }

    /// Rebuilds the chains for new settings, keeping translators and the
    /// estimator whose parameters did not change.
    fn reconfigure(&mut self, settings: &ChannelSettings, tuning: DeviceTuning, config: &ChannelConfig) {
        self.iq = if settings.mode.has_iq() {
            let params = TranslatorParams::new(
                settings.iq_decimation,
                settings.iq_center_frequency,
                tuning.center_frequency,
                tuning.sample_rate,
            );
            let previous = self.iq.take().map(|chain| chain.translator);
            Some(IqChain {
                translator: reuse_or_build(previous, params),
                encoder: IqEncoder::resolve(settings.iq_format),
            })
        } else {
            None
        };

        self.fft = if settings.mode.has_fft() {
            let params = TranslatorParams::new(
                settings.fft_decimation,
                settings.fft_center_frequency,
                tuning.center_frequency,
                tuning.sample_rate,
            );
            let fft_size = SpectrumEstimator::fft_size_for(settings.fft_display_pixels);
            let interval = SpectrumEstimator::frame_interval_for(
                params.output_sample_rate(),
                config.fft_frames_per_second,
                fft_size,
            );

            let (translator, estimator) = match self.fft.take() {
                Some(chain) => {
                    let estimator = if chain.estimator.fft_size() == fft_size
                        && chain.estimator.frame_interval() == interval
                    {
                        chain.estimator
                    } else {
                        SpectrumEstimator::new(fft_size, interval)
                    };
                    (reuse_or_build(Some(chain.translator), params), estimator)
                }
                None => (
                    FrequencyTranslator::new(params),
                    SpectrumEstimator::new(fft_size, interval),
                ),
            };

            Some(FftChain {
                translator,
                estimator,
                encoder: FftEncoder::resolve(settings.fft_format),
                scale: FftScale {
                    offset: settings.fft_db_offset,
                    range: settings.fft_db_range,
                },
                pixels: settings.fft_display_pixels as usize,
            })
        } else {
            None
        };
    }

    fn process(&mut self, block: &[Complex32]) -> Vec<SampleFrame> {
        let mut frames = Vec::new();

        if let Some(chain) = self.iq.as_mut() {
            // An unset or unsupported format suppresses the stream.
            if let Some(encoder) = chain.encoder {
                let samples = translate(&mut chain.translator, block);
                if !samples.is_empty() {
                    frames.push(SampleFrame {
                        message_type: encoder.message_type,
                        stream_type: StreamMode::IQ,
                        body: encoder.encode(&samples),
                    });
                }
            }
        }

        if let Some(chain) = self.fft.as_mut() {
            if let Some(encoder) = chain.encoder {
                let samples = translate(&mut chain.translator, block);
                for spectrum in chain.estimator.process(&samples) {
                    let bins = bin_to_pixels(&spectrum, chain.pixels);
                    frames.push(SampleFrame {
                        message_type: encoder.message_type,
                        stream_type: StreamMode::FFT,
                        body: encoder.encode(&bins, chain.scale),
                    });
                }
            }
        }

        frames
    }
}

struct Inner {
    config: ChannelConfig,
    queue: Mutex<VecDeque<SampleBlock>>,
    wake: Semaphore,
    dsp: Mutex<DspState>,
    sink: Weak<dyn SampleSink>,
    stats: ChannelStats,
}

impl Inner {
    fn process_next(&self, token: &CancellationToken) {
        let frames = {
            let mut dsp = self.dsp.lock();
            let block = {
                let mut queue = self.queue.lock();
                if token.is_cancelled() {
                    return;
                }
                match queue.pop_front() {
                    Some(block) => block,
                    None => return,
                }
            };
            self.stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
            dsp.process(&block)
        };

        if frames.is_empty() {
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            for frame in frames {
                sink.send_samples(frame);
            }
        }
    }

    /// Discards queued blocks and their pending wakeups.
    fn drain(&self) {
        let mut queue = self.queue.lock();
        let discarded = queue.len();
        queue.clear();
        let mut forgotten = 0usize;
        while let Ok(permit) = self.wake.try_acquire() {
            permit.forget();
            forgotten += 1;
        }
        tracing::debug!(discarded, forgotten, "Channel worker drained");
    }
}

async fn run_worker(inner: Arc<Inner>, token: CancellationToken, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    tracing::debug!("Channel worker started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            permit = inner.wake.acquire() => {
                match permit {
                    Ok(permit) => permit.forget(),
                    Err(_) => break,
                }
                if token.is_cancelled() {
                    break;
                }
                inner.process_next(&token);
            }

            _ = tokio::time::sleep(inner.config.wake_timeout) => {
                tracing::trace!("Channel worker idle");
            }
        }
    }

    tracing::debug!("Channel worker stopped");
}

#[derive(Default)]
struct Worker {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Bounded-queue sample pipeline for one client.
pub struct ChannelGenerator {
    inner: Arc<Inner>,
    worker: Mutex<Worker>,
}

impl ChannelGenerator {
    pub fn new(config: ChannelConfig, sink: Weak<dyn SampleSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity.min(1024))),
                config,
                wake: Semaphore::new(0),
                dsp: Mutex::new(DspState::default()),
                sink,
                stats: ChannelStats::default(),
            }),
            worker: Mutex::new(Worker::default()),
        }
    }

    /// Queues a block for the worker. Never blocks on DSP state.
    ///
    /// Returns `false` if the queue was full and the block was dropped.
    pub fn push_samples(&self, block: SampleBlock) -> bool {
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.config.queue_capacity {
            drop(queue);
            let dropped = self.inner.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 1024 == 0 {
                tracing::debug!(dropped, "Sample queue full, dropping block");
            }
            return false;
        }

        queue.push_back(block);
        self.inner.wake.add_permits(1);
        self.inner.stats.blocks_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Reconfigures the DSP chains and starts or stops the worker to match
    /// `settings.streaming`.
    ///
    /// Streaming with neither IQ nor FFT selected is rejected before
    /// anything changes.
    pub fn update_settings(
        &self,
        settings: &ChannelSettings,
        tuning: DeviceTuning,
    ) -> Result<(), ChannelError> {
        if settings.streaming && !settings.mode.has_iq() && !settings.mode.has_fft() {
            return Err(ChannelError::NoTranslator);
        }

        self.inner
            .dsp
            .lock()
            .reconfigure(settings, tuning, &self.inner.config);
        tracing::debug!(
            streaming = settings.streaming,
            mode = settings.mode.bits(),
            "Channel settings updated"
        );

        if settings.streaming {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    /// Starts the worker if it is not running.
    pub fn start(&self) -> Result<(), ChannelError> {
        let mut worker = self.worker.lock();
        if worker.token.is_some() {
            return Ok(());
        }
        if self.inner.dsp.lock().is_empty() {
            return Err(ChannelError::NoTranslator);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        tracing::info!("Starting channel generator");
        self.inner.drain();
        let token = CancellationToken::new();
        let previous = worker.handle.take();
        worker.handle = Some(runtime.spawn(run_worker(
            self.inner.clone(),
            token.clone(),
            previous,
        )));
        worker.token = Some(token);
        Ok(())
    }

    /// Signals the worker to stop and drains the queue. Returns immediately.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        if let Some(token) = worker.token.take() {
            tracing::info!("Stopping channel generator");
            token.cancel();
            self.inner.drain();
        }
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            if let Some(token) = worker.token.take() {
                token.cancel();
                self.inner.drain();
            }
            worker.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().token.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.inner.stats
    }
}

impl Drop for ChannelGenerator {
    fn drop(&mut self) {
        if let Some(token) = self.worker.get_mut().token.take() {
            token.cancel();
        }
    }
}
