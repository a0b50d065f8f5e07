//! Per-connection client state.

use crate::error::ServerError;
use crate::metrics::Metrics;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use radioserver_core::{
    ChannelConfig, ChannelGenerator, ChannelSettings, DeviceLimits, DeviceTuning, SampleBlock,
    SampleFrame, SampleSink, SettingError,
};
use radioserver_protocol::{MessageType, SettingId, Segments, StreamMode, Version};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// A message waiting for the connection's writer task.
///
/// The writer adds the header; sequence numbers are assigned in the order
/// messages leave the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub message_type: MessageType,
    pub stream_type: u32,
    pub body: Bytes,
}

impl Outbound {
    /// A status message (stream type 0).
    pub fn status(message_type: MessageType, body: Bytes) -> Self {
        Self {
            message_type,
            stream_type: StreamMode::STATUS,
            body,
        }
    }
}

/// Client statistics.
#[derive(Debug, Default)]
pub struct ClientStats {
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub messages_sent: AtomicU64,
    pub commands_received: AtomicU64,
    /// Messages discarded because the send queue was full.
    pub messages_dropped: AtomicU64,
}

/// What the client announced in HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: Version,
    pub name: String,
}

/// Timestamps of the last ping, in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRecord {
    pub client_timestamp: i64,
    pub server_timestamp: i64,
}

impl PingRecord {
    /// Server clock minus client clock, including the one-way latency.
    pub fn offset(&self) -> i64 {
        self.server_timestamp.saturating_sub(self.client_timestamp)
    }
}

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// State of one connected client.
pub struct ClientState {
    id: Uuid,
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    settings: Mutex<ChannelSettings>,
    generator: ChannelGenerator,
    hello: Mutex<Option<ClientHello>>,
    ping: Mutex<Option<PingRecord>>,
    stats: ClientStats,
    metrics: Option<Arc<Metrics>>,
}

impl ClientState {
    /// Creates the client with default settings centered on the device.
    ///
    /// The channel generator holds a weak reference back to the client, so
    /// dropping the last `Arc` ends sample delivery.
    pub fn new(
        addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
        channel_config: ChannelConfig,
        device_center_frequency: u32,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ClientState>| {
            let sink: Weak<dyn SampleSink> = weak.clone();
            Self {
                id: Uuid::new_v4(),
                addr,
                connected_at: Utc::now(),
                outbound,
                settings: Mutex::new(ChannelSettings::new(device_center_frequency)),
                generator: ChannelGenerator::new(channel_config, sink),
                hello: Mutex::new(None),
                ping: Mutex::new(None),
                stats: ClientStats::default(),
                metrics,
            }
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Snapshot of the current channel settings.
    pub fn settings(&self) -> ChannelSettings {
        self.settings.lock().clone()
    }

    /// Validates and applies a channel setting.
    ///
    /// The change is made on a copy and committed only after the channel
    /// generator accepted it; the settings lock is held throughout so the
    /// generator never sees a half-applied update.
    pub fn apply_setting(
        &self,
        setting: SettingId,
        args: &[u32],
        limits: &DeviceLimits,
        tuning: DeviceTuning,
    ) -> Result<(), SettingError> {
        let mut settings = self.settings.lock();
        let mut candidate = settings.clone();
        candidate.apply(setting, args, limits)?;
        self.generator.update_settings(&candidate, tuning)?;
        *settings = candidate;
        Ok(())
    }

    /// Whether the channel worker is running.
    pub fn is_streaming(&self) -> bool {
        self.generator.is_running()
    }

    /// Hands a raw sample block to the channel generator.
    pub fn push_samples(&self, block: SampleBlock) -> bool {
        self.generator.push_samples(block)
    }

    pub fn generator(&self) -> &ChannelGenerator {
        &self.generator
    }

    pub fn record_hello(&self, version: Version, name: String) {
        *self.hello.lock() = Some(ClientHello { version, name });
    }

    pub fn hello(&self) -> Option<ClientHello> {
        self.hello.lock().clone()
    }

    /// Stores a ping and returns the server timestamp to answer with.
    pub fn record_ping(&self, client_timestamp: i64) -> i64 {
        let record = PingRecord {
            client_timestamp,
            server_timestamp: now_nanos(),
        };
        *self.ping.lock() = Some(record);
        record.server_timestamp
    }

    pub fn last_ping(&self) -> Option<PingRecord> {
        *self.ping.lock()
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Queues a message, waiting for room in the send queue.
    pub async fn send(&self, message: Outbound) -> Result<(), ServerError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ServerError::ConnectionClosed)
    }

    /// Stops the channel worker and waits for it to exit.
    pub async fn shutdown(&self) {
        self.generator.shutdown().await;
    }

    fn stream_label(stream_type: u32) -> &'static str {
        match stream_type {
            StreamMode::IQ => "iq",
            StreamMode::FFT => "fft",
            StreamMode::AF => "af",
            _ => "status",
        }
    }
}

impl SampleSink for ClientState {
    /// Queues an encoded frame without waiting, split into segments that
    /// fit the maximum body size. A full queue drops the rest of the frame.
    fn send_samples(&self, frame: SampleFrame) {
        let label = Self::stream_label(frame.stream_type);
        for segment in Segments::new(frame.body) {
            let message = Outbound {
                message_type: frame.message_type,
                stream_type: frame.stream_type,
                body: segment,
            };
            match self.outbound.try_send(message) {
                Ok(()) => {
                    if let Some(ref metrics) = self.metrics {
                        metrics.frames_sent_total.with_label_values(&[label]).inc();
                    }
                }
                Err(TrySendError::Full(_)) => {
                    let dropped = self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 1024 == 0 {
                        tracing::debug!(client = %self.id, dropped, "Send queue full, dropping samples");
                    }
                    if let Some(ref metrics) = self.metrics {
                        metrics.outbound_dropped_total.inc();
                    }
                    return;
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientState")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radioserver_protocol::{StreamFormat, MAX_BODY_SIZE};

    fn limits() -> DeviceLimits {
        DeviceLimits {
            minimum_frequency: 24_000_000,
            maximum_frequency: 1_766_000_000,
            decimation_stages: 8,
            maximum_gain_index: 16,
            can_control: true,
        }
    }

    fn tuning() -> DeviceTuning {
        DeviceTuning {
            center_frequency: 100_000_000,
            sample_rate: 2_400_000,
        }
    }

    fn client(capacity: usize) -> (Arc<ClientState>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let client = ClientState::new(
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            ChannelConfig::default(),
            100_000_000,
            None,
        );
        (client, rx)
    }

    #[test]
    fn test_rejected_setting_keeps_state() {
        let (client, _rx) = client(8);
        let before = client.settings();

        assert!(client
            .apply_setting(SettingId::IqDecimation, &[9], &limits(), tuning())
            .is_err());
        assert!(client
            .apply_setting(SettingId::FftDisplayPixels, &[], &limits(), tuning())
            .is_err());
        assert_eq!(client.settings(), before);

        client
            .apply_setting(SettingId::IqDecimation, &[8], &limits(), tuning())
            .unwrap();
        assert_eq!(client.settings().iq_decimation, 8);
    }

    #[tokio::test]
    async fn test_streaming_follows_settings() {
        let (client, _rx) = client(8);
        client
            .apply_setting(SettingId::IqFormat, &[StreamFormat::Int16.as_u32()], &limits(), tuning())
            .unwrap();
        client
            .apply_setting(SettingId::StreamingEnabled, &[1], &limits(), tuning())
            .unwrap();
        assert!(client.is_streaming());
        assert!(client.settings().streaming);

        client
            .apply_setting(SettingId::StreamingEnabled, &[0], &limits(), tuning())
            .unwrap();
        assert!(!client.is_streaming());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_af_only_streaming_is_rejected() {
        let (client, _rx) = client(8);
        client
            .apply_setting(SettingId::StreamingMode, &[StreamMode::AF], &limits(), tuning())
            .unwrap();
        let err = client
            .apply_setting(SettingId::StreamingEnabled, &[1], &limits(), tuning())
            .unwrap_err();
        assert_eq!(err.reason(), "channel");
        assert!(!client.settings().streaming);
        assert!(!client.is_streaming());
    }

    #[test]
    fn test_large_frames_are_segmented() {
        let (client, mut rx) = client(8);
        let size = MAX_BODY_SIZE as usize * 2 + 10;
        client.send_samples(SampleFrame {
            message_type: MessageType::FloatIq,
            stream_type: StreamMode::IQ,
            body: Bytes::from(vec![0u8; size]),
        });

        let sizes: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| {
                assert_eq!(m.message_type, MessageType::FloatIq);
                assert_eq!(m.stream_type, StreamMode::IQ);
                m.body.len()
            })
            .collect();
        assert_eq!(
            sizes,
            vec![MAX_BODY_SIZE as usize, MAX_BODY_SIZE as usize, 10]
        );
    }

    #[test]
    fn test_full_queue_drops_samples() {
        let (client, mut rx) = client(2);
        for _ in 0..5 {
            client.send_samples(SampleFrame {
                message_type: MessageType::Uint8Iq,
                stream_type: StreamMode::IQ,
                body: Bytes::from_static(&[1, 2]),
            });
        }
        assert_eq!(client.stats().messages_dropped.load(Ordering::Relaxed), 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ping_record() {
        let (client, _rx) = client(1);
        assert!(client.last_ping().is_none());
        let server_ts = client.record_ping(1_000);
        let record = client.last_ping().unwrap();
        assert_eq!(record.client_timestamp, 1_000);
        assert_eq!(record.server_timestamp, server_ts);
        assert_eq!(record.offset(), server_ts - 1_000);
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (client, rx) = client(1);
        drop(rx);
        let err = client
            .send(Outbound::status(MessageType::Pong, Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::ConnectionClosed));
    }
}
