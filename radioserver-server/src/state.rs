//! Shared server state: the front-end and the registry of connected clients.

use crate::client::{ClientState, Outbound};
use crate::metrics::Metrics;
use dashmap::DashMap;
use radioserver_core::{
    ChannelConfig, ChannelSettings, DeviceLimits, DeviceTuning, Frontend, SampleBlock,
    SettingError,
};
use radioserver_protocol::{ClientSync, DeviceInfo, MessageType, SettingId};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Context object shared by the accept loop and every connection.
pub struct ServerState {
    frontend: Arc<dyn Frontend>,
    device_info: DeviceInfo,
    limits: DeviceLimits,
    channel_config: ChannelConfig,
    clients: DashMap<Uuid, Arc<ClientState>>,
    metrics: Option<Arc<Metrics>>,
}

impl ServerState {
    /// Creates the state and registers it as the front-end's sample callback.
    ///
    /// The callback holds a weak reference, so the front-end never keeps the
    /// state alive.
    pub fn new(
        frontend: Arc<dyn Frontend>,
        can_control: bool,
        channel_config: ChannelConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        let device_info = frontend.device_info();
        let limits = DeviceLimits {
            minimum_frequency: device_info.minimum_frequency,
            maximum_frequency: device_info.maximum_frequency,
            decimation_stages: device_info.decimation_stage_count,
            maximum_gain_index: device_info.maximum_gain_index,
            can_control,
        };

        let state = Arc::new(Self {
            frontend,
            device_info,
            limits,
            channel_config,
            clients: DashMap::new(),
            metrics,
        });

        let weak: Weak<ServerState> = Arc::downgrade(&state);
        state.frontend.set_samples_callback(Box::new(move |block| {
            if let Some(state) = weak.upgrade() {
                state.push_samples(block);
            }
        }));

        state
    }

    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device_info
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn can_control(&self) -> bool {
        self.limits.can_control
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        &self.channel_config
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Current device center frequency and sample rate.
    pub fn tuning(&self) -> DeviceTuning {
        DeviceTuning {
            center_frequency: self.frontend.center_frequency(),
            sample_rate: self.frontend.sample_rate(),
        }
    }

    pub fn register(&self, client: Arc<ClientState>) {
        tracing::debug!(client = %client.id(), addr = %client.addr(), "Client registered");
        self.clients.insert(client.id(), client);
    }

    pub fn deregister(&self, id: &Uuid) -> Option<Arc<ClientState>> {
        let removed = self.clients.remove(id).map(|(_, client)| client);
        if removed.is_some() {
            tracing::debug!(client = %id, "Client deregistered");
        }
        removed
    }

    pub fn client(&self, id: &Uuid) -> Option<Arc<ClientState>> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Fans a front-end block out to every streaming client.
    ///
    /// Runs on the front-end's producer thread; each push is O(1).
    pub fn push_samples(&self, block: SampleBlock) {
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.is_streaming() {
                continue;
            }
            if !client.push_samples(block.clone()) {
                if let Some(ref metrics) = self.metrics {
                    metrics.blocks_dropped_total.inc();
                }
            }
        }
    }

    /// Builds the synchronization message for a client's settings.
    ///
    /// Both spans are the channel center ± half the device sample rate,
    /// saturating at the `u32` bounds.
    pub fn client_sync(&self, settings: &ChannelSettings) -> ClientSync {
        let tuning = self.tuning();
        let half_rate = tuning.sample_rate / 2;
        ClientSync {
            can_control: self.limits.can_control as u32,
            gain: self.frontend.gain() as u32,
            device_center_frequency: tuning.center_frequency,
            iq_center_frequency: settings.iq_center_frequency,
            fft_center_frequency: settings.fft_center_frequency,
            minimum_iq_center_frequency: settings.iq_center_frequency.saturating_sub(half_rate),
            maximum_iq_center_frequency: settings.iq_center_frequency.saturating_add(half_rate),
            minimum_fft_center_frequency: settings.fft_center_frequency.saturating_sub(half_rate),
            maximum_fft_center_frequency: settings.fft_center_frequency.saturating_add(half_rate),
        }
    }

    /// The sync message for `client`, ready to queue.
    pub fn sync_message(&self, client: &ClientState) -> Outbound {
        let sync = self.client_sync(&client.settings());
        Outbound::status(MessageType::ClientSync, sync.encode())
    }

    /// Changes the device gain on behalf of a client.
    pub fn set_gain(&self, args: &[u32]) -> Result<(), SettingError> {
        let gain = args
            .first()
            .copied()
            .ok_or(SettingError::MissingArgument(SettingId::Gain))?;
        if !self.limits.can_control {
            return Err(SettingError::NotPermitted(SettingId::Gain));
        }
        // Front-end gain indices are u8 whatever the device reports.
        let max = self.limits.maximum_gain_index.min(u8::MAX as u32);
        let index = u8::try_from(gain)
            .ok()
            .filter(|&index| index as u32 <= max)
            .ok_or(SettingError::OutOfRange {
                setting: SettingId::Gain,
                value: gain as i64,
                min: 0,
                max: max as i64,
            })?;
        self.frontend.set_gain(index)?;
        tracing::info!(gain, "Device gain changed");
        Ok(())
    }

    /// Sends a fresh sync to every client except `origin`.
    ///
    /// Runs on its own task so the originating client is not held up by
    /// slow peers.
    pub fn broadcast_sync(self: &Arc<Self>, origin: Uuid) {
        let state = self.clone();
        tokio::spawn(async move {
            let clients: Vec<Arc<ClientState>> = state
                .clients
                .iter()
                .filter(|entry| *entry.key() != origin)
                .map(|entry| entry.value().clone())
                .collect();

            for client in clients {
                let message = state.sync_message(&client);
                if client.send(message).await.is_err() {
                    tracing::debug!(client = %client.id(), "Sync broadcast to closed client");
                }
            }
        });
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("device", &self.frontend.name())
            .field("limits", &self.limits)
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radioserver_core::{SimulatedConfig, SimulatedFrontend};
    use radioserver_protocol::StreamFormat;
    use tokio::sync::mpsc;

    fn setup(can_control: bool) -> (Arc<SimulatedFrontend>, Arc<ServerState>) {
        let frontend = Arc::new(SimulatedFrontend::new(SimulatedConfig {
            block_size: 1024,
            ..SimulatedConfig::default()
        }));
        let state = ServerState::new(
            frontend.clone(),
            can_control,
            ChannelConfig::default(),
            None,
        );
        (frontend, state)
    }

    fn add_client(state: &ServerState) -> (Arc<ClientState>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(64);
        let client = ClientState::new(
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            state.channel_config().clone(),
            state.tuning().center_frequency,
            None,
        );
        state.register(client.clone());
        (client, rx)
    }

    #[test]
    fn test_limits_from_device() {
        let (_frontend, state) = setup(true);
        assert_eq!(state.limits().decimation_stages, 8);
        assert_eq!(state.limits().maximum_gain_index, 16);
        assert_eq!(state.device_info().minimum_frequency, 24_000_000);
        assert!(state.can_control());
    }

    #[test]
    fn test_client_sync_spans() {
        let (_frontend, state) = setup(true);
        let mut settings = ChannelSettings::new(100_000_000);
        settings.fft_center_frequency = 1_000_000;

        let sync = state.client_sync(&settings);
        assert_eq!(sync.can_control, 1);
        assert_eq!(sync.gain, 8);
        assert_eq!(sync.device_center_frequency, 100_000_000);
        assert_eq!(sync.minimum_iq_center_frequency, 98_800_000);
        assert_eq!(sync.maximum_iq_center_frequency, 101_200_000);
        assert_eq!(sync.minimum_fft_center_frequency, 0);
        assert_eq!(sync.maximum_fft_center_frequency, 2_200_000);
    }

    #[test]
    fn test_set_gain() {
        let (frontend, state) = setup(true);
        state.set_gain(&[10]).unwrap();
        assert_eq!(frontend.gain(), 10);

        assert!(matches!(
            state.set_gain(&[17]),
            Err(SettingError::OutOfRange { .. })
        ));
        assert!(matches!(
            state.set_gain(&[]),
            Err(SettingError::MissingArgument(SettingId::Gain))
        ));
        assert_eq!(frontend.gain(), 10);

        let (frontend, state) = setup(false);
        assert!(matches!(
            state.set_gain(&[3]),
            Err(SettingError::NotPermitted(SettingId::Gain))
        ));
        assert_eq!(frontend.gain(), 8);
    }

    #[test]
    fn test_set_gain_beyond_u8() {
        let frontend = Arc::new(SimulatedFrontend::new(SimulatedConfig {
            max_gain_index: 300,
            ..SimulatedConfig::default()
        }));
        let state = ServerState::new(frontend.clone(), true, ChannelConfig::default(), None);
        assert_eq!(state.limits().maximum_gain_index, 300);

        state.set_gain(&[255]).unwrap();
        assert_eq!(frontend.gain(), 255);

        // 256 and 257 would wrap to 0 and 1 if narrowed blindly.
        for gain in [256, 257, 300] {
            match state.set_gain(&[gain]) {
                Err(SettingError::OutOfRange { value, max, .. }) => {
                    assert_eq!(value, gain as i64);
                    assert_eq!(max, 255);
                }
                other => panic!("expected OutOfRange for {}, got {:?}", gain, other),
            }
        }
        assert_eq!(frontend.gain(), 255);
    }

    #[test]
    fn test_register_deregister() {
        let (_frontend, state) = setup(true);
        let (client, _rx) = add_client(&state);
        assert_eq!(state.client_count(), 1);
        assert!(state.client(&client.id()).is_some());

        assert!(state.deregister(&client.id()).is_some());
        assert!(state.deregister(&client.id()).is_none());
        assert_eq!(state.client_count(), 0);
    }

    #[tokio::test]
    async fn test_samples_reach_streaming_clients_only() {
        let (frontend, state) = setup(true);
        let (streaming, mut streaming_rx) = add_client(&state);
        let (idle, _idle_rx) = add_client(&state);

        let limits = *state.limits();
        streaming
            .apply_setting(
                SettingId::IqFormat,
                &[StreamFormat::Float.as_u32()],
                &limits,
                state.tuning(),
            )
            .unwrap();
        streaming
            .apply_setting(SettingId::StreamingEnabled, &[1], &limits, state.tuning())
            .unwrap();

        frontend.emit_block();

        let message = tokio::time::timeout(std::time::Duration::from_secs(5), streaming_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.message_type, MessageType::FloatIq);
        assert_eq!(message.body.len(), 1024 * 8);
        assert_eq!(idle.generator().stats().blocks_pushed.load(std::sync::atomic::Ordering::Relaxed), 0);

        streaming.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin() {
        let (_frontend, state) = setup(true);
        let (origin, mut origin_rx) = add_client(&state);
        let (_other, mut other_rx) = add_client(&state);

        state.set_gain(&[12]).unwrap();
        state.broadcast_sync(origin.id());

        let message = tokio::time::timeout(std::time::Duration::from_secs(5), other_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.message_type, MessageType::ClientSync);
        let sync = ClientSync::decode(&message.body).unwrap();
        assert_eq!(sync.gain, 12);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(origin_rx.try_recv().is_err());
    }
}
