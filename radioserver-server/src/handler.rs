//! Command handlers.

use crate::client::{ClientState, Outbound};
use crate::error::ServerError;
use crate::state::ServerState;
use radioserver_core::SettingError;
use radioserver_protocol::message::{encode_timestamp, ReadSetting};
use radioserver_protocol::{Command, MessageType, SettingId, Version};
use std::sync::Arc;

/// Command handler.
///
/// Setting rejections are answered by silence: they are logged and counted
/// but never end the connection. Only a closed send queue is an error.
pub struct CommandHandler {
    state: Arc<ServerState>,
}

impl CommandHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Handles a decoded command for `client`.
    pub async fn handle(
        &self,
        client: &Arc<ClientState>,
        command: Command,
    ) -> Result<(), ServerError> {
        let command_type = command.command_type();
        tracing::debug!(client = %client.id(), "Command: {}", command_type.name());
        if let Some(metrics) = self.state.metrics() {
            metrics
                .commands_total
                .with_label_values(&[command_type.name()])
                .inc();
        }

        match command {
            Command::Hello { version, name } => self.handle_hello(client, version, name).await,
            Command::GetSetting { setting } => self.handle_get_setting(client, setting).await,
            Command::SetSetting { setting, args } => {
                self.handle_set_setting(client, setting, &args).await
            }
            Command::Ping { timestamp } => self.handle_ping(client, timestamp).await,
        }
    }

    async fn handle_hello(
        &self,
        client: &Arc<ClientState>,
        version: Version,
        name: String,
    ) -> Result<(), ServerError> {
        tracing::info!(client = %client.id(), "Hello from '{}' (protocol {})", name, version);
        client.record_hello(version, name);

        client
            .send(Outbound::status(
                MessageType::DeviceInfo,
                self.state.device_info().encode(),
            ))
            .await?;
        client.send(self.state.sync_message(client)).await
    }

    /// Replies with the current value, or a status of "unknown setting" or
    /// "malformed" (no setting id in the body).
    async fn handle_get_setting(
        &self,
        client: &Arc<ClientState>,
        raw: Option<u32>,
    ) -> Result<(), ServerError> {
        let Some(raw) = raw else {
            tracing::debug!(client = %client.id(), "Get setting without a setting id");
            return client
                .send(Outbound::status(
                    MessageType::ReadSetting,
                    ReadSetting::malformed().encode(),
                ))
                .await;
        };
        let reply = match SettingId::try_from(raw) {
            Ok(SettingId::Gain) => ReadSetting::ok(SettingId::Gain, self.state.frontend().gain() as u32),
            Ok(setting) => match client.settings().value(setting) {
                Some(value) => ReadSetting::ok(setting, value),
                None => ReadSetting::unknown(raw),
            },
            Err(_) => {
                tracing::debug!(client = %client.id(), "Get of unknown setting {}", raw);
                ReadSetting::unknown(raw)
            }
        };
        client
            .send(Outbound::status(MessageType::ReadSetting, reply.encode()))
            .await
    }

    async fn handle_set_setting(
        &self,
        client: &Arc<ClientState>,
        raw: u32,
        args: &[u32],
    ) -> Result<(), ServerError> {
        let result = SettingId::try_from(raw)
            .map_err(SettingError::UnknownSetting)
            .and_then(|setting| self.apply_setting(client, setting, args).map(|_| setting));

        let setting = match result {
            Ok(setting) => setting,
            Err(e) => {
                tracing::warn!(client = %client.id(), "Setting {} rejected: {}", raw, e);
                if let Some(metrics) = self.state.metrics() {
                    metrics
                        .settings_rejected_total
                        .with_label_values(&[e.reason()])
                        .inc();
                }
                return Ok(());
            }
        };

        tracing::debug!(client = %client.id(), ?args, "{} updated", setting.name());
        client.send(self.state.sync_message(client)).await?;
        if setting.affects_global() {
            self.state.broadcast_sync(client.id());
        }
        Ok(())
    }

    fn apply_setting(
        &self,
        client: &ClientState,
        setting: SettingId,
        args: &[u32],
    ) -> Result<(), SettingError> {
        if setting == SettingId::Gain {
            return self.state.set_gain(args);
        }
        client.apply_setting(setting, args, self.state.limits(), self.state.tuning())
    }

    async fn handle_ping(
        &self,
        client: &Arc<ClientState>,
        timestamp: i64,
    ) -> Result<(), ServerError> {
        let server_timestamp = client.record_ping(timestamp);
        client
            .send(Outbound::status(
                MessageType::Pong,
                encode_timestamp(server_timestamp),
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radioserver_core::{ChannelConfig, Frontend, SimulatedFrontend};
    use radioserver_protocol::{ClientSync, DeviceInfo, StreamFormat, SERVER_VERSION};
    use tokio::sync::mpsc;

    struct Fixture {
        handler: CommandHandler,
        frontend: Arc<SimulatedFrontend>,
    }

    impl Fixture {
        fn new(can_control: bool) -> Self {
            let frontend = Arc::new(SimulatedFrontend::default());
            let state = ServerState::new(
                frontend.clone(),
                can_control,
                ChannelConfig::default(),
                None,
            );
            Self {
                handler: CommandHandler::new(state),
                frontend,
            }
        }

        fn connect(&self) -> (Arc<ClientState>, mpsc::Receiver<Outbound>) {
            let (tx, rx) = mpsc::channel(64);
            let state = self.handler.state();
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
    }

    async fn set(handler: &CommandHandler, client: &Arc<ClientState>, setting: u32, args: &[u32]) {
        handler
            .handle(
                client,
                Command::SetSetting {
                    setting,
                    args: args.to_vec(),
                },
            )
            .await
            .unwrap();
    }

    fn next_sync(rx: &mut mpsc::Receiver<Outbound>) -> Option<ClientSync> {
        let message = rx.try_recv().ok()?;
        assert_eq!(message.message_type, MessageType::ClientSync);
        Some(ClientSync::decode(&message.body).unwrap())
    }

    #[tokio::test]
    async fn test_hello_sends_device_info_then_sync() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();

        fixture
            .handler
            .handle(
                &client,
                Command::Hello {
                    version: SERVER_VERSION,
                    name: "test".to_string(),
                },
            )
            .await
            .unwrap();

        let info = rx.try_recv().unwrap();
        assert_eq!(info.message_type, MessageType::DeviceInfo);
        let info = DeviceInfo::decode(&info.body).unwrap();
        assert_eq!(info.decimation_stage_count, 8);

        let sync = next_sync(&mut rx).unwrap();
        assert_eq!(sync.can_control, 1);
        assert_eq!(sync.device_center_frequency, 100_000_000);
        assert!(rx.try_recv().is_err());

        let hello = client.hello().unwrap();
        assert_eq!(hello.name, "test");
        assert_eq!(hello.version, SERVER_VERSION);
    }

    #[tokio::test]
    async fn test_unknown_setting_changes_nothing() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();
        let before = client.settings();

        set(&fixture.handler, &client, 999, &[1]).await;
        set(&fixture.handler, &client, 3, &[1]).await;

        assert_eq!(client.settings(), before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_display_pixels_bounds() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();
        let pixels = SettingId::FftDisplayPixels.as_u32();

        set(&fixture.handler, &client, pixels, &[50]).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(client.settings().fft_display_pixels, 2000);

        set(&fixture.handler, &client, pixels, &[1024]).await;
        assert!(next_sync(&mut rx).is_some());
        assert_eq!(client.settings().fft_display_pixels, 1024);
    }

    #[tokio::test]
    async fn test_decimation_bounds() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();
        let decimation = SettingId::IqDecimation.as_u32();

        for stage in 0..=8 {
            set(&fixture.handler, &client, decimation, &[stage]).await;
            assert!(next_sync(&mut rx).is_some(), "stage {} rejected", stage);
        }
        set(&fixture.handler, &client, decimation, &[9]).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(client.settings().iq_decimation, 8);
    }

    #[tokio::test]
    async fn test_frequency_change_moves_sync_span() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();

        set(
            &fixture.handler,
            &client,
            SettingId::IqFrequency.as_u32(),
            &[101_000_000],
        )
        .await;
        let sync = next_sync(&mut rx).unwrap();
        assert_eq!(sync.iq_center_frequency, 101_000_000);
        assert_eq!(sync.minimum_iq_center_frequency, 99_800_000);
        assert_eq!(sync.maximum_iq_center_frequency, 102_200_000);
    }

    #[tokio::test]
    async fn test_gain_reaches_other_clients() {
        let fixture = Fixture::new(true);
        let (a, mut a_rx) = fixture.connect();
        let (_b, mut b_rx) = fixture.connect();

        set(&fixture.handler, &a, SettingId::Gain.as_u32(), &[10]).await;
        assert_eq!(fixture.frontend.gain(), 10);
        assert_eq!(next_sync(&mut a_rx).unwrap().gain, 10);

        let message = tokio::time::timeout(std::time::Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ClientSync::decode(&message.body).unwrap().gain, 10);
    }

    #[tokio::test]
    async fn test_gain_requires_control() {
        let fixture = Fixture::new(false);
        let (client, mut rx) = fixture.connect();

        set(&fixture.handler, &client, SettingId::Gain.as_u32(), &[10]).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(fixture.frontend.gain(), 8);
    }

    #[tokio::test]
    async fn test_get_setting() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();
        set(
            &fixture.handler,
            &client,
            SettingId::IqFormat.as_u32(),
            &[StreamFormat::Int16.as_u32()],
        )
        .await;
        next_sync(&mut rx).unwrap();

        for (raw, expected) in [
            (Some(SettingId::IqFormat.as_u32()), ReadSetting::ok(SettingId::IqFormat, 2)),
            (Some(SettingId::Gain.as_u32()), ReadSetting::ok(SettingId::Gain, 8)),
            (Some(77), ReadSetting::unknown(77)),
            (None, ReadSetting::malformed()),
        ] {
            fixture
                .handler
                .handle(&client, Command::GetSetting { setting: raw })
                .await
                .unwrap();
            let message = rx.try_recv().unwrap();
            assert_eq!(message.message_type, MessageType::ReadSetting);
            assert_eq!(ReadSetting::decode(&message.body).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let fixture = Fixture::new(true);
        let (client, mut rx) = fixture.connect();

        fixture
            .handler
            .handle(&client, Command::Ping { timestamp: 42 })
            .await
            .unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.message_type, MessageType::Pong);
        let server_ts = radioserver_protocol::message::decode_timestamp(&message.body).unwrap();
        let record = client.last_ping().unwrap();
        assert_eq!(record.server_timestamp, server_ts);
        assert_eq!(record.client_timestamp, 42);
    }
}
