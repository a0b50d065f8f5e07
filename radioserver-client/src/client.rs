//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, Message};
use crate::error::ClientError;
use radioserver_protocol::message::decode_timestamp;
use radioserver_protocol::{
    ClientSync, Command, DeviceInfo, MessageType, ReadSetting, SettingId, SERVER_VERSION,
};
use std::time::{Duration, Instant};

/// Name sent in HELLO when the configuration has none.
pub const DEFAULT_CLIENT_NAME: &str = "radioserver-client";

/// Result of a ping round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResult {
    /// Server clock when the ping was handled, in nanoseconds.
    pub server_timestamp: i64,
    pub round_trip: Duration,
}

/// High-level client for radioserver.
pub struct Client {
    conn: Connection,
    device_info: Option<DeviceInfo>,
    last_sync: Option<ClientSync>,
}

impl Client {
    /// Connects to the server. The handshake is sent by [`Client::hello`].
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self {
            conn: Connection::connect(config).await?,
            device_info: None,
            last_sync: None,
        })
    }

    /// Returns the underlying connection.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Device capabilities received during the handshake.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device_info
    }

    /// Most recent synchronization message.
    pub fn last_sync(&self) -> Option<ClientSync> {
        self.last_sync
    }

    /// Performs the handshake and returns the device info and first sync.
    pub async fn hello(&mut self) -> Result<(DeviceInfo, ClientSync), ClientError> {
        let name = self
            .conn
            .config()
            .client_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());
        self.conn
            .send(&Command::Hello {
                version: SERVER_VERSION,
                name,
            })
            .await?;

        let message = self.conn.read_until(MessageType::DeviceInfo).await?;
        let device_info = DeviceInfo::decode(&message.body)?;
        self.device_info = Some(device_info);
        let sync = self.wait_sync().await?;

        tracing::debug!(
            "Handshake complete: device type {}, {} decimation stages",
            device_info.device_type,
            device_info.decimation_stage_count
        );
        Ok((device_info, sync))
    }

    /// Sends a setting change without waiting for the outcome.
    ///
    /// A rejected change produces no reply.
    pub async fn send_setting(&mut self, setting: SettingId, args: &[u32]) -> Result<(), ClientError> {
        self.conn
            .send(&Command::SetSetting {
                setting: setting.as_u32(),
                args: args.to_vec(),
            })
            .await
    }

    /// Changes a setting and waits for the sync that confirms it.
    ///
    /// Times out when the server rejects the change.
    pub async fn set_setting(
        &mut self,
        setting: SettingId,
        args: &[u32],
    ) -> Result<ClientSync, ClientError> {
        self.ensure_handshake()?;
        self.send_setting(setting, args).await?;
        self.wait_sync().await
    }

    /// Waits for the next synchronization message.
    pub async fn wait_sync(&mut self) -> Result<ClientSync, ClientError> {
        let message = self.conn.read_until(MessageType::ClientSync).await?;
        let sync = ClientSync::decode(&message.body)?;
        self.last_sync = Some(sync);
        Ok(sync)
    }

    /// Reads the current value of a setting.
    pub async fn get_setting(&mut self, setting: SettingId) -> Result<ReadSetting, ClientError> {
        self.get_raw_setting(setting.as_u32()).await
    }

    /// Reads a setting by raw id; unknown ids come back with an error status.
    pub async fn get_raw_setting(&mut self, setting: u32) -> Result<ReadSetting, ClientError> {
        self.conn
            .send(&Command::GetSetting {
                setting: Some(setting),
            })
            .await?;
        let message = self.conn.read_until(MessageType::ReadSetting).await?;
        Ok(ReadSetting::decode(&message.body)?)
    }

    /// Pings the server.
    pub async fn ping(&mut self) -> Result<PingResult, ClientError> {
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let started = Instant::now();
        self.conn.send(&Command::Ping { timestamp }).await?;

        let message = self.conn.read_until(MessageType::Pong).await?;
        Ok(PingResult {
            server_timestamp: decode_timestamp(&message.body)?,
            round_trip: started.elapsed(),
        })
    }

    /// Waits for the next sample data message (IQ, AF or FFT).
    ///
    /// Syncs seen on the way update [`Client::last_sync`].
    pub async fn next_samples(&mut self) -> Result<Message, ClientError> {
        loop {
            let message = self
                .conn
                .read_matching(|message_type| {
                    matches!(message_type, Some(t) if t.is_sample_data() || t == MessageType::ClientSync)
                })
                .await?;
            if message.header.message_type == MessageType::ClientSync.as_u32() {
                self.last_sync = Some(ClientSync::decode(&message.body)?);
                continue;
            }
            return Ok(message);
        }
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    fn ensure_handshake(&self) -> Result<(), ClientError> {
        if self.device_info.is_none() {
            return Err(ClientError::NoHandshake);
        }
        Ok(())
    }
}
