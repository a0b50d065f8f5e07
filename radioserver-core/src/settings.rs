//! Per-client channel settings.
//!
//! Every mutator validates first and only then writes, so a rejected
//! request leaves the settings exactly as they were.

use crate::error::SettingError;
use radioserver_protocol::{
    SettingId, StreamFormat, StreamMode, DEFAULT_FFT_DB_RANGE, DEFAULT_FFT_DISPLAY_PIXELS,
    FFT_MAX_DB_OFFSET, FFT_MAX_DB_RANGE, FFT_MAX_DISPLAY_PIXELS, FFT_MIN_DB_RANGE,
    FFT_MIN_DISPLAY_PIXELS,
};

/// Device bounds that settings are validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub minimum_frequency: u32,
    pub maximum_frequency: u32,
    pub decimation_stages: u32,
    pub maximum_gain_index: u32,
    pub can_control: bool,
}

/// Current device tuning, read when translators are rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTuning {
    pub center_frequency: u32,
    pub sample_rate: u32,
}

/// Streaming state and channel parameters of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub streaming: bool,
    pub mode: StreamMode,

    pub iq_format: StreamFormat,
    pub iq_center_frequency: u32,
    pub iq_decimation: u32,

    pub fft_format: StreamFormat,
    pub fft_center_frequency: u32,
    pub fft_decimation: u32,
    pub fft_db_offset: i32,
    pub fft_db_range: u32,
    pub fft_display_pixels: u32,
}

fn check_range(setting: SettingId, value: i64, min: i64, max: i64) -> Result<(), SettingError> {
    if value < min || value > max {
        return Err(SettingError::OutOfRange {
            setting,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn parse_format(setting: SettingId, raw: u32) -> Result<StreamFormat, SettingError> {
    StreamFormat::from_u32(raw).ok_or(SettingError::OutOfRange {
        setting,
        value: raw as i64,
        min: StreamFormat::Invalid.as_u32() as i64,
        max: StreamFormat::Dint4.as_u32() as i64,
    })
}

impl ChannelSettings {
    /// Defaults for a new client: IQ only, not streaming, formats unset,
    /// both channels at the device center.
    pub fn new(center_frequency: u32) -> Self {
        Self {
            streaming: false,
            mode: StreamMode::iq_only(),
            iq_format: StreamFormat::Invalid,
            iq_center_frequency: center_frequency,
            iq_decimation: 0,
            fft_format: StreamFormat::Invalid,
            fft_center_frequency: center_frequency,
            fft_decimation: 0,
            fft_db_offset: 0,
            fft_db_range: DEFAULT_FFT_DB_RANGE,
            fft_display_pixels: DEFAULT_FFT_DISPLAY_PIXELS,
        }
    }

    pub fn set_streaming_mode(&mut self, bits: u32) -> Result<(), SettingError> {
        let mode = StreamMode::from_bits(bits).ok_or(SettingError::OutOfRange {
            setting: SettingId::StreamingMode,
            value: bits as i64,
            min: StreamMode::IQ as i64,
            max: (StreamMode::IQ | StreamMode::AF | StreamMode::FFT) as i64,
        })?;
        self.mode = mode;
        Ok(())
    }

    pub fn set_streaming_enabled(&mut self, enabled: bool) {
        self.streaming = enabled;
    }

    pub fn set_iq_format(&mut self, raw: u32) -> Result<(), SettingError> {
        self.iq_format = parse_format(SettingId::IqFormat, raw)?;
        Ok(())
    }

    pub fn set_iq_frequency(
        &mut self,
        frequency: u32,
        limits: &DeviceLimits,
    ) -> Result<(), SettingError> {
        check_range(
            SettingId::IqFrequency,
            frequency as i64,
            limits.minimum_frequency as i64,
            limits.maximum_frequency as i64,
        )?;
        self.iq_center_frequency = frequency;
        Ok(())
    }

    pub fn set_iq_decimation(&mut self, stage: u32, limits: &DeviceLimits) -> Result<(), SettingError> {
        check_range(
            SettingId::IqDecimation,
            stage as i64,
            0,
            limits.decimation_stages as i64,
        )?;
        self.iq_decimation = stage;
        Ok(())
    }

    pub fn set_fft_format(&mut self, raw: u32) -> Result<(), SettingError> {
        self.fft_format = parse_format(SettingId::FftFormat, raw)?;
        Ok(())
    }

    pub fn set_fft_frequency(
        &mut self,
        frequency: u32,
        limits: &DeviceLimits,
    ) -> Result<(), SettingError> {
        check_range(
            SettingId::FftFrequency,
            frequency as i64,
            limits.minimum_frequency as i64,
            limits.maximum_frequency as i64,
        )?;
        self.fft_center_frequency = frequency;
        Ok(())
    }

    pub fn set_fft_decimation(&mut self, stage: u32, limits: &DeviceLimits) -> Result<(), SettingError> {
        check_range(
            SettingId::FftDecimation,
            stage as i64,
            0,
            limits.decimation_stages as i64,
        )?;
        self.fft_decimation = stage;
        Ok(())
    }

    pub fn set_fft_db_offset(&mut self, offset: i32) -> Result<(), SettingError> {
        check_range(
            SettingId::FftDbOffset,
            offset as i64,
            -(FFT_MAX_DB_OFFSET as i64),
            FFT_MAX_DB_OFFSET as i64,
        )?;
        self.fft_db_offset = offset;
        Ok(())
    }

    pub fn set_fft_db_range(&mut self, range: u32) -> Result<(), SettingError> {
        check_range(
            SettingId::FftDbRange,
            range as i64,
            FFT_MIN_DB_RANGE as i64,
            FFT_MAX_DB_RANGE as i64,
        )?;
        self.fft_db_range = range;
        Ok(())
    }

    pub fn set_fft_display_pixels(&mut self, pixels: u32) -> Result<(), SettingError> {
        check_range(
            SettingId::FftDisplayPixels,
            pixels as i64,
            FFT_MIN_DISPLAY_PIXELS as i64,
            FFT_MAX_DISPLAY_PIXELS as i64,
        )?;
        self.fft_display_pixels = pixels;
        Ok(())
    }

    /// Applies a channel setting from its raw `SET_SETTING` arguments.
    ///
    /// Gain belongs to the shared device and is rejected here.
    pub fn apply(
        &mut self,
        setting: SettingId,
        args: &[u32],
        limits: &DeviceLimits,
    ) -> Result<(), SettingError> {
        let arg = args
            .first()
            .copied()
            .ok_or(SettingError::MissingArgument(setting))?;

        match setting {
            SettingId::StreamingMode => self.set_streaming_mode(arg),
            SettingId::StreamingEnabled => {
                self.set_streaming_enabled(arg == 1);
                Ok(())
            }
            SettingId::Gain => Err(SettingError::NotChannelSetting(setting)),
            SettingId::IqFormat => self.set_iq_format(arg),
            SettingId::IqFrequency => self.set_iq_frequency(arg, limits),
            SettingId::IqDecimation => self.set_iq_decimation(arg, limits),
            SettingId::FftFormat => self.set_fft_format(arg),
            SettingId::FftFrequency => self.set_fft_frequency(arg, limits),
            SettingId::FftDecimation => self.set_fft_decimation(arg, limits),
            SettingId::FftDbOffset => self.set_fft_db_offset(arg as i32),
            SettingId::FftDbRange => self.set_fft_db_range(arg),
            SettingId::FftDisplayPixels => self.set_fft_display_pixels(arg),
        }
    }

    /// Current value of a setting as sent in a `ReadSetting` reply.
    ///
    /// Returns `None` for gain, which is read from the device instead.
    pub fn value(&self, setting: SettingId) -> Option<u32> {
        Some(match setting {
            SettingId::StreamingMode => self.mode.bits(),
            SettingId::StreamingEnabled => self.streaming as u32,
            SettingId::Gain => return None,
            SettingId::IqFormat => self.iq_format.as_u32(),
            SettingId::IqFrequency => self.iq_center_frequency,
            SettingId::IqDecimation => self.iq_decimation,
            SettingId::FftFormat => self.fft_format.as_u32(),
            SettingId::FftFrequency => self.fft_center_frequency,
            SettingId::FftDecimation => self.fft_decimation,
            SettingId::FftDbOffset => self.fft_db_offset as u32,
            SettingId::FftDbRange => self.fft_db_range,
            SettingId::FftDisplayPixels => self.fft_display_pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            minimum_frequency: 24_000_000,
            maximum_frequency: 1_766_000_000,
            decimation_stages: 4,
            maximum_gain_index: 16,
            can_control: true,
        }
    }

    #[test]
    fn test_defaults() {
        let settings = ChannelSettings::new(100_000_000);
        assert!(!settings.streaming);
        assert!(settings.mode.has_iq());
        assert!(!settings.mode.has_fft());
        assert_eq!(settings.iq_format, StreamFormat::Invalid);
        assert_eq!(settings.fft_display_pixels, 2000);
        assert_eq!(settings.fft_db_range, 127);
        assert_eq!(settings.iq_center_frequency, 100_000_000);
    }

    #[test]
    fn test_display_pixels_bounds() {
        let mut settings = ChannelSettings::new(100_000_000);
        settings.set_fft_display_pixels(1024).unwrap();

        let err = settings.set_fft_display_pixels(50).unwrap_err();
        assert!(matches!(err, SettingError::OutOfRange { value: 50, .. }));
        assert_eq!(settings.fft_display_pixels, 1024);

        settings.set_fft_display_pixels(2000).unwrap();
        assert_eq!(settings.fft_display_pixels, 2000);
        assert!(settings.set_fft_display_pixels(32_769).is_err());
        settings.set_fft_display_pixels(32_768).unwrap();
    }

    #[test]
    fn test_decimation_bounded_by_stage_count() {
        let mut settings = ChannelSettings::new(100_000_000);
        let limits = limits();
        for stage in 0..=4 {
            settings.set_iq_decimation(stage, &limits).unwrap();
            settings.set_fft_decimation(stage, &limits).unwrap();
        }
        assert!(settings.set_iq_decimation(5, &limits).is_err());
        assert!(settings.set_fft_decimation(5, &limits).is_err());
        assert_eq!(settings.iq_decimation, 4);
        assert_eq!(settings.fft_decimation, 4);
    }

    #[test]
    fn test_db_offset_is_signed() {
        let mut settings = ChannelSettings::new(100_000_000);
        let limits = limits();
        settings
            .apply(SettingId::FftDbOffset, &[(-40i32) as u32], &limits)
            .unwrap();
        assert_eq!(settings.fft_db_offset, -40);
        assert_eq!(settings.value(SettingId::FftDbOffset), Some((-40i32) as u32));
        assert!(settings.set_fft_db_offset(101).is_err());
        assert!(settings.set_fft_db_offset(-101).is_err());
    }

    #[test]
    fn test_db_range_is_stored() {
        let mut settings = ChannelSettings::new(100_000_000);
        settings.set_fft_db_range(80).unwrap();
        assert_eq!(settings.fft_db_range, 80);
        assert!(settings.set_fft_db_range(9).is_err());
        assert!(settings.set_fft_db_range(151).is_err());
        assert_eq!(settings.fft_db_range, 80);
    }

    #[test]
    fn test_frequency_bounds() {
        let mut settings = ChannelSettings::new(100_000_000);
        let limits = limits();
        settings.set_iq_frequency(101_000_000, &limits).unwrap();
        assert!(settings.set_iq_frequency(1_000, &limits).is_err());
        assert!(settings.set_fft_frequency(2_000_000_000, &limits).is_err());
        assert_eq!(settings.iq_center_frequency, 101_000_000);
        assert_eq!(settings.fft_center_frequency, 100_000_000);
    }

    #[test]
    fn test_streaming_mode_and_enable() {
        let mut settings = ChannelSettings::new(100_000_000);
        let limits = limits();
        assert!(settings.apply(SettingId::StreamingMode, &[0], &limits).is_err());
        assert!(settings.apply(SettingId::StreamingMode, &[8], &limits).is_err());
        settings
            .apply(SettingId::StreamingMode, &[StreamMode::IQ | StreamMode::FFT], &limits)
            .unwrap();
        assert!(settings.mode.has_fft());

        settings.apply(SettingId::StreamingEnabled, &[1], &limits).unwrap();
        assert!(settings.streaming);
        settings.apply(SettingId::StreamingEnabled, &[2], &limits).unwrap();
        assert!(!settings.streaming);
    }

    #[test]
    fn test_missing_argument_and_gain() {
        let mut settings = ChannelSettings::new(100_000_000);
        let before = settings.clone();
        assert!(matches!(
            settings.apply(SettingId::IqFormat, &[], &limits()),
            Err(SettingError::MissingArgument(SettingId::IqFormat))
        ));
        assert!(matches!(
            settings.apply(SettingId::Gain, &[3], &limits()),
            Err(SettingError::NotChannelSetting(SettingId::Gain))
        ));
        assert_eq!(settings, before);
        assert_eq!(settings.value(SettingId::Gain), None);
    }

    #[test]
    fn test_format_values() {
        let mut settings = ChannelSettings::new(100_000_000);
        settings.set_iq_format(StreamFormat::Int16.as_u32()).unwrap();
        settings.set_fft_format(StreamFormat::Uint8.as_u32()).unwrap();
        assert!(settings.set_iq_format(42).is_err());
        assert_eq!(settings.iq_format, StreamFormat::Int16);
        assert_eq!(settings.value(SettingId::FftFormat), Some(1));
    }

    proptest! {
        #[test]
        fn prop_rejection_never_mutates(
            id in prop::sample::select(SettingId::ALL.to_vec()),
            arg in any::<u32>(),
        ) {
            let mut settings = ChannelSettings::new(100_000_000);
            let before = settings.clone();
            if settings.apply(id, &[arg], &limits()).is_err() {
                prop_assert_eq!(settings, before);
            }
        }
    }
}
