//! SRS830 DSP lock-in amplifier.

use crate::comm::Link;
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::property::{parse_float, parse_int, BoolProperty, EnumProperty, Limit, UnitfulProperty};
use crate::units::{Magnitude, Quantity, DEGREE, HERTZ, VOLT};
use crate::Instrument;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

crate::scpi_enum! {
    pub enum Srs830FreqSource {
        External => "0",
        Internal => "1",
    }
}

crate::scpi_enum! {
    pub enum Srs830Coupling {
        Ac => "0",
        Dc => "1",
    }
}

crate::scpi_enum! {
    /// What the buffer does once full.
    pub enum Srs830BufferMode {
        OneShot => "0",
        Loop => "1",
    }
}

crate::scpi_enum! {
    /// Quantities the front panel and the snapshot command refer to.
    pub enum Srs830Mode {
        X => "x",
        Y => "y",
        R => "r",
        Theta => "theta",
        XNoise => "xnoise",
        YNoise => "ynoise",
        Aux1 => "aux1",
        Aux2 => "aux2",
        Aux3 => "aux3",
        Aux4 => "aux4",
        Ref => "ref",
        Ch1 => "ch1",
        Ch2 => "ch2",
        None => "none",
    }
}

impl Srs830Mode {
    fn xyr_index(self) -> Result<u8> {
        match self {
            Srs830Mode::X => Ok(1),
            Srs830Mode::Y => Ok(2),
            Srs830Mode::R => Ok(3),
            _ => Err(invalid_mode()),
        }
    }

    fn snap_index(self) -> Result<u8> {
        match self {
            Srs830Mode::X => Ok(1),
            Srs830Mode::Y => Ok(2),
            Srs830Mode::R => Ok(3),
            Srs830Mode::Theta => Ok(4),
            Srs830Mode::Aux1 => Ok(5),
            Srs830Mode::Aux2 => Ok(6),
            Srs830Mode::Aux3 => Ok(7),
            Srs830Mode::Aux4 => Ok(8),
            Srs830Mode::Ref => Ok(9),
            Srs830Mode::Ch1 => Ok(10),
            Srs830Mode::Ch2 => Ok(11),
            _ => Err(invalid_mode()),
        }
    }

    fn channel_index(self) -> Result<u8> {
        match self {
            Srs830Mode::Ch1 => Ok(1),
            Srs830Mode::Ch2 => Ok(2),
            _ => Err(InstrumentError::InvalidValue(
                "Specified channel not valid for this function.".to_string(),
            )),
        }
    }
}

const CH1_DISPLAYS: &[Srs830Mode] = &[
    Srs830Mode::X,
    Srs830Mode::R,
    Srs830Mode::XNoise,
    Srs830Mode::Aux1,
    Srs830Mode::Aux2,
];
const CH1_RATIOS: &[Srs830Mode] = &[Srs830Mode::None, Srs830Mode::Aux1, Srs830Mode::Aux2];
const CH2_DISPLAYS: &[Srs830Mode] = &[
    Srs830Mode::Y,
    Srs830Mode::Theta,
    Srs830Mode::YNoise,
    Srs830Mode::Aux3,
    Srs830Mode::Aux4,
];
const CH2_RATIOS: &[Srs830Mode] = &[Srs830Mode::None, Srs830Mode::Aux3, Srs830Mode::Aux4];

fn invalid_mode() -> InstrumentError {
    InstrumentError::InvalidValue("Specified mode not valid for this function.".to_string())
}

/// Data sampling rate: `2^n` Hz for `n` in `-4..=9`, or one sample per
/// trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRate {
    Rate(Quantity),
    Trigger,
}

const TRIGGER_RATE_INDEX: i64 = 14;

/// The buffer holds at most this many points per channel.
pub const MAX_SAMPLES: usize = 16383;

fn rate_for_index(index: i64) -> Option<f64> {
    (0..TRIGGER_RATE_INDEX)
        .contains(&index)
        .then(|| 2f64.powi(index as i32 - 4))
}

fn index_for_rate(hz: f64) -> Option<i64> {
    (0..TRIGGER_RATE_INDEX).find(|i| rate_for_index(*i) == Some(hz))
}

/// Integer replies such as `1` or `1.0`, normalized to `1`.
fn int_reply(reply: &str) -> String {
    parse_int(reply).map_or_else(|_| reply.to_string(), |v| v.to_string())
}

const FREQUENCY_SOURCE: EnumProperty<Srs830FreqSource> =
    EnumProperty::new("FMOD").input_decoration(int_reply);
const FREQUENCY: UnitfulProperty = UnitfulProperty::new("FREQ", HERTZ).min(Limit::Fixed(0.0));
const PHASE: UnitfulProperty = UnitfulProperty::new("PHAS", DEGREE).fixed_range(-360.0, 730.0);
const AMPLITUDE: UnitfulProperty = UnitfulProperty::new("SLVL", VOLT).fixed_range(0.004, 5.0);
const INPUT_SHIELD_GROUND: BoolProperty = BoolProperty::new("IGND").values("1", "0");
const COUPLING: EnumProperty<Srs830Coupling> = EnumProperty::new("ICPL").input_decoration(int_reply);
const BUFFER_MODE: EnumProperty<Srs830BufferMode> =
    EnumProperty::new("SEND").input_decoration(int_reply);
const DATA_TRANSFER: BoolProperty = BoolProperty::new("FAST").values("2", "0");

/// Empty `SPTS?` replies are re-queried this many times in total.
const SPTS_ATTEMPTS: usize = 10;

fn parse_floats(reply: &str) -> Result<Vec<f64>> {
    reply
        .trim()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_float)
        .collect()
}

/// Time the buffer needs to fill with `num_samples` at `rate_hz`, plus a
/// small margin.
pub fn acquisition_time(rate_hz: f64, num_samples: usize) -> Duration {
    let seconds = (num_samples as f64 / rate_hz).ceil() + 0.1;
    Duration::from_secs_f64(seconds.max(0.0))
}

/// SRS830.
pub struct Srs830 {
    inst: Instrument,
}

impl Srs830 {
    pub const MODEL: &'static str = "Srs830";

    /// Opens with an explicit `OUTX` setting: 1 routes replies to GPIB,
    /// 2 to RS-232.
    pub async fn with_outx_mode(inst: Instrument, outx_mode: u8) -> Result<Self> {
        if !matches!(outx_mode, 1 | 2) {
            return Err(InstrumentError::InvalidValue(format!(
                "OUTX mode must be 1 or 2, got {outx_mode}"
            )));
        }
        let mut lockin = Self { inst };
        lockin.inst.sendcmd(&format!("OUTX {outx_mode}")).await?;
        Ok(lockin)
    }

    pub async fn frequency_source(&mut self) -> Result<Srs830FreqSource> {
        FREQUENCY_SOURCE.get(&mut self.inst).await
    }

    pub async fn set_frequency_source(&mut self, source: Srs830FreqSource) -> Result<()> {
        FREQUENCY_SOURCE.set(&mut self.inst, source).await
    }

    /// Reference frequency.
    pub async fn frequency(&mut self) -> Result<Quantity> {
        FREQUENCY.get(&mut self.inst).await
    }

    pub async fn set_frequency(&mut self, frequency: impl Into<Magnitude> + Send) -> Result<()> {
        FREQUENCY.set(&mut self.inst, frequency).await
    }

    /// Phase of the internal reference.
    pub async fn phase(&mut self) -> Result<Quantity> {
        PHASE.get(&mut self.inst).await
    }

    pub async fn set_phase(&mut self, phase: impl Into<Magnitude> + Send) -> Result<()> {
        PHASE.set(&mut self.inst, phase).await
    }

    /// Amplitude of the internal reference.
    pub async fn amplitude(&mut self) -> Result<Quantity> {
        AMPLITUDE.get(&mut self.inst).await
    }

    pub async fn set_amplitude(&mut self, amplitude: impl Into<Magnitude> + Send) -> Result<()> {
        AMPLITUDE.set(&mut self.inst, amplitude).await
    }

    /// True when the input shield is grounded, false when floating.
    pub async fn input_shield_ground(&mut self) -> Result<bool> {
        INPUT_SHIELD_GROUND.get(&mut self.inst).await
    }

    pub async fn set_input_shield_ground(&mut self, ground: bool) -> Result<()> {
        INPUT_SHIELD_GROUND.set(&mut self.inst, ground).await
    }

    pub async fn coupling(&mut self) -> Result<Srs830Coupling> {
        COUPLING.get(&mut self.inst).await
    }

    pub async fn set_coupling(&mut self, coupling: Srs830Coupling) -> Result<()> {
        COUPLING.set(&mut self.inst, coupling).await
    }

    pub async fn sample_rate(&mut self) -> Result<SampleRate> {
        let index = self.inst.query_parse("SRAT?", parse_int).await?;
        if index == TRIGGER_RATE_INDEX {
            return Ok(SampleRate::Trigger);
        }
        rate_for_index(index)
            .map(|hz| SampleRate::Rate(Quantity::new(hz, HERTZ)))
            .ok_or_else(|| InstrumentError::parse(index.to_string(), "unknown sample rate index"))
    }

    pub async fn set_sample_rate(&mut self, rate: SampleRate) -> Result<()> {
        let index = match rate {
            SampleRate::Trigger => TRIGGER_RATE_INDEX,
            SampleRate::Rate(q) => index_for_rate(q.magnitude_in(HERTZ)?).ok_or_else(|| {
                InstrumentError::InvalidValue(
                    "Valid sample rates are 2^n Hz for n in -4..=9, and trigger.".to_string(),
                )
            })?,
        };
        self.inst.sendcmd(&format!("SRAT {index}")).await
    }

    pub async fn buffer_mode(&mut self) -> Result<Srs830BufferMode> {
        BUFFER_MODE.get(&mut self.inst).await
    }

    pub async fn set_buffer_mode(&mut self, mode: Srs830BufferMode) -> Result<()> {
        BUFFER_MODE.set(&mut self.inst, mode).await
    }

    /// Points stored in the buffer. The count is re-queried while the
    /// lock-in answers with an empty line.
    pub async fn num_data_points(&mut self) -> Result<usize> {
        for _ in 0..SPTS_ATTEMPTS {
            let reply = self.inst.query("SPTS?").await?;
            let reply = reply.trim();
            if !reply.is_empty() {
                let count = parse_int(reply)?;
                return usize::try_from(count)
                    .map_err(|_| InstrumentError::parse(reply, "negative point count"));
            }
        }
        Err(InstrumentError::parse("", "expected integer response from instrument"))
    }

    /// True in fast transfer mode 2; false in mode 0.
    pub async fn data_transfer(&mut self) -> Result<bool> {
        DATA_TRANSFER.get(&mut self.inst).await
    }

    pub async fn set_data_transfer(&mut self, on: bool) -> Result<()> {
        DATA_TRANSFER.set(&mut self.inst, on).await
    }

    /// Zeroes the offset of X, Y or R.
    pub async fn auto_offset(&mut self, mode: Srs830Mode) -> Result<()> {
        let index = mode.xyr_index()?;
        self.inst.sendcmd(&format!("AOFF {index}")).await
    }

    /// Do not repeat before the lock-in has finished phasing.
    pub async fn auto_phase(&mut self) -> Result<()> {
        self.inst.sendcmd("APHS").await
    }

    /// Clears the buffer, then sets the sample rate and end-of-buffer mode.
    pub async fn init(&mut self, rate: SampleRate, mode: Srs830BufferMode) -> Result<()> {
        self.clear_data_buffer().await?;
        self.set_sample_rate(rate).await?;
        self.set_buffer_mode(mode).await
    }

    /// Enables fast transfer and starts the scan.
    pub async fn start_data_transfer(&mut self) -> Result<()> {
        self.set_data_transfer(true).await?;
        self.start_scan().await
    }

    /// Starts the scan, 0.5 s after the command.
    pub async fn start_scan(&mut self) -> Result<()> {
        self.inst.sendcmd("STRD").await
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.inst.sendcmd("PAUS").await
    }

    pub async fn clear_data_buffer(&mut self) -> Result<()> {
        self.inst.sendcmd("REST").await
    }

    /// Offset in percent (`-105..=105`, truncated to an integer) and an
    /// expand factor of 1, 10 or 100 for X, Y or R.
    pub async fn set_offset_expand(&mut self, mode: Srs830Mode, offset: f64, expand: u32) -> Result<()> {
        let index = mode.xyr_index()?;
        if !(-105.0..=105.0).contains(&offset) {
            return Err(InstrumentError::OutOfRange(
                "Offset must be -105 <= offset <= +105.".to_string(),
            ));
        }
        let expand = match expand {
            1 => 0,
            10 => 1,
            100 => 2,
            _ => {
                return Err(InstrumentError::InvalidValue(
                    "Expand must be 1, 10, 100.".to_string(),
                ))
            }
        };
        let cmd = format!("OEXP {index},{},{expand}", offset.trunc() as i64);
        self.inst.sendcmd(&cmd).await
    }

    /// Reads two quantities. X with Y, and R with theta, are sampled at
    /// the same instant; other pairs are read one after the other.
    pub async fn data_snap(&mut self, first: Srs830Mode, second: Srs830Mode) -> Result<Vec<f64>> {
        let (a, b) = (first.snap_index()?, second.snap_index()?);
        if a == b {
            return Err(InstrumentError::InvalidValue(
                "Both parameters for the data snapshot are the same.".to_string(),
            ));
        }
        self.inst.query_parse(&format!("SNAP? {a},{b}"), parse_floats).await
    }

    /// Reads the whole buffer of channel 1 or 2 in ASCII.
    pub async fn read_data_buffer(&mut self, channel: Srs830Mode) -> Result<Vec<f64>> {
        let channel = channel.channel_index()?;
        let points = self.num_data_points().await?;
        self.inst
            .query_parse(&format!("TRCA?{channel},0,{points}"), parse_floats)
            .await
    }

    /// Fills the buffer with `num_samples` at `rate_hz` and returns the
    /// channel 1 and channel 2 data.
    pub async fn take_measurement(
        &mut self,
        rate_hz: f64,
        num_samples: usize,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if num_samples > MAX_SAMPLES {
            return Err(InstrumentError::InvalidValue(format!(
                "Number of samples cannot exceed {MAX_SAMPLES}."
            )));
        }
        let wait = acquisition_time(rate_hz, num_samples);
        self.init(SampleRate::Rate(Quantity::new(rate_hz, HERTZ)), Srs830BufferMode::OneShot)
            .await?;
        self.start_data_transfer().await?;
        debug!("Sampling for {:?}", wait);
        tokio::time::sleep(wait).await;
        self.pause().await?;
        // Forces the lock-in to flush its output buffers; the reply is
        // usually garbage.
        if let Err(e) = self.num_data_points().await {
            debug!("Ignoring point count after pause: {}", e);
        }
        let ch1 = self.read_data_buffer(Srs830Mode::Ch1).await?;
        let ch2 = self.read_data_buffer(Srs830Mode::Ch2).await?;
        Ok((ch1, ch2))
    }

    /// Channel 1 shows X, R, X noise, Aux 1 or Aux 2, optionally divided by
    /// Aux 1 or Aux 2. Channel 2 shows Y, theta, Y noise, Aux 3 or Aux 4,
    /// optionally divided by Aux 3 or Aux 4.
    pub async fn set_channel_display(
        &mut self,
        channel: Srs830Mode,
        display: Srs830Mode,
        ratio: Srs830Mode,
    ) -> Result<()> {
        let channel = channel.channel_index()?;
        let (displays, ratios) = if channel == 1 {
            (CH1_DISPLAYS, CH1_RATIOS)
        } else {
            (CH2_DISPLAYS, CH2_RATIOS)
        };
        let display = displays.iter().position(|m| *m == display).ok_or_else(|| {
            InstrumentError::InvalidValue(
                "Specified display mode not valid for this function.".to_string(),
            )
        })?;
        let ratio = ratios.iter().position(|m| *m == ratio).ok_or_else(|| {
            InstrumentError::InvalidValue(
                "Specified display ratio not valid for this function.".to_string(),
            )
        })?;
        self.inst
            .sendcmd(&format!("DDEF {channel},{display},{ratio}"))
            .await
    }
}

#[async_trait]
impl OpenInstrument for Srs830 {
    /// Sends the `OUTX` setting that matches the link: 1 over GPIB, 2 over
    /// serial.
    async fn open(inst: Instrument) -> Result<Self> {
        match inst.link() {
            Link::Gpib => Self::with_outx_mode(inst, 1).await,
            Link::Serial => Self::with_outx_mode(inst, 2).await,
            Link::Loopback => Ok(Self { inst }),
            other => {
                warn!(
                    "OUTX command has not been set for a {:?} link; instrument behaviour is unknown",
                    other
                );
                Ok(Self { inst })
            }
        }
    }
}

#[async_trait]
impl Driver for Srs830 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("frequency_source") => self.set_frequency_source(value.as_enum()?).await,
            Some("frequency") => self.set_frequency(value.as_magnitude()?).await,
            Some("phase") => self.set_phase(value.as_magnitude()?).await,
            Some("amplitude") => self.set_amplitude(value.as_magnitude()?).await,
            Some("input_shield_ground") => self.set_input_shield_ground(value.as_bool()?).await,
            Some("coupling") => self.set_coupling(value.as_enum()?).await,
            Some("buffer_mode") => self.set_buffer_mode(value.as_enum()?).await,
            Some("data_transfer") => self.set_data_transfer(value.as_bool()?).await,
            Some("sample_rate") => {
                let rate = match value {
                    AttrValue::Str(s) if s.eq_ignore_ascii_case("trigger") => SampleRate::Trigger,
                    other => SampleRate::Rate(other.as_magnitude()?.with_default_unit(HERTZ)),
                };
                self.set_sample_rate(rate).await
            }
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for Srs830 {}
