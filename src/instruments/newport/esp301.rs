//! Newport ESP-301 multi-axis motion controller.
//!
//! Commands take the form `{target}{CMD}{params}`, where the target is an
//! axis (or program) number and parameters are comma separated. Unless a
//! command is sent unchecked, the controller's error buffer is read with
//! `TB?` afterwards and a non-zero code becomes a [`NewportError`].
//!
//! Axis handles are borrowed from the controller with
//! [`NewportEsp301::axis`]. Positions are in the axis' configured units;
//! velocities and accelerations are plain numbers in those units per second
//! (squared).

use super::errors::NewportError;
use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::property::{format_float, parse_float, parse_int, validate_index, ScpiEnum};
use crate::units::{
    Magnitude, Quantity, Unit, AMPERE, DEGREE, DIMENSIONLESS, GRADIAN, INCH, MICROINCH,
    MICROMETER, MICRORADIAN, MILLIINCH, MILLIMETER, MILLIRADIAN, MILLISECOND, PERCENT, RADIAN,
    VOLT,
};
use crate::Instrument;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Axes addressable by the controller's command set.
const MAX_AXES: usize = 100;

crate::scpi_enum! {
    /// How `OR` searches for the home position.
    pub enum HomeSearchMode {
        ZeroPositionCount => "0",
        HomeIndexSignals => "1",
        HomeSignalOnly => "2",
        PosLimitSignal => "3",
        NegLimitSignal => "4",
        PosIndexSignals => "5",
        NegIndexSignals => "6",
    }
}

crate::scpi_enum! {
    /// Unit codes used by `SN`.
    pub enum Esp301Units {
        EncoderStep => "0",
        MotorStep => "1",
        Millimeter => "2",
        Micrometer => "3",
        Inches => "4",
        MilliInches => "5",
        MicroInches => "6",
        Degree => "7",
        Gradian => "8",
        Radian => "9",
        Milliradian => "10",
        Microradian => "11",
    }
}

crate::scpi_enum! {
    /// Motor types used by `QM`.
    pub enum MotorType {
        Undefined => "0",
        DcServo => "1",
        StepperMotor => "2",
        CommutatedStepperMotor => "3",
        CommutatedBrushlessServo => "4",
    }
}

impl Esp301Units {
    /// Unit of positions reported in this setting. Steps are counts.
    pub fn unit(&self) -> Unit {
        match self {
            Esp301Units::EncoderStep | Esp301Units::MotorStep => DIMENSIONLESS,
            Esp301Units::Millimeter => MILLIMETER,
            Esp301Units::Micrometer => MICROMETER,
            Esp301Units::Inches => INCH,
            Esp301Units::MilliInches => MILLIINCH,
            Esp301Units::MicroInches => MICROINCH,
            Esp301Units::Degree => DEGREE,
            Esp301Units::Gradian => GRADIAN,
            Esp301Units::Radian => RADIAN,
            Esp301Units::Milliradian => MILLIRADIAN,
            Esp301Units::Microradian => MICRORADIAN,
        }
    }

    /// First unit code whose unit is `unit`.
    pub fn from_unit(unit: Unit) -> Result<Self> {
        Self::variants()
            .iter()
            .copied()
            .find(|u| u.unit() == unit)
            .ok_or_else(|| {
                InstrumentError::InvalidValue(format!("{unit} is not a valid unit for Newport Axis"))
            })
    }

    fn code(&self) -> Result<i64> {
        parse_int(self.mnemonic())
    }
}

/// How a parameter's value relates to the axis units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    /// Axis units.
    Position,
    /// Axis units per second, or per second squared.
    Rate,
    Amperes,
    Volts,
    Float,
    Integer,
}

/// Numeric per-axis settings, each read with `{CMD}?` and written with
/// `{CMD}{value}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AxisParameter {
    Acceleration,
    Deceleration,
    EstopDeceleration,
    Jerk,
    Velocity,
    MaxVelocity,
    MaxBaseVelocity,
    JogHighVelocity,
    JogLowVelocity,
    HomingVelocity,
    MaxAcceleration,
    EncoderResolution,
    FullStepResolution,
    LeftLimit,
    RightLimit,
    ErrorThreshold,
    Home,
    Current,
    Voltage,
    FeedbackConfiguration,
    PositionDisplayResolution,
    Trajectory,
    MicrostepFactor,
    HardwareLimitConfiguration,
    AccelerationFeedForward,
    ProportionalGain,
    DerivativeGain,
    IntegralGain,
    IntegralSaturationGain,
}

impl AxisParameter {
    pub const ALL: [AxisParameter; 29] = [
        AxisParameter::Acceleration,
        AxisParameter::Deceleration,
        AxisParameter::EstopDeceleration,
        AxisParameter::Jerk,
        AxisParameter::Velocity,
        AxisParameter::MaxVelocity,
        AxisParameter::MaxBaseVelocity,
        AxisParameter::JogHighVelocity,
        AxisParameter::JogLowVelocity,
        AxisParameter::HomingVelocity,
        AxisParameter::MaxAcceleration,
        AxisParameter::EncoderResolution,
        AxisParameter::FullStepResolution,
        AxisParameter::LeftLimit,
        AxisParameter::RightLimit,
        AxisParameter::ErrorThreshold,
        AxisParameter::Home,
        AxisParameter::Current,
        AxisParameter::Voltage,
        AxisParameter::FeedbackConfiguration,
        AxisParameter::PositionDisplayResolution,
        AxisParameter::Trajectory,
        AxisParameter::MicrostepFactor,
        AxisParameter::HardwareLimitConfiguration,
        AxisParameter::AccelerationFeedForward,
        AxisParameter::ProportionalGain,
        AxisParameter::DerivativeGain,
        AxisParameter::IntegralGain,
        AxisParameter::IntegralSaturationGain,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            AxisParameter::Acceleration => "AC",
            AxisParameter::Deceleration => "AG",
            AxisParameter::EstopDeceleration => "AE",
            AxisParameter::Jerk => "JK",
            AxisParameter::Velocity => "VA",
            AxisParameter::MaxVelocity => "VU",
            AxisParameter::MaxBaseVelocity => "VB",
            AxisParameter::JogHighVelocity => "JH",
            AxisParameter::JogLowVelocity => "JW",
            AxisParameter::HomingVelocity => "OH",
            AxisParameter::MaxAcceleration => "AU",
            AxisParameter::EncoderResolution => "SU",
            AxisParameter::FullStepResolution => "FR",
            AxisParameter::LeftLimit => "SL",
            AxisParameter::RightLimit => "SR",
            AxisParameter::ErrorThreshold => "FE",
            AxisParameter::Home => "DH",
            AxisParameter::Current => "QI",
            AxisParameter::Voltage => "QV",
            AxisParameter::FeedbackConfiguration => "ZB",
            AxisParameter::PositionDisplayResolution => "FP",
            AxisParameter::Trajectory => "TJ",
            AxisParameter::MicrostepFactor => "QS",
            AxisParameter::HardwareLimitConfiguration => "ZH",
            AxisParameter::AccelerationFeedForward => "AF",
            AxisParameter::ProportionalGain => "KP",
            AxisParameter::DerivativeGain => "KD",
            AxisParameter::IntegralGain => "KI",
            AxisParameter::IntegralSaturationGain => "KS",
        }
    }

    /// Attribute name, as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            AxisParameter::Acceleration => "acceleration",
            AxisParameter::Deceleration => "deceleration",
            AxisParameter::EstopDeceleration => "estop_deceleration",
            AxisParameter::Jerk => "jerk",
            AxisParameter::Velocity => "velocity",
            AxisParameter::MaxVelocity => "max_velocity",
            AxisParameter::MaxBaseVelocity => "max_base_velocity",
            AxisParameter::JogHighVelocity => "jog_high_velocity",
            AxisParameter::JogLowVelocity => "jog_low_velocity",
            AxisParameter::HomingVelocity => "homing_velocity",
            AxisParameter::MaxAcceleration => "max_acceleration",
            AxisParameter::EncoderResolution => "encoder_resolution",
            AxisParameter::FullStepResolution => "full_step_resolution",
            AxisParameter::LeftLimit => "left_limit",
            AxisParameter::RightLimit => "right_limit",
            AxisParameter::ErrorThreshold => "error_threshold",
            AxisParameter::Home => "home",
            AxisParameter::Current => "current",
            AxisParameter::Voltage => "voltage",
            AxisParameter::FeedbackConfiguration => "feedback_configuration",
            AxisParameter::PositionDisplayResolution => "position_display_resolution",
            AxisParameter::Trajectory => "trajectory",
            AxisParameter::MicrostepFactor => "microstep_factor",
            AxisParameter::HardwareLimitConfiguration => "hardware_limit_configuration",
            AxisParameter::AccelerationFeedForward => "acceleration_feed_forward",
            AxisParameter::ProportionalGain => "proportional_gain",
            AxisParameter::DerivativeGain => "derivative_gain",
            AxisParameter::IntegralGain => "integral_gain",
            AxisParameter::IntegralSaturationGain => "integral_saturation_gain",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    fn kind(&self) -> ParamKind {
        use AxisParameter::*;
        match self {
            EncoderResolution | FullStepResolution | LeftLimit | RightLimit | ErrorThreshold
            | Home => ParamKind::Position,
            Acceleration | Deceleration | EstopDeceleration | Jerk | Velocity | MaxVelocity
            | MaxBaseVelocity | JogHighVelocity | JogLowVelocity | HomingVelocity
            | MaxAcceleration => ParamKind::Rate,
            Current => ParamKind::Amperes,
            Voltage => ParamKind::Volts,
            FeedbackConfiguration | PositionDisplayResolution | Trajectory | MicrostepFactor
            | HardwareLimitConfiguration => ParamKind::Integer,
            AccelerationFeedForward | ProportionalGain | DerivativeGain | IntegralGain
            | IntegralSaturationGain => ParamKind::Float,
        }
    }

    /// Decodes a `{CMD}?` reply. The configuration words carry an `H`
    /// suffix, and the gain reply one trailing character.
    fn parse_reply(&self, reply: &str) -> Result<f64> {
        let reply = reply.trim();
        let word = reply.trim_end_matches('H');
        match self {
            AxisParameter::FeedbackConfiguration => i64::from_str_radix(word, 16)
                .map(|v| v as f64)
                .map_err(|e| InstrumentError::parse(reply, e)),
            AxisParameter::HardwareLimitConfiguration => parse_int(word).map(|v| v as f64),
            AxisParameter::ProportionalGain => {
                let end = reply.len().saturating_sub(1);
                parse_float(reply.get(..end).unwrap_or(reply))
            }
            _ if self.kind() == ParamKind::Integer => parse_int(reply).map(|v| v as f64),
            _ => parse_float(reply),
        }
    }
}

/// Settings applied by [`NewportEsp301Axis::setup_axis`] and returned by
/// [`NewportEsp301Axis::read_setup`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSetup {
    pub units: Option<Esp301Units>,
    pub motor_type: Option<MotorType>,
    /// Values in the units described on [`AxisParameter`].
    pub parameters: BTreeMap<AxisParameter, f64>,
    /// Reduce motor torque after `time` of inactivity to a percentage.
    pub reduce_motor_torque: Option<(Magnitude, Magnitude)>,
}

/// Snapshot returned by [`NewportEsp301Axis::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct AxisStatus {
    pub units: Esp301Units,
    pub position: Quantity,
    pub desired_position: Quantity,
    pub desired_velocity: f64,
    pub is_motion_done: bool,
}

const SETUP_BEFORE_UNITS: [AxisParameter; 5] = [
    AxisParameter::FeedbackConfiguration,
    AxisParameter::FullStepResolution,
    AxisParameter::PositionDisplayResolution,
    AxisParameter::Current,
    AxisParameter::Voltage,
];

const SETUP_AFTER_UNITS: [AxisParameter; 22] = [
    AxisParameter::EncoderResolution,
    AxisParameter::MaxAcceleration,
    AxisParameter::MaxVelocity,
    AxisParameter::MaxBaseVelocity,
    AxisParameter::HomingVelocity,
    AxisParameter::JogHighVelocity,
    AxisParameter::JogLowVelocity,
    AxisParameter::Acceleration,
    AxisParameter::Velocity,
    AxisParameter::Deceleration,
    AxisParameter::EstopDeceleration,
    AxisParameter::Jerk,
    AxisParameter::ErrorThreshold,
    AxisParameter::ProportionalGain,
    AxisParameter::DerivativeGain,
    AxisParameter::IntegralGain,
    AxisParameter::IntegralSaturationGain,
    AxisParameter::Home,
    AxisParameter::MicrostepFactor,
    AxisParameter::AccelerationFeedForward,
    AxisParameter::Trajectory,
    AxisParameter::HardwareLimitConfiguration,
];

const READ_SETUP: [AxisParameter; 24] = [
    AxisParameter::FeedbackConfiguration,
    AxisParameter::FullStepResolution,
    AxisParameter::PositionDisplayResolution,
    AxisParameter::Current,
    AxisParameter::MaxVelocity,
    AxisParameter::EncoderResolution,
    AxisParameter::Acceleration,
    AxisParameter::Deceleration,
    AxisParameter::Velocity,
    AxisParameter::MaxAcceleration,
    AxisParameter::HomingVelocity,
    AxisParameter::JogHighVelocity,
    AxisParameter::JogLowVelocity,
    AxisParameter::EstopDeceleration,
    AxisParameter::Jerk,
    AxisParameter::ProportionalGain,
    AxisParameter::DerivativeGain,
    AxisParameter::IntegralGain,
    AxisParameter::IntegralSaturationGain,
    AxisParameter::Home,
    AxisParameter::MicrostepFactor,
    AxisParameter::AccelerationFeedForward,
    AxisParameter::Trajectory,
    AxisParameter::HardwareLimitConfiguration,
];

fn validate_program_id(program_id: u32) -> Result<()> {
    if !(1..=100).contains(&program_id) {
        return Err(InstrumentError::InvalidValue(
            "Invalid program ID. Must be an integer from 1 to 100 (inclusive).".to_string(),
        ));
    }
    Ok(())
}

/// Parses a `TB?` reply, `code, timestamp, message`.
fn parse_error_buffer(reply: &str) -> Result<Option<NewportError>> {
    let mut fields = reply.splitn(3, ',');
    let code = parse_int(fields.next().unwrap_or_default())?;
    if code == 0 {
        return Ok(None);
    }
    let ticks = fields
        .next()
        .and_then(|t| t.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN);
    Ok(Some(NewportError::new(code).with_ticks(ticks)))
}

/// Newport ESP-301.
pub struct NewportEsp301 {
    inst: Instrument,
    batch: Option<Vec<String>>,
    programming: bool,
}

impl NewportEsp301 {
    pub const MODEL: &'static str = "NewportESP301";

    /// Sends `{target}{cmd}{params}` and checks the error buffer.
    ///
    /// Returns the reply for queries. While a batch is open the command is
    /// queued instead and `None` is returned.
    pub async fn command(
        &mut self,
        target: Option<usize>,
        cmd: &str,
        params: &[String],
    ) -> Result<Option<String>> {
        self.run(target, cmd, params, true).await
    }

    /// Like [`command`](Self::command) without the `TB?` error check.
    pub async fn command_unchecked(
        &mut self,
        target: Option<usize>,
        cmd: &str,
        params: &[String],
    ) -> Result<Option<String>> {
        self.run(target, cmd, params, false).await
    }

    async fn run(
        &mut self,
        target: Option<usize>,
        cmd: &str,
        params: &[String],
        errcheck: bool,
    ) -> Result<Option<String>> {
        let raw = format!(
            "{}{}{}",
            target.map(|t| t.to_string()).unwrap_or_default(),
            cmd.to_ascii_uppercase(),
            params.join(",")
        );
        if let Some(batch) = self.batch.as_mut() {
            batch.push(raw);
            return Ok(None);
        }
        self.execute(&raw, errcheck).await
    }

    async fn execute(&mut self, raw: &str, errcheck: bool) -> Result<Option<String>> {
        let reply = if raw.contains('?') {
            Some(self.inst.query(raw).await?)
        } else {
            self.inst.sendcmd(raw).await?;
            None
        };
        // The error buffer cannot be read while a program is being recorded.
        if errcheck && !self.programming {
            let buffer = self.inst.query("TB?").await?;
            if let Some(err) = parse_error_buffer(&buffer)? {
                debug!(command = raw, error = %err, "ESP301 reported an error");
                return Err(err.into());
            }
        }
        Ok(reply)
    }

    /// Starts queueing commands to send in one message with
    /// [`execute_batch`](Self::execute_batch).
    pub fn begin_batch(&mut self) {
        self.batch.get_or_insert_with(Vec::new);
    }

    /// Sends the queued commands joined by ` ; ` and returns the reply, if
    /// the batch contained a query.
    pub async fn execute_batch(&mut self, errcheck: bool) -> Result<Option<String>> {
        let commands = self.batch.take().unwrap_or_default();
        if commands.is_empty() {
            return Ok(None);
        }
        self.execute(&commands.join(" ; "), errcheck).await
    }

    /// Handle for axis `idx` (0-based; the controller numbers axes from 1).
    /// Reads the axis' current units.
    pub async fn axis(&mut self, idx: usize) -> Result<NewportEsp301Axis<'_>> {
        let idx = validate_index(idx, MAX_AXES)?;
        let axis_id = idx + 1;
        let units = read_units(self, axis_id).await?;
        Ok(NewportEsp301Axis {
            ctrl: self,
            axis_id,
            units,
        })
    }

    /// Searches `axis_id` (1-based) for home.
    pub async fn search_for_home(
        &mut self,
        axis_id: usize,
        mode: HomeSearchMode,
        errcheck: bool,
    ) -> Result<()> {
        let params = [mode.mnemonic().to_string()];
        self.run(Some(axis_id), "OR", &params, errcheck).await?;
        Ok(())
    }

    /// Hardware reset. Only effective when the watchdog jumper is set.
    pub async fn reset(&mut self) -> Result<()> {
        self.command_unchecked(None, "RS", &[]).await?;
        Ok(())
    }

    /// Erases program `program_id` and records the commands sent by `body`
    /// as its new contents. Recording is closed even when `body` fails.
    pub async fn define_program<F>(&mut self, program_id: u32, body: F) -> Result<()>
    where
        F: for<'c> FnOnce(&'c mut NewportEsp301) -> BoxFuture<'c, Result<()>> + Send,
    {
        validate_program_id(program_id)?;
        let target = Some(program_id as usize);
        self.command(target, "XX", &[]).await?;
        self.command(target, "EP", &[]).await?;
        self.programming = true;
        let recorded = body(self).await;
        self.programming = false;
        self.command(None, "QP", &[]).await?;
        recorded
    }

    pub async fn run_program(&mut self, program_id: u32) -> Result<()> {
        validate_program_id(program_id)?;
        info!(program_id, "ESP301 running program");
        self.command(Some(program_id as usize), "EX", &[]).await?;
        Ok(())
    }
}

async fn read_units(ctrl: &mut NewportEsp301, axis_id: usize) -> Result<Esp301Units> {
    let reply = ctrl.command(Some(axis_id), "SN?", &[]).await?;
    let reply = reply.ok_or_else(batched_query)?;
    Esp301Units::parse_mnemonic(&parse_int(&reply)?.to_string())
}

fn batched_query() -> InstrumentError {
    InstrumentError::InvalidValue("queries cannot be batched".to_string())
}

/// One axis of a [`NewportEsp301`].
pub struct NewportEsp301Axis<'a> {
    ctrl: &'a mut NewportEsp301,
    axis_id: usize,
    units: Esp301Units,
}

impl<'a> NewportEsp301Axis<'a> {
    /// 1-based axis number.
    pub fn axis_id(&self) -> usize {
        self.axis_id
    }

    /// Units last read from or written to the axis.
    pub fn units(&self) -> Esp301Units {
        self.units
    }

    pub async fn set_units(&mut self, units: Esp301Units) -> Result<()> {
        self.cmd("SN", &[units.code()?.to_string()]).await?;
        self.units = units;
        Ok(())
    }

    async fn cmd(&mut self, cmd: &str, params: &[String]) -> Result<Option<String>> {
        self.ctrl.command(Some(self.axis_id), cmd, params).await
    }

    async fn ask(&mut self, cmd: &str) -> Result<String> {
        self.cmd(&format!("{cmd}?"), &[]).await?.ok_or_else(batched_query)
    }

    fn in_axis_units(&self, value: Magnitude) -> Result<f64> {
        let unit = self.units.unit();
        value.with_default_unit(unit).magnitude_in(unit)
    }

    /// Reads a numeric setting in the units described on [`AxisParameter`].
    pub async fn get(&mut self, param: AxisParameter) -> Result<f64> {
        let reply = self.ask(param.command()).await?;
        param.parse_reply(&reply)
    }

    /// Writes a numeric setting. Quantities are converted for position,
    /// current and voltage settings; rates take plain numbers.
    pub async fn set(&mut self, param: AxisParameter, value: impl Into<Magnitude>) -> Result<()> {
        let value = value.into();
        let value = match param.kind() {
            ParamKind::Position => self.in_axis_units(value)?,
            ParamKind::Amperes => value.with_default_unit(AMPERE).magnitude_in(AMPERE)?,
            ParamKind::Volts => value.with_default_unit(VOLT).magnitude_in(VOLT)?,
            ParamKind::Rate | ParamKind::Float | ParamKind::Integer => match value {
                Magnitude::Bare(v) => v,
                Magnitude::Quantity(q) => q.magnitude_in(DIMENSIONLESS)?,
            },
        };
        let param_str = if param.kind() == ParamKind::Integer {
            if param == AxisParameter::MicrostepFactor && !(1.0..=250.0).contains(&value) {
                return Err(InstrumentError::OutOfRange(
                    "Microstep factor must be between 1 and 250".to_string(),
                ));
            }
            (value as i64).to_string()
        } else {
            format_float(value)
        };
        self.cmd(param.command(), &[param_str]).await?;
        Ok(())
    }

    async fn get_position(&mut self, cmd: &str) -> Result<Quantity> {
        let value = parse_float(&self.ask(cmd).await?)?;
        Ok(Quantity::new(value, self.units.unit()))
    }

    /// Actual position.
    pub async fn position(&mut self) -> Result<Quantity> {
        self.get_position("TP").await
    }

    pub async fn desired_position(&mut self) -> Result<Quantity> {
        self.get_position("DP").await
    }

    /// Desired velocity in axis units per second.
    pub async fn desired_velocity(&mut self) -> Result<f64> {
        parse_float(&self.ask("DV").await?)
    }

    pub async fn velocity(&mut self) -> Result<f64> {
        self.get(AxisParameter::Velocity).await
    }

    pub async fn set_velocity(&mut self, velocity: f64) -> Result<()> {
        self.set(AxisParameter::Velocity, velocity).await
    }

    pub async fn acceleration(&mut self) -> Result<f64> {
        self.get(AxisParameter::Acceleration).await
    }

    pub async fn set_acceleration(&mut self, acceleration: f64) -> Result<()> {
        self.set(AxisParameter::Acceleration, acceleration).await
    }

    pub async fn deceleration(&mut self) -> Result<f64> {
        self.get(AxisParameter::Deceleration).await
    }

    pub async fn set_deceleration(&mut self, deceleration: f64) -> Result<()> {
        self.set(AxisParameter::Deceleration, deceleration).await
    }

    /// Home preset position.
    pub async fn home(&mut self) -> Result<Quantity> {
        self.get_position("DH").await
    }

    pub async fn set_home(&mut self, home: impl Into<Magnitude>) -> Result<()> {
        self.set(AxisParameter::Home, home).await
    }

    pub async fn motor_type(&mut self) -> Result<MotorType> {
        let reply = self.ask("QM").await?;
        MotorType::parse_mnemonic(&parse_int(&reply)?.to_string())
    }

    pub async fn set_motor_type(&mut self, motor: MotorType) -> Result<()> {
        self.cmd("QM", &[motor.mnemonic().to_string()]).await?;
        Ok(())
    }

    pub async fn is_motion_done(&mut self) -> Result<bool> {
        Ok(parse_int(&self.ask("MD").await?)? != 0)
    }

    /// Position in encoder steps. The axis units are switched for the
    /// read and restored afterwards.
    pub async fn encoder_position(&mut self) -> Result<f64> {
        let previous = self.units;
        self.set_units(Esp301Units::EncoderStep).await?;
        let position = self.ask("TP").await.and_then(|r| parse_float(&r));
        self.set_units(previous).await?;
        position
    }

    /// Starts a move to `position`, absolute or relative to the current
    /// position. Bare numbers are in the axis units.
    pub async fn move_to(&mut self, position: impl Into<Magnitude>, absolute: bool) -> Result<()> {
        let position = self.in_axis_units(position.into())?;
        let cmd = if absolute { "PA" } else { "PR" };
        self.cmd(cmd, &[format_float(position)]).await?;
        info!(
            axis = self.axis_id,
            position,
            units = %self.units.unit(),
            absolute,
            "ESP301 axis moving"
        );
        Ok(())
    }

    pub async fn move_to_hardware_limit(&mut self) -> Result<()> {
        self.cmd("MT", &[]).await.map(|_| ())
    }

    pub async fn move_indefinitely(&mut self) -> Result<()> {
        self.cmd("MV", &[]).await.map(|_| ())
    }

    /// Abrupt stop without deceleration.
    pub async fn abort_motion(&mut self) -> Result<()> {
        self.cmd("AB", &[]).await.map(|_| ())
    }

    /// Decelerating stop.
    pub async fn stop_motion(&mut self) -> Result<()> {
        self.cmd("ST", &[]).await.map(|_| ())
    }

    /// Holds further commands until the axis has stopped.
    pub async fn wait_for_stop(&mut self) -> Result<()> {
        self.cmd("WS", &[]).await.map(|_| ())
    }

    /// Holds further commands until the axis reaches `position`.
    pub async fn wait_for_position(&mut self, position: impl Into<Magnitude>) -> Result<()> {
        let position = self.in_axis_units(position.into())?;
        self.cmd("WP", &[format_float(position)]).await.map(|_| ())
    }

    /// Polls `MD?` until the motion completes or `max_wait` elapses.
    pub async fn wait_for_motion(
        &mut self,
        poll_interval: Duration,
        max_wait: Option<Duration>,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.is_motion_done().await? {
                return Ok(());
            }
            if let Some(max_wait) = max_wait {
                if start.elapsed() >= max_wait {
                    return Err(InstrumentError::Timeout(max_wait));
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Motor power on.
    pub async fn enable(&mut self) -> Result<()> {
        self.cmd("MO", &[]).await.map(|_| ())
    }

    pub async fn disable(&mut self) -> Result<()> {
        self.cmd("MF", &[]).await.map(|_| ())
    }

    pub async fn search_for_home(&mut self, mode: HomeSearchMode) -> Result<()> {
        self.ctrl.search_for_home(self.axis_id, mode, true).await
    }

    /// Configures a stage that does not identify itself to the controller,
    /// stores the configuration and reads it back.
    pub async fn setup_axis(&mut self, setup: &AxisSetup) -> Result<AxisSetup> {
        if let Some(motor) = setup.motor_type {
            self.set_motor_type(motor).await?;
        }
        for param in SETUP_BEFORE_UNITS {
            if let Some(value) = setup.parameters.get(&param) {
                self.set(param, *value).await?;
            }
        }
        if let Some(units) = setup.units {
            self.set_units(units).await?;
        }
        for param in SETUP_AFTER_UNITS {
            if let Some(value) = setup.parameters.get(&param) {
                self.set(param, *value).await?;
            }
        }
        if let Some((time, percentage)) = setup.reduce_motor_torque {
            let ms = time.with_default_unit(MILLISECOND).magnitude_in(MILLISECOND)? as i64;
            if !(0..=60000).contains(&ms) {
                return Err(InstrumentError::OutOfRange(
                    "Time must be between 0 and 60000 ms".to_string(),
                ));
            }
            let percent = percentage.with_default_unit(PERCENT).magnitude_in(PERCENT)? as i64;
            if !(0..=100).contains(&percent) {
                return Err(InstrumentError::OutOfRange(
                    "Percentage must be between 0 and 100".to_string(),
                ));
            }
            self.cmd("QR", &[ms.to_string(), percent.to_string()]).await?;
        }
        self.cmd("UF", &[]).await?;
        self.cmd("QD", &[]).await?;
        self.ctrl.command(None, "SM", &[]).await?;
        self.read_setup().await
    }

    /// Reads the units, motor type and numeric settings of the axis.
    pub async fn read_setup(&mut self) -> Result<AxisSetup> {
        let mut setup = AxisSetup {
            units: Some(self.units),
            motor_type: Some(self.motor_type().await?),
            ..AxisSetup::default()
        };
        for param in READ_SETUP {
            let value = self.get(param).await?;
            setup.parameters.insert(param, value);
        }
        Ok(setup)
    }

    pub async fn status(&mut self) -> Result<AxisStatus> {
        Ok(AxisStatus {
            units: self.units,
            position: self.position().await?,
            desired_position: self.desired_position().await?,
            desired_velocity: self.desired_velocity().await?,
            is_motion_done: self.is_motion_done().await?,
        })
    }
}

#[async_trait]
impl OpenInstrument for NewportEsp301 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        inst.set_terminator("\r").await?;
        Ok(Self {
            inst,
            batch: None,
            programming: false,
        })
    }
}

#[async_trait]
impl Driver for NewportEsp301 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if let Some(("axis", idx, attr)) = path.indexed() {
            let mut axis = self.axis(idx).await?;
            return match attr {
                "units" => axis.set_units(value.as_enum()?).await,
                "motor_type" => axis.set_motor_type(value.as_enum()?).await,
                "position" => axis.move_to(value.as_magnitude()?, true).await,
                "enabled" => {
                    if value.as_bool()? {
                        axis.enable().await
                    } else {
                        axis.disable().await
                    }
                }
                other => match AxisParameter::from_name(other) {
                    Some(param) => axis.set(param, value.as_magnitude()?).await,
                    None => Err(unknown_attr(path)),
                },
            };
        }
        apply_base_attr(&mut self.inst, path, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};

    const OK: &str = "0, 451, NO ERROR DETECTED";

    async fn esp(host: &[&str], ins: &[&str]) -> (NewportEsp301, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\r");
        (NewportEsp301::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_command_checks_error_buffer() {
        let (mut esp, check) = esp(&["1MO", "TB?", "2MF", "TB?"], &[OK, "213, 1000, MOTOR NOT ENABLED"]).await;
        esp.command(Some(1), "mo", &[]).await.unwrap();
        let err = esp.command(Some(2), "MF", &[]).await.unwrap_err();
        match err {
            InstrumentError::Device { code, message } => {
                assert_eq!(code, 213);
                assert!(message.contains("Axis: 2."));
                assert!(message.contains("MOTOR NOT ENABLED"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        check.assert_done();
    }

    #[tokio::test]
    async fn test_reset_is_unchecked() {
        let (mut esp, check) = esp(&["RS"], &[]).await;
        esp.reset().await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_axis_reads_units() {
        let (mut esp, check) = esp(&["1SN?", "TB?", "1TP?", "TB?"], &["2", OK, "1.5", OK]).await;
        let mut axis = esp.axis(0).await.unwrap();
        assert_eq!(axis.units(), Esp301Units::Millimeter);
        assert_eq!(axis.position().await.unwrap(), 1.5 * MILLIMETER);
        check.assert_done();
        assert!(esp.axis(100).await.is_err());
    }

    #[tokio::test]
    async fn test_move() {
        let (mut esp, check) = esp(
            &["2SN?", "TB?", "2PA2.0", "TB?", "2PR-0.001", "TB?", "2PA1000.0", "TB?"],
            &["2", OK, OK, OK, OK],
        )
        .await;
        let mut axis = esp.axis(1).await.unwrap();
        axis.move_to(2.0, true).await.unwrap();
        axis.move_to(-0.001, false).await.unwrap();
        axis.move_to(1.0 * crate::units::METER, true).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_parameters() {
        let (mut esp, check) = esp(
            &[
                "1SN?", "TB?", "1VA?", "TB?", "1VA5.0", "TB?", "1KP?", "TB?", "1ZB?", "TB?",
                "1QS16", "TB?",
            ],
            &["2", OK, "2.5", OK, OK, "0.3E", OK, "1FH", OK, OK],
        )
        .await;
        let mut axis = esp.axis(0).await.unwrap();
        assert_eq!(axis.velocity().await.unwrap(), 2.5);
        axis.set_velocity(5.0).await.unwrap();
        assert_eq!(axis.get(AxisParameter::ProportionalGain).await.unwrap(), 0.3);
        assert_eq!(axis.get(AxisParameter::FeedbackConfiguration).await.unwrap(), 31.0);
        axis.set(AxisParameter::MicrostepFactor, 16).await.unwrap();
        let err = axis.set(AxisParameter::MicrostepFactor, 300).await.unwrap_err();
        assert_eq!(err.to_string(), "Microstep factor must be between 1 and 250");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_encoder_position_restores_units() {
        let (mut esp, check) = esp(
            &["1SN?", "TB?", "1SN0", "TB?", "1TP?", "TB?", "1SN7", "TB?"],
            &["7", OK, OK, "1234", OK, OK],
        )
        .await;
        let mut axis = esp.axis(0).await.unwrap();
        assert_eq!(axis.encoder_position().await.unwrap(), 1234.0);
        assert_eq!(axis.units(), Esp301Units::Degree);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_wait_for_motion() {
        let (mut esp, check) = esp(&["1SN?", "TB?", "1MD?", "TB?", "1MD?", "TB?"], &["2", OK, "0", OK, "1", OK]).await;
        let mut axis = esp.axis(0).await.unwrap();
        axis.wait_for_motion(Duration::from_millis(1), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_home_search() {
        let (mut esp, check) = esp(&["3OR1", "TB?", "1OR0"], &[OK]).await;
        esp.search_for_home(3, HomeSearchMode::HomeIndexSignals, true).await.unwrap();
        esp.search_for_home(1, HomeSearchMode::ZeroPositionCount, false).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_batch() {
        let (mut esp, check) = esp(&["1MO ; 1PA2.0", "TB?"], &[OK]).await;
        esp.begin_batch();
        esp.command(Some(1), "MO", &[]).await.unwrap();
        esp.command(Some(1), "PA", &["2.0".to_string()]).await.unwrap();
        assert_eq!(esp.execute_batch(true).await.unwrap(), None);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_define_and_run_program() {
        let (mut esp, check) = esp(
            &["15XX", "TB?", "15EP", "TB?", "1PR0.5", "QP", "TB?", "15EX", "TB?"],
            &[OK, OK, OK, OK],
        )
        .await;
        esp.define_program(15, |c| {
            Box::pin(async move {
                c.command(Some(1), "PR", &[format_float(0.5)]).await?;
                Ok(())
            })
        })
        .await
        .unwrap();
        esp.run_program(15).await.unwrap();
        let err = esp.run_program(101).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid program ID"));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_setup_axis() {
        let mut parameters = BTreeMap::new();
        parameters.insert(AxisParameter::Current, 1.0);
        parameters.insert(AxisParameter::Velocity, 2.0);
        let setup = AxisSetup {
            units: Some(Esp301Units::Millimeter),
            motor_type: Some(MotorType::DcServo),
            parameters,
            reduce_motor_torque: Some((Magnitude::from(100.0), Magnitude::from(50.0))),
        };
        let mut host = vec![
            "1SN?", "TB?", "1QM1", "TB?", "1QI1.0", "TB?", "1SN2", "TB?", "1VA2.0", "TB?",
            "1QR100,50", "TB?", "1UF", "TB?", "1QD", "TB?", "SM", "TB?", "1QM?", "TB?",
        ];
        let mut ins = vec!["0", OK, OK, OK, OK, OK, OK, OK, OK, OK, "1", OK];
        let read_cmds: Vec<String> = READ_SETUP
            .iter()
            .map(|p| format!("1{}?", p.command()))
            .collect();
        let replies: Vec<&str> = READ_SETUP
            .iter()
            .map(|p| match p {
                AxisParameter::FeedbackConfiguration => "A1H",
                AxisParameter::HardwareLimitConfiguration => "24H",
                AxisParameter::ProportionalGain => "0.5E",
                _ => "3",
            })
            .collect();
        for (cmd, reply) in read_cmds.iter().zip(&replies) {
            host.push(cmd);
            host.push("TB?");
            ins.push(*reply);
            ins.push(OK);
        }
        let (mut esp, check) = esp(&host, &ins).await;
        let mut axis = esp.axis(0).await.unwrap();
        let read = axis.setup_axis(&setup).await.unwrap();
        assert_eq!(read.units, Some(Esp301Units::Millimeter));
        assert_eq!(read.motor_type, Some(MotorType::DcServo));
        assert_eq!(read.parameters[&AxisParameter::FeedbackConfiguration], 161.0);
        assert_eq!(read.parameters[&AxisParameter::HardwareLimitConfiguration], 24.0);
        assert_eq!(read.parameters[&AxisParameter::ProportionalGain], 0.5);
        assert_eq!(read.parameters[&AxisParameter::Velocity], 3.0);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_axis_attrs() {
        let (mut esp, check) = esp(
            &["1SN?", "TB?", "1VA3.5", "TB?", "2SN?", "TB?", "2SN9", "TB?"],
            &["2", OK, OK, "2", OK, OK],
        )
        .await;
        esp.apply_attr(&AttrPath::parse("axis[0].velocity").unwrap(), &AttrValue::Float(3.5))
            .await
            .unwrap();
        esp.apply_attr(&AttrPath::parse("axis[1].units").unwrap(), &AttrValue::Str("Radian".into()))
            .await
            .unwrap();
        check.assert_done();
    }

    #[test]
    fn test_units_lookup() {
        assert_eq!(Esp301Units::from_unit(DEGREE).unwrap(), Esp301Units::Degree);
        assert_eq!(Esp301Units::from_unit(DIMENSIONLESS).unwrap(), Esp301Units::EncoderStep);
        assert!(Esp301Units::from_unit(VOLT).is_err());
    }
}
