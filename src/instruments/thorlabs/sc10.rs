//! Thorlabs SC10 optical beam shutter controller.

use super::{check_cmd, configure_serial_controller};
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::property::{
    parse_int, BoolProperty, EnumProperty, IntProperty, NumFmt, SetFmt, UnitfulProperty, ValidSet,
};
use crate::units::{Magnitude, Quantity, MILLISECOND};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum Sc10Mode {
        Manual => "1",
        Auto => "2",
        Single => "3",
        Repeat => "4",
        External => "5",
    }
}

const fn flag(command: &'static str) -> BoolProperty {
    BoolProperty::new(command)
        .values("1", "0")
        .set_fmt(SetFmt::Equals)
}

const fn millis(command: &'static str) -> UnitfulProperty {
    UnitfulProperty::new(command, MILLISECOND)
        .format(NumFmt::Fixed(0))
        .set_fmt(SetFmt::Equals)
        .fixed_range(0.0, 999_999.0)
}

const ENABLE: BoolProperty = flag("ens");
const CLOSED: BoolProperty = flag("closed");
const INTERLOCK: BoolProperty = flag("interlock");
const REPEAT: IntProperty = IntProperty::new("rep")
    .set_fmt(SetFmt::Equals)
    .valid(ValidSet::Range(1, 99));
const MODE: EnumProperty<Sc10Mode> = EnumProperty::new("mode").set_fmt(SetFmt::Equals);
const TRIGGER: IntProperty = IntProperty::new("trig")
    .set_fmt(SetFmt::Equals)
    .valid(ValidSet::Range(0, 1));
const OUT_TRIGGER: IntProperty = IntProperty::new("xto")
    .set_fmt(SetFmt::Equals)
    .valid(ValidSet::Range(0, 1));
const OPEN_TIME: UnitfulProperty = millis("open");
const SHUT_TIME: UnitfulProperty = millis("shut");

/// Thorlabs SC10.
pub struct Sc10 {
    inst: Instrument,
}

impl Sc10 {
    pub const MODEL: &'static str = "SC10";

    /// Name and firmware version.
    pub async fn name(&mut self) -> Result<String> {
        self.inst.query("id?").await
    }

    /// Whether the shutter is enabled.
    pub async fn enable(&mut self) -> Result<bool> {
        ENABLE.get(&mut self.inst).await
    }

    pub async fn set_enable(&mut self, on: bool) -> Result<()> {
        ENABLE.set(&mut self.inst, on).await
    }

    /// Cycles in repeat mode, 1 to 99.
    pub async fn repeat(&mut self) -> Result<i64> {
        REPEAT.get(&mut self.inst).await
    }

    pub async fn set_repeat(&mut self, count: i64) -> Result<()> {
        REPEAT.set(&mut self.inst, count).await
    }

    pub async fn mode(&mut self) -> Result<Sc10Mode> {
        MODE.get(&mut self.inst).await
    }

    pub async fn set_mode(&mut self, mode: Sc10Mode) -> Result<()> {
        MODE.set(&mut self.inst, mode).await
    }

    /// 0 for the internal trigger, 1 for external.
    pub async fn trigger(&mut self) -> Result<i64> {
        TRIGGER.get(&mut self.inst).await
    }

    pub async fn set_trigger(&mut self, source: i64) -> Result<()> {
        TRIGGER.set(&mut self.inst, source).await
    }

    /// 0 when trigger out follows the shutter, 1 when it follows the
    /// controller.
    pub async fn out_trigger(&mut self) -> Result<i64> {
        OUT_TRIGGER.get(&mut self.inst).await
    }

    pub async fn set_out_trigger(&mut self, source: i64) -> Result<()> {
        OUT_TRIGGER.set(&mut self.inst, source).await
    }

    pub async fn open_time(&mut self) -> Result<Quantity> {
        OPEN_TIME.get(&mut self.inst).await
    }

    pub async fn set_open_time(&mut self, time: impl Into<Magnitude> + Send) -> Result<()> {
        OPEN_TIME.set(&mut self.inst, time).await
    }

    pub async fn shut_time(&mut self) -> Result<Quantity> {
        SHUT_TIME.get(&mut self.inst).await
    }

    pub async fn set_shut_time(&mut self, time: impl Into<Magnitude> + Send) -> Result<()> {
        SHUT_TIME.set(&mut self.inst, time).await
    }

    /// Either 9600 or 115200.
    pub async fn baud_rate(&mut self) -> Result<u32> {
        let fast = self.inst.query_parse("baud?", parse_int).await?;
        Ok(if fast != 0 { 115_200 } else { 9600 })
    }

    pub async fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        let code = match baud {
            9600 => 0,
            115_200 => 1,
            _ => {
                return Err(InstrumentError::InvalidValue(
                    "Invalid baud rate mode".to_string(),
                ))
            }
        };
        self.inst.sendcmd(&format!("baud={code}")).await
    }

    pub async fn closed(&mut self) -> Result<bool> {
        CLOSED.get(&mut self.inst).await
    }

    /// Whether the interlock is tripped.
    pub async fn interlock(&mut self) -> Result<bool> {
        INTERLOCK.get(&mut self.inst).await
    }

    async fn command(&mut self, cmd: &str) -> Result<bool> {
        let reply = self.inst.query(cmd).await?;
        Ok(check_cmd(&reply))
    }

    /// Restores factory settings.
    pub async fn default(&mut self) -> Result<bool> {
        self.command("default").await
    }

    /// Stores the parameters in static memory.
    pub async fn save(&mut self) -> Result<bool> {
        self.command("savp").await
    }

    /// Stores the output trigger mode and baud rate.
    pub async fn save_mode(&mut self) -> Result<bool> {
        self.command("save").await
    }

    /// Loads the stored parameters.
    pub async fn restore(&mut self) -> Result<bool> {
        self.command("resp").await
    }
}

#[async_trait]
impl OpenInstrument for Sc10 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        configure_serial_controller(&mut inst).await?;
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Sc10 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.simple() {
            Some("enable") => self.set_enable(value.as_bool()?).await,
            Some("repeat") => self.set_repeat(value.as_i64()?).await,
            Some("mode") => self.set_mode(value.as_enum()?).await,
            Some("trigger") => self.set_trigger(value.as_i64()?).await,
            Some("out_trigger") => self.set_out_trigger(value.as_i64()?).await,
            Some("open_time") => self.set_open_time(value.as_magnitude()?).await,
            Some("shut_time") => self.set_shut_time(value.as_magnitude()?).await,
            Some("baud_rate") => {
                let baud = u32::try_from(value.as_i64()?)
                    .map_err(|_| InstrumentError::InvalidValue("Invalid baud rate mode".into()))?;
                self.set_baud_rate(baud).await
            }
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}
