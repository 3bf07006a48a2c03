//! Rigol DS1000-series oscilloscopes.

use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{DataSource, Oscilloscope, Waveform};
use crate::property::{parse_int, validate_index, BoolProperty, EnumProperty};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    pub enum AcquisitionType {
        Normal => "NORM",
        Average => "AVER",
        PeakDetect => "PEAK",
    }
}

crate::scpi_enum! {
    pub enum Coupling {
        Ac => "AC",
        Dc => "DC",
        Ground => "GND",
    }
}

const CHANNELS: usize = 2;

/// Sources `:WAV:DATA?` can transfer.
const WAVEFORM_SOURCES: [&str; 5] = ["CHAN1", "CHAN2", "DIG", "MATH", "FFT"];

const ACQUIRE_TYPE: EnumProperty<AcquisitionType> = EnumProperty::new(":ACQ:TYPE");
const PANEL_LOCKED: BoolProperty = BoolProperty::new(":KEY:LOCK").values("ENAB", "DIS");

const COUPLING: EnumProperty<Coupling> = EnumProperty::new("COUP");
const BW_LIMIT: BoolProperty = BoolProperty::new("BWL");
const DISPLAY: BoolProperty = BoolProperty::new("DISP");
const INVERT: BoolProperty = BoolProperty::new("INV");
const FILTER: BoolProperty = BoolProperty::new("FILT");
const VERNIER: BoolProperty = BoolProperty::new("VERN");

async fn read_source(inst: &mut Instrument, name: &str, bin: bool) -> Result<Waveform> {
    if !WAVEFORM_SOURCES.contains(&name) {
        return Err(InstrumentError::NotSupported(format!(
            "Rigol DS1000 series does not support reading waveforms from {name}."
        )));
    }
    if !bin {
        return Err(InstrumentError::NotSupported(
            "ASCII waveform transfer on the DS1000".to_string(),
        ));
    }
    inst.sendcmd(&format!(":WAV:DATA? {name}")).await?;
    let y = inst.binblockread(2, None).await?;
    let x = (0..y.len()).map(|i| i as f64).collect();
    Ok(Waveform { x, y })
}

/// A math or reference trace of a [`RigolDs1000`].
pub struct RigolDataSource<'a> {
    inst: &'a mut Instrument,
    name: &'static str,
}

#[async_trait]
impl<'a> DataSource for RigolDataSource<'a> {
    fn name(&self) -> String {
        self.name.to_string()
    }

    /// Samples are returned raw, against their index.
    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        read_source(self.inst, self.name, bin).await
    }
}

/// An analog input of a [`RigolDs1000`].
pub struct RigolChannel<'a> {
    inst: &'a mut Instrument,
    idx: usize,
}

impl<'a> RigolChannel<'a> {
    fn prefix(&self) -> String {
        format!(":CHAN{}:", self.idx)
    }

    pub async fn coupling(&mut self) -> Result<Coupling> {
        COUPLING.get_prefixed(self.inst, &self.prefix()).await
    }

    pub async fn set_coupling(&mut self, coupling: Coupling) -> Result<()> {
        COUPLING.set_prefixed(self.inst, &self.prefix(), coupling).await
    }

    async fn flag(&mut self, prop: &BoolProperty) -> Result<bool> {
        prop.get_prefixed(self.inst, &self.prefix()).await
    }

    async fn set_flag(&mut self, prop: &BoolProperty, on: bool) -> Result<()> {
        prop.set_prefixed(self.inst, &self.prefix(), on).await
    }

    /// 20 MHz bandwidth limit.
    pub async fn bw_limit(&mut self) -> Result<bool> {
        self.flag(&BW_LIMIT).await
    }

    pub async fn set_bw_limit(&mut self, on: bool) -> Result<()> {
        self.set_flag(&BW_LIMIT, on).await
    }

    pub async fn display(&mut self) -> Result<bool> {
        self.flag(&DISPLAY).await
    }

    pub async fn set_display(&mut self, on: bool) -> Result<()> {
        self.set_flag(&DISPLAY, on).await
    }

    pub async fn invert(&mut self) -> Result<bool> {
        self.flag(&INVERT).await
    }

    pub async fn set_invert(&mut self, on: bool) -> Result<()> {
        self.set_flag(&INVERT, on).await
    }

    pub async fn filter(&mut self) -> Result<bool> {
        self.flag(&FILTER).await
    }

    pub async fn set_filter(&mut self, on: bool) -> Result<()> {
        self.set_flag(&FILTER, on).await
    }

    /// Fine adjustment of the vertical scale.
    pub async fn vernier(&mut self) -> Result<bool> {
        self.flag(&VERNIER).await
    }

    pub async fn set_vernier(&mut self, on: bool) -> Result<()> {
        self.set_flag(&VERNIER, on).await
    }
}

#[async_trait]
impl<'a> DataSource for RigolChannel<'a> {
    fn name(&self) -> String {
        format!("CHAN{}", self.idx)
    }

    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        let name = self.name();
        read_source(self.inst, &name, bin).await
    }
}

/// Rigol DS1000 series.
pub struct RigolDs1000 {
    inst: Instrument,
}

impl RigolDs1000 {
    pub const MODEL: &'static str = "RigolDS1000";

    /// Analog input `idx` (0-based).
    pub fn channel(&mut self, idx: usize) -> Result<RigolChannel<'_>> {
        let idx = validate_index(idx, CHANNELS)?;
        Ok(RigolChannel {
            inst: &mut self.inst,
            idx: idx + 1,
        })
    }

    pub fn math(&mut self) -> RigolDataSource<'_> {
        RigolDataSource {
            inst: &mut self.inst,
            name: "MATH",
        }
    }

    /// The reference trace. It cannot be read out.
    pub fn reference(&mut self) -> RigolDataSource<'_> {
        RigolDataSource {
            inst: &mut self.inst,
            name: "REF",
        }
    }

    pub async fn acquire_type(&mut self) -> Result<AcquisitionType> {
        ACQUIRE_TYPE.get(&mut self.inst).await
    }

    pub async fn set_acquire_type(&mut self, kind: AcquisitionType) -> Result<()> {
        ACQUIRE_TYPE.set(&mut self.inst, kind).await
    }

    /// Averages per acquisition in average mode.
    pub async fn acquire_averages(&mut self) -> Result<i64> {
        self.inst.query_parse(":ACQ:AVER?", parse_int).await
    }

    /// Accepts powers of two from 2 to 256.
    pub async fn set_acquire_averages(&mut self, averages: i64) -> Result<()> {
        let valid = (1..=8).map(|i| 1i64 << i).any(|v| v == averages);
        if !valid {
            return Err(InstrumentError::OutOfRange(format!(
                "Number of averages {averages} not supported by instrument; \
                 must be a power of 2 from 2 to 256."
            )));
        }
        self.inst.sendcmd(&format!(":ACQ:AVER {averages}")).await
    }

    pub async fn run(&mut self) -> Result<()> {
        self.inst.sendcmd(":RUN").await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.inst.sendcmd(":STOP").await
    }

    pub async fn panel_locked(&mut self) -> Result<bool> {
        PANEL_LOCKED.get(&mut self.inst).await
    }

    pub async fn set_panel_locked(&mut self, locked: bool) -> Result<()> {
        PANEL_LOCKED.set(&mut self.inst, locked).await
    }

    /// Releases any lockout of the front panel.
    pub async fn release_panel(&mut self) -> Result<()> {
        self.inst.sendcmd(":KEY:FORC").await
    }
}

#[async_trait]
impl OpenInstrument for RigolDs1000 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for RigolDs1000 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if let Some(("channel", idx, attr)) = path.indexed() {
            let mut channel = self.channel(idx)?;
            return match attr {
                "coupling" => channel.set_coupling(value.as_enum()?).await,
                "bw_limit" => channel.set_bw_limit(value.as_bool()?).await,
                "display" => channel.set_display(value.as_bool()?).await,
                "invert" => channel.set_invert(value.as_bool()?).await,
                "filter" => channel.set_filter(value.as_bool()?).await,
                "vernier" => channel.set_vernier(value.as_bool()?).await,
                _ => Err(unknown_attr(path)),
            };
        }
        match path.simple() {
            Some("acquire_type") => self.set_acquire_type(value.as_enum()?).await,
            Some("acquire_averages") => self.set_acquire_averages(value.as_i64()?).await,
            Some("panel_locked") => self.set_panel_locked(value.as_bool()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for RigolDs1000 {}

#[async_trait]
impl Oscilloscope for RigolDs1000 {
    async fn force_trigger(&mut self) -> Result<()> {
        self.inst.sendcmd(":FORC").await
    }
}
