//! Tektronix DPO 4104 four-channel oscilloscope.

use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{DataSource, Oscilloscope, Waveform};
use crate::property::{
    parse_float, parse_int, validate_index, BoolProperty, EnumProperty, NumFmt, UnitlessProperty,
};
use crate::Instrument;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

crate::scpi_enum! {
    pub enum TekDpo4104Coupling {
        Ac => "AC",
        Dc => "DC",
        Ground => "GND",
    }
}

const CHANNELS: usize = 4;
const REFERENCES: usize = 4;
/// Transfers stop at the end of the record when the stop point is past it.
const FULL_RECORD_STOP: u64 = 10_000_000;
const SOURCE_SETTLE: Duration = Duration::from_millis(10);
/// Firmware 2.48 drops the next query when it follows an encoding change
/// too closely.
const ENCODING_SETTLE: Duration = Duration::from_millis(20);

const COUPLING: EnumProperty<TekDpo4104Coupling> = EnumProperty::new("COUPL");
const ACQUISITION_RUNNING: BoolProperty = BoolProperty::new("ACQ:STATE").values("1", "0");
const Y_OFFSET: UnitlessProperty = UnitlessProperty::new("WFMP:YOF").format(NumFmt::Float);

async fn data_source_name(inst: &mut Instrument) -> Result<String> {
    Ok(inst.query("DAT:SOU?").await?.trim().to_string())
}

async fn select_source(inst: &mut Instrument, name: &str) -> Result<()> {
    inst.sendcmd(&format!("DAT:SOU {name}")).await?;
    tokio::time::sleep(SOURCE_SETTLE).await;
    Ok(())
}

async fn data_width(inst: &mut Instrument) -> Result<usize> {
    let width = inst.query_parse("DATA:WIDTH?", parse_int).await?;
    usize::try_from(width).map_err(|_| InstrumentError::parse(width.to_string(), "negative width"))
}

async fn query_float(inst: &mut Instrument, cmd: &str) -> Result<f64> {
    inst.query_parse(cmd, parse_float).await
}

/// Reads and scales the curve of the selected source over the whole
/// record.
async fn transfer_curve(inst: &mut Instrument, bin: bool) -> Result<Waveform> {
    let raw = if bin {
        inst.sendcmd("DAT:ENC RIB").await?;
        tokio::time::sleep(ENCODING_SETTLE).await;
        let width = data_width(inst).await?;
        inst.sendcmd("CURVE?").await?;
        let raw = inst.binblockread(width, None).await?;
        // trailing newline after the block
        inst.read_raw(Some(1)).await?;
        raw
    } else {
        inst.sendcmd("DAT:ENC ASCI").await?;
        tokio::time::sleep(ENCODING_SETTLE).await;
        let reply = inst.query("CURVE?").await?;
        reply
            .trim()
            .split(',')
            .map(parse_float)
            .collect::<Result<Vec<_>>>()?
    };

    let yoffs = Y_OFFSET.get(inst).await?;
    let ymult = query_float(inst, "WFMP:YMU?").await?;
    let yzero = query_float(inst, "WFMP:YZE?").await?;
    let y = raw.iter().map(|v| (v - yoffs) * ymult + yzero).collect();

    let xzero = query_float(inst, "WFMP:XZE?").await?;
    let xincr = query_float(inst, "WFMP:XIN?").await?;
    let points = inst.query_parse("WFMP:NR_P?", parse_int).await?;
    let x = (0..points.max(0))
        .map(|i| i as f64 * xincr + xzero)
        .collect();
    Ok(Waveform { x, y })
}

/// Selects `name`, widens the transfer to the full record, reads the
/// curve, then puts the stop point and the previous source back.
async fn read_source(inst: &mut Instrument, name: &str, bin: bool) -> Result<Waveform> {
    let previous = data_source_name(inst).await?;
    if previous != name {
        select_source(inst, name).await?;
    }
    let old_stop = inst.query("DAT:STOP?").await?.trim().to_string();
    inst.sendcmd(&format!("DAT:STOP {FULL_RECORD_STOP}")).await?;
    let result = transfer_curve(inst, bin).await;
    inst.sendcmd(&format!("DAT:STOP {old_stop}")).await?;
    if previous != name {
        debug!(source = %previous, "restoring data source");
        select_source(inst, &previous).await?;
    }
    result
}

/// A math or reference trace of a [`TekDpo4104`].
pub struct TekDpo4104DataSource<'a> {
    inst: &'a mut Instrument,
    name: String,
}

#[async_trait]
impl<'a> DataSource for TekDpo4104DataSource<'a> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        read_source(self.inst, &self.name, bin).await
    }
}

/// An analog input of a [`TekDpo4104`].
pub struct TekDpo4104Channel<'a> {
    inst: &'a mut Instrument,
    idx: usize,
}

impl<'a> TekDpo4104Channel<'a> {
    fn prefix(&self) -> String {
        format!("CH{}:", self.idx)
    }

    pub async fn coupling(&mut self) -> Result<TekDpo4104Coupling> {
        COUPLING.get_prefixed(self.inst, &self.prefix()).await
    }

    pub async fn set_coupling(&mut self, coupling: TekDpo4104Coupling) -> Result<()> {
        COUPLING.set_prefixed(self.inst, &self.prefix(), coupling).await
    }
}

#[async_trait]
impl<'a> DataSource for TekDpo4104Channel<'a> {
    fn name(&self) -> String {
        format!("CH{}", self.idx)
    }

    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        let name = self.name();
        read_source(self.inst, &name, bin).await
    }
}

/// Tektronix DPO 4104.
pub struct TekDpo4104 {
    inst: Instrument,
}

impl TekDpo4104 {
    pub const MODEL: &'static str = "TekDPO4104";

    /// Analog input `idx` (0-based).
    pub fn channel(&mut self, idx: usize) -> Result<TekDpo4104Channel<'_>> {
        let idx = validate_index(idx, CHANNELS)?;
        Ok(TekDpo4104Channel {
            inst: &mut self.inst,
            idx: idx + 1,
        })
    }

    /// Reference trace `idx` (0-based).
    pub fn reference(&mut self, idx: usize) -> Result<TekDpo4104DataSource<'_>> {
        let idx = validate_index(idx, REFERENCES)?;
        Ok(TekDpo4104DataSource {
            inst: &mut self.inst,
            name: format!("REF{}", idx + 1),
        })
    }

    pub fn math(&mut self) -> TekDpo4104DataSource<'_> {
        TekDpo4104DataSource {
            inst: &mut self.inst,
            name: "MATH".to_string(),
        }
    }

    /// Name of the source selected for waveform transfer, e.g. `CH1`.
    pub async fn data_source(&mut self) -> Result<String> {
        data_source_name(&mut self.inst).await
    }

    pub async fn set_data_source(&mut self, name: &str) -> Result<()> {
        select_source(&mut self.inst, name).await
    }

    /// Record length in points.
    pub async fn acquisition_length(&mut self) -> Result<i64> {
        self.inst.query_parse("HOR:RECO?", parse_int).await
    }

    pub async fn set_acquisition_length(&mut self, points: i64) -> Result<()> {
        self.inst.sendcmd(&format!("HOR:RECO {points}")).await
    }

    pub async fn acquisition_running(&mut self) -> Result<bool> {
        ACQUISITION_RUNNING.get(&mut self.inst).await
    }

    pub async fn set_acquisition_running(&mut self, on: bool) -> Result<()> {
        ACQUISITION_RUNNING.set(&mut self.inst, on).await
    }

    /// True in run/stop mode, false when acquisition halts after the next
    /// sequence.
    pub async fn acquisition_continuous(&mut self) -> Result<bool> {
        Ok(self.inst.query("ACQ:STOPA?").await?.trim().starts_with("RUNST"))
    }

    pub async fn set_acquisition_continuous(&mut self, on: bool) -> Result<()> {
        let mode = if on { "RUNST" } else { "SEQ" };
        self.inst.sendcmd(&format!("ACQ:STOPA {mode}")).await
    }

    /// Bytes per transferred sample, 1 or 2.
    pub async fn data_width(&mut self) -> Result<usize> {
        data_width(&mut self.inst).await
    }

    pub async fn set_data_width(&mut self, width: usize) -> Result<()> {
        if !(1..=2).contains(&width) {
            return Err(InstrumentError::OutOfRange(
                "Only one or two byte-width is supported.".to_string(),
            ));
        }
        self.inst.sendcmd(&format!("DATA:WIDTH {width}")).await
    }

    /// Vertical offset of the selected source, in digitizer levels.
    pub async fn y_offset(&mut self) -> Result<f64> {
        Y_OFFSET.get(&mut self.inst).await
    }

    pub async fn set_y_offset(&mut self, offset: f64) -> Result<()> {
        Y_OFFSET.set(&mut self.inst, offset).await
    }
}

#[async_trait]
impl OpenInstrument for TekDpo4104 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for TekDpo4104 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.indexed() {
            Some(("channel", idx, "coupling")) => {
                return self.channel(idx)?.set_coupling(value.as_enum()?).await
            }
            Some(_) => return Err(unknown_attr(path)),
            None => {}
        }
        match path.simple() {
            Some("data_source") => self.set_data_source(value.as_str()?).await,
            Some("data_width") => self.set_data_width(value.as_usize()?).await,
            Some("acquisition_length") => self.set_acquisition_length(value.as_i64()?).await,
            Some("acquisition_running") => self.set_acquisition_running(value.as_bool()?).await,
            Some("acquisition_continuous") => self.set_acquisition_continuous(value.as_bool()?).await,
            Some("y_offset") => self.set_y_offset(value.as_f64()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for TekDpo4104 {}

#[async_trait]
impl Oscilloscope for TekDpo4104 {
    /// Distinct from `*TRG`.
    async fn force_trigger(&mut self) -> Result<()> {
        self.inst.sendcmd("TRIG FORCE").await
    }
}
