//! Tektronix TDS 224 four-channel 100 MHz oscilloscope.

use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::instrument::capabilities::{DataSource, Oscilloscope, Waveform};
use crate::property::{parse_float, parse_int, validate_index, EnumProperty};
use crate::Instrument;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

crate::scpi_enum! {
    pub enum Tds224Coupling {
        Ac => "AC",
        Dc => "DC",
        Ground => "GND",
    }
}

const CHANNELS: usize = 4;
const REFERENCES: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Pause after switching the transfer source.
const SOURCE_SETTLE: Duration = Duration::from_millis(10);

const COUPLING: EnumProperty<Tds224Coupling> = EnumProperty::new("COUPL");

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

/// Transfers the curve of the currently selected source and scales it.
async fn transfer_curve(inst: &mut Instrument, name: &str, bin: bool) -> Result<Waveform> {
    let raw = if bin {
        inst.sendcmd("DAT:ENC RIB").await?;
        let width = data_width(inst).await?;
        inst.sendcmd("CURVE?").await?;
        let raw = inst.binblockread(width, None).await?;
        inst.flush_input().await?;
        raw
    } else {
        inst.sendcmd("DAT:ENC ASCI").await?;
        let reply = inst.query("CURVE?").await?;
        reply
            .trim()
            .split(',')
            .map(parse_float)
            .collect::<Result<Vec<_>>>()?
    };

    let yoffs = query_float(inst, &format!("WFMP:{name}:YOF?")).await?;
    let ymult = query_float(inst, &format!("WFMP:{name}:YMU?")).await?;
    let yzero = query_float(inst, &format!("WFMP:{name}:YZE?")).await?;
    let y = raw.iter().map(|v| (v - yoffs) * ymult + yzero).collect();

    let xzero = query_float(inst, "WFMP:XZE?").await?;
    let xincr = query_float(inst, "WFMP:XIN?").await?;
    let points = query_float(inst, &format!("WFMP:{name}:NR_P?")).await?;
    let x = (0..points.max(0.0) as usize)
        .map(|i| i as f64 * xincr + xzero)
        .collect();
    Ok(Waveform { x, y })
}

/// Selects `name` for transfer, reads its curve and restores the previous
/// source, also when the transfer fails.
async fn read_source(inst: &mut Instrument, name: &str, bin: bool) -> Result<Waveform> {
    let previous = data_source_name(inst).await?;
    if previous != name {
        select_source(inst, name).await?;
    }
    let result = transfer_curve(inst, name, bin).await;
    if previous != name {
        debug!(source = %previous, "restoring data source");
        select_source(inst, &previous).await?;
    }
    result
}

/// A math or reference trace of a [`TekTds224`].
pub struct TekTds224DataSource<'a> {
    inst: &'a mut Instrument,
    name: String,
}

#[async_trait]
impl<'a> DataSource for TekTds224DataSource<'a> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        read_source(self.inst, &self.name, bin).await
    }
}

/// An analog input of a [`TekTds224`].
pub struct TekTds224Channel<'a> {
    inst: &'a mut Instrument,
    idx: usize,
}

impl<'a> TekTds224Channel<'a> {
    fn prefix(&self) -> String {
        format!("CH{}:", self.idx)
    }

    pub async fn coupling(&mut self) -> Result<Tds224Coupling> {
        COUPLING.get_prefixed(self.inst, &self.prefix()).await
    }

    pub async fn set_coupling(&mut self, coupling: Tds224Coupling) -> Result<()> {
        COUPLING.set_prefixed(self.inst, &self.prefix(), coupling).await
    }
}

#[async_trait]
impl<'a> DataSource for TekTds224Channel<'a> {
    fn name(&self) -> String {
        format!("CH{}", self.idx)
    }

    async fn read_waveform(&mut self, bin: bool) -> Result<Waveform> {
        let name = self.name();
        read_source(self.inst, &name, bin).await
    }
}

/// Tektronix TDS 224.
pub struct TekTds224 {
    inst: Instrument,
}

impl TekTds224 {
    pub const MODEL: &'static str = "TekTDS224";

    /// Analog input `idx` (0-based).
    pub fn channel(&mut self, idx: usize) -> Result<TekTds224Channel<'_>> {
        let idx = validate_index(idx, CHANNELS)?;
        Ok(TekTds224Channel {
            inst: &mut self.inst,
            idx: idx + 1,
        })
    }

    /// Reference trace `idx` (0-based).
    pub fn reference(&mut self, idx: usize) -> Result<TekTds224DataSource<'_>> {
        let idx = validate_index(idx, REFERENCES)?;
        Ok(TekTds224DataSource {
            inst: &mut self.inst,
            name: format!("REF{}", idx + 1),
        })
    }

    pub fn math(&mut self) -> TekTds224DataSource<'_> {
        TekTds224DataSource {
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
}

#[async_trait]
impl OpenInstrument for TekTds224 {
    async fn open(mut inst: Instrument) -> Result<Self> {
        inst.set_timeout(DEFAULT_TIMEOUT).await?;
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for TekTds224 {
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
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for TekTds224 {}

/// Forcing a trigger is not available over the bus.
impl Oscilloscope for TekTds224 {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, expected_protocol_raw, ProtocolCheck};

    async fn scope(host: &[&str], ins: &[&str]) -> (TekTds224, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (TekTds224::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_open_sets_timeout() {
        let (mut tek, _check) = scope(&[], &[]).await;
        assert_eq!(tek.instrument().timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_source_names() {
        let (mut tek, check) = scope(&[], &[]).await;
        assert_eq!(tek.math().name(), "MATH");
        assert_eq!(tek.reference(0).unwrap().name(), "REF1");
        assert_eq!(tek.channel(3).unwrap().name(), "CH4");
        assert!(tek.channel(4).is_err());
        assert!(tek.reference(4).is_err());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_data_width() {
        let (mut tek, check) = scope(&["DATA:WIDTH?", "DATA:WIDTH 1"], &["2"]).await;
        assert_eq!(tek.data_width().await.unwrap(), 2);
        tek.set_data_width(1).await.unwrap();
        for width in [0, 3, 42] {
            let err = tek.set_data_width(width).await.unwrap_err();
            assert_eq!(err.to_string(), "Only one or two byte-width is supported.");
        }
        check.assert_done();
    }

    #[tokio::test]
    async fn test_data_source() {
        let (mut tek, check) = scope(&["DAT:SOU?", "DAT:SOU?", "DAT:SOU MATH"], &["MATH", "CH1"]).await;
        assert_eq!(tek.data_source().await.unwrap(), tek.math().name());
        assert_eq!(tek.data_source().await.unwrap(), "CH1");
        let math = tek.math().name();
        tek.set_data_source(&math).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_channel_coupling() {
        let (mut tek, check) = scope(&["CH1:COUPL?", "CH2:COUPL AC"], &["DC"]).await;
        assert_eq!(tek.channel(0).unwrap().coupling().await.unwrap(), Tds224Coupling::Dc);
        tek.channel(1).unwrap().set_coupling(Tds224Coupling::Ac).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_waveform_binary() {
        let mut block = b"#210".to_vec();
        block.extend_from_slice(&[0, 0, 0, 1, 0, 2, 0, 3, 0, 4]);
        block.push(b'0');
        let replies: [&[u8]; 8] = [b"CH1", b"2", &block, b"1", b"0", b"0", b"1", b"5"];
        let (inst, check) = expected_protocol_raw(
            &[
                "DAT:SOU?",
                "DAT:SOU CH2",
                "DAT:ENC RIB",
                "DATA:WIDTH?",
                "CURVE?",
                "WFMP:CH2:YOF?",
                "WFMP:CH2:YMU?",
                "WFMP:CH2:YZE?",
                "WFMP:XZE?",
                "WFMP:XIN?",
                "WFMP:CH2:NR_P?",
                "DAT:SOU CH1",
            ],
            &replies,
            "\n",
        );
        let mut tek = TekTds224::open(inst).await.unwrap();
        let waveform = tek.channel(1).unwrap().read_waveform(true).await.unwrap();
        let expected: Vec<f64> = (0..5).map(f64::from).collect();
        assert_eq!(waveform.x, expected);
        assert_eq!(waveform.y, expected);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_waveform_ascii() {
        let (mut tek, check) = scope(
            &[
                "DAT:SOU?",
                "DAT:SOU CH2",
                "DAT:ENC ASCI",
                "CURVE?",
                "WFMP:CH2:YOF?",
                "WFMP:CH2:YMU?",
                "WFMP:CH2:YZE?",
                "WFMP:XZE?",
                "WFMP:XIN?",
                "WFMP:CH2:NR_P?",
                "DAT:SOU CH1",
            ],
            &["CH1", "1.5,2.0,-3.0", "1", "2", "0.5", "0", "0.5", "3"],
        )
        .await;
        let waveform = tek.channel(1).unwrap().read_waveform(false).await.unwrap();
        assert_eq!(waveform.y, vec![1.5, 2.5, -7.5]);
        assert_eq!(waveform.x, vec![0.0, 0.5, 1.0]);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_waveform_keeps_selected_source() {
        let (mut tek, check) = scope(
            &[
                "DAT:SOU?",
                "DAT:ENC ASCI",
                "CURVE?",
                "WFMP:MATH:YOF?",
                "WFMP:MATH:YMU?",
                "WFMP:MATH:YZE?",
                "WFMP:XZE?",
                "WFMP:XIN?",
                "WFMP:MATH:NR_P?",
            ],
            &["MATH", "4", "0", "1", "0", "0", "1", "1"],
        )
        .await;
        let waveform = tek.math().read_waveform(false).await.unwrap();
        assert_eq!(waveform.y, vec![4.0]);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_force_trigger_not_supported() {
        let (mut tek, _check) = scope(&[], &[]).await;
        assert!(matches!(
            tek.force_trigger().await,
            Err(InstrumentError::NotSupported(_))
        ));
    }
}
