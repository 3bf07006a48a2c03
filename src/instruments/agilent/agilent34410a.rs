//! Agilent 34410A 6.5 digit multimeter.
//!
//! Also covers the 34401A, 34411A and the compatibility mode of the
//! 34460A/34461A.

use crate::driver::{AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::Result;
use crate::generic_scpi::{
    apply_multimeter_attr, conf_input_range, conf_mode, measure_mode, set_conf_input_range,
    set_conf_mode, set_trigger_source, trigger_source, MultimeterMode, ScpiInstrument,
    ScpiMultimeterExt, TriggerMode,
};
use crate::instrument::capabilities::{InputRange, Multimeter};
use crate::instrument::BlockFormat;
use crate::property::{parse_float, parse_int};
use crate::units::{split_unit_str, Quantity, Unit, DIMENSIONLESS};
use crate::Instrument;
use async_trait::async_trait;

/// Reply of `DATA:LAST?` when reading memory is empty.
const NO_DATA: &str = "9.91000000E+37";

fn parse_list(reply: &str, unit: Unit) -> Result<Vec<Quantity>> {
    reply
        .split(',')
        .map(|v| parse_float(v).map(|v| Quantity::new(v, unit)))
        .collect()
}

fn parse_last(reply: &str) -> Result<Option<Quantity>> {
    let reply = reply.trim();
    if reply == NO_DATA {
        return Ok(None);
    }
    let normalized = reply.replace("VDC", "V").replace("VAC", "V");
    let (value, unit) = split_unit_str(&normalized, DIMENSIONLESS)?;
    Ok(Some(Quantity::new(value, unit)))
}

/// Agilent/Keysight 34410A.
pub struct Agilent34410a {
    inst: Instrument,
}

impl Agilent34410a {
    pub const MODEL: &'static str = "Agilent34410a";

    /// Number of readings in reading memory.
    pub async fn data_point_count(&mut self) -> Result<i64> {
        self.inst.query_parse("DATA:POIN?", parse_int).await
    }

    /// Moves from idle to wait-for-trigger. Clears previous readings.
    pub async fn init(&mut self) -> Result<()> {
        self.inst.sendcmd("INIT").await
    }

    pub async fn abort(&mut self) -> Result<()> {
        self.inst.sendcmd("ABOR").await
    }

    /// Clears non-volatile reading memory.
    pub async fn clear_memory(&mut self) -> Result<()> {
        self.inst.sendcmd("DATA:DEL NVMEM").await
    }

    /// Takes `count` readings (all available when 0) and transfers them as
    /// 64-bit floats, erasing them from memory.
    pub async fn r(&mut self, count: usize) -> Result<Vec<Quantity>> {
        let unit = conf_mode(&mut self.inst).await?.unit();
        let cmd = if count == 0 {
            "R?".to_string()
        } else {
            format!("R? {count}")
        };
        self.inst.sendcmd("FORM:DATA REAL,64").await?;
        self.inst.sendcmd(&cmd).await?;
        let data = self.inst.binblockread(8, Some(BlockFormat::F64Be)).await?;
        Ok(data.into_iter().map(|v| Quantity::new(v, unit)).collect())
    }

    /// Copies readings to the output buffer as ASCII without erasing them.
    pub async fn fetch(&mut self) -> Result<Vec<Quantity>> {
        let unit = conf_mode(&mut self.inst).await?.unit();
        self.inst.query_parse("FETC?", |r| parse_list(r, unit)).await
    }

    /// Transfers and erases the oldest `sample_count` readings, or all of
    /// them when `None`.
    pub async fn read_data(&mut self, sample_count: Option<usize>) -> Result<Vec<Quantity>> {
        let count = match sample_count {
            Some(n) => n as i64,
            None => self.data_point_count().await?,
        };
        let unit = conf_mode(&mut self.inst).await?.unit();
        self.inst.sendcmd("FORM:DATA ASC").await?;
        let reply = self.inst.query(&format!("DATA:REM? {count}")).await?;
        parse_list(&reply, unit)
    }

    /// All readings in non-volatile memory.
    pub async fn read_data_nvmem(&mut self) -> Result<Vec<Quantity>> {
        let unit = conf_mode(&mut self.inst).await?.unit();
        self.inst
            .query_parse("DATA:DATA? NVMEM", |r| parse_list(r, unit))
            .await
    }

    /// Last reading taken, with the unit the meter reports; `None` when
    /// memory is empty.
    pub async fn read_last_data(&mut self) -> Result<Option<Quantity>> {
        self.inst.query_parse("DATA:LAST?", parse_last).await
    }

    /// Equivalent to [`init`](Self::init) followed by [`fetch`](Self::fetch)
    /// for a single reading.
    pub async fn read_meter(&mut self) -> Result<Quantity> {
        let unit = conf_mode(&mut self.inst).await?.unit();
        let value = self.inst.query_parse("READ?", parse_float).await?;
        Ok(Quantity::new(value, unit))
    }
}

#[async_trait]
impl OpenInstrument for Agilent34410a {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Agilent34410a {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        apply_multimeter_attr(self, path, value).await
    }
}

impl ScpiInstrument for Agilent34410a {}

impl ScpiMultimeterExt for Agilent34410a {}

#[async_trait]
impl Multimeter for Agilent34410a {
    type Mode = MultimeterMode;
    type TriggerMode = TriggerMode;

    async fn mode(&mut self) -> Result<MultimeterMode> {
        conf_mode(&mut self.inst).await
    }

    async fn set_mode(&mut self, mode: MultimeterMode) -> Result<()> {
        set_conf_mode(&mut self.inst, mode).await
    }

    async fn trigger_mode(&mut self) -> Result<TriggerMode> {
        trigger_source(&mut self.inst).await
    }

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        set_trigger_source(&mut self.inst, mode).await
    }

    async fn input_range(&mut self) -> Result<InputRange> {
        conf_input_range(&mut self.inst).await
    }

    async fn set_input_range(&mut self, range: InputRange) -> Result<()> {
        set_conf_input_range(&mut self.inst, range).await
    }

    async fn measure(&mut self, mode: Option<MultimeterMode>) -> Result<Quantity> {
        let mode = match mode {
            Some(mode) => mode,
            None => conf_mode(&mut self.inst).await?,
        };
        measure_mode(&mut self.inst, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, expected_protocol_raw, ProtocolCheck};
    use crate::units::{OHM, VOLT};

    const CONF_VOLT: &str = "VOLT +1.000000E+01,+3.000000E-06";

    async fn dmm(host: &[&str], ins: &[&str]) -> (Agilent34410a, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Agilent34410a::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_read_meter() {
        let (mut dmm, check) = dmm(&["CONF?", "READ?"], &[CONF_VOLT, "+1.86850000E-03"]).await;
        assert_eq!(dmm.read_meter().await.unwrap(), 1.8685e-3 * VOLT);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_data_point_count() {
        let (mut dmm, check) = dmm(&["DATA:POIN?"], &["+215"]).await;
        assert_eq!(dmm.data_point_count().await.unwrap(), 215);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_state_commands() {
        let (mut dmm, check) = dmm(&["INIT", "ABOR", "DATA:DEL NVMEM"], &[]).await;
        dmm.init().await.unwrap();
        dmm.abort().await.unwrap();
        dmm.clear_memory().await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_r_reads_binary_block() {
        let mut block = b"#18".to_vec();
        block.extend_from_slice(&1.0f64.to_be_bytes());
        let (inst, check) = expected_protocol_raw(
            &["CONF?", "FORM:DATA REAL,64", "R? 1"],
            &[CONF_VOLT.as_bytes(), &block],
            "\n",
        );
        let mut dmm = Agilent34410a::open(inst).await.unwrap();
        assert_eq!(dmm.r(1).await.unwrap(), vec![1.0 * VOLT]);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_fetch() {
        let (mut dmm, check) = dmm(
            &["CONF?", "FETC?"],
            &[CONF_VOLT, "+4.27150000E-03,5.27150000E-03"],
        )
        .await;
        let data = dmm.fetch().await.unwrap();
        assert_eq!(data, vec![4.2715e-3 * VOLT, 5.2715e-3 * VOLT]);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_data() {
        let (mut dmm, check) = dmm(
            &["CONF?", "FORM:DATA ASC", "DATA:REM? 2"],
            &[CONF_VOLT, "+4.27150000E-03,5.27150000E-03"],
        )
        .await;
        let data = dmm.read_data(Some(2)).await.unwrap();
        assert_eq!(data[1], 5.2715e-3 * VOLT);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_all_data() {
        let (mut dmm, check) = dmm(
            &["DATA:POIN?", "CONF?", "FORM:DATA ASC", "DATA:REM? 1"],
            &["+1", "RES +1.000000E+03,+1.000000E-03", "+9.9E+02"],
        )
        .await;
        assert_eq!(dmm.read_data(None).await.unwrap(), vec![990.0 * OHM]);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_data_nvmem() {
        let (mut dmm, check) = dmm(
            &["CONF?", "DATA:DATA? NVMEM"],
            &[CONF_VOLT, "+4.27150000E-03,5.27150000E-03"],
        )
        .await;
        assert_eq!(dmm.read_data_nvmem().await.unwrap().len(), 2);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_read_last_data() {
        let (mut dmm, check) = dmm(
            &["DATA:LAST?", "DATA:LAST?"],
            &["+1.73730000E-03 VDC", "9.91000000E+37"],
        )
        .await;
        assert_eq!(dmm.read_last_data().await.unwrap(), Some(1.7373e-3 * VOLT));
        assert_eq!(dmm.read_last_data().await.unwrap(), None);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_measure_uses_scpi_subsystem() {
        let (mut dmm, check) = dmm(&["MEAS:RES?"], &["+1.000000E+02"]).await;
        let value = dmm.measure(Some(MultimeterMode::Resistance)).await.unwrap();
        assert_eq!(value, 100.0 * OHM);
        check.assert_done();
    }
}
