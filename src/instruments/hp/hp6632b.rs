//! HP 6632B 20 V / 5 A system supply with a low-current readback range.
//!
//! It keeps the 6652A command set and adds output triggering, a sweep
//! digitizer and the fault/inhibit port. The same commands should work on
//! the 663xB and 661xC families.

use super::hp6652a::{
    apply_supply_attr, send_display_text, CURRENT, CURRENT_SENSE, DISPLAY_TEXTMODE, OUTPUT,
    OVERCURRENT, OVERVOLTAGE, VOLTAGE, VOLTAGE_SENSE,
};
use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::Result;
use crate::generic_scpi::{ErrorCode, ScpiInstrument};
use crate::instrument::capabilities::{not_supported, PowerSupplyChannel};
use crate::property::{
    parse_int, BoolProperty, EnumProperty, IntProperty, UnitfulProperty, UnitlessProperty, ValidSet,
};
use crate::units::{Magnitude, Quantity, AMPERE, SECOND, VOLT};
use crate::Instrument;
use async_trait::async_trait;
use tracing::debug;

crate::scpi_enum! {
    /// Automatic level control bandwidth. `Normal` keeps the output
    /// capacitor in circuit.
    pub enum AlcBandwidth {
        Normal => "15000",
        Fast => "60000",
    }
}

crate::scpi_enum! {
    /// Role of the fault/inhibit port.
    pub enum DigitalFunction {
        RemoteInhibit => "RIDF",
        Data => "DIG",
    }
}

crate::scpi_enum! {
    /// Events that drive the discrete fault indicator.
    pub enum DfiSource {
        Questionable => "QUES",
        Operation => "OPER",
        EventStatusBit => "ESB",
        RequestServiceBit => "RQS",
        Off => "OFF",
    }
}

crate::scpi_enum! {
    pub enum RemoteInhibit {
        Latching => "LATC",
        Live => "LIVE",
        Off => "OFF",
    }
}

crate::scpi_enum! {
    /// Digitizer window function.
    pub enum SenseWindow {
        Hanning => "HANN",
        Rectangular => "RECT",
    }
}

fn int_reply(reply: &str) -> String {
    parse_int(reply).map_or_else(|_| reply.to_string(), |v| v.to_string())
}

const VOLTAGE_ALC_BANDWIDTH: EnumProperty<AlcBandwidth> =
    EnumProperty::new("VOLT:ALC:BAND").input_decoration(int_reply);
const VOLTAGE_TRIGGER: UnitfulProperty = UnitfulProperty::new("VOLT:TRIG", VOLT);
const CURRENT_TRIGGER: UnitfulProperty = UnitfulProperty::new("CURR:TRIG", AMPERE);
const INIT_OUTPUT_CONTINUOUS: BoolProperty = BoolProperty::new("INIT:CONT:SEQ1").values("1", "0");
const CURRENT_SENSE_RANGE: UnitfulProperty = UnitfulProperty::new("SENS:CURR:RANGE", AMPERE);
const OUTPUT_DFI: BoolProperty = BoolProperty::new("OUTP:DFI").values("1", "0");
const OUTPUT_DFI_SOURCE: EnumProperty<DfiSource> = EnumProperty::new("OUTP:DFI:SOUR");
const OUTPUT_REMOTE_INHIBIT: EnumProperty<RemoteInhibit> = EnumProperty::new("OUTP:RI:MODE");
const DIGITAL_FUNCTION: EnumProperty<DigitalFunction> = EnumProperty::new("DIG:FUNC");
const DIGITAL_DATA: IntProperty = IntProperty::new("DIG:DATA").valid(ValidSet::Range(0, 7));
const SENSE_SWEEP_POINTS: UnitlessProperty = UnitlessProperty::new("SENS:SWE:POIN");
const SENSE_SWEEP_INTERVAL: UnitfulProperty = UnitfulProperty::new("SENS:SWE:TINT", SECOND);
const SENSE_WINDOW: EnumProperty<SenseWindow> = EnumProperty::new("SENS:WIND");
const OUTPUT_PROTECTION_DELAY: UnitfulProperty = UnitfulProperty::new("OUTP:PROT:DEL", SECOND);

/// Names of the error codes the 6632B reports beyond SCPI 1999.0.
pub fn device_error_name(code: i64) -> Option<&'static str> {
    let name = match code {
        -200 => "execution error",
        -222 => "data out of range",
        -223 => "too much data",
        -224 => "illegal parameter value",
        -225 => "out of memory",
        -270 => "macro error",
        -272 => "macro execution error",
        -273 => "illegal macro label",
        -276 => "macro recursion error",
        -277 => "macro redefinition not allowed",
        -310 => "system error",
        -350 => "too many errors",
        -400 => "query error",
        -410 => "query interrupted",
        -420 => "query unterminated",
        -430 => "query deadlocked",
        -440 => "query unterminated after indefinite response",
        1 => "RAM rd0 checksum failed",
        2 => "RAM config checksum failed",
        3 => "RAM cal checksum failed",
        4 => "RAM state checksum failed",
        5 => "RAM rst checksum failed",
        10 => "RAM selftest",
        11..=14 => "VDAC/IDAC selftest",
        15 => "OVDAC selftest",
        80 => "digital I/O selftest",
        213 => "ingrd receive buffer overrun",
        216 => "RS-232 receive framing error",
        217 => "RS-232 receive parity error",
        218 => "RS-232 receive overrun error",
        220 => "front panel UART overrun",
        221 => "front panel UART framing",
        222 => "front panel UART parity",
        223 => "front panel UART buffer overrun",
        224 => "front panel UART timeout",
        401 => "cal switch prevents calibration",
        402 => "cal password incorrect",
        403 => "cal not enabled",
        404 => "computed readback cal constants incorrect",
        405 => "computed programming cal constants incorrect",
        406 => "incorrect sequence of cal commands",
        407 => "CV or CC status incorrect",
        408 => "output mode must be normal",
        601 => "too many sweep points",
        602 => "command only applies to RS-232",
        603 => "CURR or VOLT fetch incompatible with last acquisition",
        604 => "measurement overrange",
        _ => return None,
    };
    Some(name)
}

/// HP 6632B. The supply is its own only channel.
pub struct Hp6632b {
    inst: Instrument,
}

impl Hp6632b {
    pub const MODEL: &'static str = "HP6632b";

    pub async fn voltage_sense(&mut self) -> Result<Quantity> {
        VOLTAGE_SENSE.get(&mut self.inst).await
    }

    pub async fn current_sense(&mut self) -> Result<Quantity> {
        CURRENT_SENSE.get(&mut self.inst).await
    }

    pub async fn overvoltage(&mut self) -> Result<Quantity> {
        OVERVOLTAGE.get(&mut self.inst).await
    }

    pub async fn set_overvoltage(&mut self, voltage: impl Into<Magnitude> + Send) -> Result<()> {
        OVERVOLTAGE.set(&mut self.inst, voltage).await
    }

    pub async fn overcurrent(&mut self) -> Result<bool> {
        OVERCURRENT.get(&mut self.inst).await
    }

    pub async fn set_overcurrent(&mut self, on: bool) -> Result<()> {
        OVERCURRENT.set(&mut self.inst, on).await
    }

    pub async fn display_textmode(&mut self) -> Result<bool> {
        DISPLAY_TEXTMODE.get(&mut self.inst).await
    }

    pub async fn set_display_textmode(&mut self, on: bool) -> Result<()> {
        DISPLAY_TEXTMODE.set(&mut self.inst, on).await
    }

    pub async fn display_text(&mut self, text: &str) -> Result<String> {
        send_display_text(&mut self.inst, text).await
    }

    pub async fn voltage_alc_bandwidth(&mut self) -> Result<AlcBandwidth> {
        VOLTAGE_ALC_BANDWIDTH.get(&mut self.inst).await
    }

    /// Output voltage applied on the next trigger. Not bounds-checked.
    pub async fn voltage_trigger(&mut self) -> Result<Quantity> {
        VOLTAGE_TRIGGER.get(&mut self.inst).await
    }

    pub async fn set_voltage_trigger(&mut self, voltage: impl Into<Magnitude> + Send) -> Result<()> {
        VOLTAGE_TRIGGER.set(&mut self.inst, voltage).await
    }

    pub async fn current_trigger(&mut self) -> Result<Quantity> {
        CURRENT_TRIGGER.get(&mut self.inst).await
    }

    pub async fn set_current_trigger(&mut self, current: impl Into<Magnitude> + Send) -> Result<()> {
        CURRENT_TRIGGER.set(&mut self.inst, current).await
    }

    /// When on, the output trigger system re-arms after every trigger.
    pub async fn init_output_continuous(&mut self) -> Result<bool> {
        INIT_OUTPUT_CONTINUOUS.get(&mut self.inst).await
    }

    pub async fn set_init_output_continuous(&mut self, on: bool) -> Result<()> {
        INIT_OUTPUT_CONTINUOUS.set(&mut self.inst, on).await
    }

    /// Readback range, selected by its full scale: 20 mA or less picks the
    /// low range.
    pub async fn current_sense_range(&mut self) -> Result<Quantity> {
        CURRENT_SENSE_RANGE.get(&mut self.inst).await
    }

    pub async fn set_current_sense_range(&mut self, range: impl Into<Magnitude> + Send) -> Result<()> {
        CURRENT_SENSE_RANGE.set(&mut self.inst, range).await
    }

    pub async fn output_dfi(&mut self) -> Result<bool> {
        OUTPUT_DFI.get(&mut self.inst).await
    }

    pub async fn set_output_dfi(&mut self, on: bool) -> Result<()> {
        OUTPUT_DFI.set(&mut self.inst, on).await
    }

    pub async fn output_dfi_source(&mut self) -> Result<DfiSource> {
        OUTPUT_DFI_SOURCE.get(&mut self.inst).await
    }

    pub async fn set_output_dfi_source(&mut self, source: DfiSource) -> Result<()> {
        OUTPUT_DFI_SOURCE.set(&mut self.inst, source).await
    }

    pub async fn output_remote_inhibit(&mut self) -> Result<RemoteInhibit> {
        OUTPUT_REMOTE_INHIBIT.get(&mut self.inst).await
    }

    pub async fn set_output_remote_inhibit(&mut self, mode: RemoteInhibit) -> Result<()> {
        OUTPUT_REMOTE_INHIBIT.set(&mut self.inst, mode).await
    }

    pub async fn digital_function(&mut self) -> Result<DigitalFunction> {
        DIGITAL_FUNCTION.get(&mut self.inst).await
    }

    pub async fn set_digital_function(&mut self, function: DigitalFunction) -> Result<()> {
        DIGITAL_FUNCTION.set(&mut self.inst, function).await
    }

    /// Value on the digital port, 0 to 7.
    pub async fn digital_data(&mut self) -> Result<i64> {
        DIGITAL_DATA.get(&mut self.inst).await
    }

    pub async fn set_digital_data(&mut self, data: i64) -> Result<()> {
        DIGITAL_DATA.set(&mut self.inst, data).await
    }

    pub async fn sense_sweep_points(&mut self) -> Result<f64> {
        SENSE_SWEEP_POINTS.get(&mut self.inst).await
    }

    pub async fn set_sense_sweep_points(&mut self, points: f64) -> Result<()> {
        SENSE_SWEEP_POINTS.set(&mut self.inst, points).await
    }

    /// Digitizer sample spacing, rounded by the supply to 15.6 us steps.
    pub async fn sense_sweep_interval(&mut self) -> Result<Quantity> {
        SENSE_SWEEP_INTERVAL.get(&mut self.inst).await
    }

    pub async fn set_sense_sweep_interval(&mut self, interval: impl Into<Magnitude> + Send) -> Result<()> {
        SENSE_SWEEP_INTERVAL.set(&mut self.inst, interval).await
    }

    pub async fn sense_window(&mut self) -> Result<SenseWindow> {
        SENSE_WINDOW.get(&mut self.inst).await
    }

    pub async fn set_sense_window(&mut self, window: SenseWindow) -> Result<()> {
        SENSE_WINDOW.set(&mut self.inst, window).await
    }

    /// Delay before a constant-current condition is latched; also delays
    /// overcurrent protection.
    pub async fn output_protection_delay(&mut self) -> Result<Quantity> {
        OUTPUT_PROTECTION_DELAY.get(&mut self.inst).await
    }

    pub async fn set_output_protection_delay(&mut self, delay: impl Into<Magnitude> + Send) -> Result<()> {
        OUTPUT_PROTECTION_DELAY.set(&mut self.inst, delay).await
    }

    /// Arms the output trigger system for the next trigger.
    pub async fn init_output_trigger(&mut self) -> Result<()> {
        self.inst.sendcmd("INIT:NAME TRAN").await
    }

    pub async fn abort_output_trigger(&mut self) -> Result<()> {
        self.inst.sendcmd("ABORT").await
    }
}

#[async_trait]
impl OpenInstrument for Hp6632b {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Hp6632b {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        if apply_supply_attr(self, path, value).await? {
            return Ok(());
        }
        match path.simple() {
            Some("voltage_trigger") => self.set_voltage_trigger(value.as_magnitude()?).await,
            Some("current_trigger") => self.set_current_trigger(value.as_magnitude()?).await,
            Some("init_output_continuous") => self.set_init_output_continuous(value.as_bool()?).await,
            Some("current_sense_range") => self.set_current_sense_range(value.as_magnitude()?).await,
            Some("output_dfi") => self.set_output_dfi(value.as_bool()?).await,
            Some("output_dfi_source") => self.set_output_dfi_source(value.as_enum()?).await,
            Some("output_remote_inhibit") => self.set_output_remote_inhibit(value.as_enum()?).await,
            Some("digital_function") => self.set_digital_function(value.as_enum()?).await,
            Some("digital_data") => self.set_digital_data(value.as_i64()?).await,
            Some("sense_sweep_points") => self.set_sense_sweep_points(value.as_f64()?).await,
            Some("sense_sweep_interval") => self.set_sense_sweep_interval(value.as_magnitude()?).await,
            Some("sense_window") => self.set_sense_window(value.as_enum()?).await,
            Some("output_protection_delay") => {
                self.set_output_protection_delay(value.as_magnitude()?).await
            }
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

#[async_trait]
impl ScpiInstrument for Hp6632b {
    /// Pops `SYST:ERR?` until the queue reports no error.
    async fn check_error_queue(&mut self) -> Result<Vec<ErrorCode>> {
        let mut errors = Vec::new();
        loop {
            let reply = self.inst.query("SYST:ERR?").await?;
            let code = parse_int(reply.split(',').next().unwrap_or_default())?;
            if code == 0 {
                return Ok(errors);
            }
            if let Some(name) = device_error_name(code) {
                debug!("HP6632b error {}: {}", code, name);
            }
            errors.push(ErrorCode::from_code(code));
        }
    }

    async fn line_frequency(&mut self) -> Result<Quantity> {
        not_supported("line frequency")
    }

    async fn set_line_frequency(&mut self, _frequency: Magnitude) -> Result<()> {
        not_supported("line frequency")
    }

    async fn display_brightness(&mut self) -> Result<f64> {
        not_supported("display brightness")
    }

    async fn set_display_brightness(&mut self, _value: f64) -> Result<()> {
        not_supported("display brightness")
    }

    async fn display_contrast(&mut self) -> Result<f64> {
        not_supported("display contrast")
    }

    async fn set_display_contrast(&mut self, _value: f64) -> Result<()> {
        not_supported("display contrast")
    }
}

#[async_trait]
impl PowerSupplyChannel for Hp6632b {
    async fn voltage(&mut self) -> Result<Quantity> {
        VOLTAGE.get(&mut self.inst).await
    }

    async fn set_voltage(&mut self, voltage: Magnitude) -> Result<()> {
        VOLTAGE.set(&mut self.inst, voltage).await
    }

    async fn current(&mut self) -> Result<Quantity> {
        CURRENT.get(&mut self.inst).await
    }

    async fn set_current(&mut self, current: Magnitude) -> Result<()> {
        CURRENT.set(&mut self.inst, current).await
    }

    async fn output(&mut self) -> Result<bool> {
        OUTPUT.get(&mut self.inst).await
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        OUTPUT.set(&mut self.inst, on).await
    }

    async fn mode(&mut self) -> Result<String> {
        not_supported("Setting the mode is not implemented.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentError;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{MICROSECOND, MILLIAMPERE};

    async fn psu(host: &[&str], ins: &[&str]) -> (Hp6632b, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Hp6632b::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_shared_supply_commands() {
        let (mut psu, check) = psu(
            &["VOLT 1.000000e+01", "OUTP 1", "VOLT?", "DISP:TEXT \"HI\""],
            &["10.0"],
        )
        .await;
        psu.set_voltage(10.0.into()).await.unwrap();
        psu.set_output(true).await.unwrap();
        assert_eq!(psu.voltage().await.unwrap(), 10.0 * VOLT);
        assert_eq!(psu.display_text("hi").await.unwrap(), "HI");
        check.assert_done();
    }

    #[tokio::test]
    async fn test_output_trigger() {
        let (mut psu, check) = psu(
            &[
                "VOLT:TRIG 2.000000e+01",
                "CURR:TRIG?",
                "INIT:CONT:SEQ1 1",
                "INIT:NAME TRAN",
                "*TRG",
                "ABORT",
            ],
            &["0.25"],
        )
        .await;
        psu.set_voltage_trigger(20.0).await.unwrap();
        assert_eq!(psu.current_trigger().await.unwrap(), 0.25 * AMPERE);
        psu.set_init_output_continuous(true).await.unwrap();
        psu.init_output_trigger().await.unwrap();
        psu.trigger().await.unwrap();
        psu.abort_output_trigger().await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_alc_bandwidth_reads_float_replies() {
        let (mut psu, check) = psu(&["VOLT:ALC:BAND?", "VOLT:ALC:BAND?"], &["1.5E+04", "60000"]).await;
        assert_eq!(psu.voltage_alc_bandwidth().await.unwrap(), AlcBandwidth::Normal);
        assert_eq!(psu.voltage_alc_bandwidth().await.unwrap(), AlcBandwidth::Fast);
        check.assert_done();
    }

    #[tokio::test]
    async fn test_fault_port() {
        let (mut psu, check) = psu(
            &[
                "OUTP:DFI?",
                "OUTP:DFI:SOUR OPER",
                "OUTP:RI:MODE?",
                "DIG:FUNC DIG",
                "DIG:DATA 5",
            ],
            &["1", "LATC"],
        )
        .await;
        assert!(psu.output_dfi().await.unwrap());
        psu.set_output_dfi_source(DfiSource::Operation).await.unwrap();
        assert_eq!(psu.output_remote_inhibit().await.unwrap(), RemoteInhibit::Latching);
        psu.set_digital_function(DigitalFunction::Data).await.unwrap();
        psu.set_digital_data(5).await.unwrap();
        assert!(matches!(
            psu.set_digital_data(8).await.unwrap_err(),
            InstrumentError::OutOfRange(_)
        ));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_digitizer_settings() {
        let (mut psu, check) = psu(
            &[
                "SENS:CURR:RANGE 2.000000e-02",
                "SENS:SWE:POIN 1.024000e+03",
                "SENS:SWE:TINT?",
                "SENS:WIND RECT",
                "OUTP:PROT:DEL 8.000000e-02",
            ],
            &["1.56E-05"],
        )
        .await;
        psu.set_current_sense_range(20.0 * MILLIAMPERE).await.unwrap();
        psu.set_sense_sweep_points(1024.0).await.unwrap();
        let interval = psu.sense_sweep_interval().await.unwrap();
        assert!((interval.magnitude_in(MICROSECOND).unwrap() - 15.6).abs() < 1e-9);
        psu.set_sense_window(SenseWindow::Rectangular).await.unwrap();
        psu.set_output_protection_delay(0.08).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_error_queue_pops_until_no_error() {
        let (mut psu, check) = psu(
            &["SYST:ERR?", "SYST:ERR?", "SYST:ERR?"],
            &["-222,\"Data out of range\"", "604,\"Meas overrange\"", "+0,\"No error\""],
        )
        .await;
        let errors = psu.check_error_queue().await.unwrap();
        assert_eq!(errors, vec![ErrorCode::Other(-222), ErrorCode::Other(604)]);
        assert_eq!(device_error_name(604), Some("measurement overrange"));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_unsupported_scpi_settings() {
        let (mut psu, check) = psu(&[], &[]).await;
        assert!(psu.line_frequency().await.is_err());
        assert!(psu.set_display_brightness(0.5).await.is_err());
        assert!(psu.display_contrast().await.is_err());
        check.assert_done();
    }
}
