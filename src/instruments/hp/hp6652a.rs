//! HP 6652A single-output system supply, and the settings it shares with
//! the rest of the HP 66xx family.

use crate::driver::{apply_base_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::Result;
use crate::instrument::capabilities::{not_supported, PowerSupplyChannel};
use crate::property::{BoolProperty, UnitfulProperty};
use crate::units::{Magnitude, Quantity, AMPERE, VOLT};
use crate::Instrument;
use async_trait::async_trait;

pub(super) const VOLTAGE: UnitfulProperty = UnitfulProperty::new("VOLT", VOLT);
pub(super) const CURRENT: UnitfulProperty = UnitfulProperty::new("CURR", AMPERE);
pub(super) const VOLTAGE_SENSE: UnitfulProperty = UnitfulProperty::new("MEAS:VOLT", VOLT);
pub(super) const CURRENT_SENSE: UnitfulProperty = UnitfulProperty::new("MEAS:CURR", AMPERE);
pub(super) const OVERVOLTAGE: UnitfulProperty = UnitfulProperty::new("VOLT:PROT", VOLT);
pub(super) const OVERCURRENT: BoolProperty = BoolProperty::new("CURR:PROT:STAT").values("1", "0");
pub(super) const OUTPUT: BoolProperty = BoolProperty::new("OUTP").values("1", "0");
pub(super) const DISPLAY_TEXTMODE: BoolProperty = BoolProperty::new("DISP:MODE").values("TEXT", "NORM");

/// The front panel shows at most this many characters, punctuation
/// included.
const DISPLAY_TEXT_LEN: usize = 15;

/// Uppercases and truncates `text` to what the front panel accepts.
pub(super) fn display_text_for(text: &str) -> String {
    text.chars().take(DISPLAY_TEXT_LEN).collect::<String>().to_uppercase()
}

/// Writes `text` to the front panel and returns what was sent. The panel
/// cannot be read back, and invalid text is dropped silently.
pub(super) async fn send_display_text(inst: &mut Instrument, text: &str) -> Result<String> {
    let text = display_text_for(text);
    inst.sendcmd(&format!("DISP:TEXT \"{text}\"")).await?;
    Ok(text)
}

/// Voltage, current and output switch of a single-output 66xx supply.
pub(super) async fn apply_supply_attr<P>(psu: &mut P, path: &AttrPath, value: &AttrValue) -> Result<bool>
where
    P: PowerSupplyChannel + Driver,
{
    match path.simple() {
        Some("voltage") => psu.set_voltage(value.as_magnitude()?).await?,
        Some("current") => psu.set_current(value.as_magnitude()?).await?,
        Some("output") => psu.set_output(value.as_bool()?).await?,
        Some("overvoltage") => OVERVOLTAGE.set(psu.instrument(), value.as_magnitude()?).await?,
        Some("overcurrent") => OVERCURRENT.set(psu.instrument(), value.as_bool()?).await?,
        Some("display_textmode") => DISPLAY_TEXTMODE.set(psu.instrument(), value.as_bool()?).await?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// HP 6652A. The supply is its own only channel.
pub struct Hp6652a {
    inst: Instrument,
}

impl Hp6652a {
    pub const MODEL: &'static str = "HP6652a";

    /// Output voltage measured at the sense terminals.
    pub async fn voltage_sense(&mut self) -> Result<Quantity> {
        VOLTAGE_SENSE.get(&mut self.inst).await
    }

    pub async fn current_sense(&mut self) -> Result<Quantity> {
        CURRENT_SENSE.get(&mut self.inst).await
    }

    /// Overvoltage protection level. Not bounds-checked.
    pub async fn overvoltage(&mut self) -> Result<Quantity> {
        OVERVOLTAGE.get(&mut self.inst).await
    }

    pub async fn set_overvoltage(&mut self, voltage: impl Into<Magnitude> + Send) -> Result<()> {
        OVERVOLTAGE.set(&mut self.inst, voltage).await
    }

    /// Whether overcurrent protection is armed.
    pub async fn overcurrent(&mut self) -> Result<bool> {
        OVERCURRENT.get(&mut self.inst).await
    }

    pub async fn set_overcurrent(&mut self, on: bool) -> Result<()> {
        OVERCURRENT.set(&mut self.inst, on).await
    }

    /// True while the display shows text from [`display_text`](Self::display_text).
    pub async fn display_textmode(&mut self) -> Result<bool> {
        DISPLAY_TEXTMODE.get(&mut self.inst).await
    }

    pub async fn set_display_textmode(&mut self, on: bool) -> Result<()> {
        DISPLAY_TEXTMODE.set(&mut self.inst, on).await
    }

    pub async fn display_text(&mut self, text: &str) -> Result<String> {
        send_display_text(&mut self.inst, text).await
    }

    /// Manufacturer and model from `*IDN?`, joined by a space.
    pub async fn name(&mut self) -> Result<String> {
        let idn = self.inst.query("*IDN?").await?;
        Ok(idn.split(',').take(2).collect::<Vec<_>>().join(" "))
    }

    /// Clears overvoltage and overcurrent trips so the output can resume.
    pub async fn reset(&mut self) -> Result<()> {
        self.inst.sendcmd("OUTP:PROT:CLE").await
    }
}

#[async_trait]
impl OpenInstrument for Hp6652a {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for Hp6652a {
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
        apply_base_attr(&mut self.inst, path, value).await
    }
}

#[async_trait]
impl PowerSupplyChannel for Hp6652a {
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
    use crate::units::MILLIAMPERE;

    async fn psu(host: &[&str], ins: &[&str]) -> (Hp6652a, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (Hp6652a::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_output_settings() {
        let (mut psu, check) = psu(
            &[
                "VOLT?",
                "VOLT 3.000000e+00",
                "CURR?",
                "CURR 5.000000e-02",
                "OUTP?",
                "OUTP 1",
            ],
            &["10.0", "0.5", "0"],
        )
        .await;
        assert_eq!(psu.voltage().await.unwrap(), 10.0 * VOLT);
        psu.set_voltage(3.0.into()).await.unwrap();
        assert_eq!(psu.current().await.unwrap(), 0.5 * AMPERE);
        psu.set_current((50.0 * MILLIAMPERE).into()).await.unwrap();
        assert!(!psu.output().await.unwrap());
        psu.set_output(true).await.unwrap();
        assert!(matches!(
            psu.mode().await.unwrap_err(),
            InstrumentError::NotSupported(_)
        ));
        check.assert_done();
    }

    #[tokio::test]
    async fn test_sense_and_protection() {
        let (mut psu, check) = psu(
            &[
                "MEAS:VOLT?",
                "MEAS:CURR?",
                "VOLT:PROT?",
                "VOLT:PROT 1.200000e+01",
                "CURR:PROT:STAT?",
                "CURR:PROT:STAT 0",
                "OUTP:PROT:CLE",
            ],
            &["4.95", "0.1", "20.0", "1"],
        )
        .await;
        assert_eq!(psu.voltage_sense().await.unwrap(), 4.95 * VOLT);
        assert_eq!(psu.current_sense().await.unwrap(), 0.1 * AMPERE);
        assert_eq!(psu.overvoltage().await.unwrap(), 20.0 * VOLT);
        psu.set_overvoltage(12.0).await.unwrap();
        assert!(psu.overcurrent().await.unwrap());
        psu.set_overcurrent(false).await.unwrap();
        psu.reset().await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_display_text_is_truncated_and_uppercased() {
        let (mut psu, check) = psu(
            &["DISP:MODE TEXT", "DISP:TEXT \"TEST GOOD\"", "DISP:TEXT \"ABCDEFGHIJKLMNO\"", "DISP:MODE?"],
            &["NORM"],
        )
        .await;
        psu.set_display_textmode(true).await.unwrap();
        assert_eq!(psu.display_text("test GOOD").await.unwrap(), "TEST GOOD");
        assert_eq!(
            psu.display_text("abcdefghijklmnopqrst").await.unwrap(),
            "ABCDEFGHIJKLMNO"
        );
        assert!(!psu.display_textmode().await.unwrap());
        check.assert_done();
    }

    #[tokio::test]
    async fn test_name_joins_vendor_and_model() {
        let (mut psu, check) = psu(&["*IDN?"], &["HEWLETT-PACKARD,6652A,0,A.00.01"]).await;
        assert_eq!(psu.name().await.unwrap(), "HEWLETT-PACKARD 6652A");
        check.assert_done();
    }
}
