//! SRS DG645 four-channel digital delay generator.

use crate::driver::{apply_base_attr, unknown_attr, AttrPath, AttrValue, Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::ScpiInstrument;
use crate::property::{
    format_float, format_general, parse_float, parse_int, validate_index, ScpiEnum,
};
use crate::units::{assume_units, Magnitude, Quantity, HERTZ, SECOND, VOLT};
use crate::Instrument;
use async_trait::async_trait;

crate::scpi_enum! {
    /// Delay channels; `T0` and `T1` mark the start and end of a cycle.
    pub enum DelayChannel {
        T0 => "0",
        T1 => "1",
        A => "2",
        B => "3",
        C => "4",
        D => "5",
        E => "6",
        F => "7",
        G => "8",
        H => "9",
    }
}

crate::scpi_enum! {
    /// Front-panel BNC outputs.
    pub enum OutputPort {
        T0 => "0",
        AB => "1",
        CD => "2",
        EF => "3",
        GH => "4",
    }
}

crate::scpi_enum! {
    pub enum LevelPolarity {
        Positive => "1",
        Negative => "0",
    }
}

crate::scpi_enum! {
    pub enum DisplayMode {
        TriggerRate => "0",
        TriggerThreshold => "1",
        TriggerSingleShot => "2",
        TriggerLine => "3",
        AdvTriggeringEnable => "4",
        TriggerHoldoff => "5",
        PrescaleConfig => "6",
        BurstMode => "7",
        BurstDelay => "8",
        BurstCount => "9",
        BurstPeriod => "10",
        ChannelDelay => "11",
        ChannelLevels => "12",
        ChannelPolarity => "13",
        BurstT0Config => "14",
    }
}

crate::scpi_enum! {
    pub enum TriggerSource {
        Internal => "0",
        ExternalRising => "1",
        ExternalFalling => "2",
        SingleShotExternalRising => "3",
        SingleShotExternalFalling => "4",
        SingleShot => "5",
        Line => "6",
    }
}

impl DelayChannel {
    /// Position in the `channel[..]` attribute list.
    pub fn index(self) -> usize {
        Self::variants()
            .iter()
            .position(|v| *v == self)
            .unwrap_or_default()
    }
}

/// Parses an integer-coded reply into an enum.
fn parse_code<E: ScpiEnum>(s: &str) -> Result<E> {
    E::parse_mnemonic(&parse_int(s)?.to_string())
}

fn parse_flag(s: &str) -> Result<bool> {
    Ok(parse_int(s)? != 0)
}

fn nth<E: ScpiEnum>(idx: usize) -> Result<E> {
    let idx = validate_index(idx, E::variants().len())?;
    Ok(E::variants()[idx])
}

/// One delay channel of a [`SrsDg645`].
pub struct Dg645Channel<'a> {
    inst: &'a mut Instrument,
    chan: DelayChannel,
}

impl<'a> Dg645Channel<'a> {
    pub fn channel(&self) -> DelayChannel {
        self.chan
    }

    /// The reference channel and the delay from it.
    pub async fn delay(&mut self) -> Result<(DelayChannel, Quantity)> {
        let cmd = format!("DLAY?{}", self.chan.mnemonic());
        self.inst
            .query_parse(&cmd, |reply| {
                let (reference, delay) = reply
                    .trim()
                    .split_once(',')
                    .ok_or_else(|| InstrumentError::parse(reply, "expected 'channel,delay'"))?;
                Ok((parse_code(reference)?, Quantity::new(parse_float(delay)?, SECOND)))
            })
            .await
    }

    /// Bare numbers are taken as seconds.
    pub async fn set_delay(
        &mut self,
        reference: DelayChannel,
        delay: impl Into<Magnitude> + Send,
    ) -> Result<()> {
        let seconds = assume_units(delay, SECOND)?;
        let cmd = format!(
            "DLAY {},{},{}",
            self.chan.mnemonic(),
            reference.mnemonic(),
            format_general(seconds)
        );
        self.inst.sendcmd(&cmd).await
    }
}

/// One output port of a [`SrsDg645`].
pub struct Dg645Output<'a> {
    inst: &'a mut Instrument,
    port: OutputPort,
}

impl<'a> Dg645Output<'a> {
    pub async fn polarity(&mut self) -> Result<LevelPolarity> {
        let cmd = format!("LPOL? {}", self.port.mnemonic());
        self.inst.query_parse(&cmd, parse_code).await
    }

    pub async fn set_polarity(&mut self, polarity: LevelPolarity) -> Result<()> {
        let cmd = format!("LPOL {},{}", self.port.mnemonic(), polarity.mnemonic());
        self.inst.sendcmd(&cmd).await
    }

    pub async fn level_amplitude(&mut self) -> Result<Quantity> {
        let cmd = format!("LAMP? {}", self.port.mnemonic());
        let v = self.inst.query_parse(&cmd, parse_float).await?;
        Ok(Quantity::new(v, VOLT))
    }

    pub async fn set_level_amplitude(&mut self, level: impl Into<Magnitude> + Send) -> Result<()> {
        let v = assume_units(level, VOLT)?;
        let cmd = format!("LAMP {},{}", self.port.mnemonic(), format_float(v));
        self.inst.sendcmd(&cmd).await
    }

    pub async fn level_offset(&mut self) -> Result<Quantity> {
        let cmd = format!("LOFF? {}", self.port.mnemonic());
        let v = self.inst.query_parse(&cmd, parse_float).await?;
        Ok(Quantity::new(v, VOLT))
    }

    pub async fn set_level_offset(&mut self, offset: impl Into<Magnitude> + Send) -> Result<()> {
        let v = assume_units(offset, VOLT)?;
        let cmd = format!("LOFF {},{}", self.port.mnemonic(), format_float(v));
        self.inst.sendcmd(&cmd).await
    }
}

/// SRS DG645.
///
/// ```no_run
/// # async fn demo() -> instrumentkit::Result<()> {
/// use instrumentkit::driver::OpenInstrument;
/// use instrumentkit::instruments::srs::{DelayChannel, OutputPort, SrsDg645};
/// use instrumentkit::units::{NANOSECOND, VOLT};
///
/// let mut ddg = SrsDg645::open_uri("gpib+usb:///dev/ttyUSB0/15").await?;
/// ddg.channel(DelayChannel::B)
///     .set_delay(DelayChannel::A, 10.0 * NANOSECOND)
///     .await?;
/// ddg.output(OutputPort::AB).set_level_amplitude(4.0 * VOLT).await?;
/// # Ok(())
/// # }
/// ```
pub struct SrsDg645 {
    inst: Instrument,
}

impl SrsDg645 {
    pub const MODEL: &'static str = "SrsDg645";

    pub fn channel(&mut self, chan: DelayChannel) -> Dg645Channel<'_> {
        Dg645Channel {
            inst: &mut self.inst,
            chan,
        }
    }

    pub fn output(&mut self, port: OutputPort) -> Dg645Output<'_> {
        Dg645Output {
            inst: &mut self.inst,
            port,
        }
    }

    /// Front-panel display mode and the channel it shows.
    pub async fn display(&mut self) -> Result<(DisplayMode, DelayChannel)> {
        self.inst
            .query_parse("DISP?", |reply| {
                let (mode, chan) = reply
                    .trim()
                    .split_once(',')
                    .ok_or_else(|| InstrumentError::parse(reply, "expected 'mode,channel'"))?;
                Ok((parse_code(mode)?, parse_code(chan)?))
            })
            .await
    }

    pub async fn set_display(&mut self, mode: DisplayMode, chan: DelayChannel) -> Result<()> {
        let cmd = format!("DISP {},{}", mode.mnemonic(), chan.mnemonic());
        self.inst.sendcmd(&cmd).await
    }

    async fn flag(&mut self, cmd: &str) -> Result<bool> {
        self.inst.query_parse(&format!("{cmd}?"), parse_flag).await
    }

    async fn set_flag(&mut self, cmd: &str, on: bool) -> Result<()> {
        self.inst
            .sendcmd(&format!("{cmd} {}", u8::from(on)))
            .await
    }

    async fn seconds(&mut self, cmd: &str) -> Result<Quantity> {
        let v = self.inst.query_parse(&format!("{cmd}?"), parse_float).await?;
        Ok(Quantity::new(v, SECOND))
    }

    async fn set_seconds(&mut self, cmd: &str, value: Magnitude) -> Result<()> {
        let v = assume_units(value, SECOND)?;
        self.inst
            .sendcmd(&format!("{cmd} {}", format_general(v)))
            .await
    }

    pub async fn enable_adv_triggering(&mut self) -> Result<bool> {
        self.flag("ADVT").await
    }

    pub async fn set_enable_adv_triggering(&mut self, on: bool) -> Result<()> {
        self.set_flag("ADVT", on).await
    }

    /// Rate of the internal trigger.
    pub async fn trigger_rate(&mut self) -> Result<Quantity> {
        let v = self.inst.query_parse("TRAT?", parse_float).await?;
        Ok(Quantity::new(v, HERTZ))
    }

    pub async fn set_trigger_rate(&mut self, rate: impl Into<Magnitude> + Send) -> Result<()> {
        let v = assume_units(rate, HERTZ)?;
        self.inst
            .sendcmd(&format!("TRAT {}", format_general(v)))
            .await
    }

    pub async fn trigger_source(&mut self) -> Result<TriggerSource> {
        self.inst.query_parse("TSRC?", parse_code).await
    }

    pub async fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        self.inst
            .sendcmd(&format!("TSRC {}", source.mnemonic()))
            .await
    }

    pub async fn holdoff(&mut self) -> Result<Quantity> {
        self.seconds("HOLD").await
    }

    pub async fn set_holdoff(&mut self, holdoff: impl Into<Magnitude> + Send) -> Result<()> {
        self.set_seconds("HOLD", holdoff.into()).await
    }

    pub async fn enable_burst_mode(&mut self) -> Result<bool> {
        self.flag("BURM").await
    }

    pub async fn set_enable_burst_mode(&mut self, on: bool) -> Result<()> {
        self.set_flag("BURM", on).await
    }

    /// Whether T0 fires only on the first delay cycle of a burst.
    pub async fn enable_burst_t0_first(&mut self) -> Result<bool> {
        self.flag("BURT").await
    }

    pub async fn set_enable_burst_t0_first(&mut self, on: bool) -> Result<()> {
        self.set_flag("BURT", on).await
    }

    /// Delay cycles per trigger in burst mode, 1 to 2^32 - 1.
    pub async fn burst_count(&mut self) -> Result<i64> {
        self.inst.query_parse("BURC?", parse_int).await
    }

    pub async fn set_burst_count(&mut self, count: i64) -> Result<()> {
        if !(1..=i64::from(u32::MAX)).contains(&count) {
            return Err(InstrumentError::OutOfRange(format!(
                "Burst count {count} must be between 1 and 2**32 - 1."
            )));
        }
        self.inst.sendcmd(&format!("BURC {count}")).await
    }

    /// Time between delay cycles of a burst.
    pub async fn burst_period(&mut self) -> Result<Quantity> {
        self.seconds("BURP").await
    }

    pub async fn set_burst_period(&mut self, period: impl Into<Magnitude> + Send) -> Result<()> {
        self.set_seconds("BURP", period.into()).await
    }

    /// Delay of the first burst pulse after the trigger.
    pub async fn burst_delay(&mut self) -> Result<Quantity> {
        self.seconds("BURD").await
    }

    pub async fn set_burst_delay(&mut self, delay: impl Into<Magnitude> + Send) -> Result<()> {
        self.set_seconds("BURD", delay.into()).await
    }
}

#[async_trait]
impl OpenInstrument for SrsDg645 {
    async fn open(inst: Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

#[async_trait]
impl Driver for SrsDg645 {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut Instrument {
        &mut self.inst
    }

    /// Channels and outputs are indexed in enum order, so `channel[2]` is
    /// channel A and `output[1]` is AB.
    async fn apply_attr(&mut self, path: &AttrPath, value: &AttrValue) -> Result<()> {
        match path.indexed() {
            Some(("channel", idx, "delay")) => {
                let chan = nth::<DelayChannel>(idx)?;
                return match value.as_list()? {
                    [reference, delay] => {
                        self.channel(chan)
                            .set_delay(reference.as_enum()?, delay.as_magnitude()?)
                            .await
                    }
                    _ => Err(InstrumentError::InvalidValue(
                        "delay must be [reference, delay]".to_string(),
                    )),
                };
            }
            Some(("output", idx, attr)) => {
                let mut output = self.output(nth::<OutputPort>(idx)?);
                return match attr {
                    "polarity" => output.set_polarity(value.as_enum()?).await,
                    "level_amplitude" => output.set_level_amplitude(value.as_magnitude()?).await,
                    "level_offset" => output.set_level_offset(value.as_magnitude()?).await,
                    _ => Err(unknown_attr(path)),
                };
            }
            Some(_) => return Err(unknown_attr(path)),
            None => {}
        }
        match path.simple() {
            Some("display") => match value.as_list()? {
                [mode, chan] => self.set_display(mode.as_enum()?, chan.as_enum()?).await,
                _ => Err(InstrumentError::InvalidValue(
                    "display must be [mode, channel]".to_string(),
                )),
            },
            Some("enable_adv_triggering") => self.set_enable_adv_triggering(value.as_bool()?).await,
            Some("trigger_rate") => self.set_trigger_rate(value.as_magnitude()?).await,
            Some("trigger_source") => self.set_trigger_source(value.as_enum()?).await,
            Some("holdoff") => self.set_holdoff(value.as_magnitude()?).await,
            Some("enable_burst_mode") => self.set_enable_burst_mode(value.as_bool()?).await,
            Some("enable_burst_t0_first") => self.set_enable_burst_t0_first(value.as_bool()?).await,
            Some("burst_count") => self.set_burst_count(value.as_i64()?).await,
            Some("burst_period") => self.set_burst_period(value.as_magnitude()?).await,
            Some("burst_delay") => self.set_burst_delay(value.as_magnitude()?).await,
            _ => apply_base_attr(&mut self.inst, path, value).await,
        }
    }
}

impl ScpiInstrument for SrsDg645 {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expected_protocol, ProtocolCheck};
    use crate::units::{MILLISECOND, NANOSECOND};

    async fn ddg(host: &[&str], ins: &[&str]) -> (SrsDg645, ProtocolCheck) {
        let (inst, check) = expected_protocol(host, ins, "\n");
        (SrsDg645::open(inst).await.unwrap(), check)
    }

    #[tokio::test]
    async fn test_channel_delay() {
        let (mut ddg, check) = ddg(
            &["DLAY?2", "DLAY 3,2,60", "DLAY 5,4,10", "DLAY 2,0,1e-08"],
            &["0,+42.000000000000"],
        )
        .await;
        let (reference, delay) = ddg.channel(DelayChannel::A).delay().await.unwrap();
        assert_eq!(reference, DelayChannel::T0);
        assert_eq!(delay, 42.0 * SECOND);
        ddg.channel(DelayChannel::B)
            .set_delay(DelayChannel::A, 60.0)
            .await
            .unwrap();
        ddg.channel(DelayChannel::D)
            .set_delay(DelayChannel::C, 10)
            .await
            .unwrap();
        ddg.channel(DelayChannel::A)
            .set_delay(DelayChannel::T0, 10.0 * NANOSECOND)
            .await
            .unwrap();
        check.assert_done();
    }

    #[test]
    fn test_channel_index() {
        assert_eq!(DelayChannel::B.index(), 3);
        assert_eq!(nth::<DelayChannel>(3).unwrap(), DelayChannel::B);
        assert!(nth::<OutputPort>(5).is_err());
    }

    #[tokio::test]
    async fn test_output_level() {
        let (mut ddg, check) = ddg(
            &["LAMP? 1", "LAMP 1,4.0", "LOFF? 1", "LOFF 1,2.0"],
            &["3.2", "1.2"],
        )
        .await;
        assert_eq!(ddg.output(OutputPort::AB).level_amplitude().await.unwrap(), 3.2 * VOLT);
        ddg.output(OutputPort::AB).set_level_amplitude(4.0).await.unwrap();
        assert_eq!(ddg.output(OutputPort::AB).level_offset().await.unwrap(), 1.2 * VOLT);
        ddg.output(OutputPort::AB).set_level_offset(2.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_output_polarity() {
        let (mut ddg, check) = ddg(&["LPOL? 1", "LPOL 2,0"], &["1"]).await;
        assert_eq!(
            ddg.output(OutputPort::AB).polarity().await.unwrap(),
            LevelPolarity::Positive
        );
        ddg.output(OutputPort::CD)
            .set_polarity(LevelPolarity::Negative)
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_display() {
        let (mut ddg, check) = ddg(&["DISP?", "DISP 0,0"], &["12,3"]).await;
        assert_eq!(
            ddg.display().await.unwrap(),
            (DisplayMode::ChannelLevels, DelayChannel::B)
        );
        ddg.set_display(DisplayMode::TriggerRate, DelayChannel::T0)
            .await
            .unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_triggering() {
        let (mut ddg, check) = ddg(
            &["ADVT?", "ADVT 1", "TRAT?", "TRAT 10000", "TRAT 1000", "TSRC?", "TSRC 1"],
            &["0", "+1000.000000", "0"],
        )
        .await;
        assert!(!ddg.enable_adv_triggering().await.unwrap());
        ddg.set_enable_adv_triggering(true).await.unwrap();
        assert_eq!(ddg.trigger_rate().await.unwrap(), 1000.0 * HERTZ);
        ddg.set_trigger_rate(10000.0).await.unwrap();
        ddg.set_trigger_rate(1000.0 * HERTZ).await.unwrap();
        assert_eq!(ddg.trigger_source().await.unwrap(), TriggerSource::Internal);
        ddg.set_trigger_source(TriggerSource::ExternalRising).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_holdoff() {
        let (mut ddg, check) = ddg(&["HOLD?", "HOLD 0", "HOLD 0.01"], &["+0.001001000000"]).await;
        let holdoff = ddg.holdoff().await.unwrap();
        assert!((holdoff.magnitude_in(MILLISECOND).unwrap() - 1.001).abs() < 1e-9);
        ddg.set_holdoff(0.0).await.unwrap();
        ddg.set_holdoff(10.0 * MILLISECOND).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_burst() {
        let (mut ddg, check) = ddg(
            &[
                "BURM?", "BURM 1", "BURT?", "BURT 1", "BURC?", "BURC 42", "BURP?", "BURP 13",
                "BURP 0.1", "BURD?", "BURD 42",
            ],
            &["0", "0", "10", "100E-9", "0"],
        )
        .await;
        assert!(!ddg.enable_burst_mode().await.unwrap());
        ddg.set_enable_burst_mode(true).await.unwrap();
        assert!(!ddg.enable_burst_t0_first().await.unwrap());
        ddg.set_enable_burst_t0_first(true).await.unwrap();
        assert_eq!(ddg.burst_count().await.unwrap(), 10);
        ddg.set_burst_count(42).await.unwrap();
        assert!(ddg.set_burst_count(0).await.is_err());
        assert_eq!(ddg.burst_period().await.unwrap(), 100e-9 * SECOND);
        ddg.set_burst_period(13.0 * SECOND).await.unwrap();
        ddg.set_burst_period(0.1).await.unwrap();
        assert_eq!(ddg.burst_delay().await.unwrap(), 0.0 * SECOND);
        ddg.set_burst_delay(42.0).await.unwrap();
        check.assert_done();
    }

    #[tokio::test]
    async fn test_attrs() {
        let (mut ddg, check) = ddg(&["DLAY 3,2,5e-09", "LPOL 1,0", "TSRC 6"], &[]).await;
        let delay = AttrValue::List(vec![
            AttrValue::Str("A".into()),
            AttrValue::Quantity(5.0 * NANOSECOND),
        ]);
        ddg.apply_attr(&AttrPath::parse("channel[3].delay").unwrap(), &delay)
            .await
            .unwrap();
        ddg.apply_attr(
            &AttrPath::parse("output[1].polarity").unwrap(),
            &AttrValue::Str("negative".into()),
        )
        .await
        .unwrap();
        ddg.apply_attr(&AttrPath::parse("trigger_source").unwrap(), &AttrValue::Str("line".into()))
            .await
            .unwrap();
        check.assert_done();
    }
}
