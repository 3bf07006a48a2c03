//! IEEE 488.2 / SCPI common commands.
//!
//! [`ScpiInstrument`] adds the star commands (`*IDN?`, `*RST`, ...) and the
//! `SYST:` subsystem to any [`Driver`]; drivers of SCPI devices implement it
//! with an empty `impl` block. The multimeter and function generator
//! modules build the standard SCPI subsystems for those families on top.

mod function_generator;
mod multimeter;

pub use function_generator::{ScpiFunction, ScpiFunctionGenerator};
pub use multimeter::{
    conf_input_range, conf_mode, measure_mode, set_conf_input_range, set_conf_mode,
    set_trigger_source, trigger_source, MultimeterMode, Resolution, SampleCount, SampleSource, ScpiMultimeter, ScpiMultimeterExt,
    TriggerCount, TriggerMode,
};

pub(crate) use function_generator::{scpi_raw_amplitude, scpi_set_raw_amplitude, FREQUENCY, OFFSET};
pub(crate) use multimeter::apply_multimeter_attr;

use crate::driver::Driver;
use crate::error::{InstrumentError, Result};
use crate::property::{format_float, parse_float, parse_int};
use crate::units::{assume_units, Magnitude, Quantity, HERTZ};
use async_trait::async_trait;
use std::fmt;

macro_rules! error_codes {
    ($($variant:ident = $code:literal),+ $(,)?) => {
        /// Error codes defined by SCPI 1999.0.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)+
            /// A device-specific code.
            Other(i64),
        }

        impl ErrorCode {
            pub fn from_code(code: i64) -> Self {
                match code {
                    $($code => ErrorCode::$variant,)+
                    other => ErrorCode::Other(other),
                }
            }

            pub fn code(&self) -> i64 {
                match self {
                    $(ErrorCode::$variant => $code,)+
                    ErrorCode::Other(code) => *code,
                }
            }
        }
    };
}

error_codes! {
    NoError = 0,
    CommandError = -100,
    InvalidCharacter = -101,
    SyntaxError = -102,
    InvalidSeparator = -103,
    DataTypeError = -104,
    GetNotAllowed = -105,
    ParameterNotAllowed = -108,
    MissingParameter = -109,
    CommandHeaderError = -110,
    HeaderSeparatorError = -111,
    ProgramMnemonicTooLong = -112,
    UndefinedHeader = -113,
    HeaderSuffixOutOfRange = -114,
    UnexpectedNumberOfParameters = -115,
    NumericDataError = -120,
    InvalidCharacterInNumber = -121,
    ExponentTooLarge = -123,
    TooManyDigits = -124,
    NumericDataNotAllowed = -128,
    SuffixError = -130,
    InvalidSuffix = -131,
    SuffixTooLong = -134,
    SuffixNotAllowed = -138,
    CharacterDataError = -140,
    InvalidCharacterData = -141,
    CharacterDataTooLong = -144,
    CharacterDataNotAllowed = -148,
    StringDataError = -150,
    InvalidStringData = -151,
    StringDataNotAllowed = -158,
    BlockDataError = -160,
    InvalidBlockData = -161,
    BlockDataNotAllowed = -168,
    ExpressionError = -170,
    InvalidExpression = -171,
    ExpressionNotAllowed = -178,
    MacroError = -180,
    InvalidOutsideMacroDefinition = -181,
    InvalidInsideMacroDefinition = -183,
    MacroParameterError = -184,
    PowerOn = -500,
    UserRequestEvent = -600,
    RequestControlEvent = -700,
    OperationComplete = -800,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "device error {code}"),
            known => write!(f, "{known:?} ({})", known.code()),
        }
    }
}

fn check_unit_interval(value: f64, what: &str) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(InstrumentError::OutOfRange(format!(
            "{what} must be a number between 0 and 1."
        )));
    }
    Ok(value)
}

/// Common commands of SCPI instruments.
#[async_trait]
pub trait ScpiInstrument: Driver {
    /// Identification string from `*IDN?`.
    async fn name(&mut self) -> Result<String> {
        self.instrument().query("*IDN?").await
    }

    async fn scpi_version(&mut self) -> Result<String> {
        self.instrument().query("SYST:VERS?").await
    }

    async fn op_complete(&mut self) -> Result<bool> {
        let v = self.instrument().query_parse("*OPC?", parse_int).await?;
        Ok(v != 0)
    }

    async fn power_on_status(&mut self) -> Result<bool> {
        let v = self.instrument().query_parse("*PSC?", parse_int).await?;
        Ok(v != 0)
    }

    async fn set_power_on_status(&mut self, on: bool) -> Result<()> {
        let cmd = if on { "*PSC 1" } else { "*PSC 0" };
        self.instrument().sendcmd(cmd).await
    }

    /// True when `*TST?` reports 0. An unparsable reply counts as failure.
    async fn self_test_ok(&mut self) -> Result<bool> {
        let reply = self.instrument().query("*TST?").await?;
        Ok(reply.trim().parse::<i64>().map_or(false, |v| v == 0))
    }

    async fn reset(&mut self) -> Result<()> {
        self.instrument().sendcmd("*RST").await
    }

    async fn clear(&mut self) -> Result<()> {
        self.instrument().sendcmd("*CLS").await
    }

    async fn trigger(&mut self) -> Result<()> {
        self.instrument().sendcmd("*TRG").await
    }

    async fn wait_to_continue(&mut self) -> Result<()> {
        self.instrument().sendcmd("*WAI").await
    }

    async fn line_frequency(&mut self) -> Result<Quantity> {
        let v = self.instrument().query_parse("SYST:LFR?", parse_float).await?;
        Ok(Quantity::new(v, HERTZ))
    }

    async fn set_line_frequency(&mut self, frequency: Magnitude) -> Result<()> {
        let hz = assume_units(frequency, HERTZ)?;
        let cmd = format!("SYST:LFR {}", format_float(hz));
        self.instrument().sendcmd(&cmd).await
    }

    /// Reads and clears the error queue; `NoError` entries are dropped.
    async fn check_error_queue(&mut self) -> Result<Vec<ErrorCode>> {
        let reply = self.instrument().query("SYST:ERR:CODE:ALL?").await?;
        let mut errors = Vec::new();
        for part in reply.split(',') {
            let code = parse_int(part)?;
            if code != 0 {
                errors.push(ErrorCode::from_code(code));
            }
        }
        Ok(errors)
    }

    async fn display_brightness(&mut self) -> Result<f64> {
        self.instrument().query_parse("DISP:BRIG?", parse_float).await
    }

    async fn set_display_brightness(&mut self, value: f64) -> Result<()> {
        let value = check_unit_interval(value, "Display brightness")?;
        let cmd = format!("DISP:BRIG {}", format_float(value));
        self.instrument().sendcmd(&cmd).await
    }

    async fn display_contrast(&mut self) -> Result<f64> {
        self.instrument().query_parse("DISP:CONT?", parse_float).await
    }

    async fn set_display_contrast(&mut self, value: f64) -> Result<()> {
        let value = check_unit_interval(value, "Display contrast")?;
        let cmd = format!("DISP:CONT {}", format_float(value));
        self.instrument().sendcmd(&cmd).await
    }
}

/// A bare SCPI instrument with only the common commands.
pub struct GenericScpi {
    inst: crate::Instrument,
}

impl GenericScpi {
    pub const MODEL: &'static str = "ScpiInstrument";
}

#[async_trait]
impl crate::driver::OpenInstrument for GenericScpi {
    async fn open(inst: crate::Instrument) -> Result<Self> {
        Ok(Self { inst })
    }
}

impl Driver for GenericScpi {
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    fn instrument(&mut self) -> &mut crate::Instrument {
        &mut self.inst
    }
}

impl ScpiInstrument for GenericScpi {}
