//! Model drivers, grouped by vendor, and the catalog that builds them by
//! name.

pub mod agilent;
pub mod hp;
pub mod keithley;
pub mod lakeshore;
pub mod minghe;
pub mod newport;
pub mod qubitekk;
pub mod rigol;
pub mod srs;
pub mod tektronix;
pub mod thorlabs;
pub mod yokogawa;

use crate::driver::{Driver, OpenInstrument};
use crate::error::{InstrumentError, Result};
use crate::generic_scpi::{GenericScpi, ScpiFunctionGenerator, ScpiMultimeter};
use crate::Instrument;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;

/// Future returned by a catalog factory.
pub type DriverFuture = BoxFuture<'static, Result<Box<dyn Driver>>>;

/// Turns a connected instrument into a model driver.
pub type DriverBuilder = Arc<dyn Fn(Instrument) -> DriverFuture + Send + Sync>;

/// Registry of driver factories keyed by model name.
///
/// Lookups ignore case and accept module-qualified names, so
/// `instruments.srs.SRSDG645` and `!!python/name:instruments.srs.SRSDG645`
/// both find `SrsDg645`.
#[derive(Clone)]
pub struct InstrumentCatalog {
    builders: HashMap<String, (String, DriverBuilder)>,
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn catalog_key(class: &str) -> String {
    let class = class.trim().trim_start_matches('!');
    let class = class.strip_prefix("python/name:").unwrap_or(class);
    let name = class.rsplit('.').next().unwrap_or(class);
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// A catalog with every driver shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register::<GenericScpi>(GenericScpi::MODEL);
        catalog.register::<ScpiMultimeter>(ScpiMultimeter::MODEL);
        catalog.register::<ScpiFunctionGenerator>(ScpiFunctionGenerator::MODEL);
        catalog.register::<agilent::Agilent33220a>(agilent::Agilent33220a::MODEL);
        catalog.register::<agilent::Agilent34410a>(agilent::Agilent34410a::MODEL);
        catalog.register::<hp::Hp6624a>(hp::Hp6624a::MODEL);
        catalog.register::<hp::Hp6632b>(hp::Hp6632b::MODEL);
        catalog.register::<hp::Hp6652a>(hp::Hp6652a::MODEL);
        catalog.register::<hp::Hpe3631a>(hp::Hpe3631a::MODEL);
        catalog.register::<keithley::Keithley2182>(keithley::Keithley2182::MODEL);
        catalog.register::<keithley::Keithley6485>(keithley::Keithley6485::MODEL);
        catalog.register::<keithley::Keithley6514>(keithley::Keithley6514::MODEL);
        catalog.register::<keithley::Keithley6517b>(keithley::Keithley6517b::MODEL);
        catalog.register::<lakeshore::Lakeshore475>(lakeshore::Lakeshore475::MODEL);
        catalog.register::<minghe::Mhs5200>(minghe::Mhs5200::MODEL);
        catalog.register::<newport::NewportEsp301>(newport::NewportEsp301::MODEL);
        catalog.register::<qubitekk::Cc1>(qubitekk::Cc1::MODEL);
        catalog.register::<rigol::RigolDs1000>(rigol::RigolDs1000::MODEL);
        catalog.register::<rigol::RigolDs1000>("RigolDs1000Series");
        catalog.register::<srs::Srs345>(srs::Srs345::MODEL);
        catalog.register::<srs::Srs830>(srs::Srs830::MODEL);
        catalog.register::<srs::SrsDg645>(srs::SrsDg645::MODEL);
        catalog.register::<tektronix::TekDpo4104>(tektronix::TekDpo4104::MODEL);
        catalog.register::<tektronix::TekTds224>(tektronix::TekTds224::MODEL);
        catalog.register::<thorlabs::Lcc25>(thorlabs::Lcc25::MODEL);
        catalog.register::<thorlabs::Sc10>(thorlabs::Sc10::MODEL);
        catalog.register::<thorlabs::Tc200>(thorlabs::Tc200::MODEL);
        catalog.register::<thorlabs::Pm100usb>(thorlabs::Pm100usb::MODEL);
        catalog.register::<yokogawa::Yokogawa7651>(yokogawa::Yokogawa7651::MODEL);
        catalog
    }

    pub fn register_factory(&mut self, name: impl Into<String>, builder: DriverBuilder) {
        let name = name.into();
        self.builders.insert(catalog_key(&name), (name, builder));
    }

    /// Registers `D`, built through [`OpenInstrument::open`].
    pub fn register<D>(&mut self, name: impl Into<String>)
    where
        D: OpenInstrument + Driver + 'static,
    {
        self.register_factory(
            name,
            Arc::new(|inst| {
                async move {
                    let driver = D::open(inst).await?;
                    Ok(Box::new(driver) as Box<dyn Driver>)
                }
                .boxed()
            }),
        );
    }

    pub fn contains(&self, class: &str) -> bool {
        self.builders.contains_key(&catalog_key(class))
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.values().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Builds the driver registered for `class` on top of `inst`.
    pub async fn build(&self, class: &str, inst: Instrument) -> Result<Box<dyn Driver>> {
        let (_, builder) = self
            .builders
            .get(&catalog_key(class))
            .ok_or_else(|| InstrumentError::Config(format!("Unknown instrument class: {class}")))?;
        builder(inst).await
    }
}
