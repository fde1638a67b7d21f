// bom_exporter - Prometheus metrics exporter for the Bureau of Meteorology
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono::{DateTime, FixedOffset};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "bom";
pub const LABEL_IDENTIFIER: &str = "identifier";

/// Every metric family a product can be projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    ForecastPrecis,
    ForecastAirTemperature,
    ForecastPrecipitationProbability,
    ForecastIconCode,
    ObservationsTemperature,
    ObservationsWindSpeed,
    ObservationsHumidity,
    ObservationsPressure,
    ObservationsVisibility,
    ObservationsCloudBase,
    ObservationsCloudCover,
    ObservationsWindDirection,
    ObservationsRainfall,
}

impl Family {
    pub const FORECAST: [Family; 4] = [
        Family::ForecastPrecis,
        Family::ForecastAirTemperature,
        Family::ForecastPrecipitationProbability,
        Family::ForecastIconCode,
    ];

    pub const OBSERVATIONS: [Family; 9] = [
        Family::ObservationsTemperature,
        Family::ObservationsWindSpeed,
        Family::ObservationsHumidity,
        Family::ObservationsPressure,
        Family::ObservationsVisibility,
        Family::ObservationsCloudBase,
        Family::ObservationsCloudCover,
        Family::ObservationsWindDirection,
        Family::ObservationsRainfall,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ForecastPrecis => "forecast_precis",
            Self::ForecastAirTemperature => "forecast_air_temperature",
            Self::ForecastPrecipitationProbability => "forecast_precipitation_probability",
            Self::ForecastIconCode => "forecast_icon_code",
            Self::ObservationsTemperature => "observations_temperature",
            Self::ObservationsWindSpeed => "observations_wind_speed",
            Self::ObservationsHumidity => "observations_humidity",
            Self::ObservationsPressure => "observations_pressure",
            Self::ObservationsVisibility => "observations_visibility",
            Self::ObservationsCloudBase => "observations_cloud_base",
            Self::ObservationsCloudCover => "observations_cloud_cover",
            Self::ObservationsWindDirection => "observations_wind_direction",
            Self::ObservationsRainfall => "observations_rainfall",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Self::ForecastPrecis => "Precis forecast text.",
            Self::ForecastAirTemperature => "Temperature forecast in Celsius.",
            Self::ForecastPrecipitationProbability => "Probability of precipitation forecast in percentage.",
            Self::ForecastIconCode => "Forecast icon code.",
            Self::ObservationsTemperature => "Temperature observation.",
            Self::ObservationsWindSpeed => "Wind speed.",
            Self::ObservationsHumidity => "Relative humidity.",
            Self::ObservationsPressure => "Atmospheric pressure.",
            Self::ObservationsVisibility => "Visibility.",
            Self::ObservationsCloudBase => "Cloud base.",
            Self::ObservationsCloudCover => "Cloud cover.",
            Self::ObservationsWindDirection => "Wind direction.",
            Self::ObservationsRainfall => "Rain since 9am.",
        }
    }

    /// Fully qualified name as exposed to Prometheus, e.g. `bom_forecast_precis`
    pub fn fq_name(&self) -> String {
        format!("{}_{}", NAMESPACE, self.name())
    }
}

/// Label names and values of a single sample, in exposition order.
pub type Labels = Vec<(&'static str, String)>;

/// One labeled value emitted by projecting a product.
///
/// The product identifier is not part of `labels`. It is applied once per collection
/// by the sink, see [`SampleSink::emit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub family: Family,
    pub labels: Labels,
    pub value: f64,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }
}

/// Destination for samples produced by a projector.
pub trait SampleSink {
    /// Consume all samples from a single product with the given identifier.
    fn emit<I>(&mut self, identifier: &str, samples: I)
    where
        I: Iterator<Item = Sample>;
}

impl SampleSink for Vec<Sample> {
    fn emit<I>(&mut self, _identifier: &str, samples: I)
    where
        I: Iterator<Item = Sample>,
    {
        Extend::extend(self, samples);
    }
}

/// Sink that groups samples into Prometheus gauge families, ready for text encoding.
#[derive(Debug, Default)]
pub struct FamilySink {
    families: BTreeMap<Family, MetricFamily>,
}

impl FamilySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.families.values().map(|mf| mf.get_metric().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn into_families(self) -> Vec<MetricFamily> {
        self.families.into_values().collect()
    }

    fn metric(identifier: &str, sample: Sample) -> Metric {
        let mut m = Metric::default();
        m.mut_label().push(label_pair(LABEL_IDENTIFIER, identifier));
        for (name, value) in sample.labels {
            m.mut_label().push(label_pair(name, &value));
        }

        let mut gauge = Gauge::default();
        gauge.set_value(sample.value);
        m.set_gauge(gauge);

        if let Some(ts) = sample.timestamp {
            m.set_timestamp_ms(ts.timestamp_millis());
        }

        m
    }
}

impl SampleSink for FamilySink {
    fn emit<I>(&mut self, identifier: &str, samples: I)
    where
        I: Iterator<Item = Sample>,
    {
        for sample in samples {
            let family = sample.family;
            let mf = self.families.entry(family).or_insert_with(|| {
                let mut mf = MetricFamily::default();
                mf.set_name(family.fq_name());
                mf.set_help(family.help().to_owned());
                mf.set_field_type(MetricType::GAUGE);
                mf
            });

            mf.mut_metric().push(Self::metric(identifier, sample));
        }
    }
}

fn label_pair(name: &str, value: &str) -> LabelPair {
    let mut lp = LabelPair::default();
    lp.set_name(name.to_owned());
    lp.set_value(value.to_owned());
    lp
}

/// Encode metric families in the Prometheus text exposition format.
pub fn encode_text(families: &[MetricFamily]) -> Result<Vec<u8>, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(families, &mut buf)?;
    Ok(buf)
}
