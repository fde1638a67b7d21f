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

//! Projection of forecast products into samples.
//!
//! Only areas of type `location` are projected. Region level roll-ups carry free text
//! synopses rather than values and are skipped. All samples from a document share the
//! issue time of the document as their timestamp.

use crate::metrics::{Family, Labels, Sample};
use crate::schema::{Area, Element, ForecastPeriod, Product, Text};
use chrono::{DateTime, FixedOffset};

pub const AREA_LOCATION: &str = "location";

const LABEL_AAC: &str = "aac";
const LABEL_PARENT_AAC: &str = "parent_aac";
const LABEL_DESCRIPTION: &str = "description";
const LABEL_REGION: &str = "region";
const LABEL_INDEX: &str = "index";
const LABEL_PRECIS: &str = "precis";
const LABEL_UNITS: &str = "units";
const LABEL_TYPE: &str = "type";

const TEXT_PRECIS: &str = "precis";
const TEXT_PRECIPITATION: &str = "probability_of_precipitation";

/// Which end of the forecast temperature range an element carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureKind {
    Minimum,
    Maximum,
}

impl TemperatureKind {
    pub fn from_type(type_: &str) -> Option<Self> {
        match type_ {
            "air_temperature_minimum" => Some(Self::Minimum),
            "air_temperature_maximum" => Some(Self::Maximum),
            _ => None,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
        }
    }
}

/// Numeric forecast elements that are exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForecastElement {
    AirTemperature(TemperatureKind),
    IconCode,
}

impl ForecastElement {
    fn from_type(type_: &str) -> Option<Self> {
        match type_ {
            "forecast_icon_code" => Some(Self::IconCode),
            other => TemperatureKind::from_type(other).map(Self::AirTemperature),
        }
    }
}

/// Lazily project every location area of a forecast product into samples.
///
/// Yields nothing if the product does not contain a forecast.
pub fn samples(product: &Product) -> impl Iterator<Item = Sample> + '_ {
    let areas: &[Area] = product.forecast().map(|f| f.areas.as_slice()).unwrap_or_default();
    let region = product.amoc.source.region.as_str();
    let issued = product.amoc.issue_time_utc.map(|t| t.as_datetime());

    areas
        .iter()
        .filter(|area| area.type_ == AREA_LOCATION)
        .flat_map(move |area| {
            area.periods.iter().map(move |period| PeriodContext {
                area,
                period,
                region,
                issued,
            })
        })
        .flat_map(|ctx| {
            ctx.period
                .texts
                .iter()
                .filter_map(move |t| ctx.text_sample(t))
                .chain(ctx.period.elements.iter().filter_map(move |e| ctx.element_sample(e)))
        })
}

#[derive(Debug, Clone, Copy)]
struct PeriodContext<'a> {
    area: &'a Area,
    period: &'a ForecastPeriod,
    region: &'a str,
    issued: Option<DateTime<FixedOffset>>,
}

impl<'a> PeriodContext<'a> {
    fn labels(&self) -> Labels {
        vec![
            (LABEL_AAC, self.area.aac.clone()),
            (LABEL_PARENT_AAC, self.area.parent_aac.clone()),
            (LABEL_DESCRIPTION, self.area.description.clone()),
            (LABEL_REGION, self.region.to_owned()),
            (LABEL_INDEX, self.period.index.clone()),
        ]
    }

    fn sample(&self, family: Family, labels: Labels, value: f64) -> Sample {
        Sample {
            family,
            labels,
            value,
            timestamp: self.issued,
        }
    }

    fn text_sample(&self, text: &Text) -> Option<Sample> {
        match text.type_.as_str() {
            TEXT_PRECIS => {
                let mut labels = self.labels();
                labels.push((LABEL_PRECIS, text.value.clone()));
                Some(self.sample(Family::ForecastPrecis, labels, 1.0))
            }
            TEXT_PRECIPITATION => match parse_percentage(&text.value) {
                Some(v) => Some(self.sample(Family::ForecastPrecipitationProbability, self.labels(), v)),
                None => {
                    tracing::debug!(
                        message = "skipping unparseable text",
                        aac = %self.area.aac,
                        type_ = %text.type_,
                        value = %text.value,
                    );
                    None
                }
            },
            _ => None,
        }
    }

    fn element_sample(&self, element: &Element) -> Option<Sample> {
        let kind = ForecastElement::from_type(&element.type_)?;
        let value = match element.value.trim().parse::<f64>() {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(
                    message = "skipping unparseable element",
                    aac = %self.area.aac,
                    type_ = %element.type_,
                    value = %element.value,
                    error = %e,
                );
                return None;
            }
        };

        Some(match kind {
            ForecastElement::AirTemperature(temp) => {
                let mut labels = self.labels();
                labels.push((LABEL_UNITS, element.units.clone()));
                labels.push((LABEL_TYPE, temp.as_label().to_owned()));
                self.sample(Family::ForecastAirTemperature, labels, value)
            }
            ForecastElement::IconCode => self.sample(Family::ForecastIconCode, self.labels(), value),
        })
    }
}

/// Parse values like `55%` into `55.0`
fn parse_percentage(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    trimmed.strip_suffix('%').unwrap_or(trimmed).trim().parse::<f64>().ok()
}
