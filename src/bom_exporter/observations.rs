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

//! Projection of observation products into samples.
//!
//! Every station is projected. Each element of the latest period is mapped to one of the
//! `observations_*` families based on its type. Samples are timestamped with the time of
//! the station's reading rather than the issue time of the document.

use crate::metrics::{Family, Labels, Sample};
use crate::schema::{Element, Product, Station};

const LABEL_BOM_ID: &str = "bom_id";
const LABEL_WMO_ID: &str = "wmo_id";
const LABEL_STATION_NAME: &str = "station_name";
const LABEL_LATITUDE: &str = "latitude";
const LABEL_LONGITUDE: &str = "longitude";
const LABEL_DESCRIPTION: &str = "description";
const LABEL_REGION: &str = "region";
const LABEL_INDEX: &str = "index";
const LABEL_TYPE: &str = "type";
const LABEL_UNITS: &str = "units";

const UNITS_OKTAS: &str = "oktas";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureKind {
    Ambient,
    Apparent,
    Maximum,
    Minimum,
    DewPoint,
    DeltaT,
}

impl TemperatureKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::Apparent => "apparent",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::DewPoint => "dew_point",
            Self::DeltaT => "delta_t",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindKind {
    Gust,
    Average,
}

impl WindKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Gust => "gust",
            Self::Average => "average",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureKind {
    Absolute,
    Msl,
    Qnh,
}

impl PressureKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Absolute => "absolute",
            Self::Msl => "msl",
            Self::Qnh => "qnh",
        }
    }
}

/// What an observation element measures, determined by its `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Temperature(TemperatureKind),
    WindSpeed(WindKind),
    Humidity,
    Pressure(PressureKind),
    Visibility,
    CloudBase,
    CloudCover,
    WindDirection,
    Rainfall,
}

impl Reading {
    /// Map a raw element type to a reading, `None` for types that aren't exported.
    pub fn from_type(type_: &str) -> Option<Self> {
        Some(match type_ {
            "apparent_temp" => Self::Temperature(TemperatureKind::Apparent),
            "air_temperature" => Self::Temperature(TemperatureKind::Ambient),
            "maximum_air_temperature" => Self::Temperature(TemperatureKind::Maximum),
            "minimum_air_temperature" => Self::Temperature(TemperatureKind::Minimum),
            "dew_point" => Self::Temperature(TemperatureKind::DewPoint),
            "delta_t" => Self::Temperature(TemperatureKind::DeltaT),
            "gust_kmh" | "wind_gust_spd" => Self::WindSpeed(WindKind::Gust),
            "wind_spd_kmh" | "wind_spd" => Self::WindSpeed(WindKind::Average),
            "rel-humidity" => Self::Humidity,
            "pres" => Self::Pressure(PressureKind::Absolute),
            "msl_pres" => Self::Pressure(PressureKind::Msl),
            "qnh_pres" => Self::Pressure(PressureKind::Qnh),
            "vis_km" => Self::Visibility,
            "cloud_base_m" => Self::CloudBase,
            "cloud_oktas" => Self::CloudCover,
            "wind_dir_deg" => Self::WindDirection,
            "rainfall_24hr" => Self::Rainfall,
            _ => return None,
        })
    }

    pub fn family(&self) -> Family {
        match self {
            Self::Temperature(_) => Family::ObservationsTemperature,
            Self::WindSpeed(_) => Family::ObservationsWindSpeed,
            Self::Humidity => Family::ObservationsHumidity,
            Self::Pressure(_) => Family::ObservationsPressure,
            Self::Visibility => Family::ObservationsVisibility,
            Self::CloudBase => Family::ObservationsCloudBase,
            Self::CloudCover => Family::ObservationsCloudCover,
            Self::WindDirection => Family::ObservationsWindDirection,
            Self::Rainfall => Family::ObservationsRainfall,
        }
    }

    /// Value of the `type` label for families that distinguish sub-types.
    pub fn kind_label(&self) -> Option<&'static str> {
        match self {
            Self::Temperature(k) => Some(k.as_label()),
            Self::WindSpeed(k) => Some(k.as_label()),
            Self::Pressure(k) => Some(k.as_label()),
            _ => None,
        }
    }

    fn units<'a>(&self, element: &'a Element) -> &'a str {
        match self {
            Self::CloudCover => UNITS_OKTAS,
            _ => &element.units,
        }
    }
}

/// Lazily project every station of an observations product into samples.
///
/// Yields nothing if the product does not contain observations.
pub fn samples(product: &Product) -> impl Iterator<Item = Sample> + '_ {
    let stations: &[Station] = product.observations().map(|o| o.stations.as_slice()).unwrap_or_default();
    let region = product.amoc.source.region.as_str();

    stations.iter().flat_map(move |station| {
        station
            .period
            .level
            .elements
            .iter()
            .filter_map(move |e| station_sample(station, region, e))
    })
}

fn station_labels(station: &Station, region: &str) -> Labels {
    vec![
        (LABEL_BOM_ID, station.bom_id.clone()),
        (LABEL_WMO_ID, station.wmo_id.clone()),
        (LABEL_STATION_NAME, station.name.clone()),
        (LABEL_LATITUDE, format!("{:.6}", station.latitude)),
        (LABEL_LONGITUDE, format!("{:.6}", station.longitude)),
        (LABEL_DESCRIPTION, station.description.clone()),
        (LABEL_REGION, region.to_owned()),
        (LABEL_INDEX, station.period.index.clone()),
    ]
}

fn station_sample(station: &Station, region: &str, element: &Element) -> Option<Sample> {
    let reading = Reading::from_type(&element.type_)?;
    let value = match element.value.trim().parse::<f64>() {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(
                message = "skipping unparseable element",
                bom_id = %station.bom_id,
                type_ = %element.type_,
                value = %element.value,
                error = %e,
            );
            return None;
        }
    };

    let mut labels = station_labels(station, region);
    if let Some(kind) = reading.kind_label() {
        labels.push((LABEL_TYPE, kind.to_owned()));
    }
    labels.push((LABEL_UNITS, reading.units(element).to_owned()));

    Some(Sample {
        family: reading.family(),
        labels,
        value,
        timestamp: station.period.time_utc.map(|t| t.as_datetime()),
    })
}
