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

//! Typed representation of BoM XML products.
//!
//! Every product shares a `<product>` root with an `<amoc>` envelope followed by either a
//! `<forecast>` or an `<observations>` section. Attributes are mapped with the `@` prefix
//! and element text with `$text`, as expected by `quick-xml`.

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::error;
use std::fmt;
use std::str;

#[derive(Debug)]
pub enum DecodeError {
    Encoding(str::Utf8Error),
    Xml(quick_xml::DeError),
    MissingIdentifier,
    AmbiguousBody,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding(e) => write!(f, "product is not valid UTF-8: {}", e),
            Self::Xml(e) => write!(f, "malformed product: {}", e),
            Self::MissingIdentifier => write!(f, "product has no identifier"),
            Self::AmbiguousBody => write!(f, "product contains both forecast and observations"),
        }
    }
}

impl error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Encoding(e) => Some(e),
            Self::Xml(e) => Some(e),
            Self::MissingIdentifier | Self::AmbiguousBody => None,
        }
    }
}

/// RFC 3339 timestamp carried either as element text or as an attribute value.
///
/// Any other encoding causes decoding of the entire product to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeField(DateTime<FixedOffset>);

impl TimeField {
    pub fn parse(raw: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(TimeField)
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.0.with_timezone(&Utc)
    }
}

impl<'de> Deserialize<'de> for TimeField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|e| de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }
}

/// Numeric attributes that are present but empty are read as zero.
fn empty_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    trimmed
        .parse()
        .map_err(|e| de::Error::custom(format!("invalid number '{}': {}", raw, e)))
}

/// A decoded product. `body` holds whichever of the forecast or observations sections
/// were present in the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub version: String,
    pub amoc: Amoc,
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Forecast(Forecast),
    Observations(Observations),
}

impl Product {
    /// Decode raw XML bytes into a `Product`.
    ///
    /// Missing attributes and elements are treated as empty values. Malformed XML, an
    /// invalid timestamp, a missing identifier, or a document with both forecast and
    /// observations sections are errors.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let text = str::from_utf8(data).map_err(DecodeError::Encoding)?;
        let raw: RawProduct = quick_xml::de::from_str(text).map_err(DecodeError::Xml)?;
        if raw.amoc.identifier.trim().is_empty() {
            return Err(DecodeError::MissingIdentifier);
        }

        let body = match (raw.forecast, raw.observations) {
            (Some(_), Some(_)) => return Err(DecodeError::AmbiguousBody),
            (Some(forecast), None) => Body::Forecast(forecast),
            (None, Some(observations)) => Body::Observations(observations),
            (None, None) => Body::Empty,
        };

        Ok(Product {
            version: raw.version,
            amoc: raw.amoc,
            body,
        })
    }

    pub fn forecast(&self) -> Option<&Forecast> {
        match &self.body {
            Body::Forecast(f) => Some(f),
            _ => None,
        }
    }

    pub fn observations(&self) -> Option<&Observations> {
        match &self.body {
            Body::Observations(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    #[serde(rename = "@version", default)]
    version: String,
    #[serde(rename = "amoc", default)]
    amoc: Amoc,
    #[serde(rename = "forecast", default)]
    forecast: Option<Forecast>,
    #[serde(rename = "observations", default)]
    observations: Option<Observations>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Amoc {
    #[serde(rename = "source", default)]
    pub source: Source,
    #[serde(rename = "identifier", default)]
    pub identifier: String,
    #[serde(rename = "issue-time-utc", default)]
    pub issue_time_utc: Option<TimeField>,
    #[serde(rename = "next-routine-issue-time-utc", default)]
    pub next_routine_issue_time_utc: Option<TimeField>,
    #[serde(rename = "product-type", default)]
    pub product_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Source {
    #[serde(rename = "sender", default)]
    pub sender: String,
    #[serde(rename = "region", default)]
    pub region: String,
    #[serde(rename = "office", default)]
    pub office: String,
    #[serde(rename = "copyright", default)]
    pub copyright: String,
    #[serde(rename = "disclaimer", default)]
    pub disclaimer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Forecast {
    #[serde(rename = "area", default)]
    pub areas: Vec<Area>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Area {
    #[serde(rename = "@aac", default)]
    pub aac: String,
    #[serde(rename = "@description", default)]
    pub description: String,
    #[serde(rename = "@type", default)]
    pub type_: String,
    #[serde(rename = "@parent-aac", default)]
    pub parent_aac: String,
    #[serde(rename = "forecast-period", default)]
    pub periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ForecastPeriod {
    #[serde(rename = "@index", default)]
    pub index: String,
    #[serde(rename = "@start-time-local", default)]
    pub start_time_local: Option<TimeField>,
    #[serde(rename = "@end-time-local", default)]
    pub end_time_local: Option<TimeField>,
    #[serde(rename = "@start-time-utc", default)]
    pub start_time_utc: Option<TimeField>,
    #[serde(rename = "@end-time-utc", default)]
    pub end_time_utc: Option<TimeField>,
    #[serde(rename = "element", default)]
    pub elements: Vec<Element>,
    #[serde(rename = "text", default)]
    pub texts: Vec<Text>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Observations {
    #[serde(rename = "station", default)]
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Station {
    #[serde(rename = "@wmo-id", default)]
    pub wmo_id: String,
    #[serde(rename = "@bom-id", default)]
    pub bom_id: String,
    #[serde(rename = "@tz", default)]
    pub timezone: String,
    #[serde(rename = "@stn-name", default)]
    pub name: String,
    #[serde(rename = "@stn-height", default, deserialize_with = "empty_as_zero")]
    pub height: f64,
    #[serde(rename = "@type", default)]
    pub type_: String,
    #[serde(rename = "@lat", default, deserialize_with = "empty_as_zero")]
    pub latitude: f64,
    #[serde(rename = "@lon", default, deserialize_with = "empty_as_zero")]
    pub longitude: f64,
    #[serde(rename = "@description", default)]
    pub description: String,
    #[serde(rename = "period", default)]
    pub period: Period,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Period {
    #[serde(rename = "@index", default)]
    pub index: String,
    #[serde(rename = "@time-utc", default)]
    pub time_utc: Option<TimeField>,
    #[serde(rename = "level", default)]
    pub level: Level,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Level {
    #[serde(rename = "@index", default)]
    pub index: String,
    #[serde(rename = "@type", default)]
    pub type_: String,
    #[serde(rename = "element", default)]
    pub elements: Vec<Element>,
}

/// A typed value such as a temperature or icon code. The value is always kept as the raw
/// text from the document and converted by whatever consumes it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Element {
    #[serde(rename = "@type", default)]
    pub type_: String,
    #[serde(rename = "@units", default)]
    pub units: String,
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Text {
    #[serde(rename = "@type", default)]
    pub type_: String,
    #[serde(rename = "$text", default)]
    pub value: String,
}

/// Log each element at debug level.
pub fn dump_elements(elements: &[Element]) {
    for e in elements {
        tracing::debug!(message = "element", type_ = %e.type_, units = %e.units, value = %e.value);
    }
}

/// Log each text at debug level.
pub fn dump_texts(texts: &[Text]) {
    for t in texts {
        tracing::debug!(message = "text", type_ = %t.type_, value = %t.value);
    }
}

/// Log the time range and contents of a forecast period at debug level.
pub fn dump_period(period: &ForecastPeriod) {
    tracing::debug!(
        message = "forecast period",
        index = %period.index,
        start = ?period.start_time_utc.map(|t| t.as_datetime()),
        end = ?period.end_time_utc.map(|t| t.as_datetime()),
    );
    dump_elements(&period.elements);
    dump_texts(&period.texts);
}

/// Log the decoded contents of a product at debug level.
pub fn dump_product(product: &Product) {
    match &product.body {
        Body::Forecast(forecast) => {
            for area in forecast.areas.iter().filter(|a| a.type_ == crate::forecast::AREA_LOCATION) {
                tracing::debug!(message = "forecast area", description = %area.description, region = %product.amoc.source.region);
                area.periods.iter().for_each(dump_period);
            }
        }
        Body::Observations(observations) => {
            for station in &observations.stations {
                tracing::debug!(message = "observation station", name = %station.name, bom_id = %station.bom_id);
                dump_elements(&station.period.level.elements);
            }
        }
        Body::Empty => {}
    }
}

#[cfg(test)]
mod test {
    use super::{Body, DecodeError, Product, TimeField};
    use chrono::{FixedOffset, TimeZone, Utc};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct ElementTime {
        #[serde(rename = "time")]
        time: TimeField,
    }

    #[derive(Debug, Deserialize)]
    struct AttrTime {
        #[serde(rename = "@time")]
        time: TimeField,
    }

    fn expected_times() -> Vec<(&'static str, chrono::DateTime<FixedOffset>)> {
        let utc = FixedOffset::east_opt(0).unwrap();
        let adelaide = FixedOffset::east_opt(10 * 3600 + 1800).unwrap();

        vec![
            ("2022-03-29T06:02:13Z", utc.with_ymd_and_hms(2022, 3, 29, 6, 2, 13).unwrap()),
            ("2022-03-31T13:30:00Z", utc.with_ymd_and_hms(2022, 3, 31, 13, 30, 0).unwrap()),
            ("2022-04-21T07:30:00+10:30", adelaide.with_ymd_and_hms(2022, 4, 21, 7, 30, 0).unwrap()),
            ("2022-07-21T06:35:00+00:00", utc.with_ymd_and_hms(2022, 7, 21, 6, 35, 0).unwrap()),
        ]
    }

    #[test]
    fn test_time_field_element() {
        for (raw, expected) in expected_times() {
            let xml = format!("<test><time>{}</time></test>", raw);
            let parsed: ElementTime = quick_xml::de::from_str(&xml).unwrap();
            assert_eq!(expected, parsed.time.as_datetime(), "input {}", raw);
        }
    }

    #[test]
    fn test_time_field_attribute() {
        for (raw, expected) in expected_times() {
            let xml = format!(r#"<test time="{}"></test>"#, raw);
            let parsed: AttrTime = quick_xml::de::from_str(&xml).unwrap();
            assert_eq!(expected, parsed.time.as_datetime(), "input {}", raw);
        }
    }

    #[test]
    fn test_time_field_offset_is_same_instant() {
        let local = TimeField::parse("2022-04-21T07:30:00+10:30").unwrap();
        let utc = TimeField::parse("2022-04-20T21:00:00Z").unwrap();
        assert_eq!(local.to_utc(), utc.to_utc());
        assert_eq!(Utc.with_ymd_and_hms(2022, 4, 20, 21, 0, 0).unwrap(), local.to_utc());
    }

    #[test]
    fn test_time_field_rejects_other_encodings() {
        for raw in ["2022-03-29 06:02", "29/03/2022 06:02:13", "2022-03-29T06:02:13", ""] {
            let xml = format!("<test><time>{}</time></test>", raw);
            let res: Result<ElementTime, _> = quick_xml::de::from_str(&xml);
            assert!(res.is_err(), "input {:?} should not parse", raw);
        }
    }

    #[test]
    fn test_parse_invalid_issue_time_fails_product() {
        let xml = r#"<product version="v1.7">
            <amoc><identifier>IDS10034</identifier><issue-time-utc>yesterday</issue-time-utc></amoc>
            <forecast/>
        </product>"#;

        let res = Product::parse(xml.as_bytes());
        assert!(matches!(res, Err(DecodeError::Xml(_))));
    }

    #[test]
    fn test_parse_invalid_period_time_fails_product() {
        let xml = r#"<product>
            <amoc><identifier>IDS60920</identifier></amoc>
            <observations>
                <station bom-id="023034"><period index="0" time-utc="not a time"></period></station>
            </observations>
        </product>"#;

        let res = Product::parse(xml.as_bytes());
        assert!(matches!(res, Err(DecodeError::Xml(_))));
    }

    #[test]
    fn test_parse_empty_body() {
        let xml = r#"<product version="v1.7"><amoc><identifier>IDX00000</identifier></amoc></product>"#;
        let product = Product::parse(xml.as_bytes()).unwrap();

        assert_eq!("v1.7", product.version);
        assert_eq!("IDX00000", product.amoc.identifier);
        assert_eq!(Body::Empty, product.body);
        assert!(product.amoc.issue_time_utc.is_none());
    }

    #[test]
    fn test_parse_both_bodies_is_ambiguous() {
        let xml = r#"<product><amoc><identifier>IDX00000</identifier></amoc><forecast/><observations/></product>"#;
        let res = Product::parse(xml.as_bytes());
        assert!(matches!(res, Err(DecodeError::AmbiguousBody)));
    }

    #[test]
    fn test_parse_not_xml() {
        assert!(matches!(Product::parse(b"<product><amoc>"), Err(DecodeError::Xml(_))));
        assert!(matches!(Product::parse(&[0xff, 0xfe, 0x00]), Err(DecodeError::Encoding(_))));
    }

    #[test]
    fn test_parse_forecast_interleaved_elements_and_texts() {
        let xml = r#"<product>
            <amoc>
                <source><region>South Australia</region></source>
                <identifier>IDS10034</identifier>
                <issue-time-utc>2022-03-29T06:02:13Z</issue-time-utc>
            </amoc>
            <forecast>
                <area aac="SA_PT001" description="Adelaide" type="location" parent-aac="SA_PW001">
                    <forecast-period index="1" start-time-local="2022-03-30T00:00:00+10:30" start-time-utc="2022-03-29T13:30:00Z">
                        <element type="forecast_icon_code">3</element>
                        <text type="precis">Partly cloudy.</text>
                        <element type="air_temperature_maximum" units="Celsius">24</element>
                        <text type="probability_of_precipitation">5%</text>
                    </forecast-period>
                </area>
            </forecast>
        </product>"#;

        let product = Product::parse(xml.as_bytes()).unwrap();
        let forecast = product.forecast().unwrap();
        let period = &forecast.areas[0].periods[0];

        assert_eq!("South Australia", product.amoc.source.region);
        assert_eq!("SA_PW001", forecast.areas[0].parent_aac);
        assert_eq!(2, period.elements.len());
        assert_eq!(2, period.texts.len());
        assert_eq!("Celsius", period.elements[1].units);
        assert_eq!("24", period.elements[1].value);
        assert_eq!("Partly cloudy.", period.texts[0].value);
        assert!(period.end_time_utc.is_none());
        assert_eq!(
            TimeField::parse("2022-03-29T13:30:00Z").unwrap().to_utc(),
            period.start_time_local.unwrap().to_utc()
        );
    }

    #[test]
    fn test_parse_observations_station() {
        let xml = r#"<product>
            <amoc><identifier>IDS60920</identifier></amoc>
            <observations>
                <station wmo-id="94672" bom-id="023034" tz="Australia/Adelaide" stn-name="ADELAIDE AIRPORT"
                         stn-height="2.00" type="AWS" lat="-34.9524" lon="138.5196" description="Adelaide Airport">
                    <period index="0" time-utc="2022-03-29T06:00:00+00:00">
                        <level index="0" type="surface">
                            <element units="Celsius" type="air_temperature">21.3</element>
                            <element units="hPa" type="pres">1017.9</element>
                        </level>
                    </period>
                </station>
            </observations>
        </product>"#;

        let product = Product::parse(xml.as_bytes()).unwrap();
        let station = &product.observations().unwrap().stations[0];

        assert_eq!("94672", station.wmo_id);
        assert_eq!("023034", station.bom_id);
        assert_eq!("Australia/Adelaide", station.timezone);
        assert_eq!(2.0, station.height);
        assert_eq!(-34.9524, station.latitude);
        assert_eq!("surface", station.period.level.type_);
        assert_eq!(2, station.period.level.elements.len());
        assert_eq!("1017.9", station.period.level.elements[1].value);
    }

    #[test]
    fn test_parse_missing_identifier() {
        for xml in [
            "<product><amoc/></product>",
            "<product><amoc><identifier> </identifier></amoc><forecast/></product>",
            r#"<product version="v1.7"><observations/></product>"#,
        ] {
            let res = Product::parse(xml.as_bytes());
            assert!(matches!(res, Err(DecodeError::MissingIdentifier)), "input {}", xml);
        }
    }

    #[test]
    fn test_parse_station_empty_numeric_attributes() {
        let xml = r#"<product>
            <amoc><identifier>IDS60920</identifier></amoc>
            <observations>
                <station bom-id="023034" stn-height="" lat="" lon="-1"></station>
            </observations>
        </product>"#;

        let product = Product::parse(xml.as_bytes()).unwrap();
        let station = &product.observations().unwrap().stations[0];

        assert_eq!(0.0, station.height);
        assert_eq!(0.0, station.latitude);
        assert_eq!(-1.0, station.longitude);
    }

    #[test]
    fn test_parse_station_invalid_numeric_attribute() {
        let xml = r#"<product>
            <amoc><identifier>IDS60920</identifier></amoc>
            <observations><station bom-id="023034" lat="south"></station></observations>
        </product>"#;

        assert!(matches!(Product::parse(xml.as_bytes()), Err(DecodeError::Xml(_))));
    }
}
