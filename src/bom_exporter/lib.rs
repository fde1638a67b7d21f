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

//! Prometheus metrics exporter for the Australian Bureau of Meteorology
//!
//! ## Features
//!
//! `bom_exporter` fetches [BoM] forecast and observation products (XML documents such as
//! `IDS10034.xml`) from the BoM anonymous FTP server, or from a local directory, and emits
//! them as Prometheus metrics. The product to export is picked per scrape with the `id`
//! query parameter. Every metric carries an `identifier` label naming the product and is
//! timestamped with the issue time of a forecast or the observation time of a station.
//!
//! Forecast products (`aac`, `parent_aac`, `description`, `region`, `index` labels):
//!
//! * `bom_forecast_precis{..., precis=$TEXT}` - Short forecast text, always `1`.
//! * `bom_forecast_air_temperature{..., units=$UNITS, type=minimum|maximum}` - Forecast temperature.
//! * `bom_forecast_precipitation_probability{...}` - Chance of any precipitation, in percent.
//! * `bom_forecast_icon_code{...}` - Forecast icon code.
//!
//! Observation products (`bom_id`, `wmo_id`, `station_name`, `latitude`, `longitude`,
//! `description`, `region`, `index`, `units` labels):
//!
//! * `bom_observations_temperature{..., type=ambient|apparent|dew_point|maximum|minimum|delta_t}`
//! * `bom_observations_wind_speed{..., type=gust|average}`
//! * `bom_observations_humidity{...}`
//! * `bom_observations_pressure{..., type=msl|qnh|absolute}`
//! * `bom_observations_visibility{...}`
//! * `bom_observations_cloud_base{...}`
//! * `bom_observations_cloud_cover{...}`
//! * `bom_observations_wind_direction{...}`
//! * `bom_observations_rainfall{...}` - Rain since 9am.
//!
//! The exporter also emits `bom_metrics_request_duration_seconds`, a histogram of the time
//! taken to serve each scrape, when `/metrics` is requested without an `id`.
//!
//! [BoM]: http://www.bom.gov.au/catalogue/data-feeds.shtml
//!
//! ## Build
//!
//! `bom_exporter` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//! From the root of a checkout, run the following.
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Run
//!
//! By default products are downloaded from `ftp.bom.gov.au:21` in the `anon/gen/fwo` directory.
//!
//! ```text
//! ./bom_exporter
//! ```
//!
//! Products can instead be read from `<directory>/<id>.xml` on the local filesystem.
//!
//! ```text
//! ./bom_exporter --source file --file-directory /var/lib/bom
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9782` at `/metrics`. Each scrape must name the
//! product to export using the `id` parameter, for example `/metrics?id=IDS10034`. Unknown
//! or unparseable products result in a `404` response.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     60s
//!   evaluation_interval: 60s
//!
//! scrape_configs:
//! - job_name: bom_adelaide_forecast
//!   params:
//!     id: [IDS10034]
//!   static_configs:
//!   - targets: ['example:9782']
//! - job_name: bom_exporter
//!   static_configs:
//!   - targets: ['example:9782']
//! ```
//!

pub mod client;
pub mod forecast;
pub mod http;
pub mod metrics;
pub mod observations;
pub mod product;
pub mod schema;
