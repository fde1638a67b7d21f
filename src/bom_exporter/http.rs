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

use crate::client::{FileRetriever, FtpRetriever};
use crate::metrics::{encode_text, FamilySink, NAMESPACE};
use crate::product::ProductHandle;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::proto::MetricFamily;
use prometheus::{Histogram, HistogramOpts, Registry, TEXT_FORMAT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Where products are read from when a scrape names an identifier.
#[derive(Debug, Clone)]
pub enum ProductSource {
    Ftp { address: String, directory: String },
    File { directory: PathBuf },
}

impl ProductSource {
    fn handle(&self, id: &str, timeout: Duration) -> ProductHandle {
        match self {
            Self::Ftp { address, directory } => {
                ProductHandle::new(FtpRetriever::with_location(id, address, directory).with_timeout(timeout))
            }
            Self::File { directory } => ProductHandle::new(FileRetriever::in_directory(directory, id)),
        }
    }
}

impl fmt::Display for ProductSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ftp { address, directory } => write!(f, "ftp://{}/{}", address, directory),
            Self::File { directory } => write!(f, "file://{}", directory.display()),
        }
    }
}

/// State shared by all requests.
///
/// Every scrape that names a product gets its own handle, so a slow or failing scrape
/// never changes what a concurrent scrape of the same product returns.
pub struct RequestContext {
    registry: Registry,
    source: ProductSource,
    timeout: Duration,
    durations: Histogram,
}

impl RequestContext {
    /// Create a new context and register the request duration histogram with `registry`.
    ///
    /// # Panics
    ///
    /// If the histogram cannot be created or registered, this method will panic.
    pub fn new(registry: Registry, source: ProductSource, timeout: Duration) -> Self {
        let durations = Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "Histogram of request durations in seconds.")
                .namespace(NAMESPACE)
                .subsystem("metrics"),
        )
        .unwrap();

        registry.register(Box::new(durations.clone())).unwrap();

        RequestContext {
            registry,
            source,
            timeout,
            durations,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("source", &self.source)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the router serving `/metrics`.
///
/// Without an `id` query parameter the contents of the context registry are returned.
/// With one, the named product is fetched, decoded, and returned as metrics.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn metrics_handler(State(context): State<Arc<RequestContext>>, Query(params): Query<MetricsParams>) -> Response {
    let _timer = context.durations.start_timer();

    match params.id.as_deref().filter(|id| !id.is_empty()) {
        None => text_response(&context.registry.gather()),
        Some(id) => product_response(&context, id).await,
    }
}

async fn product_response(context: &RequestContext, id: &str) -> Response {
    let handle = context.source.handle(id, context.timeout);
    let mut sink = FamilySink::new();

    let res = match tokio::time::timeout(context.timeout, handle.refresh(&mut sink)).await {
        Ok(res) => res.map_err(|e| e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", context.timeout.as_millis())),
    };

    if let Err(e) = res {
        tracing::warn!(message = "failed to process product", identifier = %id, error = %e);
        return not_found(id);
    }

    tracing::debug!(message = "collected product metrics", identifier = %id, num_samples = sink.len());
    text_response(&sink.into_families())
}

fn text_response(families: &[MetricFamily]) -> Response {
    match encode_text(families) {
        Ok(buf) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

fn not_found(id: &str) -> Response {
    let body = ErrorBody {
        error: format!("'{}' not found.", id),
    };

    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

#[cfg(test)]
mod test {
    use super::{ProductSource, RequestContext};
    use prometheus::Registry;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_source_handle_identifier() {
        let file = ProductSource::File {
            directory: Path::new("/var/lib/bom").to_path_buf(),
        };
        let ftp = ProductSource::Ftp {
            address: "ftp.bom.gov.au:21".to_owned(),
            directory: "anon/gen/fwo".to_owned(),
        };

        assert_eq!("IDS10034", file.handle("IDS10034", Duration::from_secs(1)).identifier());
        assert_eq!("IDS60920", ftp.handle("IDS60920", Duration::from_secs(1)).identifier());
    }

    #[test]
    fn test_source_display() {
        let ftp = ProductSource::Ftp {
            address: "ftp.bom.gov.au:21".to_owned(),
            directory: "anon/gen/fwo".to_owned(),
        };
        assert_eq!("ftp://ftp.bom.gov.au:21/anon/gen/fwo", ftp.to_string());
    }

    #[test]
    fn test_duration_histogram_registered() {
        let ctx = RequestContext::new(
            Registry::new(),
            ProductSource::File {
                directory: Path::new(".").to_path_buf(),
            },
            Duration::from_secs(1),
        );
        let names: Vec<String> = ctx.registry.gather().iter().map(|mf| mf.get_name().to_owned()).collect();

        assert_eq!(vec!["bom_metrics_request_duration_seconds".to_owned()], names);
    }
}
