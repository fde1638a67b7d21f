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

use bom_exporter::client::FtpRetriever;
use bom_exporter::http::{ProductSource, RequestContext};
use clap::{Parser, ValueEnum};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9782);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_FILE_DIRECTORY: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Download products from an FTP server
    Ftp,
    /// Read products from a local directory
    File,
}

#[derive(Debug, Parser)]
#[clap(name = "bom_exporter", version = clap::crate_version!())]
struct BomExporterApplication {
    /// Where products named by the `id` parameter of each scrape are read from
    #[clap(long, value_enum, default_value_t = SourceKind::Ftp)]
    source: SourceKind,

    /// Address of the FTP server to download products from, as host:port
    #[clap(long, default_value_t = FtpRetriever::DEFAULT_ADDRESS.into())]
    ftp_address: String,

    /// Directory on the FTP server that contains products
    #[clap(long, default_value_t = FtpRetriever::DEFAULT_DIRECTORY.into())]
    ftp_directory: String,

    /// Local directory that contains products, named `<id>.xml`
    #[clap(long, default_value = DEFAULT_FILE_DIRECTORY)]
    file_directory: PathBuf,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for fetching a product, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to. By default, bom_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

impl BomExporterApplication {
    fn product_source(&self) -> ProductSource {
        match self.source {
            SourceKind::Ftp => ProductSource::Ftp {
                address: self.ftp_address.clone(),
                directory: self.ftp_directory.clone(),
            },
            SourceKind::File => ProductSource::File {
                directory: self.file_directory.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = BomExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let source = opts.product_source();
    if let ProductSource::File { directory } = &source {
        if !directory.is_dir() {
            tracing::error!(message = "product directory does not exist", directory = %directory.display());
            process::exit(1)
        }
    }

    tracing::info!(message = "reading products", source = %source);

    let timeout = Duration::from_millis(opts.timeout_millis);
    let registry = prometheus::default_registry().clone();
    let context = Arc::new(RequestContext::new(registry, source, timeout));
    let app = bom_exporter::http::router(context);

    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());
    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
