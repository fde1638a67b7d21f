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

use crate::client::{ClientError, Retriever};
use crate::metrics::SampleSink;
use crate::schema::{self, Body, DecodeError, Product};
use crate::{forecast, observations};
use std::error;
use std::fmt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum ProductError {
    Retrieve(ClientError),
    Decode(DecodeError),
}

impl fmt::Display for ProductError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieve(e) => write!(f, "retrieval failed: {}", e),
            Self::Decode(e) => write!(f, "decoding failed: {}", e),
        }
    }
}

impl error::Error for ProductError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Retrieve(e) => Some(e),
            Self::Decode(e) => Some(e),
        }
    }
}

/// Owner of the latest decoded product for a single identifier.
///
/// A handle starts empty and holds a product after a successful call to
/// `retrieve_and_parse`. Retrieval, parsing, and collection all happen under a lock
/// owned by the handle so that a collection never sees a product that is being replaced.
/// Handles for different identifiers share nothing and can be used in parallel.
#[derive(Debug)]
pub struct ProductHandle {
    retriever: Box<dyn Retriever>,
    product: Mutex<Option<Product>>,
}

impl ProductHandle {
    pub fn new<R>(retriever: R) -> Self
    where
        R: Retriever + 'static,
    {
        ProductHandle {
            retriever: Box::new(retriever),
            product: Mutex::new(None),
        }
    }

    pub fn identifier(&self) -> &str {
        self.retriever.identifier()
    }

    pub async fn is_parsed(&self) -> bool {
        self.product.lock().await.is_some()
    }

    /// Fetch and decode the product, replacing any previously decoded one.
    ///
    /// On failure the handle is left empty.
    pub async fn retrieve_and_parse(&self) -> Result<(), ProductError> {
        let mut product = self.product.lock().await;
        self.reload(&mut product).await
    }

    /// Project the current product into `sink`. Emits nothing when no product has been
    /// parsed or when the product has neither a forecast nor observations.
    pub async fn collect<S>(&self, sink: &mut S)
    where
        S: SampleSink,
    {
        let product = self.product.lock().await;
        if let Some(p) = product.as_ref() {
            project(p, sink);
        }
    }

    /// Fetch, decode, and project the product into `sink` under a single acquisition
    /// of the handle lock, so no other caller can replace or discard the product in between.
    ///
    /// Nothing is emitted on failure and the handle is left empty.
    pub async fn refresh<S>(&self, sink: &mut S) -> Result<(), ProductError>
    where
        S: SampleSink,
    {
        let mut product = self.product.lock().await;
        self.reload(&mut product).await?;

        if let Some(p) = product.as_ref() {
            project(p, sink);
        }

        Ok(())
    }

    async fn reload(&self, product: &mut Option<Product>) -> Result<(), ProductError> {
        *product = None;

        let data = self.retriever.retrieve().await.map_err(|e| {
            tracing::warn!(message = "failed to retrieve product", identifier = %self.identifier(), error = %e);
            ProductError::Retrieve(e)
        })?;

        let parsed = Product::parse(&data).map_err(ProductError::Decode)?;
        tracing::debug!(
            message = "parsed product",
            identifier = %self.identifier(),
            product = %parsed.amoc.identifier,
            num_bytes = data.len(),
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            schema::dump_product(&parsed);
        }

        *product = Some(parsed);
        Ok(())
    }
}

fn project<S>(product: &Product, sink: &mut S)
where
    S: SampleSink,
{
    let identifier = product.amoc.identifier.as_str();
    match &product.body {
        Body::Forecast(_) => sink.emit(identifier, forecast::samples(product)),
        Body::Observations(_) => sink.emit(identifier, observations::samples(product)),
        Body::Empty => {}
    }
}
