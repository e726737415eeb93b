//! REST liveness probes for the assistant backend.
//!
//! Useful before [`connect`](crate::transport::TransportConnection::connect)
//! to tell "backend down" apart from "socket refused".
//!
//! ```no_run
//! use assistant_link::health::HealthClient;
//!
//! # async fn example() -> assistant_link::Result<()> {
//! let client = HealthClient::new("http://127.0.0.1:5000")?;
//! if client.is_alive().await {
//!     println!("{}", client.ping().await?.message);
//! }
//! # Ok(())
//! # }
//! ```

#![expect(
    clippy::module_name_repetitions,
    reason = "Health types include the module name to indicate their scope"
)]

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;
use crate::error::Error;

const HEALTHY: &str = "ok";

/// Reply of `GET /health`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Reply of `GET /api/ping`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct HealthClient {
    host: Url,
    client: ReqwestClient,
}

impl HealthClient {
    /// Creates a client for the backend at `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(host: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static("assistant_link"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(host)?,
            client,
        })
    }

    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    pub async fn check(&self) -> Result<HealthResponse> {
        self.get("health").await
    }

    pub async fn ping(&self) -> Result<PingResponse> {
        self.get("api/ping").await
    }

    /// `true` when `/health` answers with status `ok`. Any failure counts as
    /// not alive.
    pub async fn is_alive(&self) -> bool {
        match self.check().await {
            Ok(health) => health.status.eq_ignore_ascii_case(HEALTHY),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, host = %self.host, "Health check failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), err(level = "warn"))
    )]
    async fn get<Res: DeserializeOwned>(&self, path: &str) -> Result<Res> {
        let url = self.host.join(path)?;
        let request = self.client.request(Method::GET, url).build()?;

        let method = request.method().clone();
        let path = request.url().path().to_owned();

        let response = self.client.execute(request).await?;
        let status_code = response.status();

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::status(status_code, method, path, message));
        }

        Ok(response.json::<Res>().await?)
    }
}
