// src/transport.rs

//! HTTP access for the manifest and package archives
//!
//! The rest of the crate only needs two things from the network: fetch a
//! small payload into memory, and stream a large one into a sink while
//! reporting progress. Both are behind the [`Transport`] trait so tests and
//! offline setups can substitute their own source.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for a request that fails before a response arrives
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Read buffer size for streamed downloads
const CHUNK_SIZE: usize = 8 * 1024;

/// Source of remote bytes
pub trait Transport {
    /// Fetch the full body at `url`; anything but HTTP 200 is a failure
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream the body at `url` into `sink`
    ///
    /// `on_chunk` receives `(bytes_downloaded, bytes_total)` after every
    /// chunk; `bytes_total` is 0 when the server does not announce a length.
    /// Returns the number of bytes written.
    fn download(
        &self,
        url: &str,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64, u64),
    ) -> Result<u64>;
}

/// Blocking HTTP client with retry support
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("opm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Send a GET request, retrying transport-level failures
    fn send(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::fetch(
                            url,
                            format!("request failed after {} attempts: {}", attempt, e),
                        ));
                    }
                    warn!("Request attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl Transport for HttpClient {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        info!("Fetching {}", url);
        let response = self.send(url)?;

        if response.status() != StatusCode::OK {
            return Err(Error::fetch(url, format!("HTTP {}", response.status())));
        }

        let body = response
            .bytes()
            .map_err(|e| Error::fetch(url, format!("failed to read body: {}", e)))?;

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }

    fn download(
        &self,
        url: &str,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64, u64),
    ) -> Result<u64> {
        info!("Downloading {}", url);
        let mut response = self.send(url)?;

        if !response.status().is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;

        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|e| Error::fetch(url, format!("connection interrupted: {}", e)))?;
            if read == 0 {
                break;
            }
            sink.write_all(&buffer[..read])?;
            downloaded += read as u64;
            on_chunk(downloaded, total);
        }

        sink.flush()?;
        debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(downloaded)
    }
}
