//! HTTP client with rate limiting, used to check stream sources.
//!
//! Stream sources handed out by the resolver are signed URLs that expire
//! after a few hours. Before a queued track starts, its cached source is
//! probed; only dead sources are resolved again.
//!
//! # Rate Limiting
//!
//! * 50 calls per 5-second interval
//! * Allows bursts up to the maximum calls per interval
//! * Requests that would exceed the limit are delayed

use std::{future::Future, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, RANGE},
    Method,
};
use url::Url;

use crate::{config::Config, error::Result};

/// Checks whether a stream source can still be opened.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn is_live(&self, url: &str) -> bool;
}

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// Media hosts answer quickly or not at all; a slow answer counts as a
    /// dead source.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request for the first byte of `url`.
    fn first_byte(url: Url) -> reqwest::Request {
        let mut request = reqwest::Request::new(Method::GET, url);
        request
            .headers_mut()
            .insert(RANGE, HeaderValue::from_static("bytes=0-0"));
        request
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails on the network.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

#[async_trait]
impl Probe for Client {
    async fn is_live(&self, url: &str) -> bool {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                debug!("stream source {url} is not a url: {e}");
                return false;
            }
        };

        // Local files and other non-HTTP sources are opened by the audio pipe.
        if !matches!(url.scheme(), "http" | "https") {
            return true;
        }

        match self.execute(Self::first_byte(url)).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("stream source answered {}", response.status());
                false
            }
            Err(e) => {
                debug!("stream source unreachable: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_sources_are_dead() {
        let client = Client::new(&Config::default()).unwrap();
        assert!(!client.is_live("not a url").await);
    }

    #[tokio::test]
    async fn local_sources_are_not_probed() {
        let client = Client::new(&Config::default()).unwrap();
        assert!(client.is_live("file:///tmp/song.mp3").await);
    }

    #[test]
    fn probes_request_a_single_byte() {
        let url = Url::parse("https://cdn.example/stream").unwrap();
        let request = Client::first_byte(url);
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers()[RANGE], "bytes=0-0");
    }
}
