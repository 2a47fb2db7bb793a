//! HTTP client to interact with RedNote website and its CDN.

use eyre::{bail, Result, WrapErr};
use kuchiki::traits::*;
use rand::prelude::*;
use std::{io::Read, thread, time::Duration};
use url::Url;

/// Use the website URL as referer, the CDN rejects unknown referers.
const REFERER: &str = "https://www.xiaohongshu.com/";
/// Upper bound of the delay between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// User agent to reduce our visibility (trying at least...)
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0";

/// Something able to retrieve the bytes behind an URL.
pub trait Fetcher: Send + Sync {
    /// Downloads the resource at `url` in the given buffer.
    fn fetch(&self, url: &Url, buf: &mut Vec<u8>) -> Result<()>;
}

/// A simple HTTP client, handle retry and delay.
#[derive(Clone)]
pub struct Client {
    /// HTTP client.
    agent: ureq::Agent,
    /// Delay between each request.
    delay: Duration,
    /// Max number of retry for each request.
    retry: u8,
}

impl Client {
    /// Initialize a new client.
    pub fn new(retry: u8, delay: Duration) -> Self {
        Self {
            agent: ureq::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(30))
                .build(),
            delay,
            retry,
        }
    }

    /// Retrieves and parses the HTML at `url`.
    pub fn get_html(&self, url: &Url) -> Result<kuchiki::NodeRef> {
        let request = self
            .agent
            .request_url("GET", url)
            .set("accept", "text/html");

        let response = self.call(request).context("get HTML")?;
        let html = response.into_string().context("read HTML")?;

        Ok(kuchiki::parse_html().one(html))
    }

    /// Downloads the specified image in the given buffer.
    pub fn get_image(&self, url: &Url, buf: &mut Vec<u8>) -> Result<()> {
        let request =
            self.agent.request_url("GET", url).set("accept", "image/*");

        let response = self.call(request).context("get image")?;
        response
            .into_reader()
            .read_to_end(buf)
            .context("read image")?;

        Ok(())
    }

    /// Executes a request, retrying on transient failures.
    fn call(&self, request: ureq::Request) -> Result<ureq::Response> {
        // Wait a bit, the CDN throttles bursts.
        if !self.delay.is_zero() {
            let jitter = rand::thread_rng().gen_range(0..1000);
            thread::sleep(self.delay + Duration::from_millis(jitter));
        }

        let request = request.set("Referer", REFERER);
        let mut attempt = 0;
        loop {
            match request.clone().call() {
                Err(ureq::Error::Status(code, ref response))
                    if attempt < self.retry && is_transient(code) =>
                {
                    attempt += 1;
                    let retry_after = response.header("retry-after");
                    thread::sleep(self.backoff(retry_after, attempt));
                },
                // Referer check failed or the signed URL expired.
                Err(ureq::Error::Status(403, _)) => {
                    bail!("access denied by the CDN (HTTP 403)")
                },
                res => return res.context("HTTP request failed"),
            }
        }
    }

    /// Computes the delay before the `attempt`-th retry.
    ///
    /// `Retry-After` wins, otherwise the delay doubles at each attempt.
    fn backoff(&self, retry_after: Option<&str>, attempt: u8) -> Duration {
        retry_after
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or_else(
                || {
                    let base = self.delay.max(Duration::from_secs(1));
                    (base * 2_u32.pow(u32::from(attempt.min(6)).saturating_sub(1)))
                        .min(MAX_BACKOFF)
                },
                Duration::from_secs,
            )
    }
}

impl Fetcher for Client {
    fn fetch(&self, url: &Url, buf: &mut Vec<u8>) -> Result<()> {
        self.get_image(url, buf)
    }
}

/// Tests if a status is worth retrying: rate limiting or server errors.
fn is_transient(http_status: u16) -> bool {
    http_status == 429 || (500..=599).contains(&http_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_status() {
        assert!(is_transient(429));
        assert!(is_transient(503));
        assert!(!is_transient(403));
        assert!(!is_transient(404));
        assert!(!is_transient(200));
    }

    #[test]
    fn backoff() {
        let client = Client::new(3, Duration::ZERO);

        assert_eq!(client.backoff(Some("7"), 1), Duration::from_secs(7));
        assert_eq!(client.backoff(None, 1), Duration::from_secs(1));
        assert_eq!(client.backoff(None, 3), Duration::from_secs(4));
        assert_eq!(client.backoff(Some("soon"), 2), Duration::from_secs(2));
        assert_eq!(client.backoff(None, 20), MAX_BACKOFF);
    }
}
