use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, RANGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::core::error::FetchError;
use crate::core::model::{ByteRange, Segment};
use crate::plugins::registry::{DriverContext, TransferDriver};

#[derive(thiserror::Error, Debug)]
pub enum HttpDriverError {
    /// 200 for a range that does not start at byte 0; the body is not this segment.
    #[error("server ignored range starting at byte {start} and returned full content")]
    RangeIgnored { start: u64 },

    #[error("http status error: {0}")]
    Status(StatusCode),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// Headers the driver sets itself per segment.
    #[error("header {0:?} is managed by the downloader and cannot be overridden")]
    ReservedHeader(String),
}

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_headers(ctx: &DriverContext) -> Result<HeaderMap, HttpDriverError> {
        let mut h = HeaderMap::new();
        let ua = HeaderValue::from_str(&ctx.user_agent)
            .map_err(|_| HttpDriverError::InvalidHeader(ctx.user_agent.clone()))?;
        h.insert(USER_AGENT, ua);
        for (k, v) in &ctx.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| HttpDriverError::InvalidHeader(k.clone()))?;
            if name == RANGE || name == ACCEPT_ENCODING {
                return Err(HttpDriverError::ReservedHeader(k.clone()));
            }
            let value = HeaderValue::from_str(v).map_err(|_| HttpDriverError::InvalidHeader(v.clone()))?;
            h.insert(name, value);
        }
        Ok(h)
    }

    fn classify(index: usize, e: reqwest::Error) -> FetchError {
        if e.is_connect() || e.is_timeout() {
            FetchError::connection(index, e)
        } else {
            FetchError::protocol(index, e)
        }
    }
}

#[async_trait]
impl TransferDriver for HttpDriver {
    fn name(&self) -> &'static str { "http-driver" }

    fn supports(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn download_range(
        &self,
        url: &Url,
        ctx: &DriverContext,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<Segment, FetchError> {
        let index = range.index;
        let headers = Self::build_headers(ctx).map_err(|e| FetchError::protocol(index, e))?;

        let mut req = self.client
            .get(url.clone())
            .headers(headers)
            .header(RANGE, range.header_value());
        if let Some(secs) = ctx.timeout_secs {
            req = req.timeout(Duration::from_secs(secs));
        }

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled(index)),
            r = req.send() => r.map_err(|e| Self::classify(index, e))?,
        };

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}

            // range ignored, but the body still starts where this segment does
            StatusCode::OK if range.start == 0 => {
                warn!(chunk = index, "server answered range request with 200, keeping prefix");
            }

            StatusCode::OK => {
                return Err(FetchError::protocol(index, HttpDriverError::RangeIgnored { start: range.start }));
            }

            // the planner over-requests past EOF; a range wholly beyond it is an empty tail
            StatusCode::RANGE_NOT_SATISFIABLE => {
                debug!(chunk = index, start = range.start, "range beyond end of resource");
                return Ok(Segment { index, data: Default::default() });
            }

            s => return Err(FetchError::protocol(index, HttpDriverError::Status(s))),
        }

        let cap = range.requested_len();
        let mut buf = BytesMut::new();
        let mut stream = resp.bytes_stream();

        while (buf.len() as u64) < cap {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::cancelled(index)),
                n = stream.next() => n,
            };
            match next {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(Self::classify(index, e)),
                None => break,
            }
        }
        buf.truncate(cap as usize);

        Ok(Segment { index, data: buf.freeze() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_user_agent_and_extras() {
        let ctx = DriverContext {
            headers: vec![("Authorization".to_string(), "Bearer abc".to_string())],
            ..Default::default()
        };
        let h = HttpDriver::build_headers(&ctx).unwrap();
        assert!(h.get(USER_AGENT).unwrap().to_str().unwrap().starts_with("multiget/"));
        assert_eq!(h.get("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let ctx = DriverContext {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..Default::default()
        };
        assert!(matches!(
            HttpDriver::build_headers(&ctx),
            Err(HttpDriverError::InvalidHeader(name)) if name == "bad header"
        ));
    }

    #[test]
    fn range_and_encoding_headers_are_reserved() {
        for name in ["Range", "range", "Accept-Encoding"] {
            let ctx = DriverContext {
                headers: vec![(name.to_string(), "bytes=0-4".to_string())],
                ..Default::default()
            };
            assert!(matches!(
                HttpDriver::build_headers(&ctx),
                Err(HttpDriverError::ReservedHeader(n)) if n == name
            ));
        }
    }
}
