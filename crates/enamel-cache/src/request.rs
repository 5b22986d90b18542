//! Request and response values handled by the engine

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Header carrying the time (ms since epoch) a response entered the cache
pub const CACHE_TIME_HEADER: &str = "sw-cache-time";

/// What the requesting context will do with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level navigation
    Document,
    Image,
    Style,
    Script,
    Font,
    #[default]
    Other,
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Other,
            headers: HeaderMap::new(),
        }
    }

    /// Plain GET
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// GET for a top-level document
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Key used for cache lookups: the URL without its fragment
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

/// A response produced by the network, the cache or the engine itself
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 200 response
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// 200 HTML response that must not be cached downstream
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::ok(body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// 2xx status
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// When this response was stored, if it carries a cache-time stamp
    pub fn cache_time(&self) -> Option<u64> {
        self.headers
            .get(CACHE_TIME_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Copy of this response stamped with `now_ms` as its cache time
    pub fn stamped(&self, now_ms: u64) -> Self {
        let mut stamped = self.clone();
        stamped.headers.insert(
            HeaderName::from_static(CACHE_TIME_HEADER),
            HeaderValue::from(now_ms),
        );
        stamped
    }

    /// Age relative to `now_ms`; `None` when unstamped
    pub fn age(&self, now_ms: u64) -> Option<Duration> {
        self.cache_time()
            .map(|stored| Duration::from_millis(now_ms.saturating_sub(stored)))
    }

    /// Whether the entry is still usable within `window`; unstamped entries never are
    pub fn is_within(&self, window: Duration, now_ms: u64) -> bool {
        self.age(now_ms).is_some_and(|age| age <= window)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Approximate stored size
    pub fn size(&self) -> u64 {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.as_str().len() + v.len())
            .sum();
        (self.body.len() + headers) as u64
    }
}

/// Serializable form of a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredResponse {
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl From<&Response> for StoredResponse {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.as_bytes().to_vec()))
                .collect(),
            body: response.body.to_vec(),
        }
    }
}

impl From<StoredResponse> for Response {
    fn from(stored: StoredResponse) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in stored.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }
        Self {
            status: StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(stored.body),
        }
    }
}

/// Wall clock in ms since the epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let url = Url::parse("https://clinic.example/services?lang=ar#booking").unwrap();
        let request = Request::get(url);
        assert_eq!(request.cache_key(), "https://clinic.example/services?lang=ar");
    }

    #[test]
    fn test_scheme_check() {
        let ext = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
        assert!(!ext.is_http());
        let https = Request::get(Url::parse("https://clinic.example/").unwrap());
        assert!(https.is_http());
    }

    #[test]
    fn test_stamp_and_age() {
        let response = Response::ok("body");
        assert_eq!(response.cache_time(), None);
        assert_eq!(response.age(1_000), None);
        assert!(!response.is_within(Duration::MAX, 1_000));

        let stamped = response.stamped(1_000);
        assert_eq!(stamped.cache_time(), Some(1_000));
        assert_eq!(stamped.age(1_250), Some(Duration::from_millis(250)));
        assert!(stamped.is_within(Duration::from_millis(250), 1_250));
        assert!(!stamped.is_within(Duration::from_millis(249), 1_250));
        // the source response is untouched
        assert!(response.headers.is_empty());
    }

    #[test]
    fn test_garbage_cache_time() {
        let response = Response::ok("x")
            .with_header(HeaderName::from_static(CACHE_TIME_HEADER), HeaderValue::from_static("soon"));
        assert_eq!(response.cache_time(), None);
    }

    #[test]
    fn test_stored_conversion() {
        let response = Response::html("<p>hi</p>").stamped(42);
        let back = Response::from(StoredResponse::from(&response));
        assert_eq!(back, response);
    }
}
