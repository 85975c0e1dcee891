//! Request and response types exchanged between pages, the worker and the network.

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Method, StatusCode, Url};

/// What the page intends to do with a response, as reported by `Sec-Fetch-Dest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level navigation: the user loading or reloading the page.
    Document,
    /// An `<audio>` element.
    Audio,
    Script,
    Style,
    Image,
    Manifest,
    /// Anything else, including `fetch()` calls from page code.
    #[default]
    Other,
}

impl Destination {
    /// Maps a `Sec-Fetch-Dest` header value.
    #[must_use]
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "audio" => Self::Audio,
            "script" => Self::Script,
            "style" => Self::Style,
            "image" => Self::Image,
            "manifest" => Self::Manifest,
            _ => Self::Other,
        }
    }

    /// Infers the destination from request headers.
    ///
    /// Browsers that do not send `Sec-Fetch-Dest` still mark navigations with
    /// an `Accept` header that prefers HTML.
    #[must_use]
    pub fn from_headers(method: &Method, headers: &HeaderMap) -> Self {
        if let Some(dest) = headers
            .get("sec-fetch-dest")
            .and_then(|v| v.to_str().ok())
        {
            return Self::from_fetch_dest(dest);
        }
        let wants_html = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
        if *method == Method::GET && wants_html {
            Self::Document
        } else {
            Self::Other
        }
    }
}

/// A request intercepted by the worker.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub body: Bytes,
}

impl Request {
    /// Creates a plain GET request with no headers.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            destination: Destination::Other,
            body: Bytes::new(),
        }
    }

    /// Creates a navigation request for a document.
    #[must_use]
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url);
        request.destination = Destination::Document;
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/html"));
        request
    }

    /// Sets the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header to the request.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request destination.
    #[must_use]
    pub const fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Returns true for top-level document navigations.
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Returns the raw `Range` header, if present and valid UTF-8.
    #[must_use]
    pub fn range_header(&self) -> Option<&str> {
        self.headers.get(RANGE).and_then(|v| v.to_str().ok())
    }

    /// Returns a copy of this request with the `Range` header removed.
    #[must_use]
    pub fn without_range(&self) -> Self {
        let mut request = self.clone();
        request.headers.remove(RANGE);
        request
    }
}

/// How a response relates to the worker's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Same-origin network response.
    Basic,
    /// Cross-origin response that ended on a different origin.
    Cors,
    /// Cross-origin response whose contents must not be inspected.
    Opaque,
    /// Synthesized by the worker itself.
    Default,
}

/// A response returned to a page.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseType,
}

impl Response {
    /// Creates a synthesized response with the given status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            kind: ResponseType::Default,
        }
    }

    /// Creates a `text/plain` response.
    #[must_use]
    pub fn text(status: StatusCode, body: &str) -> Self {
        Self::new(status, body.to_string()).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// Adds a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response type.
    #[must_use]
    pub const fn with_kind(mut self, kind: ResponseType) -> Self {
        self.kind = kind;
        self
    }

    /// Only complete same-origin responses may be stored.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.kind == ResponseType::Basic
    }

    /// Returns the `Content-Type` header value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Returns the `Content-Length` header value, falling back to the body size.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.body.len() as u64)
    }
}
