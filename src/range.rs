//! Byte-range responses synthesized from fully cached assets.
//!
//! Audio elements issue `Range` requests when seeking or resuming. Only the
//! single-range `bytes=start-end` form is understood; `end` may be omitted.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderValue};

use crate::cache::CachedAsset;
use crate::request::{Response, ResponseType};

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*bytes=(\d+)-(\d*)\s*$").expect("valid regex"));

/// A parsed `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` means "to the last byte".
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parses `bytes=start-end`. Returns `None` for anything else, including
    /// suffix ranges, multiple ranges and `end < start`.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let caps = RANGE_RE.captures(header)?;
        let start = caps[1].parse().ok()?;
        let end = match &caps[2] {
            "" => None,
            end => Some(end.parse().ok()?),
        };
        if end.is_some_and(|end| end < start) {
            return None;
        }
        Some(Self { start, end })
    }

    /// Resolves against an asset of `len` bytes, clamping `end` to the last
    /// byte. Returns `None` if no byte of the range exists.
    #[must_use]
    pub fn resolve(self, len: u64) -> Option<(u64, u64)> {
        if self.start >= len {
            return None;
        }
        let last = len - 1;
        Some((self.start, self.end.map_or(last, |end| end.min(last))))
    }
}

/// Answers a request carrying `range_header` from a fully cached asset.
///
/// - well-formed and satisfiable: 206 with the sliced body;
/// - well-formed but starting past the end: 416;
/// - malformed: the full cached response.
#[must_use]
pub fn respond(asset: &CachedAsset, range_header: &str) -> Response {
    let len = asset.content_length();
    let Some(range) = ByteRange::parse(range_header) else {
        log::debug!("Malformed range {range_header:?} for {}; serving full body", asset.url);
        return full_response(asset);
    };
    let Some((start, end)) = range.resolve(len) else {
        return unsatisfiable(len);
    };

    let (Ok(from), Ok(to)) = (usize::try_from(start), usize::try_from(end)) else {
        return unsatisfiable(len);
    };
    let body = asset.body.slice(from..=to);

    let mut response = asset.to_response();
    response.status = StatusCode::PARTIAL_CONTENT;
    response.headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
    if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{len}")) {
        response.headers.insert(CONTENT_RANGE, value);
    }
    response.body = body;
    response
}

/// The whole cached asset, advertising range support.
#[must_use]
pub fn full_response(asset: &CachedAsset) -> Response {
    asset
        .to_response()
        .with_header(ACCEPT_RANGES, HeaderValue::from_static("bytes"))
}

fn unsatisfiable(len: u64) -> Response {
    let mut response = Response::new(StatusCode::RANGE_NOT_SATISFIABLE, "")
        .with_kind(ResponseType::Basic)
        .with_header(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{len}")) {
        response.headers.insert(CONTENT_RANGE, value);
    }
    response
}
