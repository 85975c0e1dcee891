//! Access to the real network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{CONNECTION, HOST, HeaderMap, TRANSFER_ENCODING};

use crate::error::{Error, Result};
use crate::request::{Request, Response, ResponseType};

/// Something that can answer requests over the network.
///
/// Failing to reach the server at all is an `Err`; any HTTP status,
/// including 4xx and 5xx, is an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Builds a configured HTTP client for upstream requests.
fn build_http_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .connect_timeout(connect_timeout)
        .build()
}

/// Network backed by reqwest.
///
/// Requests addressed to the worker's own origin are sent to the upstream
/// origin the app is published on; all other requests go out unchanged.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
    upstream: Url,
}

impl HttpNetwork {
    /// Creates a network for pages served at `origin` and published at `upstream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(origin: Url, upstream: Url, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(connect_timeout)?,
            origin,
            upstream,
        })
    }

    /// Maps a page URL onto the URL actually requested.
    #[must_use]
    pub fn upstream_url(&self, url: &Url) -> Url {
        if url.origin() != self.origin.origin() {
            return url.clone();
        }
        let mut mapped = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        mapped.set_path(&format!("{base}{}", url.path()));
        mapped.set_query(url.query());
        mapped
    }

    /// Classifies a response by where the request finally landed.
    fn response_type(&self, requested: &Url, landed: &Url) -> ResponseType {
        if requested.origin() != self.origin.origin() {
            ResponseType::Opaque
        } else if landed.origin() == self.upstream.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

/// Headers that describe one hop and must not be forwarded.
fn strip_hop_headers(headers: &mut HeaderMap) {
    headers.remove(HOST);
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let target = self.upstream_url(&request.url);
        let mut headers = request.headers.clone();
        strip_hop_headers(&mut headers);

        log::debug!("{} {target}", request.method);
        let response = self
            .client
            .request(request.method.clone(), target)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let kind = self.response_type(&request.url, response.url());
        let mut headers = response.headers().clone();
        strip_hop_headers(&mut headers);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Response {
            status,
            headers,
            body,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(upstream: &str) -> HttpNetwork {
        HttpNetwork::new(
            Url::parse("http://127.0.0.1:8723").unwrap(),
            Url::parse(upstream).unwrap(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn same_origin_maps_to_upstream() {
        let net = network("https://cutting.example.org");
        let url = Url::parse("http://127.0.0.1:8723/assets/Hour.mp3?x=1").unwrap();
        assert_eq!(
            net.upstream_url(&url).as_str(),
            "https://cutting.example.org/assets/Hour.mp3?x=1"
        );
    }

    #[test]
    fn upstream_path_prefix_is_kept() {
        let net = network("https://example.org/machinery/");
        let url = Url::parse("http://127.0.0.1:8723/index.html").unwrap();
        assert_eq!(
            net.upstream_url(&url).as_str(),
            "https://example.org/machinery/index.html"
        );
    }

    #[test]
    fn cross_origin_is_untouched() {
        let net = network("https://cutting.example.org");
        let url = Url::parse("https://fonts.example.com/font.woff2").unwrap();
        assert_eq!(net.upstream_url(&url), url);
    }

    #[test]
    fn response_type_by_landing_origin() {
        let net = network("https://cutting.example.org");
        let page = Url::parse("http://127.0.0.1:8723/").unwrap();
        let upstream = Url::parse("https://cutting.example.org/").unwrap();
        let elsewhere = Url::parse("https://cdn.example.net/").unwrap();

        assert_eq!(net.response_type(&page, &upstream), ResponseType::Basic);
        assert_eq!(net.response_type(&page, &elsewhere), ResponseType::Cors);
        assert_eq!(net.response_type(&elsewhere, &elsewhere), ResponseType::Opaque);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_network_error() {
        // Port 9 (discard) is essentially never listening on loopback.
        let net = network("http://127.0.0.1:9");
        let request = Request::get(Url::parse("http://127.0.0.1:8723/").unwrap());
        assert!(matches!(net.fetch(&request).await, Err(Error::Network(_))));
    }
}
