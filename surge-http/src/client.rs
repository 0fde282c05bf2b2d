use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::util::{has_header, host_header_value};
use crate::{Error, HttpRequest, HttpResponse, Result};

/// Connect timeout used by [`HttpClient::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pooled HTTP/1.1 client. Cheap to clone; clones share the connection pool, so one
/// client in the fixture serves every VU of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pool: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_connect_timeout(connect_timeout);
        tcp.set_nodelay(true);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(tcp);

        Self {
            pool: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Sends `req` and buffers the whole body. `HttpResponse::elapsed` covers the
    /// exchange from send to the last body byte; `req.timeout` bounds the same span.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let limit = req.timeout;
        let outgoing = build_request(req)?;

        let started = Instant::now();
        let exchange = async {
            let (parts, body) = self.pool.request(outgoing).await?.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };
        let (parts, body) = match limit {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => exchange.await?,
        };

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers: flatten_headers(&parts.headers),
            elapsed: started.elapsed(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}

fn build_request(req: HttpRequest) -> Result<Request<Full<Bytes>>> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
        ..
    } = req;

    let parsed = url::Url::parse(&url).map_err(|_| Error::InvalidUrl(url.clone()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme(url));
    }
    let uri: hyper::Uri = url.parse().map_err(|_| Error::InvalidUrl(url.clone()))?;

    let mut builder = Request::builder().method(method).uri(uri);
    if !has_header(&headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        builder = builder.header(HOST, host);
    }
    if !body.is_empty() && !has_header(&headers, "content-length") {
        builder = builder.header(CONTENT_LENGTH, body.len());
    }
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader(name.clone()))?;
        let header_value = HeaderValue::from_str(&value).map_err(|_| Error::InvalidHeader(name))?;
        builder = builder.header(header_name, header_value);
    }

    Ok(builder.body(Full::new(body))?)
}

/// Lowercase names in sorted order; repeated headers are joined with `, `.
fn flatten_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        match merged.get_mut(name.as_str()) {
            Some(cur) => {
                cur.push_str(", ");
                cur.push_str(&value);
            }
            None => {
                merged.insert(name.as_str().to_string(), value.into_owned());
            }
        }
    }
    merged.into_iter().collect()
}
