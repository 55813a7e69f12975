use crate::dns::addrinfo::{addrinfo_dup, addrinfo_loopback, is_localhost, AddrInfo};
use crate::dns::message::{DnsRequest, ResponseParser};
use crate::dns::transport::{tcp, tls};
use ferrous_tunnel_domain::{RecordType, ResolveError};
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

const MAX_BODY_LEN: usize = 65535;

/// One DoH exchange: TCP connect, TLS handshake, then an HTTP/1.1 POST of
/// the wire-format query.
#[derive(Clone)]
pub struct DohRequest {
    connector: TlsConnector,
    hostname: String,
    port: u16,
    path: String,
}

impl DohRequest {
    pub fn new(connector: TlsConnector, hostname: String, port: u16, path: String) -> Self {
        Self {
            connector,
            hostname,
            port,
            path,
        }
    }

    pub async fn do_request(
        &self,
        endpoints: &[SocketAddr],
        record_type: RecordType,
        host: &str,
        port: u16,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        let is_ipv6 = record_type == RecordType::AAAA;
        if is_localhost(host) {
            debug!(host = %host, "Localhost shortcut, no DoH exchange");
            return Ok(addrinfo_loopback(is_ipv6, port));
        }

        let query = DnsRequest::new(host, record_type).map_err(|e| {
            debug!(host = %host, error = %e, "Failed to build DNS query");
            ResolveError::HostUnreachable
        })?;
        let request = self.build_request(&query)?;

        let (tcp_stream, server_addr) = tcp::connect(endpoints).await?;
        let stream =
            tls::handshake(&self.connector, &self.hostname, server_addr, tcp_stream).await?;

        let body = exchange(stream, request).await?;
        let response = ResponseParser::parse_message(&body).map_err(|status| {
            debug!(server = %server_addr, host = %host, ?status, "Bad DNS response");
            ResolveError::ConnectionRefused
        })?;

        let list = addrinfo_dup(is_ipv6, &response, port);
        debug!(
            server = %server_addr,
            host = %host,
            record_type = %record_type,
            addresses = list.len(),
            "DoH query answered"
        );
        Ok(list)
    }

    fn build_request(&self, query: &DnsRequest) -> Result<Request<Full<Bytes>>, ResolveError> {
        let authority = if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        };

        Request::post(self.path.as_str())
            .header(HOST, authority)
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(CONTENT_LENGTH, query.wire_len())
            .body(Full::new(Bytes::from(query.to_bytes())))
            .map_err(|e| {
                debug!(path = %self.path, error = %e, "Failed to build DoH request");
                ResolveError::HostUnreachable
            })
    }
}

/// Sends `request` over a fresh HTTP/1.1 connection on `stream` and returns
/// the validated response body. The connection is driven alongside the
/// exchange and finishes once the sender is dropped.
async fn exchange<S>(stream: S, request: Request<Full<Bytes>>) -> Result<Bytes, ResolveError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| {
            debug!(error = %e, "DoH HTTP handshake failed");
            ResolveError::ConnectionRefused
        })?;

    let exchange = async move {
        let response = sender.send_request(request).await.map_err(|e| {
            debug!(error = %e, "DoH request failed");
            ResolveError::ConnectionRefused
        })?;
        let content_length = validate_head(response.status(), response.headers())?;

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                debug!(error = %e, "DoH response body failed");
                ResolveError::ConnectionRefused
            })?
            .to_bytes();
        if body.len() != content_length {
            debug!(expected = content_length, got = body.len(), "Short DoH response body");
            return Err(ResolveError::ConnectionRefused);
        }
        Ok(body)
    };

    let (result, closed) = tokio::join!(exchange, conn);
    if let Err(e) = closed {
        debug!(error = %e, "DoH connection closed with error");
    }
    result
}

/// Status 200, `application/dns-message`, and 0 < Content-Length < 65535.
fn validate_head(status: StatusCode, headers: &HeaderMap) -> Result<usize, ResolveError> {
    if status != StatusCode::OK {
        debug!(status = %status, "Unexpected DoH status");
        return Err(ResolveError::ConnectionRefused);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());
    if content_type.as_deref() != Some(DNS_MESSAGE_CONTENT_TYPE) {
        debug!(content_type = ?content_type, "Unexpected DoH content type");
        return Err(ResolveError::ConnectionRefused);
    }

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    match content_length {
        Some(len) if len > 0 && len < MAX_BODY_LEN => Ok(len),
        len => {
            debug!(content_length = ?len, "Unexpected DoH content length");
            Err(ResolveError::ConnectionRefused)
        }
    }
}
