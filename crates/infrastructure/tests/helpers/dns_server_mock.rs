#![allow(dead_code)]
use super::builders::TestCert;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;

#[derive(Debug, Clone, Default)]
pub struct MockAnswers {
    pub a: Vec<Ipv4Addr>,
    pub aaaa: Vec<Ipv6Addr>,
    pub a_delay: Duration,
    pub aaaa_delay: Duration,
}

impl MockAnswers {
    pub fn dual_stack() -> Self {
        Self {
            a: vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)],
            aaaa: vec!["2001:db8::1".parse().unwrap()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Answer,
    /// DoH only: reply with this status code.
    HttpStatus(u16),
    /// DoH only: reply with `text/plain`.
    WrongContentType,
    /// DoT only: reply with a zero length prefix.
    ZeroLengthPrefix,
    /// Reply with bytes that are not a DNS message.
    Garbage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Doh,
    Dot,
}

/// A local DoH or DoT server answering from a fixed address table.
pub struct MockTlsDnsServer {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    last_request_head: Arc<Mutex<Option<String>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockTlsDnsServer {
    pub async fn start_doh(cert: &TestCert, answers: MockAnswers, behavior: MockBehavior) -> Self {
        Self::start(cert, answers, behavior, Flavor::Doh).await
    }

    pub async fn start_dot(cert: &TestCert, answers: MockAnswers, behavior: MockBehavior) -> Self {
        Self::start(cert, answers, behavior, Flavor::Dot).await
    }

    async fn start(
        cert: &TestCert,
        answers: MockAnswers,
        behavior: MockBehavior,
        flavor: Flavor,
    ) -> Self {
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert_der.clone()], cert.key_der())
        .unwrap();
        if flavor == Flavor::Doh {
            config.alpn_protocols = vec![b"http/1.1".to_vec()];
        }
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let queries = Arc::new(AtomicUsize::new(0));
        let last_request_head = Arc::new(Mutex::new(None));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        {
            let queries = queries.clone();
            let last_request_head = last_request_head.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        accepted = listener.accept() => {
                            let Ok((tcp, _)) = accepted else { continue };
                            let acceptor = acceptor.clone();
                            let answers = answers.clone();
                            let queries = queries.clone();
                            let last_request_head = last_request_head.clone();
                            tokio::spawn(async move {
                                let Ok(mut tls) = acceptor.accept(tcp).await else { return };
                                queries.fetch_add(1, Ordering::SeqCst);
                                match flavor {
                                    Flavor::Doh => {
                                        serve_doh(&mut tls, &answers, behavior, &last_request_head).await
                                    }
                                    Flavor::Dot => serve_dot(&mut tls, &answers, behavior).await,
                                }
                                let _ = tls.shutdown().await;
                            });
                        }
                    }
                }
            });
        }

        Self {
            addr,
            queries,
            last_request_head,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn doh_url(&self) -> String {
        format!("https://127.0.0.1:{}/dns-query", self.addr.port())
    }

    pub fn dot_host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// TLS sessions that reached the exchange.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn last_request_head(&self) -> Option<String> {
        self.last_request_head.lock().unwrap().clone()
    }
}

impl Drop for MockTlsDnsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve_doh<S>(
    stream: &mut S,
    answers: &MockAnswers,
    behavior: MockBehavior,
    last_request_head: &Mutex<Option<String>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    *last_request_head.lock().unwrap() = Some(head);

    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let query = buf[head_end..head_end + content_length].to_vec();
    let body = respond(&query, answers, behavior).await;

    let (status, content_type) = match behavior {
        MockBehavior::HttpStatus(code) => (code, "application/dns-message"),
        MockBehavior::WrongContentType => (200, "text/plain"),
        _ => (200, "application/dns-message"),
    };
    let response_head = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(response_head.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.flush().await;
}

async fn serve_dot<S>(stream: &mut S, answers: &MockAnswers, behavior: MockBehavior)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut len_buf = [0u8; 2];
    if stream.read_exact(&mut len_buf).await.is_err() {
        return;
    }
    let mut query = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    if stream.read_exact(&mut query).await.is_err() {
        return;
    }

    let body = respond(&query, answers, behavior).await;
    let mut framed = Vec::with_capacity(body.len() + 2);
    if behavior == MockBehavior::ZeroLengthPrefix {
        framed.extend_from_slice(&[0, 0]);
    } else {
        framed.extend_from_slice(&(body.len() as u16).to_be_bytes());
        framed.extend_from_slice(&body);
    }
    let _ = stream.write_all(&framed).await;
    let _ = stream.flush().await;
}

async fn respond(query: &[u8], answers: &MockAnswers, behavior: MockBehavior) -> Vec<u8> {
    let qtype = query_type(query);
    let delay = if qtype == TYPE_AAAA {
        answers.aaaa_delay
    } else {
        answers.a_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if behavior == MockBehavior::Garbage {
        return b"definitely not a dns message".to_vec();
    }
    build_mock_response(query, answers)
}

fn query_type(query: &[u8]) -> u16 {
    if query.len() < 16 {
        return 0;
    }
    u16::from_be_bytes([query[query.len() - 4], query[query.len() - 3]])
}

/// Echoes the question and appends one answer per matching address, each
/// pointing back at the question name.
pub fn build_mock_response(query: &[u8], answers: &MockAnswers) -> Vec<u8> {
    let records: Vec<(u16, Vec<u8>)> = match query_type(query) {
        TYPE_A => answers
            .a
            .iter()
            .map(|ip| (TYPE_A, ip.octets().to_vec()))
            .collect(),
        TYPE_AAAA => answers
            .aaaa
            .iter()
            .map(|ip| (TYPE_AAAA, ip.octets().to_vec()))
            .collect(),
        _ => Vec::new(),
    };

    let mut response = Vec::with_capacity(512);
    response.extend_from_slice(&query[0..2]);
    response.extend_from_slice(&[0x81, 0x80]);
    response.extend_from_slice(&[0x00, 0x01]);
    response.extend_from_slice(&(records.len() as u16).to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    response.extend_from_slice(&query[12..]);

    for (rtype, rdata) in records {
        response.extend_from_slice(&[0xc0, 0x0c]);
        response.extend_from_slice(&rtype.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x3c]);
        response.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        response.extend_from_slice(&rdata);
    }
    response
}

/// Accepts TCP connections and never answers.
pub struct SilentServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        if let Ok((tcp, _)) = accepted {
                            held.push(tcp);
                        }
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
