use ferrous_tunnel_domain::ResolveError;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const MAX_TCP_MESSAGE_SIZE: usize = 65535;

/// Connects to the first reachable address, trying them in order.
pub(crate) async fn connect(
    endpoints: &[SocketAddr],
) -> Result<(TcpStream, SocketAddr), ResolveError> {
    let mut last_err = ResolveError::HostNotFound;
    for &server_addr in endpoints {
        match TcpStream::connect(server_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok((stream, server_addr));
            }
            Err(e) => {
                debug!(server = %server_addr, error = %e, "TCP connect failed");
                last_err = e.into();
            }
        }
    }
    Err(last_err)
}

/// Writes one DNS message behind its 2-byte big-endian length (RFC 7858 §3.3).
pub(crate) async fn send_with_length_prefix<S>(
    stream: &mut S,
    message_bytes: &[u8],
) -> Result<(), ResolveError>
where
    S: AsyncWriteExt + Unpin,
{
    let length = u16::try_from(message_bytes.len()).map_err(|_| {
        debug!(len = message_bytes.len(), "DNS message too large for length prefix");
        ResolveError::OperationNotSupported
    })?;

    let mut framed = Vec::with_capacity(2 + message_bytes.len());
    framed.extend_from_slice(&length.to_be_bytes());
    framed.extend_from_slice(message_bytes);

    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the 2-byte length header, then exactly that many body bytes.
pub(crate) async fn read_with_length_prefix<S>(stream: &mut S) -> Result<Vec<u8>, ResolveError>
where
    S: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;

    let response_len = u16::from_be_bytes(len_buf) as usize;
    if response_len == 0 || response_len > MAX_TCP_MESSAGE_SIZE {
        debug!(response_len, "Invalid DoT length prefix");
        return Err(ResolveError::OperationNotSupported);
    }

    let mut response = vec![0u8; response_len];
    stream.read_exact(&mut response).await?;
    Ok(response)
}
