use ferrous_tunnel_domain::ResolveError;
use std::net::SocketAddr;
use tracing::debug;

/// Resolves a hostname to all its addresses through the system resolver.
pub async fn resolve_all(hostname: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
    let target = format!("{}:{}", hostname, port);

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| {
            debug!(target = %target, error = %e, "System resolution failed");
            ResolveError::HostNotFound
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ResolveError::HostNotFound);
    }

    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_ip_literal() {
        let addrs = resolve_all("127.0.0.1", 853).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:853".parse::<SocketAddr>().unwrap()]);
    }
}
