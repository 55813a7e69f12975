use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain (server role)
    #[serde(default)]
    pub certificate_chain_file: String,

    /// PEM private key (server role)
    #[serde(default)]
    pub private_key_file: String,

    /// Skip peer verification (client role)
    #[serde(default)]
    pub insecure_mode: bool,

    /// Extra CA bundle trusted on top of the web PKI roots
    #[serde(default)]
    pub cacert: String,

    /// Restrict ALPN to http/1.1
    #[serde(default)]
    pub https_fallback: bool,
}
