use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid CIDR '{cidr}': {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnetwork::IpNetworkError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Address pool for ASN {asn} exhausted with {pending} node(s) still pending")]
    PoolExhausted { asn: String, pending: usize },

    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
