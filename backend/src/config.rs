use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Service settings, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub addr: String,
    /// Local state: the sqlite registry and cached Groth16 keys.
    pub data_dir: PathBuf,
    pub api_key: String,
    /// GraphQL endpoint of the registry indexer. Group routes answer 502 without it.
    pub subgraph_url: Option<String>,
    /// Accepted submissions are only recorded when this is unset.
    pub relayer_webhook_url: Option<String>,
    pub relayer_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let relayer_timeout = std::env::var("RELAYER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        Self {
            addr: std::env::var("BACKEND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir: PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            // In production, this should be a strong secret from environment.
            api_key: std::env::var("API_KEY").unwrap_or_else(|_| "dev-secret-key".to_string()),
            subgraph_url: non_empty_var("SUBGRAPH_URL"),
            relayer_webhook_url: non_empty_var("RELAYER_WEBHOOK_URL"),
            relayer_timeout: Duration::from_secs(relayer_timeout),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        self.addr
            .parse()
            .map_err(|e| format!("invalid BACKEND_ADDR '{}': {e}", self.addr))
    }

    pub fn db_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.data_dir.join("registry.sqlite").to_string_lossy())
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
impl GatewayConfig {
    /// Settings for in-process tests, with state under a fresh temp directory.
    pub fn for_tests() -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            data_dir: std::env::temp_dir().join(format!("credential-gateway-{}", uuid::Uuid::new_v4())),
            api_key: "test-key".to_string(),
            subgraph_url: None,
            relayer_webhook_url: None,
            relayer_timeout: Duration::from_secs(5),
        }
    }
}
