use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Interface the HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Origin allowed to call the API from a browser.
    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,

    // --- Conversation Store Args ---
    /// Conversation store type (redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "redis")]
    pub store_type: String,

    /// Conversation store connection string (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_URL", default_value = "redis://127.0.0.1:6379")]
    pub store_url: String,

    /// Prefix for Redis conversation keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "conversation:")]
    pub store_redis_prefix: String,

    /// Batch size for Redis SCAN command when listing conversations.
    #[arg(long, env = "STORE_REDIS_SCAN_COUNT", default_value = "100")]
    pub store_redis_scan_count: usize,

    // --- Cache Args ---
    /// Redis host for the cache connection. No connection is made when unset.
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", default_value = "6379")]
    pub redis_port: u16,

    // --- Inference Service Args ---
    /// Base URL of the Ollama server.
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    pub ollama_base_url: String,

    /// Model used for every chat call and recorded on new conversations.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.2")]
    pub ollama_model: String,

    // --- TLS Args ---
    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_url(&self) -> Option<String> {
        self.redis_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .map(|host| format!("redis://{}:{}", host, self.redis_port))
    }
}
