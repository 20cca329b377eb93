use huddle_protocol::DEFAULT_TOKEN_TTL_SECS;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub app_id: String,
    pub app_certificate: String,
    pub token_expire_seconds: i64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let app_id = std::env::var("APP_ID").unwrap_or_else(|_| {
            tracing::warn!("APP_ID not set, using default");
            "huddle-dev".to_string()
        });

        let app_certificate = std::env::var("APP_CERTIFICATE").unwrap_or_else(|_| {
            tracing::warn!("APP_CERTIFICATE not set, using default (insecure for production!)");
            "dev-certificate-change-in-production".to_string()
        });

        let token_expire_seconds = match std::env::var("TOKEN_EXPIRE_SECONDS") {
            Ok(raw) => raw
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("TOKEN_EXPIRE_SECONDS must be an integer: {}", e))?,
            Err(_) => DEFAULT_TOKEN_TTL_SECS,
        };

        if token_expire_seconds <= 0 {
            anyhow::bail!("TOKEN_EXPIRE_SECONDS must be positive, got {}", token_expire_seconds);
        }

        Ok(Config {
            bind_address,
            app_id,
            app_certificate,
            token_expire_seconds,
        })
    }
}

/// Shared handler state. The service keeps no per-session data.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}
