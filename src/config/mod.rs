use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_token_expiry_secs: i64,
    pub session_ttl_secs: u64,
    pub storage_path: PathBuf,
    pub max_upload_bytes: usize,
    pub frontend_url: String,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("BACKEND_PORT", 5985),
            jwt_secret: env::var("JWT_SECRET")?,
            // API tokens are long lived (30 days).
            jwt_token_expiry_secs: parse_or("JWT_TOKEN_EXPIRY_SECS", 2_592_000),
            session_ttl_secs: parse_or("SESSION_TTL_SECS", 43_200),
            storage_path: env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage")),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 25 * 1024 * 1024),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            tls_cert_path: env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            tls_key_path: env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
        })
    }

    /// TLS is enabled only when both the certificate and the key are configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/vulntrack".to_string(),
            database_max_connections: 10,
            redis_url: "redis://localhost:6379".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5985,
            jwt_secret: "secret".to_string(),
            jwt_token_expiry_secs: 60,
            session_ttl_secs: 60,
            storage_path: PathBuf::from("/tmp/storage"),
            max_upload_bytes: 1024,
            frontend_url: "http://localhost:5173".to_string(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    #[test]
    fn tls_requires_cert_and_key() {
        let mut cfg = config();
        assert!(cfg.tls_paths().is_none());

        cfg.tls_cert_path = Some(PathBuf::from("cert.pem"));
        assert!(cfg.tls_paths().is_none());

        cfg.tls_key_path = Some(PathBuf::from("key.pem"));
        let (cert, key) = cfg.tls_paths().unwrap();
        assert_eq!(cert, &PathBuf::from("cert.pem"));
        assert_eq!(key, &PathBuf::from("key.pem"));
    }

    #[test]
    fn parse_or_falls_back_on_missing_key() {
        let value: u32 = parse_or("VULNTRACK_TEST_SURELY_UNSET_KEY", 42);
        assert_eq!(value, 42);
    }
}
