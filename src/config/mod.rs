use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_JWT_SECRET: &str = "development-only-jwt-secret";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    /// Without a database URL the service keeps everything in memory.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    pub allowed_origins: String,
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
            production: false,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid value '{}' for {}, using default", raw, name);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("Config: JWT_SECRET not set, using the development secret");
            defaults.jwt_secret.clone()
        });

        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: parsed_var(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            host: parsed_var("HOST", defaults.host),
            port: parsed_var("PORT", defaults.port),
            jwt_secret,
            allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.allowed_origins),
            production: env::var("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
