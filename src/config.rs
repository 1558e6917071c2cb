use std::net::SocketAddr;
use std::str::FromStr;
use std::{env, fmt};

use serde_json::{Map, Value};

use crate::error::AppError;
use crate::repos::client_repo::ClientRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    /// Public base URL, endpoint URLs in the metadata are joined onto it.
    pub base_url: String,
    pub issuer: String,
    pub login_url: String,
    pub cookie_name: String,
    pub cookie_symkey: String,
    // OP signs id_tokens with this private key (Ed25519 PKCS#8 PEM)
    pub id_token_private_key_pem: String,
    pub id_token_ttl_seconds: u64,
    /// ACR advertised for the built-in cookie authenticator.
    pub authn_acr: String,
    /// Capability overrides merged into the supported superset at startup.
    pub capabilities: Map<String, Value>,
    /// Statically registered clients.
    pub clients: Vec<ClientRecord>,
    /// Static user claims, keyed by uid.
    pub users: Map<String, Value>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let base_url = env::var("BASE_URL").map_err(|_| ConfigError::Missing("BASE_URL"))?;
        let issuer = env::var("ISSUER").unwrap_or_else(|_| base_url.clone());
        let login_url = env::var("LOGIN_URL")
            .unwrap_or_else(|_| format!("{}/login", base_url.trim_end_matches('/')));

        let cookie_name = env::var("COOKIE_NAME").unwrap_or_else(|_| "oidc_authz".to_string());
        let cookie_symkey =
            env::var("COOKIE_SYMKEY").map_err(|_| ConfigError::Missing("COOKIE_SYMKEY"))?;

        let id_token_private_key_pem = env::var("ID_TOKEN_PRIVATE_KEY_PEM")
            .map_err(|_| ConfigError::Missing("ID_TOKEN_PRIVATE_KEY_PEM"))?
            .replace("\\n", "\n");
        let id_token_ttl_seconds = env::var("ID_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300); // 5 min

        let authn_acr = env::var("AUTHN_ACR").unwrap_or_else(|_| "cookie".to_string());

        let capabilities = match env::var("PROVIDER_CAPABILITIES") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|_| ConfigError::Invalid("PROVIDER_CAPABILITIES"))?,
            Err(_) => Map::new(),
        };

        let clients = match env::var("CLIENTS_JSON") {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|_| ConfigError::Invalid("CLIENTS_JSON"))?
            }
            Err(_) => Vec::new(),
        };

        let users = match env::var("USERS_JSON") {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|_| ConfigError::Invalid("USERS_JSON"))?
            }
            Err(_) => Map::new(),
        };

        Ok(Config {
            addr,
            app_env,
            base_url,
            issuer,
            login_url,
            cookie_name,
            cookie_symkey,
            id_token_private_key_pem,
            id_token_ttl_seconds,
            authn_acr,
            capabilities,
            clients,
            users,
        })
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Configuration(e.to_string())
    }
}
