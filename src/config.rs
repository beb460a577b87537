use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::Context;

use crate::signal::RelayScope;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub jwt: JwtConfig,
    pub refresh_token: RefreshTokenConfig,
    pub turn: TurnConfig,
    pub vapid_public_key: String,
    pub storage: StorageConfig,
    pub room: RoomConfig,
    pub relay_scope: RelayScope,
    /// Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl: Duration,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenConfig {
    pub ttl: Duration,
    pub clean_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub secret: String,
    pub ttl: Duration,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageKind::Memory),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => Err(format!("unknown storage type {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub ttl: Duration,
    pub clean_interval: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env(lookup);

        Ok(Config {
            addr: env.string("ADDR", "0.0.0.0:8080"),
            jwt: JwtConfig {
                secret: env.string("JWT_SECRET", "secret"),
                ttl: env.secs("JWT_TTL", 2 * 60 * 60)?,
                issuer: env.string("JWT_ISSUER", "callroom"),
            },
            refresh_token: RefreshTokenConfig {
                ttl: env.secs("REFRESH_TOKEN_TTL", 24 * 60 * 60)?,
                clean_interval: env.secs("TOKEN_CLEAN_INTERVAL", 60)?,
            },
            turn: TurnConfig {
                secret: env.string("TURN_SECRET", "turn_secret"),
                ttl: env.secs("TURN_TTL", 2 * 60 * 60)?,
                host: env.string("TURN_HOST", "localhost:3478"),
            },
            vapid_public_key: env.string("VAPID_PUBLIC_KEY", ""),
            storage: StorageConfig {
                kind: env.parse("STORAGE_TYPE", StorageKind::Memory)?,
                database_url: env.string("DATABASE_URL", "sqlite://callroom.db"),
                max_connections: env.parse("DB_MAX_CONNECTIONS", 16)?,
            },
            room: RoomConfig {
                ttl: env.secs("ROOM_TTL", 4 * 60 * 60)?,
                clean_interval: env.secs("ROOM_CLEAN_INTERVAL", 60)?,
            },
            relay_scope: env.parse("RELAY_SCOPE", RelayScope::Global)?,
            allowed_origins: env
                .string("ALLOWED_ORIGINS", "")
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match (self.0)(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|err| anyhow::anyhow!("{err}"))
                .with_context(|| format!("invalid {key}={raw:?}")),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: u64) -> anyhow::Result<Duration> {
        let secs: u64 = self.parse(key, default)?;
        if secs == 0 {
            anyhow::bail!("{key} must be positive");
        }
        Ok(Duration::from_secs(secs))
    }
}
