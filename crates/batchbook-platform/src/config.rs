use anyhow::{Context, Result};

const DEFAULT_PG_POOL_SIZE: u32 = 10;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub pg_pool_size: u32,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        Self::from_lookup(http_addr, |key| std::env::var(key).ok())
    }

    /// Workers serve no HTTP; `http_addr` stays empty.
    pub fn worker_from_env() -> Result<Self> {
        Self::from_lookup(String::new(), |key| std::env::var(key).ok())
    }

    fn from_lookup(
        http_addr: String,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let database_url = get("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = get("REDIS_URL").context("REDIS_URL is required")?;
        let pg_pool_size = get("PG_POOL_SIZE")
            .map(|raw| raw.parse::<u32>())
            .transpose()
            .context("PG_POOL_SIZE must be an integer")?
            .unwrap_or(DEFAULT_PG_POOL_SIZE);

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            pg_pool_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pool_size: Option<&str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key| match key {
            "DATABASE_URL" => Some("postgres://localhost/batchbook".to_string()),
            "REDIS_URL" => Some("redis://localhost".to_string()),
            "PG_POOL_SIZE" => pool_size.map(str::to_string),
            _ => None,
        }
    }

    #[test]
    fn pool_size_defaults_when_unset() {
        let config = ServiceConfig::from_lookup(String::new(), lookup(None)).unwrap();
        assert_eq!(config.pg_pool_size, DEFAULT_PG_POOL_SIZE);
    }

    #[test]
    fn pool_size_is_parsed_and_typed() {
        let config = ServiceConfig::from_lookup(String::new(), lookup(Some("25"))).unwrap();
        assert_eq!(config.pg_pool_size, 25);

        assert!(ServiceConfig::from_lookup(String::new(), lookup(Some("many"))).is_err());
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let result = ServiceConfig::from_lookup(String::new(), |key| match key {
            "REDIS_URL" => Some("redis://localhost".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
