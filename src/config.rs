use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub google_maps_base_url: String,
    pub google_maps_api_key: Option<String>,
    pub nominatim_base_url: String,
    pub pages_jaunes_base_url: String,
    pub pages_jaunes_token: Option<String>,
    pub hunter_base_url: String,
    pub hunter_api_key: Option<String>,
    /// Upper bound for a single source call.
    pub source_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// Fan out to sources concurrently; `false` forces the sequential path.
    pub concurrent_fetch: bool,
    /// Sources queried when a request names none.
    pub default_sources: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            google_maps_base_url: "https://maps.googleapis.com".to_string(),
            google_maps_api_key: None,
            nominatim_base_url: "https://nominatim.openstreetmap.org".to_string(),
            pages_jaunes_base_url: "https://api.pagesjaunes.fr".to_string(),
            pages_jaunes_token: None,
            hunter_base_url: "https://api.hunter.io".to_string(),
            hunter_api_key: None,
            source_timeout_secs: 30,
            cache_ttl_secs: 3600,
            cache_max_entries: 10_000,
            concurrent_fetch: true,
            default_sources: vec!["google_maps".to_string(), "nominatim".to_string()],
        }
    }
}

fn url_var(name: &str, default: String) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or(default);
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn secret_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn number_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            google_maps_base_url: url_var("GOOGLE_MAPS_BASE_URL", defaults.google_maps_base_url)?,
            google_maps_api_key: secret_var("GOOGLE_MAPS_API_KEY"),
            nominatim_base_url: url_var("NOMINATIM_BASE_URL", defaults.nominatim_base_url)?,
            pages_jaunes_base_url: url_var("PAGES_JAUNES_BASE_URL", defaults.pages_jaunes_base_url)?,
            pages_jaunes_token: secret_var("PAGES_JAUNES_TOKEN"),
            hunter_base_url: url_var("HUNTER_BASE_URL", defaults.hunter_base_url)?,
            hunter_api_key: secret_var("HUNTER_API_KEY"),
            source_timeout_secs: number_var("SOURCE_TIMEOUT_SECS", defaults.source_timeout_secs)
                .and_then(|secs| {
                    if secs == 0 {
                        anyhow::bail!("SOURCE_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
            cache_ttl_secs: number_var("CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            cache_max_entries: number_var("CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
            concurrent_fetch: match std::env::var("CONCURRENT_FETCH") {
                Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    _ => anyhow::bail!("CONCURRENT_FETCH must be true or false"),
                },
                Err(_) => defaults.concurrent_fetch,
            },
            default_sources: std::env::var("DEFAULT_SOURCES")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|sources| !sources.is_empty())
                .unwrap_or(defaults.default_sources),
        };

        // Log successful configuration load (without credentials)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Google Maps base URL: {}", config.google_maps_base_url);
        tracing::debug!("Nominatim base URL: {}", config.nominatim_base_url);
        tracing::debug!("Pages Jaunes base URL: {}", config.pages_jaunes_base_url);
        tracing::debug!("Hunter base URL: {}", config.hunter_base_url);
        tracing::debug!(
            "Source timeout: {}s, concurrent fetch: {}",
            config.source_timeout_secs,
            config.concurrent_fetch
        );
        tracing::debug!("Default sources: {:?}", config.default_sources);
        for (name, key) in [
            ("google_maps", &config.google_maps_api_key),
            ("pages_jaunes", &config.pages_jaunes_token),
            ("hunter", &config.hunter_api_key),
        ] {
            if key.is_none() {
                tracing::warn!("No credential configured for {}; its searches will fail", name);
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_var_validates_and_trims() {
        std::env::set_var("PROSPECT_TEST_URL_OK", "http://localhost:8080/");
        assert_eq!(
            url_var("PROSPECT_TEST_URL_OK", String::new()).unwrap(),
            "http://localhost:8080"
        );

        std::env::set_var("PROSPECT_TEST_URL_BAD", "localhost:8080");
        assert!(url_var("PROSPECT_TEST_URL_BAD", String::new()).is_err());

        assert_eq!(
            url_var("PROSPECT_TEST_URL_UNSET", "https://api.hunter.io".to_string()).unwrap(),
            "https://api.hunter.io"
        );
    }

    #[test]
    fn test_number_and_secret_vars() {
        std::env::set_var("PROSPECT_TEST_TTL", " 120 ");
        assert_eq!(number_var("PROSPECT_TEST_TTL", 3600u64).unwrap(), 120);

        std::env::set_var("PROSPECT_TEST_TTL_BAD", "an hour");
        assert!(number_var("PROSPECT_TEST_TTL_BAD", 3600u64).is_err());

        std::env::set_var("PROSPECT_TEST_SECRET_BLANK", "   ");
        assert_eq!(secret_var("PROSPECT_TEST_SECRET_BLANK"), None);
        assert_eq!(secret_var("PROSPECT_TEST_SECRET_UNSET"), None);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.source_timeout_secs, 30);
        assert!(config.concurrent_fetch);
        assert_eq!(config.default_sources, vec!["google_maps", "nominatim"]);
    }
}
