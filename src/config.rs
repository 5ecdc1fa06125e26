use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server settings, read from flags or the matching environment variables.
#[derive(Clone, Debug, Parser)]
#[command(name = "incident-reporting-server", about = "Workplace incident reporting API", version)]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    #[arg(long, env = "MONGODB_DATABASE", default_value = "incident_reporting")]
    pub mongodb_database: String,

    /// `memory` keeps everything in process and is lost on exit.
    #[arg(long, env = "INCIDENT_STORE", value_enum, default_value_t = StoreBackend::Mongo)]
    pub store: StoreBackend,

    /// Directory attachment payloads are written to.
    #[arg(long, env = "MEDIA_ROOT", default_value = "./files")]
    pub media_root: PathBuf,

    #[arg(long, env = "MEDIA_URL", default_value = "/media")]
    pub media_url: String,

    #[arg(long, env = "API_PREFIX", default_value = "/api/v1/incident_reporting")]
    pub api_prefix: String,

    /// Comma separated. Empty allows any origin.
    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "")]
    pub cors_allowed_origins: Vec<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn allowed_origins(&self) -> impl Iterator<Item = &str> {
        self.cors_allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
    }

    /// Media is served by this process only when the URL is a local path.
    pub fn serves_media(&self) -> bool {
        self.media_url.starts_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_local_setup() {
        let config = Config::try_parse_from(["incident-reporting-server"]).unwrap();

        assert_eq!(config.store, StoreBackend::Mongo);
        assert_eq!(config.api_prefix, "/api/v1/incident_reporting");
        assert_eq!(config.allowed_origins().count(), 0);
        assert!(config.serves_media());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "incident-reporting-server",
            "--store",
            "memory",
            "--cors-allowed-origins",
            "https://a.example, https://b.example",
            "--media-url",
            "https://cdn.example/media",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.allowed_origins().collect::<Vec<_>>(),
            ["https://a.example", "https://b.example"]
        );
        assert!(!config.serves_media());
    }
}
