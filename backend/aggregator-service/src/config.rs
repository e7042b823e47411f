use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub host: String,
    pub port: u16,

    // Storage configuration
    pub database_path: PathBuf,

    // Ingestion configuration
    /// Non-positive values are clamped to 1 by the aggregator
    pub worker_count: i64,
    /// 0 = unbounded
    pub queue_maxsize: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_path: PathBuf::from("data/dedup.sqlite"),
            worker_count: 2,
            queue_maxsize: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: read_parsed("PORT", defaults.port),
            database_path: env::var("DEDUP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            worker_count: read_parsed("WORKER_COUNT", defaults.worker_count),
            queue_maxsize: read_parsed("QUEUE_MAXSIZE", defaults.queue_maxsize),
        }
    }

    /// Absolute path of the SQLite database file.
    pub fn resolved_database_path(&self) -> std::io::Result<PathBuf> {
        if self.database_path.is_absolute() {
            return Ok(self.database_path.clone());
        }
        Ok(env::current_dir()?.join(&self.database_path))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn read_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = ["HOST", "PORT", "DEDUP_DB_PATH", "WORKER_COUNT", "QUEUE_MAXSIZE"];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_maxsize, 0);
        assert_eq!(config.database_path, PathBuf::from("data/dedup.sqlite"));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        env::set_var("PORT", "9090");
        env::set_var("DEDUP_DB_PATH", "/var/lib/aggregator/dedup.sqlite");
        env::set_var("WORKER_COUNT", "-3");
        env::set_var("QUEUE_MAXSIZE", "128");

        let config = Config::from_env();
        assert_eq!(config.bind_addr(), "0.0.0.0:9090");
        assert_eq!(
            config.resolved_database_path().unwrap(),
            PathBuf::from("/var/lib/aggregator/dedup.sqlite")
        );
        assert_eq!(config.worker_count, -3);
        assert_eq!(config.queue_maxsize, 128);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_malformed_numbers_fall_back_to_defaults() {
        clear_env();
        env::set_var("WORKER_COUNT", "many");
        env::set_var("QUEUE_MAXSIZE", "-1");

        let config = Config::from_env();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_maxsize, 0);
        clear_env();
    }

    #[test]
    fn test_relative_path_is_resolved() {
        let config = Config {
            database_path: PathBuf::from("data/dedup.sqlite"),
            ..Config::default()
        };
        let resolved = config.resolved_database_path().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("data/dedup.sqlite"));
    }
}
