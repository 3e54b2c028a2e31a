use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    aggregation::{AggregationConfig, UncorrelatedPolicy},
    compose::ComposeConfig,
    delivery::throttled::ThrottleConfig,
    Result,
};

/// Typed process configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Aggregation
    pub debounce_window: Duration,
    pub uncorrelated: UncorrelatedPolicy,

    // Composition
    pub order_url_base: String,
    pub attachment_url_base: String,

    // Delivery
    pub delivery_timeout: Duration,
    pub telegram_bot_token: Option<String>,
    pub telegram_global_interval: Duration,
    pub telegram_chat_interval: Duration,
    pub feed_push_url: Option<String>,
    pub feed_push_token: Option<String>,

    // Lookups
    pub directory_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (tests use a map instead of the process env).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |k: &str| get(k).and_then(non_empty);
        let ms_of = |k: &str| str_of(k).and_then(|s| s.trim().parse::<u64>().ok());

        let debounce_window = Duration::from_millis(ms_of("NOTIFY_DEBOUNCE_MS").unwrap_or(2000));
        let uncorrelated = match str_of("NOTIFY_UNCORRELATED") {
            Some(v) => v.parse()?,
            None => UncorrelatedPolicy::default(),
        };

        let order_url_base = str_of("NOTIFY_ORDER_URL")
            .unwrap_or_else(|| "http://localhost:8080/orders".to_string());
        let attachment_url_base = str_of("NOTIFY_ATTACHMENT_URL")
            .unwrap_or_else(|| "http://localhost:8080/files".to_string());

        let delivery_timeout =
            Duration::from_millis(ms_of("NOTIFY_DELIVERY_TIMEOUT_MS").unwrap_or(10_000));
        let throttle = ThrottleConfig::default();
        let telegram_global_interval = ms_of("TELEGRAM_GLOBAL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(throttle.global_interval);
        let telegram_chat_interval = ms_of("TELEGRAM_CHAT_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(throttle.per_chat_interval);

        let directory_path = PathBuf::from(
            str_of("DIRECTORY_PATH").unwrap_or_else(|| "directory.json".to_string()),
        );

        Ok(Self {
            debounce_window,
            uncorrelated,
            order_url_base,
            attachment_url_base,
            delivery_timeout,
            telegram_bot_token: str_of("TELEGRAM_BOT_TOKEN"),
            telegram_global_interval,
            telegram_chat_interval,
            feed_push_url: str_of("FEED_PUSH_URL"),
            feed_push_token: str_of("FEED_PUSH_TOKEN"),
            directory_path,
        })
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            window: self.debounce_window,
            uncorrelated: self.uncorrelated,
        }
    }

    pub fn compose(&self) -> ComposeConfig {
        ComposeConfig {
            order_url_base: self.order_url_base.clone(),
            attachment_url_base: self.attachment_url_base.clone(),
        }
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            global_interval: self.telegram_global_interval,
            per_chat_interval: self.telegram_chat_interval,
            max_wait: self.delivery_timeout,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::Error;

    fn from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.aggregation(), AggregationConfig::default());
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(10));
        assert_eq!(cfg.telegram_bot_token, None);
        assert_eq!(cfg.feed_push_url, None);
        assert_eq!(cfg.throttle(), ThrottleConfig::default());
        assert_eq!(cfg.directory_path, PathBuf::from("directory.json"));
        assert_eq!(
            cfg.compose().order_url(crate::domain::EntityId(5)),
            "http://localhost:8080/orders/5"
        );
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = from(&[
            ("NOTIFY_DEBOUNCE_MS", "750"),
            ("NOTIFY_UNCORRELATED", "debounce"),
            ("NOTIFY_DELIVERY_TIMEOUT_MS", "soon"),
            ("TELEGRAM_BOT_TOKEN", "  "),
            ("FEED_PUSH_URL", "http://feed/push"),
        ])
        .unwrap();
        assert_eq!(cfg.debounce_window, Duration::from_millis(750));
        assert_eq!(cfg.uncorrelated, UncorrelatedPolicy::Debounce);
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(10));
        assert_eq!(cfg.throttle().max_wait, cfg.delivery_timeout);
        assert_eq!(cfg.telegram_bot_token, None);
        assert_eq!(cfg.feed_push_url.as_deref(), Some("http://feed/push"));
    }

    #[test]
    fn unknown_policy_is_config_error() {
        let err = from(&[("NOTIFY_UNCORRELATED", "sometimes")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn parses_dotenv_lines() {
        let parsed = parse_dotenv("# c\nA=1\n B = \"two\" \nbad\n=x\nC='3'\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string()),
                ("C".to_string(), "3".to_string()),
            ]
        );
    }
}
