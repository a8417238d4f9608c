use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_api::Settings;
use murmur_api::i18n::Locale;
use url::Url;

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "you-will-never-guess",
];

/// Remember-me cookies live between one day and ten years.
const REMEMBER_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MURMUR_SECRET_KEY is unset or still a placeholder")]
    MissingSecret,

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub key: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub settings: Settings,
    pub mail: Option<MailConfig>,
    pub translator: Option<TranslatorConfig>,
    pub elasticsearch: Option<Url>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = var("MURMUR_SECRET_KEY").unwrap_or_default();
        if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let defaults = Settings::default();
        let settings = Settings {
            secret,
            base_url: var("MURMUR_BASE_URL").unwrap_or(defaults.base_url),
            posts_per_page: parse(&var, "MURMUR_POSTS_PER_PAGE", defaults.posts_per_page)?,
            remember_days: parse(&var, "MURMUR_REMEMBER_DAYS", defaults.remember_days)?,
            languages: match var("MURMUR_LANGUAGES") {
                Some(raw) => parse_languages(&raw)?,
                None => defaults.languages,
            },
            mail_sender: var("MURMUR_MAIL_SENDER").unwrap_or(defaults.mail_sender),
        };
        if settings.posts_per_page == 0 {
            return Err(ConfigError::Invalid {
                key: "MURMUR_POSTS_PER_PAGE",
                value: "0".into(),
            });
        }
        if !REMEMBER_DAYS_RANGE.contains(&settings.remember_days) {
            return Err(ConfigError::Invalid {
                key: "MURMUR_REMEMBER_DAYS",
                value: settings.remember_days.to_string(),
            });
        }

        let mail = match var("MURMUR_MAIL_SERVER") {
            Some(server) => Some(MailConfig {
                server,
                port: parse(&var, "MURMUR_MAIL_PORT", 25)?,
                credentials: var("MURMUR_MAIL_USERNAME")
                    .map(|user| (user, var("MURMUR_MAIL_PASSWORD").unwrap_or_default())),
            }),
            None => None,
        };

        let translator = match var("MURMUR_TRANSLATOR_KEY") {
            Some(key) => Some(TranslatorConfig {
                key,
                region: var("MURMUR_TRANSLATOR_REGION"),
                endpoint: var("MURMUR_TRANSLATOR_ENDPOINT"),
                timeout: Duration::from_secs(parse(&var, "MURMUR_TRANSLATOR_TIMEOUT_SECS", 10)?),
            }),
            None => None,
        };

        let elasticsearch = match var("MURMUR_ELASTICSEARCH_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|_| ConfigError::Invalid {
                key: "MURMUR_ELASTICSEARCH_URL",
                value: raw,
            })?),
            None => None,
        };

        Ok(Self {
            host: var("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&var, "MURMUR_PORT", 3000)?,
            db_path: var("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()).into(),
            settings,
            mail,
            translator,
            elasticsearch,
        })
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_languages(raw: &str) -> Result<Vec<Locale>, ConfigError> {
    let mut languages = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let locale = Locale::from_code(code).ok_or_else(|| ConfigError::Invalid {
            key: "MURMUR_LANGUAGES",
            value: raw.to_string(),
        })?;
        if !languages.contains(&locale) {
            languages.push(locale);
        }
    }
    if languages.is_empty() {
        return Err(ConfigError::Invalid {
            key: "MURMUR_LANGUAGES",
            value: raw.to_string(),
        });
    }
    Ok(languages)
}
