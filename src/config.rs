use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub log_level: String,
    pub queue: QueueConfig,
    pub channel_timeout: Duration,
    pub log_fallback: bool,
    pub email_api: Option<EmailApiConfig>,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsConfig>,
    pub telegram: Option<TelegramConfig>,
}

/// Batch and retry tuning shared by every pipeline.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub default_max_attempts: i32,
    pub lease_duration: Duration,
    /// Zero disables backoff: failed items become eligible again immediately.
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_batch_size: 100,
            default_max_attempts: 3,
            lease_duration: Duration::from_secs(300),
            retry_backoff_base: Duration::ZERO,
            retry_backoff_max: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailApiConfig {
    pub url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub url: String,
    pub account: String,
    pub token: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("OUTBOXER_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid OUTBOXER_HOST: {e}"))?;

        let port: u16 = env_or("OUTBOXER_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid OUTBOXER_PORT: {e}"))?;

        let max_body_size: usize = env_or("OUTBOXER_MAX_BODY_SIZE", "262144")
            .parse()
            .map_err(|e| format!("Invalid OUTBOXER_MAX_BODY_SIZE: {e}"))?;

        let log_level = env_or("OUTBOXER_LOG_LEVEL", "info");

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            batch_size: env_parse("OUTBOXER_BATCH_SIZE", defaults.batch_size)?,
            max_batch_size: env_parse("OUTBOXER_MAX_BATCH_SIZE", defaults.max_batch_size)?,
            default_max_attempts: env_parse(
                "OUTBOXER_MAX_ATTEMPTS",
                defaults.default_max_attempts,
            )?,
            lease_duration: env_secs("OUTBOXER_LEASE_SECS", defaults.lease_duration)?,
            retry_backoff_base: env_secs(
                "OUTBOXER_RETRY_BACKOFF_SECS",
                defaults.retry_backoff_base,
            )?,
            retry_backoff_max: env_secs(
                "OUTBOXER_RETRY_BACKOFF_MAX_SECS",
                defaults.retry_backoff_max,
            )?,
        };

        if queue.batch_size == 0 || queue.max_batch_size == 0 {
            return Err("Batch sizes must be positive".to_string());
        }
        if queue.default_max_attempts < 1 {
            return Err("OUTBOXER_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let channel_timeout = env_secs("OUTBOXER_CHANNEL_TIMEOUT_SECS", Duration::from_secs(10))?;
        check_lease(queue.lease_duration, channel_timeout)?;
        let log_fallback = env_or("OUTBOXER_LOG_FALLBACK", "false") == "true";

        let email_api = match (
            std::env::var("OUTBOXER_EMAIL_API_URL").ok(),
            std::env::var("OUTBOXER_EMAIL_API_KEY").ok(),
            std::env::var("OUTBOXER_EMAIL_FROM").ok(),
        ) {
            (Some(url), Some(api_key), Some(from)) => Some(EmailApiConfig { url, api_key, from }),
            _ => None,
        };

        let smtp = match (
            std::env::var("OUTBOXER_SMTP_HOST").ok(),
            std::env::var("OUTBOXER_SMTP_PORT").ok(),
            std::env::var("OUTBOXER_SMTP_USER").ok(),
            std::env::var("OUTBOXER_SMTP_PASS").ok(),
            std::env::var("OUTBOXER_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid OUTBOXER_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        let sms = match (
            std::env::var("OUTBOXER_SMS_URL").ok(),
            std::env::var("OUTBOXER_SMS_ACCOUNT").ok(),
            std::env::var("OUTBOXER_SMS_TOKEN").ok(),
            std::env::var("OUTBOXER_SMS_FROM").ok(),
        ) {
            (Some(url), Some(account), Some(token), Some(from)) => Some(SmsConfig {
                url,
                account,
                token,
                from,
            }),
            _ => None,
        };

        let telegram = std::env::var("OUTBOXER_TELEGRAM_BOT_TOKEN")
            .ok()
            .map(|bot_token| TelegramConfig {
                api_base: env_or("OUTBOXER_TELEGRAM_API_BASE", "https://api.telegram.org"),
                bot_token,
            });

        Ok(Config {
            database_url,
            host,
            port,
            max_body_size,
            log_level,
            queue,
            channel_timeout,
            log_fallback,
            email_api,
            smtp,
            sms,
            telegram,
        })
    }
}

/// Longest channel chain a pipeline builds (email: API, SMTP, log sink).
pub(crate) const MAX_CHAIN_LEN: u32 = 3;

/// A lease shorter than the worst-case chain run would expire mid-delivery
/// and let a second batch re-claim the item.
fn check_lease(lease: Duration, channel_timeout: Duration) -> Result<(), String> {
    if channel_timeout.is_zero() {
        return Err("OUTBOXER_CHANNEL_TIMEOUT_SECS must be positive".to_string());
    }
    let worst_case = channel_timeout.saturating_mul(MAX_CHAIN_LEN);
    if lease <= worst_case {
        return Err(format!(
            "OUTBOXER_LEASE_SECS must exceed {}s ({MAX_CHAIN_LEN} channels x OUTBOXER_CHANNEL_TIMEOUT_SECS)",
            worst_case.as_secs()
        ));
    }
    Ok(())
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, String> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}
