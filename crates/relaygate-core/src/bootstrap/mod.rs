use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relaygate_common::SettingsPatch;

use crate::auth::AuthManager;
use crate::engine::{Engine, EngineConfig};
use crate::model_cache::ModelCache;
use crate::rate_limiter::RateLimiter;
use crate::token_counter::TokenCounter;
use crate::upstream_client::RetryClient;

/// CLI/env surface (§6, §10.1). Every option is also readable from its
/// `RELAYGATE_*` environment variable; CLI flags take precedence.
#[derive(Debug, Clone, Parser)]
#[command(name = "relaygate", version, about = "Dialect-translating gateway for CodeWhisperer-style assistant backends")]
pub struct CliArgs {
    /// Proxy API key required of inbound callers.
    #[arg(long, env = "RELAYGATE_PROXY_KEY")]
    pub proxy_key: Option<String>,

    /// Refresh token used to seed the Auth Manager when no credentials file exists.
    #[arg(long, env = "RELAYGATE_REFRESH_TOKEN")]
    pub refresh_token: Option<String>,

    /// OAuth client id paired with the refresh token, if required by the auth endpoint.
    #[arg(long, env = "RELAYGATE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret paired with the refresh token, if required by the auth endpoint.
    #[arg(long, env = "RELAYGATE_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Path to a credentials file (§6 layout). Seeds the Auth Manager when
    /// `refresh_token` is absent; always the atomic rewrite target on refresh.
    #[arg(long, env = "RELAYGATE_CREDENTIALS_FILE")]
    pub credentials_file: Option<String>,

    /// Upstream region, used to template the auth/api/metadata endpoints.
    #[arg(long, env = "RELAYGATE_REGION")]
    pub region: Option<String>,

    /// IAM profile ARN attached to upstream requests, if required.
    #[arg(long, env = "RELAYGATE_PROFILE_ARN")]
    pub profile_arn: Option<String>,

    /// Seconds of headroom before access-credential expiry that triggers a refresh.
    #[arg(long, env = "RELAYGATE_REFRESH_THRESHOLD_SECS")]
    pub refresh_threshold_secs: Option<String>,

    /// Max retries for upstream HTTP calls (§4.5).
    #[arg(long, env = "RELAYGATE_MAX_RETRIES")]
    pub max_retries: Option<String>,

    /// Base exponential backoff delay in seconds (§4.5).
    #[arg(long, env = "RELAYGATE_BASE_RETRY_DELAY_SECS")]
    pub base_retry_delay_secs: Option<String>,

    /// Model metadata cache TTL in seconds (§4.6).
    #[arg(long, env = "RELAYGATE_MODEL_CACHE_TTL_SECS")]
    pub model_cache_ttl_secs: Option<String>,

    /// Fallback max input tokens for models absent from the cache.
    #[arg(long, env = "RELAYGATE_DEFAULT_MAX_INPUT_TOKENS")]
    pub default_max_input_tokens: Option<String>,

    /// Tool descriptions longer than this are relocated to the system prompt (§4.4.1).
    #[arg(long, env = "RELAYGATE_TOOL_DESCRIPTION_MAX_LENGTH")]
    pub tool_description_max_length: Option<String>,

    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "relaygate=debug".
    #[arg(long, env = "RELAYGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds to wait for the first upstream byte before retrying (§4.7).
    #[arg(long, env = "RELAYGATE_FIRST_BYTE_TIMEOUT_SECS")]
    pub first_byte_timeout_secs: Option<String>,

    /// Max retries specifically for a first-byte timeout.
    #[arg(long, env = "RELAYGATE_FIRST_BYTE_MAX_RETRIES")]
    pub first_byte_max_retries: Option<String>,

    /// Requests per minute per caller; 0 disables the limiter.
    #[arg(long, env = "RELAYGATE_RATE_LIMIT_PER_MINUTE")]
    pub rate_limit_per_minute: Option<String>,

    /// Apply the Claude-tokenizer correction factor to local token estimates (§4.8).
    #[arg(long, env = "RELAYGATE_CLAUDE_CORRECTION")]
    pub claude_correction: Option<String>,

    /// Bind host.
    #[arg(long, env = "RELAYGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "RELAYGATE_PORT")]
    pub port: Option<String>,
}

/// Shared application state handed to the router layer.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub proxy_key: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

pub async fn bootstrap_from_env() -> anyhow::Result<AppState> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<AppState> {
    let client_id = sanitize_optional_env_value(args.client_id.clone());
    let client_secret = sanitize_optional_env_value(args.client_secret.clone());
    let profile_arn = sanitize_optional_env_value(args.profile_arn.clone());

    let settings = cli_args_to_patch(&args)?.into_settings().context("resolve settings")?;

    let auth_endpoint = format!("https://oidc.{}.amazonaws.com", settings.region);
    let api_endpoint = format!("https://codewhisperer.{}.amazonaws.com", settings.region);
    let metadata_endpoint = api_endpoint.clone();

    let http = wreq::Client::builder()
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("build auth http client")?;

    // env-provided refresh credential always wins over a credentials file, per §4.1/§6.
    let auth = if let Some(refresh_token) = settings.refresh_credential.clone() {
        AuthManager::new(
            refresh_token,
            client_id,
            client_secret,
            auth_endpoint,
            settings.credentials_file.clone().map(PathBuf::from),
            settings.token_refresh_threshold_secs,
            http,
        )
    } else {
        let path = settings
            .credentials_file
            .clone()
            .map(PathBuf::from)
            .context("no refresh credential and no credentials file provided")?;
        AuthManager::from_credentials_file(path, auth_endpoint, settings.token_refresh_threshold_secs, http)
            .await
            .context("load credentials file")?
    };
    let auth = Arc::new(auth);

    let retry_client = Arc::new(RetryClient::new(auth.clone(), settings.max_retries, settings.base_retry_delay_secs));

    let model_cache = Arc::new(ModelCache::new(
        metadata_endpoint,
        settings.model_cache_ttl_secs,
        settings.default_max_input_tokens,
        profile_arn.clone(),
    ));
    model_cache.spawn_background_refresh(retry_client.clone());

    let token_counter = TokenCounter::new(settings.claude_correction).context("build token counter")?;

    let engine = Arc::new(Engine {
        auth,
        model_cache,
        retry_client,
        token_counter,
        config: EngineConfig {
            api_endpoint,
            profile_arn,
            tool_description_max_length: settings.tool_description_max_length,
            first_byte_timeout: Duration::from_secs(settings.first_byte_timeout_secs),
            first_byte_max_retries: settings.first_byte_max_retries,
        },
    });

    Ok(AppState {
        engine,
        rate_limiter: Arc::new(RateLimiter::new(settings.rate_limit_per_minute)),
        proxy_key: settings.proxy_api_key,
        host: settings.host,
        port: settings.port,
        log_level: settings.log_level,
    })
}

fn cli_args_to_patch(args: &CliArgs) -> anyhow::Result<SettingsPatch> {
    Ok(SettingsPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_u16_env_value(args.port.clone(), "RELAYGATE_PORT")?,
        proxy_api_key: sanitize_optional_env_value(args.proxy_key.clone()),
        refresh_credential: sanitize_optional_env_value(args.refresh_token.clone()),
        credentials_file: sanitize_optional_env_value(args.credentials_file.clone()),
        region: sanitize_optional_env_value(args.region.clone()),
        token_refresh_threshold_secs: parse_u64_env_value(
            args.refresh_threshold_secs.clone(),
            "RELAYGATE_REFRESH_THRESHOLD_SECS",
        )?,
        max_retries: parse_u32_env_value(args.max_retries.clone(), "RELAYGATE_MAX_RETRIES")?,
        base_retry_delay_secs: parse_f64_env_value(
            args.base_retry_delay_secs.clone(),
            "RELAYGATE_BASE_RETRY_DELAY_SECS",
        )?,
        model_cache_ttl_secs: parse_u64_env_value(
            args.model_cache_ttl_secs.clone(),
            "RELAYGATE_MODEL_CACHE_TTL_SECS",
        )?,
        default_max_input_tokens: parse_u64_env_value(
            args.default_max_input_tokens.clone(),
            "RELAYGATE_DEFAULT_MAX_INPUT_TOKENS",
        )?,
        tool_description_max_length: parse_usize_env_value(
            args.tool_description_max_length.clone(),
            "RELAYGATE_TOOL_DESCRIPTION_MAX_LENGTH",
        )?,
        first_byte_timeout_secs: parse_u64_env_value(
            args.first_byte_timeout_secs.clone(),
            "RELAYGATE_FIRST_BYTE_TIMEOUT_SECS",
        )?,
        first_byte_max_retries: parse_u32_env_value(
            args.first_byte_max_retries.clone(),
            "RELAYGATE_FIRST_BYTE_MAX_RETRIES",
        )?,
        rate_limit_per_minute: parse_u32_env_value(
            args.rate_limit_per_minute.clone(),
            "RELAYGATE_RATE_LIMIT_PER_MINUTE",
        )?,
        claude_correction: parse_bool_env_value(args.claude_correction.clone(), "RELAYGATE_CLAUDE_CORRECTION")?,
        proxy: None,
        log_level: sanitize_optional_env_value(args.log_level.clone()),
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<u16>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u32_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u32>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<u32>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<u64>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_usize_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<usize>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<usize>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_f64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<f64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<f64>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_unresolved_placeholders() {
        assert_eq!(sanitize_optional_env_value(Some("${UNSET}".to_string())), None);
        assert_eq!(sanitize_optional_env_value(Some("  ".to_string())), None);
        assert_eq!(sanitize_optional_env_value(Some(" value ".to_string())), Some("value".to_string()));
    }

    #[test]
    fn bool_env_value_accepts_common_spellings() {
        assert_eq!(parse_bool_env_value(Some("yes".to_string()), "X").unwrap(), Some(true));
        assert_eq!(parse_bool_env_value(Some("0".to_string()), "X").unwrap(), Some(false));
        assert!(parse_bool_env_value(Some("maybe".to_string()), "X").is_err());
    }
}
