use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Final, validated process configuration.
///
/// Merge order: CLI > environment > built-in default, applied field by field
/// in [`SettingsPatch::overlay`] before [`SettingsPatch::into_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Bearer/`x-api-key` value inbound callers must present.
    pub proxy_api_key: String,
    /// Long-lived refresh credential, when seeded directly from the environment
    /// rather than a credentials file.
    pub refresh_credential: Option<String>,
    /// Path to a credentials file, used when `refresh_credential` is absent.
    pub credentials_file: Option<String>,
    pub region: String,
    pub token_refresh_threshold_secs: u64,
    pub max_retries: u32,
    pub base_retry_delay_secs: f64,
    pub model_cache_ttl_secs: u64,
    pub default_max_input_tokens: u64,
    pub tool_description_max_length: usize,
    pub first_byte_timeout_secs: u64,
    pub first_byte_max_retries: u32,
    pub rate_limit_per_minute: u32,
    /// Opt-in correction factor applied only to the local token approximation (§4.8).
    pub claude_correction: bool,
    /// Outbound proxy for upstream egress.
    pub proxy: Option<String>,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_level: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy_api_key: Option<String>,
    pub refresh_credential: Option<String>,
    pub credentials_file: Option<String>,
    pub region: Option<String>,
    pub token_refresh_threshold_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_retry_delay_secs: Option<f64>,
    pub model_cache_ttl_secs: Option<u64>,
    pub default_max_input_tokens: Option<u64>,
    pub tool_description_max_length: Option<usize>,
    pub first_byte_timeout_secs: Option<u64>,
    pub first_byte_max_retries: Option<u32>,
    pub rate_limit_per_minute: Option<u32>,
    pub claude_correction: Option<bool>,
    pub proxy: Option<String>,
    pub log_level: Option<String>,
}

impl SettingsPatch {
    pub fn overlay(&mut self, other: SettingsPatch) {
        macro_rules! take_if_some {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take_if_some!(host);
        take_if_some!(port);
        take_if_some!(proxy_api_key);
        take_if_some!(refresh_credential);
        take_if_some!(credentials_file);
        take_if_some!(region);
        take_if_some!(token_refresh_threshold_secs);
        take_if_some!(max_retries);
        take_if_some!(base_retry_delay_secs);
        take_if_some!(model_cache_ttl_secs);
        take_if_some!(default_max_input_tokens);
        take_if_some!(tool_description_max_length);
        take_if_some!(first_byte_timeout_secs);
        take_if_some!(first_byte_max_retries);
        take_if_some!(rate_limit_per_minute);
        take_if_some!(claude_correction);
        take_if_some!(proxy);
        take_if_some!(log_level);
    }

    pub fn into_settings(self) -> Result<Settings, SettingsError> {
        if self.refresh_credential.is_none() && self.credentials_file.is_none() {
            return Err(SettingsError::MissingField(
                "refresh_credential or credentials_file",
            ));
        }
        Ok(Settings {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            proxy_api_key: self
                .proxy_api_key
                .ok_or(SettingsError::MissingField("proxy_api_key"))?,
            refresh_credential: self.refresh_credential,
            credentials_file: self.credentials_file,
            region: self.region.unwrap_or_else(|| "us-east-1".to_string()),
            token_refresh_threshold_secs: self.token_refresh_threshold_secs.unwrap_or(600),
            max_retries: self.max_retries.unwrap_or(3),
            base_retry_delay_secs: self.base_retry_delay_secs.unwrap_or(1.0),
            model_cache_ttl_secs: self.model_cache_ttl_secs.unwrap_or(3600),
            default_max_input_tokens: self.default_max_input_tokens.unwrap_or(200_000),
            tool_description_max_length: self.tool_description_max_length.unwrap_or(10_000),
            first_byte_timeout_secs: self.first_byte_timeout_secs.unwrap_or(15),
            first_byte_max_retries: self.first_byte_max_retries.unwrap_or(3),
            rate_limit_per_minute: self.rate_limit_per_minute.unwrap_or(0),
            claude_correction: self.claude_correction.unwrap_or(false),
            proxy: self.proxy,
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl From<Settings> for SettingsPatch {
    fn from(value: Settings) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy_api_key: Some(value.proxy_api_key),
            refresh_credential: value.refresh_credential,
            credentials_file: value.credentials_file,
            region: Some(value.region),
            token_refresh_threshold_secs: Some(value.token_refresh_threshold_secs),
            max_retries: Some(value.max_retries),
            base_retry_delay_secs: Some(value.base_retry_delay_secs),
            model_cache_ttl_secs: Some(value.model_cache_ttl_secs),
            default_max_input_tokens: Some(value.default_max_input_tokens),
            tool_description_max_length: Some(value.tool_description_max_length),
            first_byte_timeout_secs: Some(value.first_byte_timeout_secs),
            first_byte_max_retries: Some(value.first_byte_max_retries),
            rate_limit_per_minute: Some(value.rate_limit_per_minute),
            claude_correction: Some(value.claude_correction),
            proxy: value.proxy,
            log_level: Some(value.log_level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_settings_requires_a_credential_source() {
        let patch = SettingsPatch {
            proxy_api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            patch.into_settings(),
            Err(SettingsError::MissingField(_))
        ));
    }

    #[test]
    fn into_settings_applies_defaults() {
        let patch = SettingsPatch {
            proxy_api_key: Some("key".to_string()),
            refresh_credential: Some("refresh".to_string()),
            ..Default::default()
        };
        let settings = patch.into_settings().unwrap();
        assert_eq!(settings.port, 8787);
        assert_eq!(settings.model_cache_ttl_secs, 3600);
        assert_eq!(settings.tool_description_max_length, 10_000);
        assert!(!settings.claude_correction);
    }

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = SettingsPatch {
            host: Some("0.0.0.0".to_string()),
            ..Default::default()
        };
        base.overlay(SettingsPatch {
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
    }
}
