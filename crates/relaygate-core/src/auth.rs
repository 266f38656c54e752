use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AuthError;

/// On-disk credentials file layout (§6). Rewrites on refresh MUST be atomic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsFile {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
struct AuthState {
    refresh_token: String,
    access_token: Option<String>,
    access_expiry: Option<i64>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Owns the credential set exclusively (§3). Refreshes are single-flight:
/// the mutex is held across the refresh network call itself, so concurrent
/// callers queue on the lock and simply observe the refreshed state when
/// they acquire it rather than racing each other.
pub struct AuthManager {
    state: Mutex<AuthState>,
    auth_endpoint: String,
    credentials_file: Option<PathBuf>,
    refresh_threshold_secs: u64,
    http: wreq::Client,
}

impl AuthManager {
    pub fn new(
        refresh_token: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        auth_endpoint: String,
        credentials_file: Option<PathBuf>,
        refresh_threshold_secs: u64,
        http: wreq::Client,
    ) -> Self {
        Self {
            state: Mutex::new(AuthState {
                refresh_token,
                access_token: None,
                access_expiry: None,
                client_id,
                client_secret,
            }),
            auth_endpoint,
            credentials_file,
            refresh_threshold_secs,
            http,
        }
    }

    pub async fn from_credentials_file(
        path: PathBuf,
        auth_endpoint: String,
        refresh_threshold_secs: u64,
        http: wreq::Client,
    ) -> Result<Self, AuthError> {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("read credentials file: {e}")))?;
        let file: CredentialsFile = serde_json::from_str(&contents)
            .map_err(|e| AuthError::RefreshFailed(format!("parse credentials file: {e}")))?;
        Ok(Self {
            state: Mutex::new(AuthState {
                refresh_token: file.refresh_token,
                access_token: file.access_token,
                access_expiry: file.expires_at,
                client_id: file.client_id,
                client_secret: file.client_secret,
            }),
            auth_endpoint,
            credentials_file: Some(path),
            refresh_threshold_secs,
            http,
        })
    }

    /// Returns a currently-valid access credential, refreshing first if
    /// absent or within `refresh_threshold_secs` of expiry.
    pub async fn get_access_credential(&self) -> Result<String, AuthError> {
        let mut guard = self.state.lock().await;
        if needs_refresh(&guard, self.refresh_threshold_secs) {
            self.refresh_locked(&mut guard).await?;
        }
        guard
            .access_token
            .clone()
            .ok_or(AuthError::NoCredential)
    }

    /// Discards the current access credential and refreshes unconditionally.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut guard = self.state.lock().await;
        guard.access_token = None;
        guard.access_expiry = None;
        self.refresh_locked(&mut guard).await?;
        guard
            .access_token
            .clone()
            .ok_or(AuthError::NoCredential)
    }

    pub async fn is_expiring_soon(&self) -> bool {
        let guard = self.state.lock().await;
        needs_refresh(&guard, self.refresh_threshold_secs)
    }

    async fn refresh_locked(&self, state: &mut AuthState) -> Result<(), AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RefreshBody<'a> {
            refresh_token: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            client_id: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            client_secret: Option<&'a str>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RefreshResponse {
            access_token: String,
            expires_in: i64,
            #[serde(default)]
            refresh_token: Option<String>,
        }

        let body = RefreshBody {
            refresh_token: &state.refresh_token,
            client_id: state.client_id.as_deref(),
            client_secret: state.client_secret.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/refreshToken", self.auth_endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshFailed(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let now = now_unix();
        state.access_token = Some(parsed.access_token);
        state.access_expiry = Some(now + parsed.expires_in);
        if let Some(rotated) = parsed.refresh_token {
            state.refresh_token = rotated;
        }

        if let Some(path) = &self.credentials_file {
            self.persist(path, state).await?;
        }

        Ok(())
    }

    async fn persist(&self, path: &PathBuf, state: &AuthState) -> Result<(), AuthError> {
        let file = CredentialsFile {
            refresh_token: state.refresh_token.clone(),
            access_token: state.access_token.clone(),
            expires_at: state.access_expiry,
            client_id: state.client_id.clone(),
            client_secret: state.client_secret.clone(),
            profile_arn: None,
            region: None,
        };
        let serialized = serde_json::to_vec_pretty(&file)
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &serialized)
            .await
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;
        Ok(())
    }
}

fn needs_refresh(state: &AuthState, threshold_secs: u64) -> bool {
    match (&state.access_token, state.access_expiry) {
        (Some(_), Some(expiry)) => expiry - now_unix() < threshold_secs as i64,
        _ => true,
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub type SharedAuthManager = Arc<AuthManager>;

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(access_token: Option<&str>, expiry: Option<i64>) -> AuthManager {
        AuthManager {
            state: Mutex::new(AuthState {
                refresh_token: "rt".to_string(),
                access_token: access_token.map(str::to_string),
                access_expiry: expiry,
                client_id: None,
                client_secret: None,
            }),
            auth_endpoint: "https://example.invalid".to_string(),
            credentials_file: None,
            refresh_threshold_secs: 600,
            http: wreq::Client::new(),
        }
    }

    #[tokio::test]
    async fn expiring_soon_when_no_credential_yet() {
        let mgr = manager(None, None);
        assert!(mgr.is_expiring_soon().await);
    }

    #[tokio::test]
    async fn not_expiring_soon_with_ample_headroom() {
        let mgr = manager(Some("at"), Some(now_unix() + 3600));
        assert!(!mgr.is_expiring_soon().await);
    }

    #[tokio::test]
    async fn expiring_soon_inside_threshold() {
        let mgr = manager(Some("at"), Some(now_unix() + 60));
        assert!(mgr.is_expiring_soon().await);
    }

    #[tokio::test]
    async fn concurrent_callers_trigger_exactly_one_refresh() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let counter = refresh_calls.clone();
        Mock::given(method("POST"))
            .and(path("/refreshToken"))
            .respond_with(move |_req: &wiremock::Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "accessToken": "at-1",
                    "expiresIn": 3600,
                }))
            })
            .mount(&server)
            .await;

        let mgr = Arc::new(AuthManager::new(
            "rt".to_string(),
            None,
            None,
            server.uri(),
            None,
            600,
            wreq::Client::new(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.get_access_credential().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persisted_credentials_survive_a_crash_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let original = CredentialsFile {
            refresh_token: "old-refresh".to_string(),
            access_token: Some("old-access".to_string()),
            expires_at: Some(now_unix() + 3600),
            client_id: None,
            client_secret: None,
            profile_arn: None,
            region: None,
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&original).unwrap())
            .await
            .unwrap();

        // Simulate a crash between the refresh response and the publishing
        // rename: write the would-be tmp file but never rename it.
        let new_state = AuthState {
            refresh_token: "new-refresh".to_string(),
            access_token: Some("new-access".to_string()),
            access_expiry: Some(now_unix() + 7200),
            client_id: None,
            client_secret: None,
        };
        let tmp_path = path.with_extension("tmp");
        let new_file = CredentialsFile {
            refresh_token: new_state.refresh_token.clone(),
            access_token: new_state.access_token.clone(),
            expires_at: new_state.access_expiry,
            client_id: None,
            client_secret: None,
            profile_arn: None,
            region: None,
        };
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(&new_file).unwrap())
            .await
            .unwrap();

        let surviving: CredentialsFile =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(surviving.access_token.as_deref(), Some("old-access"));

        // Once persist runs to completion, the rename publishes the new
        // state atomically and the file reflects it.
        let mgr = manager(Some("old-access"), Some(now_unix() + 3600));
        mgr.persist(&path, &new_state).await.unwrap();
        let published: CredentialsFile =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(published.access_token.as_deref(), Some("new-access"));
    }
}
