use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::store::SheetSource;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const REDIRECT_URI: &str = "http://localhost:8080/";

/// Cached OAuth token, persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Expired, or expiring within the next minute.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(60) >= expires_at,
            None => false,
        }
    }
}

/// Durable storage for the cached token, injected so it can be swapped in
/// tests.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> SyncResult<Option<StoredToken>>;
    fn save(&self, token: &StoredToken) -> SyncResult<()>;
}

/// Token cache as a JSON file. An unreadable or malformed cache counts as
/// no cache, forcing re-authorization.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTokenStore { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> SyncResult<Option<StoredToken>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(path = %self.path.display(), "discarding unreadable token cache: {e}");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &StoredToken) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Auth(format!("token cache dir: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(token)
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| SyncError::Auth(format!("token cache write: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: InstalledCredentials,
}

pub fn load_credentials(path: &Path) -> SyncResult<InstalledCredentials> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Auth(format!("credentials file {}: {e}", path.display())))?;
    let file: CredentialsFile =
        serde_json::from_str(&raw).map_err(|e| SyncError::Auth(format!("credentials: {e}")))?;
    Ok(file.installed)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        // The token endpoint usually omits the refresh token on refresh.
        let refresh_token = self.refresh_token.or(previous_refresh);
        let expires_at = self
            .expires_in
            .filter(|&s| s > 0)
            .map(|s| Utc::now() + Duration::seconds(s));
        StoredToken {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        }
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-only Google Sheets client. Authorization happens once in `connect`;
/// the cached token is refreshed and rewritten through the injected store
/// as it expires.
pub struct GoogleSheetSource {
    client: reqwest::Client,
    credentials: InstalledCredentials,
    token_store: Box<dyn TokenStore>,
    token: tokio::sync::Mutex<StoredToken>,
}

impl GoogleSheetSource {
    pub async fn connect(
        credentials_path: &Path,
        token_store: Box<dyn TokenStore>,
    ) -> SyncResult<Self> {
        let credentials = load_credentials(credentials_path)?;
        let client = reqwest::Client::new();

        let mut token = token_store.load()?;
        if let Some(cached) = token.as_ref() {
            if cached.needs_refresh(Utc::now()) {
                token = match refresh_token(&client, &credentials, cached).await {
                    Ok(fresh) => Some(fresh),
                    Err(e) => {
                        warn!("token refresh failed, re-authorizing: {e}");
                        None
                    }
                };
            }
        }

        let token = match token {
            Some(token) => token,
            None => authorize_interactive(&client, &credentials).await?,
        };
        token_store.save(&token)?;

        Ok(GoogleSheetSource {
            client,
            credentials,
            token_store,
            token: tokio::sync::Mutex::new(token),
        })
    }

    async fn bearer(&self, force_refresh: bool) -> SyncResult<String> {
        let mut token = self.token.lock().await;
        if force_refresh || token.needs_refresh(Utc::now()) {
            let fresh = refresh_token(&self.client, &self.credentials, &token)
                .await
                .map_err(|e| SyncError::SheetRead(format!("token refresh: {e}")))?;
            self.token_store.save(&fresh)?;
            *token = fresh;
        }
        Ok(token.access_token.clone())
    }

    fn values_url(&self, spreadsheet_id: &str, worksheet_name: &str) -> SyncResult<reqwest::Url> {
        let base = format!("https://sheets.googleapis.com/v4/spreadsheets/{spreadsheet_id}/values/");
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| SyncError::SheetRead(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::SheetRead("invalid spreadsheet url".to_string()))?
            .pop_if_empty()
            .push(worksheet_name);
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");
        Ok(url)
    }
}

#[async_trait]
impl SheetSource for GoogleSheetSource {
    async fn fetch_grid(
        &self,
        spreadsheet_id: &str,
        worksheet_name: &str,
    ) -> SyncResult<Vec<Vec<String>>> {
        let url = self.values_url(spreadsheet_id, worksheet_name)?;

        let mut response = self
            .client
            .get(url.clone())
            .bearer_auth(self.bearer(false).await?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            response = self
                .client
                .get(url)
                .bearer_auth(self.bearer(true).await?)
                .send()
                .await?;
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::SheetRead(format!(
                "sheets api returned {status}: {body}"
            )));
        }

        let range: ValueRange = response.json().await?;
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }
}

async fn token_request(
    client: &reqwest::Client,
    params: &[(&str, &str)],
    previous_refresh: Option<String>,
) -> SyncResult<StoredToken> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(params)
        .send()
        .await
        .map_err(|e| SyncError::Auth(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SyncError::Auth(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| SyncError::Auth(e.to_string()))?;
    Ok(parsed.into_stored(previous_refresh))
}

async fn refresh_token(
    client: &reqwest::Client,
    credentials: &InstalledCredentials,
    token: &StoredToken,
) -> SyncResult<StoredToken> {
    let refresh = token
        .refresh_token
        .clone()
        .ok_or_else(|| SyncError::Auth("no refresh token cached".to_string()))?;
    token_request(
        client,
        &[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh.as_str()),
            ("grant_type", "refresh_token"),
        ],
        Some(refresh.clone()),
    )
    .await
}

/// Printed-URL consent flow: the operator opens the URL, grants access and
/// pastes the code back.
async fn authorize_interactive(
    client: &reqwest::Client,
    credentials: &InstalledCredentials,
) -> SyncResult<StoredToken> {
    let mut auth_url = reqwest::Url::parse(AUTH_ENDPOINT)
        .map_err(|e| SyncError::Auth(e.to_string()))?;
    auth_url
        .query_pairs_mut()
        .append_pair("client_id", &credentials.client_id)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("response_type", "code")
        .append_pair("scope", SHEETS_SCOPE)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");

    println!("Please visit this URL to authorize: {auth_url}");
    print!("Enter the authorization code: ");
    std::io::stdout()
        .flush()
        .map_err(|e| SyncError::Auth(e.to_string()))?;

    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .map_err(|e| SyncError::Auth(e.to_string()))?;
    let code = code.trim();
    if code.is_empty() {
        return Err(SyncError::Auth("no authorization code entered".to_string()));
    }

    token_request(
        client,
        &[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ],
        None,
    )
    .await
}

/// Load a grid from a worksheet exported as CSV, for offline dry runs.
pub fn load_csv_grid(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert!(store.load().unwrap().is_none());

        let token = StoredToken {
            access_token: "abc".to_string(),
            refresh_token: Some("def".to_string()),
            expires_at: Some(Utc::now()),
        };
        store.save(&token).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "abc");
        assert_eq!(loaded.refresh_token.as_deref(), Some("def"));
    }

    #[test]
    fn malformed_cache_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn expiring_token_needs_refresh() {
        let token = StoredToken {
            access_token: "abc".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::seconds(30)),
        };
        assert!(token.needs_refresh(Utc::now()));

        let fresh = StoredToken {
            expires_at: Some(Utc::now() + Duration::seconds(3600)),
            ..token.clone()
        };
        assert!(!fresh.needs_refresh(Utc::now()));

        let no_expiry = StoredToken {
            expires_at: None,
            ..token
        };
        assert!(!no_expiry.needs_refresh(Utc::now()));
    }

    #[test]
    fn csv_grid_preserves_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "1年,,\n時間割,2024/4/1\n1コマ目,数学\n").unwrap();
        let grid = load_csv_grid(&path).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0][0], "1年");
        assert_eq!(grid[2][1], "数学");
    }
}
