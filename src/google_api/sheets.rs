//! Google Sheets API v4: reading cell values.
//!
//! `GET /v4/spreadsheets/{id}/values/{range}` with ROWS major dimension and
//! formatted values, so cells arrive as the text a person sees in the sheet.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::{
    error_from_response, get_valid_access_token, send_with_retry, GoogleApiError, RetryPolicy,
};
use crate::source::SheetSource;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// How requests to the Sheets API are authorized.
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    /// API key; works for sheets shared as "anyone with the link can view".
    ApiKey(String),
    /// OAuth token file, refreshed in place when expired.
    OAuthToken { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetMeta {
    spreadsheet_id: String,
    #[serde(default)]
    properties: Option<SpreadsheetProperties>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: Option<String>,
}

pub struct SheetsClient {
    http: reqwest::Client,
    spreadsheet_id: String,
    auth: SheetsAuth,
    base_url: String,
    retry: RetryPolicy,
    timeout: Duration,
    refresh_lock: Mutex<()>,
}

impl SheetsClient {
    pub fn new(spreadsheet_id: &str, auth: SheetsAuth, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            spreadsheet_id: spreadsheet_id.to_string(),
            auth,
            base_url: SHEETS_API_BASE.to_string(),
            retry: RetryPolicy::default(),
            timeout,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Point the client at a different API root (test servers, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// `{base}/{spreadsheet_id}[/values/{range}]` with every segment
    /// percent-encoded.
    fn endpoint(&self, range: Option<&str>) -> Result<Url, GoogleApiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| GoogleApiError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GoogleApiError::InvalidUrl(self.base_url.clone()))?;
            segments.pop_if_empty().push(&self.spreadsheet_id);
            if let Some(range) = range {
                segments.push("values").push(range);
            }
        }
        Ok(url)
    }

    async fn authorized(&self, url: Url) -> Result<reqwest::RequestBuilder, GoogleApiError> {
        match &self.auth {
            SheetsAuth::ApiKey(key) => {
                let mut url = url;
                url.query_pairs_mut().append_pair("key", key);
                Ok(self.http.get(url))
            }
            SheetsAuth::OAuthToken { path } => {
                let token = get_valid_access_token(&self.http, path, &self.refresh_lock).await?;
                Ok(self.http.get(url).bearer_auth(token))
            }
        }
    }

    async fn fetch_values(&self, range: &str) -> Result<Vec<Vec<String>>, GoogleApiError> {
        let mut url = self.endpoint(Some(range))?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");

        let request = self.authorized(url).await?;
        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: ValueRange = response.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }

    async fn fetch_title(&self) -> Result<String, GoogleApiError> {
        let mut url = self.endpoint(None)?;
        url.query_pairs_mut()
            .append_pair("fields", "spreadsheetId,properties.title");
        let request = self.authorized(url).await?;
        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let meta: SpreadsheetMeta = response.json().await?;
        Ok(meta
            .properties
            .and_then(|p| p.title)
            .unwrap_or(meta.spreadsheet_id))
    }

    /// Startup check: confirms credentials and spreadsheet id by reading the
    /// spreadsheet title.
    pub async fn check_access(&self) -> Result<String, GoogleApiError> {
        tokio::time::timeout(self.timeout, self.fetch_title())
            .await
            .map_err(|_| GoogleApiError::Timeout(self.timeout.as_secs()))?
    }
}

#[async_trait]
impl SheetSource for SheetsClient {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, GoogleApiError> {
        tokio::time::timeout(self.timeout, self.fetch_values(range))
            .await
            .map_err(|_| GoogleApiError::Timeout(self.timeout.as_secs()))?
    }
}

/// Formatted values are normally strings; other JSON types show up when a
/// proxy or a different render option is used.
fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    const VALUES_ROUTE: &str = "/v4/spreadsheets/:id/values/:range";

    fn client() -> SheetsClient {
        SheetsClient::new(
            "1AbC-sheet",
            SheetsAuth::ApiKey("k3y".to_string()),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_endpoint_encodes_cyrillic_range() {
        let url = client().endpoint(Some("ТЕ-21б!A1:L100")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/1AbC-sheet/values/%D0%A2%D0%95-21%D0%B1!A1:L100"
        );
    }

    #[test]
    fn test_endpoint_escapes_slash_in_sheet_name() {
        let url = client().endpoint(Some("A/B!A1:B2")).unwrap();
        assert!(url.as_str().ends_with("/values/A%2FB!A1:B2"), "{}", url);
    }

    #[test]
    fn test_endpoint_with_trailing_slash_base() {
        let url = client()
            .with_base_url("http://127.0.0.1:9000/v4/spreadsheets/")
            .endpoint(None)
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/v4/spreadsheets/1AbC-sheet");
    }

    #[test]
    fn test_value_range_parsing() {
        let json = r#"{
            "range": "'ТЕ-21б'!A1:C3",
            "majorDimension": "ROWS",
            "values": [["Name", "Math", "Physics"], ["Ivanov Ivan", "✅"], ["Petrov Petr", true, 5]]
        }"#;
        let parsed: ValueRange = serde_json::from_str(json).unwrap();
        let rows: Vec<Vec<String>> = parsed
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        assert_eq!(rows[1], vec!["Ivanov Ivan", "✅"]);
        assert_eq!(rows[2], vec!["Petrov Petr", "TRUE", "5"]);
    }

    #[test]
    fn test_empty_range_has_no_values() {
        let parsed: ValueRange =
            serde_json::from_str(r#"{ "range": "Sheet1!A1:C3", "majorDimension": "ROWS" }"#)
                .unwrap();
        assert!(parsed.values.is_empty());
    }

    // ------------------------------------------------------------------
    // Against a local HTTP server
    // ------------------------------------------------------------------

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        addr
    }

    fn local_client(addr: SocketAddr, auth: SheetsAuth, timeout: Duration) -> SheetsClient {
        SheetsClient::new("1AbC-sheet", auth, timeout)
            .with_base_url(&format!("http://{}/v4/spreadsheets", addr))
    }

    async fn values_with_key(
        Path((id, range)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
        let expected = [
            ("key", "k3y"),
            ("majorDimension", "ROWS"),
            ("valueRenderOption", "FORMATTED_VALUE"),
        ];
        for (name, want) in expected {
            if query.get(name).map(String::as_str) != Some(want) {
                return Err((
                    StatusCode::BAD_REQUEST,
                    format!("query {} = {:?}", name, query.get(name)),
                ));
            }
        }
        if id != "1AbC-sheet" || range != "ТЕ-21б!A1:C3" {
            return Err((StatusCode::NOT_FOUND, format!("{} / {}", id, range)));
        }
        Ok(Json(json!({
            "range": "'ТЕ-21б'!A1:C3",
            "majorDimension": "ROWS",
            "values": [["Name", "Math", "Physics"], ["Ivanov Ivan", "✅"], ["Petrov Petr", true, 5]]
        })))
    }

    #[tokio::test]
    async fn test_get_values_returns_string_rows() {
        let addr = serve(Router::new().route(VALUES_ROUTE, get(values_with_key))).await;
        let sheets = local_client(addr, SheetsAuth::ApiKey("k3y".to_string()), Duration::from_secs(5));

        let rows = sheets.get_values("ТЕ-21б!A1:C3").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["Name", "Math", "Physics"]);
        assert_eq!(rows[1], vec!["Ivanov Ivan", "✅"]);
        assert_eq!(rows[2], vec!["Petrov Petr", "TRUE", "5"]);
    }

    async fn throttled_once(State(hits): State<Arc<AtomicUsize>>) -> Response {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "0")],
                "quota exceeded",
            )
                .into_response();
        }
        Json(json!({ "values": [["Name", "Math"], ["Ivanov Ivan", "✅"]] })).into_response()
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(VALUES_ROUTE, get(throttled_once))
            .with_state(Arc::clone(&hits));
        let addr = serve(router).await;
        let sheets = local_client(addr, SheetsAuth::ApiKey("k3y".to_string()), Duration::from_secs(5));

        let rows = sheets.get_values("TE-21!A1:B2").await.unwrap();
        assert_eq!(rows[1], vec!["Ivanov Ivan", "✅"]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let router = Router::new().route(
            VALUES_ROUTE,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "values": [] }))
            }),
        );
        let addr = serve(router).await;
        let sheets = local_client(addr, SheetsAuth::ApiKey("k3y".to_string()), Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = sheets.get_values("TE-21!A1:B2").await.unwrap_err();
        assert!(matches!(err, GoogleApiError::Timeout(_)), "got {:?}", err);
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_forbidden_body_becomes_api_error() {
        let router = Router::new().route(
            VALUES_ROUTE,
            get(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "error": {
                            "code": 403,
                            "message": "The caller does not have permission",
                            "status": "PERMISSION_DENIED"
                        }
                    })),
                )
            }),
        );
        let addr = serve(router).await;
        let sheets = local_client(addr, SheetsAuth::ApiKey("k3y".to_string()), Duration::from_secs(5));

        match sheets.get_values("TE-21!A1:B2").await {
            Err(GoogleApiError::ApiError { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "The caller does not have permission");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_access_reads_title() {
        let router = Router::new().route(
            "/v4/spreadsheets/:id",
            get(|Path(id): Path<String>| async move {
                Json(json!({ "spreadsheetId": id, "properties": { "title": "Portfolio" } }))
            }),
        );
        let addr = serve(router).await;
        let sheets = local_client(addr, SheetsAuth::ApiKey("k3y".to_string()), Duration::from_secs(5));

        assert_eq!(sheets.check_access().await.unwrap(), "Portfolio");
    }

    async fn values_with_bearer(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if auth != Some("Bearer fresh") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(json!({ "values": [["Name"], ["Ivanov Ivan"]] })))
    }

    #[tokio::test]
    async fn test_expired_oauth_token_is_refreshed_before_fetch() {
        let router = Router::new()
            .route(VALUES_ROUTE, get(values_with_bearer))
            .route(
                "/token",
                post(|| async { Json(json!({ "access_token": "fresh", "expires_in": 3600 })) }),
            );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let token_path = dir.path().join("token.json");
        let stale = json!({
            "token": "stale",
            "refresh_token": "1//refresh",
            "token_uri": format!("http://{}/token", addr),
            "client_id": "client.apps.googleusercontent.com",
            "expiry": "2020-01-01T00:00:00Z"
        });
        std::fs::write(&token_path, stale.to_string()).expect("write token");

        let sheets = local_client(
            addr,
            SheetsAuth::OAuthToken { path: token_path.clone() },
            Duration::from_secs(5),
        );
        let rows = sheets.get_values("TE-21!A1:A2").await.unwrap();
        assert_eq!(rows[1], vec!["Ivanov Ivan"]);

        let saved = super::super::token_store::load_token(&token_path).unwrap();
        assert_eq!(saved.token, "fresh");
    }
}
