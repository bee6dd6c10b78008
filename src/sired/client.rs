use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use super::types::{
    EVENT_PATH, LOG_PATH, STATUS_PATH, StatusSnapshot, UPLOAD_FILE_FIELD, UploadRequest,
    UploadResult, sanitize_solicitud_id,
};
use crate::config::Settings;
use crate::error::SiredError;
use crate::http::{HttpClient, HttpResponse};
use crate::runtime::Runtime;
use crate::token::{FetchToken, FileTokenStore, OAuthClient, Token, TokenStore, get_or_refresh};

/// Header carrying the API gateway subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Query parameter duplicating the subscription key, for gateways that drop
/// headers when following redirects.
pub const SUBSCRIPTION_KEY_PARAM: &str = "subscription-key";

/// Characters kept visible at each end of a token in [`TokenMeta`].
pub const META_TOKEN_VISIBLE_CHARS: usize = 16;

/// Operations the polling loops need.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    async fn get_solicitud(&self, token: &str, solicitud_id: &str) -> Result<StatusSnapshot>;

    /// `Ok(None)` means the log isn't published yet.
    async fn download_log(
        &self,
        token: &str,
        solicitud_id: &str,
        dest_path: Option<PathBuf>,
    ) -> Result<Option<PathBuf>>;
}

/// One field of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl MultipartField {
    fn to_form(fields: &[MultipartField]) -> Result<Form> {
        let mut form = Form::new();
        for field in fields {
            form = match field {
                MultipartField::Text { name, value } => form.text(name.clone(), value.clone()),
                MultipartField::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let part = Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime)
                        .with_context(|| format!("Invalid MIME type {:?}", mime))?;
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// Token metadata for display, with the token itself masked.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMeta {
    pub token_type: String,
    pub length: usize,
    pub access_token_masked: String,
    pub obtained_at: i64,
    pub expires_at: i64,
}

impl From<&Token> for TokenMeta {
    fn from(token: &Token) -> Self {
        Self {
            token_type: token.token_type.clone(),
            length: token.access_token.chars().count(),
            access_token_masked: token.masked(META_TOKEN_VISIBLE_CHARS),
            obtained_at: token.obtained_at,
            expires_at: token.expires_at,
        }
    }
}

/// Client for the SIRED API.
///
/// Every request carries the subscription key twice (header and query) and a
/// bearer token, and goes through the retry policy of [`HttpClient`].
pub struct SiredClient<R: Runtime, S: TokenStore, F: FetchToken> {
    runtime: R,
    http: HttpClient,
    api_base: String,
    subscription_key: String,
    storage_dir: PathBuf,
    tokens: S,
    fetcher: F,
}

impl<R: Runtime + Clone> SiredClient<R, FileTokenStore<R>, OAuthClient> {
    /// Builds the production client: file token cache in the storage
    /// directory and client-credentials grant against `settings.token_url`.
    ///
    /// The storage directory is created if needed.
    #[tracing::instrument(skip(runtime, settings))]
    pub fn new(runtime: R, settings: &Settings) -> Result<Self> {
        settings.validate()?;
        runtime
            .create_dir_all(&settings.storage_dir)
            .with_context(|| {
                format!("Failed to create storage directory {:?}", settings.storage_dir)
            })?;

        let http = HttpClient::build(
            &settings.user_agent,
            settings.http_timeout,
            settings.verify_ssl,
        )?;
        let fetcher = OAuthClient::new(
            http.clone(),
            &settings.token_url,
            &settings.client_id,
            &settings.client_secret,
            &settings.scope,
        );
        let tokens = FileTokenStore::new(runtime.clone(), settings.storage_dir.clone());

        Ok(Self::with_parts(
            runtime,
            http,
            &settings.api_base,
            &settings.subscription_key,
            settings.storage_dir.clone(),
            tokens,
            fetcher,
        ))
    }
}

impl<R: Runtime, S: TokenStore, F: FetchToken> SiredClient<R, S, F> {
    pub fn with_parts(
        runtime: R,
        http: HttpClient,
        api_base: &str,
        subscription_key: &str,
        storage_dir: PathBuf,
        tokens: S,
        fetcher: F,
    ) -> Self {
        Self {
            runtime,
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            subscription_key: subscription_key.to_string(),
            storage_dir,
            tokens,
            fetcher,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.storage_dir.join("logs")
    }

    /// Returns a valid access token, from the cache when possible.
    #[tracing::instrument(skip(self))]
    pub async fn get_token(&self) -> Result<String> {
        get_or_refresh(&self.tokens, || self.fetcher.fetch_token()).await
    }

    /// Requests a new token regardless of the cache, and caches it.
    #[tracing::instrument(skip(self))]
    pub async fn get_fresh_token(&self) -> Result<Token> {
        let token = self.fetcher.fetch_token().await?;
        if let Err(e) = self.tokens.save(&token) {
            log::warn!("Failed to cache access token: {:#}", e);
        }
        Ok(token)
    }

    /// Metadata of the cached token, fetching one first if none is cached.
    #[tracing::instrument(skip(self))]
    pub async fn token_meta(&self) -> Result<TokenMeta> {
        let token = match self.tokens.load() {
            Some(token) if !token.access_token.is_empty() => token,
            _ => self.get_fresh_token().await?,
        };
        Ok(TokenMeta::from(&token))
    }

    /// `<api_base>/<path>?<query>&subscription-key=<key>`
    pub fn build_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|e| SiredError::Config(format!("invalid API URL {:?}: {}", raw, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(SUBSCRIPTION_KEY_PARAM, &self.subscription_key);
        }
        Ok(url)
    }

    fn headers(&self, token: &str, accept: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(accept).context("Invalid Accept header")?,
        );

        let mut key = HeaderValue::from_str(&self.subscription_key)
            .map_err(|_| SiredError::Config("subscription key is not a valid header".into()))?;
        key.set_sensitive(true);
        headers.insert(
            HeaderName::from_bytes(SUBSCRIPTION_KEY_HEADER.as_bytes())
                .context("Invalid subscription key header name")?,
            key,
        );

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SiredError::Config("access token is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        Ok(headers)
    }

    async fn get_raw(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
        accept: &str,
    ) -> Result<HttpResponse> {
        let url = self.build_url(path, query)?;
        let headers = self.headers(token, accept)?;

        debug!("GET {}...", path);
        self.http
            .execute(&format!("GET {}", path), |_| {
                Ok(self.http.inner().get(url.clone()).headers(headers.clone()))
            })
            .await
    }

    /// Generic GET against the SIRED API. Non-JSON bodies come back as
    /// `{"raw": <body>}`.
    #[tracing::instrument(skip(self, query, token))]
    pub async fn api_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
        accept: &str,
    ) -> Result<Value> {
        let response = self.get_raw(path, query, token, accept).await?;
        ensure_success("GET", path, &response)?;
        Ok(decode_body(&response.body))
    }

    /// Generic multipart POST against the SIRED API. Non-JSON bodies come back
    /// as `{"raw": <body>}`.
    #[tracing::instrument(skip(self, query, fields, token))]
    pub async fn api_post_multipart(
        &self,
        path: &str,
        query: &[(&str, &str)],
        fields: &[MultipartField],
        token: &str,
        accept: &str,
    ) -> Result<Value> {
        let url = self.build_url(path, query)?;
        let headers = self.headers(token, accept)?;

        debug!("POST {} ({} fields)...", path, fields.len());
        let response = self
            .http
            .execute(&format!("POST {}", path), |_| {
                let form = MultipartField::to_form(fields)?;
                Ok(self
                    .http
                    .inner()
                    .post(url.clone())
                    .headers(headers.clone())
                    .multipart(form))
            })
            .await?;

        ensure_success("POST", path, &response)?;
        Ok(decode_body(&response.body))
    }

    /// Uploads the ZIP package of a report.
    ///
    /// The file is checked before anything goes over the network.
    #[tracing::instrument(skip(self, token))]
    pub async fn upload_zip(&self, token: &str, request: &UploadRequest) -> Result<UploadResult> {
        let zip_path = &request.zip_path;
        if !self.runtime.is_file(zip_path) {
            return Err(
                SiredError::Transport(format!("ZIP file not found: {}", zip_path.display())).into(),
            );
        }

        let bytes = self
            .runtime
            .read(zip_path)
            .with_context(|| format!("Failed to read ZIP file {:?}", zip_path))?;
        let file_name = zip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archivo.zip".to_string());

        info!("Uploading {} ({} bytes)...", file_name, bytes.len());

        let query = request.query();
        let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let fields = [MultipartField::File {
            name: UPLOAD_FILE_FIELD.to_string(),
            file_name,
            mime: "application/zip".to_string(),
            bytes,
        }];

        let response = self
            .api_post_multipart(EVENT_PATH, &query, &fields, token, "text/plain, application/json")
            .await?;

        let result = UploadResult::from_response(response);
        match &result.solicitud_id {
            Some(id) => info!("Upload accepted, SolicitudId {}", id),
            None => info!("Upload accepted, no SolicitudId in response"),
        }
        Ok(result)
    }

    async fn get_solicitud_impl(&self, token: &str, solicitud_id: &str) -> Result<StatusSnapshot> {
        let value = self
            .api_get(
                STATUS_PATH,
                &[("solicitudId", solicitud_id)],
                token,
                "application/json",
            )
            .await?;
        Ok(StatusSnapshot(value))
    }

    async fn download_log_impl(
        &self,
        token: &str,
        solicitud_id: &str,
        dest_path: Option<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        let file_id = sanitize_solicitud_id(solicitud_id);
        if dest_path.is_none() && file_id.is_empty() {
            return Err(
                SiredError::Config(format!("invalid SolicitudId {:?}", solicitud_id)).into(),
            );
        }

        let response = self
            .get_raw(LOG_PATH, &[("solicitudId", solicitud_id)], token, "text/plain")
            .await?;

        if !response.is_success() {
            debug!(
                "Log for {} not available yet (HTTP {})",
                solicitud_id,
                response.status.as_u16()
            );
            return Ok(None);
        }

        let logs_dir = self.logs_dir();
        self.runtime
            .create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory {:?}", logs_dir))?;

        let dest_path =
            dest_path.unwrap_or_else(|| logs_dir.join(format!("log_{}.txt", file_id)));
        self.runtime
            .write(&dest_path, &response.body)
            .with_context(|| format!("Failed to write log to {:?}", dest_path))?;

        info!("Log for {} saved to {:?}", solicitud_id, dest_path);
        Ok(Some(dest_path))
    }
}

#[async_trait]
impl<R: Runtime, S: TokenStore, F: FetchToken> SubmissionApi for SiredClient<R, S, F> {
    #[tracing::instrument(skip(self, token))]
    async fn get_solicitud(&self, token: &str, solicitud_id: &str) -> Result<StatusSnapshot> {
        self.get_solicitud_impl(token, solicitud_id).await
    }

    #[tracing::instrument(skip(self, token))]
    async fn download_log(
        &self,
        token: &str,
        solicitud_id: &str,
        dest_path: Option<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        self.download_log_impl(token, solicitud_id, dest_path).await
    }
}

fn ensure_success(method: &'static str, path: &str, response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(SiredError::Api {
        method,
        path: path.to_string(),
        status: response.status.as_u16(),
        body: response.text(),
    }
    .into())
}

/// JSON objects and arrays are returned as-is; anything else is wrapped as
/// `{"raw": <body>}`.
pub fn decode_body(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => json!({ "raw": String::from_utf8_lossy(body) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::token::{MemoryTokenStore, MockFetchToken};
    use chrono::Utc;
    use mockito::Matcher;
    use reqwest::Client;
    use tempfile::tempdir;

    const GUID: &str = "123e4567-e89b-12d3-a456-426614174000";
    const KEY: &str = "sub-key-123";

    type TestClient<R> = SiredClient<R, MemoryTokenStore, MockFetchToken>;

    fn client_with<R: Runtime>(runtime: R, url: &str, storage_dir: &Path) -> TestClient<R> {
        SiredClient::with_parts(
            runtime,
            HttpClient::new(Client::new()),
            url,
            KEY,
            storage_dir.to_path_buf(),
            MemoryTokenStore::new(),
            MockFetchToken::new(),
        )
    }

    fn auth_matchers(mock: mockito::Mock) -> mockito::Mock {
        mock.match_header("ocp-apim-subscription-key", KEY)
            .match_header("authorization", "Bearer tok")
    }

    #[test]
    fn test_build_url_duplicates_subscription_key() {
        let dir = tempdir().unwrap();
        let client = client_with(RealRuntime, "https://api.example.com/", dir.path());

        let url = client
            .build_url("/reportes/evento", &[("solicitudId", "a b&c")])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/reportes/evento?solicitudId=a+b%26c&subscription-key=sub-key-123"
        );
    }

    #[test]
    fn test_build_url_invalid_base() {
        let dir = tempdir().unwrap();
        let client = client_with(RealRuntime, "not a url", dir.path());

        let err = client.build_url("evento", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SiredError>(),
            Some(SiredError::Config(_))
        ));
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(br#"{"Estado": "Exitosa"}"#)["Estado"], "Exitosa");
        assert_eq!(decode_body(b"plain text"), json!({ "raw": "plain text" }));
        assert_eq!(decode_body(b"null"), json!({ "raw": "null" }));
        assert_eq!(decode_body(b"[1, 2]"), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_api_get_sends_credentials() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();

        let mock = auth_matchers(server.mock("GET", "/custom/path"))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("subscription-key".into(), KEY.into()),
            ]))
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let value = client
            .api_get("custom/path", &[("page", "2")], "tok", "application/json")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value, json!({ "items": [] }));
    }

    #[tokio::test]
    async fn test_api_get_error_carries_status_not_key() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();

        let _mock = server
            .mock("GET", "/custom/path")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("Forbidden")
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let err = client
            .api_get("custom/path", &[], "tok", "application/json")
            .await
            .unwrap_err();

        let sired = err.downcast_ref::<SiredError>().unwrap();
        assert_eq!(sired.status(), Some(403));
        assert!(err.to_string().contains("Forbidden"));
        assert!(!err.to_string().contains(KEY));
    }

    #[tokio::test]
    async fn test_upload_zip() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("reporte.zip");
        std::fs::write(&zip_path, b"PK\x03\x04fake-zip").unwrap();

        let mock = auth_matchers(server.mock("POST", "/reportes-operadores-red/api/v1/evento"))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("FechaDeCarga".into(), "2025-09-21".into()),
                Matcher::UrlEncoded("TipoCarga".into(), "Diario".into()),
                Matcher::UrlEncoded("Agente".into(), "EEPD".into()),
                Matcher::UrlEncoded("Mercado".into(), "PEIM".into()),
                Matcher::UrlEncoded("Correo".into(), "ops@example.com".into()),
                Matcher::UrlEncoded("subscription-key".into(), KEY.into()),
            ]))
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".into()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="Archivo"; filename="reporte.zip""#.into()),
                Matcher::Regex("fake-zip".into()),
            ]))
            .with_status(200)
            .with_body(format!(r#"{{"respuesta": "OK id={}"}}"#, GUID))
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let request = UploadRequest {
            zip_path,
            upload_date: "2025-09-21".to_string(),
            upload_type: "Diario".to_string(),
            agent_code: "eepd".to_string(),
            market_code: "peim".to_string(),
            email: Some("ops@example.com".to_string()),
        };
        let result = client.upload_zip("tok", &request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.solicitud_id.as_deref(), Some(GUID));
    }

    #[tokio::test]
    async fn test_upload_zip_plain_text_response() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("reporte.zip");
        std::fs::write(&zip_path, b"zip").unwrap();

        let _mock = server
            .mock("POST", "/reportes-operadores-red/api/v1/evento")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body(format!("Solicitud {} creada", GUID))
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let request = UploadRequest {
            zip_path,
            upload_date: "2025-09-21".to_string(),
            upload_type: "Diario".to_string(),
            agent_code: "EEPD".to_string(),
            market_code: "PEIM".to_string(),
            email: None,
        };
        let result = client.upload_zip("tok", &request).await.unwrap();

        assert_eq!(result.solicitud_id.as_deref(), Some(GUID));
        assert_eq!(result.response["raw"], format!("Solicitud {} creada", GUID));
    }

    #[tokio::test]
    async fn test_upload_zip_missing_file_makes_no_request() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_file().returning(|_| false);
        runtime.expect_read().times(0);

        // Unroutable base: any request attempt would fail differently
        let client = client_with(runtime, "http://127.0.0.1:9", Path::new("/storage"));
        let request = UploadRequest {
            zip_path: PathBuf::from("/nowhere/reporte.zip"),
            upload_date: "2025-09-21".to_string(),
            upload_type: "Diario".to_string(),
            agent_code: "EEPD".to_string(),
            market_code: "PEIM".to_string(),
            email: None,
        };

        let err = client.upload_zip("tok", &request).await.unwrap_err();
        match err.downcast_ref::<SiredError>() {
            Some(SiredError::Transport(msg)) => assert!(msg.contains("ZIP file not found")),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_zip_server_rejects() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("reporte.zip");
        std::fs::write(&zip_path, b"zip").unwrap();

        let _mock = server
            .mock("POST", "/reportes-operadores-red/api/v1/evento")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("FechaDeCarga invalida")
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let request = UploadRequest {
            zip_path,
            upload_date: "21/09/2025".to_string(),
            upload_type: "Diario".to_string(),
            agent_code: "EEPD".to_string(),
            market_code: "PEIM".to_string(),
            email: None,
        };

        let err = client.upload_zip("tok", &request).await.unwrap_err();
        assert_eq!(err.downcast_ref::<SiredError>().unwrap().status(), Some(400));
    }

    #[tokio::test]
    async fn test_get_solicitud() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();

        let mock = auth_matchers(server.mock(
            "GET",
            "/reportes-operadores-red/api/v1/evento/consultar-solicitud",
        ))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("solicitudId".into(), GUID.into()),
            Matcher::UrlEncoded("subscription-key".into(), KEY.into()),
        ]))
        .with_status(200)
        .with_body(r#"{"Estado": "Procesando"}"#)
        .create_async()
        .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let snapshot = client.get_solicitud("tok", GUID).await.unwrap();

        mock.assert_async().await;
        assert_eq!(snapshot.estado().as_str(), "Procesando");
    }

    #[tokio::test]
    async fn test_download_log_writes_body_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();
        let body: &[u8] = b"linea 1\r\nlinea 2 \xf1\n";

        let mock = auth_matchers(server.mock(
            "GET",
            "/reportes-operadores-red/api/v1/evento/descargar-log",
        ))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("solicitudId".into(), GUID.into()),
            Matcher::UrlEncoded("subscription-key".into(), KEY.into()),
        ]))
        .match_header("accept", "text/plain")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let path = client.download_log("tok", GUID, None).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(path, dir.path().join("logs").join(format!("log_{}.txt", GUID)));
        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_log_custom_destination() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();

        let _mock = server
            .mock("GET", "/reportes-operadores-red/api/v1/evento/descargar-log")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let dest = dir.path().join("mine.txt");
        let path = client
            .download_log("tok", GUID, Some(dest.clone()))
            .await
            .unwrap();

        assert_eq!(path, Some(dest.clone()));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "ok");
        assert!(dir.path().join("logs").is_dir());
    }

    #[tokio::test]
    async fn test_download_log_default_name_has_no_separators() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let dir = tempdir().unwrap();

        let mock = server
            .mock("GET", "/reportes-operadores-red/api/v1/evento/descargar-log")
            .match_query(Matcher::UrlEncoded("solicitudId".into(), "../../ab/cd".into()))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = client_with(RealRuntime, &url, dir.path());
        let path = client
            .download_log("tok", "../../ab/cd", None)
            .await
            .unwrap()
            .unwrap();

        mock.assert_async().await;
        assert_eq!(path, dir.path().join("logs").join("log_abcd.txt"));
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_download_log_rejects_unusable_id() {
        // Unroutable base: the id is rejected before any request
        let client = client_with(MockRuntime::new(), "http://127.0.0.1:9", Path::new("/storage"));

        let err = client.download_log("tok", "../..", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SiredError>(),
            Some(SiredError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_download_log_not_ready() {
        for status in [404, 409] {
            let mut server = mockito::Server::new_async().await;
            let url = server.url();

            let mock = server
                .mock("GET", "/reportes-operadores-red/api/v1/evento/descargar-log")
                .match_query(Matcher::Any)
                .with_status(status)
                .expect(1)
                .create_async()
                .await;

            // No file system access expected
            let client = client_with(MockRuntime::new(), &url, Path::new("/storage"));
            let path = client.download_log("tok", GUID, None).await.unwrap();

            mock.assert_async().await;
            assert_eq!(path, None);
        }
    }

    #[tokio::test]
    async fn test_get_token_uses_cache_then_fetcher() {
        let dir = tempdir().unwrap();
        let mut fetcher = MockFetchToken::new();
        fetcher
            .expect_fetch_token()
            .times(1)
            .returning(|| Ok(Token::issued("fetched", None, Some(3600), Utc::now().timestamp())));

        let client = SiredClient::with_parts(
            RealRuntime,
            HttpClient::new(Client::new()),
            "https://api.example.com",
            KEY,
            dir.path().to_path_buf(),
            MemoryTokenStore::new(),
            fetcher,
        );

        // Second call is served from the cache (times(1) above)
        assert_eq!(client.get_token().await.unwrap(), "fetched");
        assert_eq!(client.get_token().await.unwrap(), "fetched");
    }

    #[tokio::test]
    async fn test_token_meta_is_masked() {
        let dir = tempdir().unwrap();
        let raw = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGH";
        let store = MemoryTokenStore::with_token(Token::issued(raw, None, Some(3600), 1_000));

        let client = SiredClient::with_parts(
            RealRuntime,
            HttpClient::new(Client::new()),
            "https://api.example.com",
            KEY,
            dir.path().to_path_buf(),
            store,
            MockFetchToken::new(),
        );

        // Expired, but metadata is still shown for whatever is cached
        let meta = client.token_meta().await.unwrap();
        assert_eq!(meta.length, raw.len());
        assert_eq!(meta.access_token_masked, "abcdefghijklmnop...23456789ABCDEFGH");
        assert!(!meta.access_token_masked.contains("qrstuvwxyz"));
    }

    #[test]
    fn test_new_creates_storage_dir() {
        let dir = tempdir().unwrap();
        let storage_dir = dir.path().join("nested/storage");
        let settings = Settings {
            token_url: "https://login.example.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scope: "scope".to_string(),
            subscription_key: KEY.to_string(),
            api_base: "https://api.example.com".to_string(),
            storage_dir: storage_dir.clone(),
            http_timeout: std::time::Duration::from_secs(10),
            verify_ssl: true,
            user_agent: "sired-test".to_string(),
        };

        let client = SiredClient::new(RealRuntime, &settings).unwrap();
        assert!(storage_dir.is_dir());
        assert_eq!(client.logs_dir(), storage_dir.join("logs"));
    }
}
