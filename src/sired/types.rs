use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Upload endpoint; the other endpoints hang below it.
pub const EVENT_PATH: &str = "reportes-operadores-red/api/v1/evento";
pub const STATUS_PATH: &str = "reportes-operadores-red/api/v1/evento/consultar-solicitud";
pub const LOG_PATH: &str = "reportes-operadores-red/api/v1/evento/descargar-log";

/// Multipart field that carries the ZIP package.
pub const UPLOAD_FILE_FIELD: &str = "Archivo";

static GUID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-fA-F-]{36}").expect("GUID_REGEX should compile"));

/// First GUID-shaped run of 36 hex digits and dashes in `text`.
pub fn extract_guid(text: &str) -> Option<String> {
    GUID_REGEX.find(text).map(|m| m.as_str().to_string())
}

/// Keeps only the characters a SolicitudId can contain.
pub fn sanitize_solicitud_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit() || *c == '-')
        .collect()
}

/// Parameters of one report upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRequest {
    pub zip_path: PathBuf,
    /// `FechaDeCarga`, e.g. `2025-09-21`
    pub upload_date: String,
    /// `TipoCarga`, e.g. `Diario`
    pub upload_type: String,
    /// `Agente`; sent upper-cased
    pub agent_code: String,
    /// `Mercado`; sent upper-cased
    pub market_code: String,
    /// `Correo` for notifications
    pub email: Option<String>,
}

impl UploadRequest {
    /// Query parameters of the upload, empty values left out.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        [
            ("FechaDeCarga", Some(self.upload_date.trim().to_string())),
            ("TipoCarga", Some(self.upload_type.trim().to_string())),
            ("Agente", Some(self.agent_code.trim().to_uppercase())),
            ("Mercado", Some(self.market_code.trim().to_uppercase())),
            ("Correo", self.email.as_ref().map(|e| e.trim().to_string())),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect()
    }
}

/// Decoded upload response plus the SolicitudId found in it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub response: Value,
    pub solicitud_id: Option<String>,
}

impl UploadResult {
    /// Looks for the SolicitudId in `SolicitudId`, then `Id`, then scans the
    /// free-text `respuesta` (or the raw body) for a GUID.
    pub fn from_response(mut response: Value) -> Self {
        let solicitud_id = ["SolicitudId", "Id"]
            .iter()
            .find_map(|key| id_field(&response, key))
            .or_else(|| {
                ["respuesta", "raw"]
                    .iter()
                    .filter_map(|key| response.get(*key).and_then(Value::as_str))
                    .find_map(extract_guid)
            });

        if let (Some(id), Value::Object(map)) = (&solicitud_id, &mut response) {
            map.entry("SolicitudId")
                .or_insert_with(|| Value::String(id.clone()));
        }

        Self {
            response,
            solicitud_id,
        }
    }
}

fn id_field(response: &Value, key: &str) -> Option<String> {
    match response.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Server-reported lifecycle state of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Estado {
    Exitosa,
    Fallido,
    Reemplazado,
    /// Anything else, e.g. `Procesando`, or no state at all
    InProgress(String),
}

impl Estado {
    pub fn parse(value: &str) -> Self {
        match value {
            "Exitosa" => Estado::Exitosa,
            "Fallido" => Estado::Fallido,
            "Reemplazado" => Estado::Reemplazado,
            other => Estado::InProgress(other.to_string()),
        }
    }

    /// No further transition happens after a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Estado::InProgress(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Estado::Exitosa => "Exitosa",
            Estado::Fallido => "Fallido",
            Estado::Reemplazado => "Reemplazado",
            Estado::InProgress(other) => other,
        }
    }
}

impl std::fmt::Display for Estado {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Estado::InProgress(s) if s.is_empty() => write!(f, "(unknown)"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One fetched representation of a submission. A later poll supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSnapshot(pub Value);

impl StatusSnapshot {
    pub fn estado(&self) -> Estado {
        let value = self
            .0
            .get("Estado")
            .or_else(|| self.0.get("estado"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Estado::parse(value)
    }

    pub fn is_terminal(&self) -> bool {
        self.estado().is_terminal()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}
