//! Run records: one JSON file per client run, with secrets masked.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::info;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// Characters kept visible at each end of a token in run records.
pub const RUN_TOKEN_VISIBLE_CHARS: usize = 12;

/// Keeps the first and last `keep` characters of `secret`.
///
/// Secrets too short to hide anything that way are masked completely.
pub fn mask_secret(secret: &str, keep: usize) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= keep * 2 {
        return "*".repeat(chars.len().min(8));
    }
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Replaces a top-level `token` field by `token_masked`.
pub fn mask_token_field(record: &mut Map<String, Value>) {
    if let Some(token) = record.remove("token") {
        let raw = match &token {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        record.insert(
            "token_masked".to_string(),
            Value::String(mask_secret(&raw, RUN_TOKEN_VISIBLE_CHARS)),
        );
    }
}

/// `run_20250921_143005.json`
pub fn run_file_name(at: &DateTime<Local>) -> String {
    format!("run_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Writes `record` as `run_<timestamp>.json` in `storage_dir` and returns its path.
#[tracing::instrument(skip(runtime, record))]
pub fn save_run<R: Runtime>(
    runtime: &R,
    storage_dir: &Path,
    mut record: Map<String, Value>,
    at: DateTime<Local>,
) -> Result<PathBuf> {
    mask_token_field(&mut record);

    let path = storage_dir.join(run_file_name(&at));
    let json = serde_json::to_vec_pretty(&Value::Object(record))
        .context("Failed to serialize run record")?;
    runtime
        .write(&path, &json)
        .with_context(|| format!("Failed to write run record {:?}", path))?;

    info!("Run record saved to {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    const TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.body.signature-part";

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefghijklmnop", 4), "abcd...mnop");
        assert_eq!(mask_secret("short", 4), "*****");
        assert_eq!(mask_secret("", 4), "");
        // Never more than eight stars
        assert_eq!(mask_secret("abcdefghij", 12), "********");
    }

    #[test]
    fn test_mask_secret_multibyte() {
        assert_eq!(mask_secret("ñandú-ñandú-ñandú", 3), "ñan...ndú");
    }

    #[test]
    fn test_run_file_name() {
        let at = Local.with_ymd_and_hms(2025, 9, 21, 14, 30, 5).unwrap();
        assert_eq!(run_file_name(&at), "run_20250921_143005.json");
    }

    #[test]
    fn test_save_run_masks_token() {
        let dir = tempdir().unwrap();
        let record = json!({
            "SolicitudId": "123e4567-e89b-12d3-a456-426614174000",
            "token": TOKEN,
        });
        let Value::Object(record) = record else {
            unreachable!()
        };

        let at = Local.with_ymd_and_hms(2025, 9, 21, 8, 0, 0).unwrap();
        let path = save_run(&RealRuntime, dir.path(), record, at).unwrap();

        assert_eq!(path, dir.path().join("run_20250921_080000.json"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains(TOKEN));

        let saved: Value = serde_json::from_str(&content).unwrap();
        assert!(saved.get("token").is_none());
        assert_eq!(saved["token_masked"], "eyJ0eXAiOiJK...gnature-part");
        assert_eq!(saved["SolicitudId"], "123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn test_save_run_without_token() {
        let dir = tempdir().unwrap();
        let Value::Object(record) = json!({"SolicitudId": null}) else {
            unreachable!()
        };

        let path = save_run(&RealRuntime, dir.path(), record, Local::now()).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(saved.get("token_masked").is_none());
    }
}
