//! SIRED report-upload API.
//!
//! - `types` - requests, responses and submission states
//! - `client` - authenticated calls against the API

mod client;
mod types;

#[cfg(test)]
pub use client::MockSubmissionApi;
pub use client::{
    META_TOKEN_VISIBLE_CHARS, MultipartField, SUBSCRIPTION_KEY_HEADER, SUBSCRIPTION_KEY_PARAM,
    SiredClient, SubmissionApi, TokenMeta, decode_body,
};
pub use types::{
    EVENT_PATH, Estado, LOG_PATH, STATUS_PATH, StatusSnapshot, UPLOAD_FILE_FIELD, UploadRequest,
    UploadResult, extract_guid, sanitize_solicitud_id,
};
