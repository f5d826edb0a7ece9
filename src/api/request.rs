//! Description of one outbound Library API call.

use std::path::{Path, PathBuf};

use reqwest::Method;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Whether an endpoint takes part in the session token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No authentication; token resolution is skipped entirely.
    Public,
    /// The session's (or an explicit) bearer token is attached when available.
    Session,
}

/// A file sent as one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Multipart field name.
    pub field: String,
    /// Local path, read when the request is sent.
    pub path: PathBuf,
}

impl FileUpload {
    /// Best-effort MIME type from the file extension.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("svg") => "image/svg+xml",
            Some("bmp") => "image/bmp",
            _ => "application/octet-stream",
        }
    }

    /// File name sent with the part.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Reads the file contents.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::File`] if the file cannot be read.
    pub async fn read(&self) -> Result<Vec<u8>, ApiError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| ApiError::File {
                path: self.path.clone(),
                source,
            })
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// JSON body.
    Json(Value),
    /// Multipart form with text fields and one file.
    Multipart {
        /// Text fields.
        fields: Vec<(String, String)>,
        /// The file part.
        file: FileUpload,
    },
}

/// One HTTP call against the Library API, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Path segments below the base URL; each is percent-encoded on send.
    pub segments: Vec<String>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
    /// Authentication mode.
    pub access: Access,
}

impl RequestSpec {
    /// Starts a request with no query and no body.
    pub fn new<I, S>(method: Method, segments: I, access: Access) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
            access,
        }
    }

    /// `GET` on a session endpoint.
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments, Access::Session)
    }

    /// Marks the request as needing no authentication.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.access = Access::Public;
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Adds a query parameter when a value is present.
    #[must_use]
    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Sends `fields` as JSON, or as a multipart form when a file is attached.
    ///
    /// Multipart text fields are the JSON values rendered without quotes.
    #[must_use]
    pub fn form_or_json(mut self, fields: Map<String, Value>, file: Option<FileUpload>) -> Self {
        self.body = match file {
            None => RequestBody::Json(Value::Object(fields)),
            Some(file) => RequestBody::Multipart {
                fields: fields
                    .into_iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, text)
                    })
                    .collect(),
                file,
            },
        };
        self
    }

    /// Human-readable `METHOD /a/b` label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} /{}", self.method, self.segments.join("/"))
    }

    /// Returns the upload path, if any.
    #[must_use]
    pub fn upload_path(&self) -> Option<&Path> {
        match &self.body {
            RequestBody::Multipart { file, .. } => Some(&file.path),
            _ => None,
        }
    }
}

/// Status and decoded body of an upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body (a JSON string when the body was not JSON).
    pub body: Value,
}

impl UpstreamResponse {
    /// Creates a response.
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Whether the upstream rejected the bearer credential.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the body on success, or the status mapped to an [`ApiError`].
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status.
    pub fn into_result(self) -> Result<Value, ApiError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_query_and_label() {
        let spec = RequestSpec::get(["books", "search"])
            .query("q", "dune")
            .query("page", 2)
            .query_opt("genre", None::<&str>)
            .query_opt("sort", Some("newest"));

        assert_eq!(spec.access, Access::Session);
        assert_eq!(spec.label(), "GET /books/search");
        assert_eq!(
            spec.query,
            vec![
                ("q".to_string(), "dune".to_string()),
                ("page".to_string(), "2".to_string()),
                ("sort".to_string(), "newest".to_string()),
            ]
        );
    }

    #[test]
    fn form_or_json_without_file_is_json() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("Dune"));
        fields.insert("totalCopies".into(), json!(3));
        let spec = RequestSpec::new(Method::POST, ["books"], Access::Session)
            .form_or_json(fields, None);

        assert_eq!(
            spec.body,
            RequestBody::Json(json!({"title": "Dune", "totalCopies": 3}))
        );
        assert!(spec.upload_path().is_none());
    }

    #[test]
    fn form_or_json_with_file_is_multipart() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("Dune"));
        fields.insert("totalCopies".into(), json!(3));
        let file = FileUpload {
            field: "coverImage".into(),
            path: PathBuf::from("/tmp/cover.JPG"),
        };
        let spec = RequestSpec::new(Method::PUT, ["books", "1"], Access::Session)
            .form_or_json(fields, Some(file.clone()));

        let RequestBody::Multipart { fields, file: sent } = &spec.body else {
            panic!("expected multipart body");
        };
        assert!(fields.contains(&("title".to_string(), "Dune".to_string())));
        assert!(fields.contains(&("totalCopies".to_string(), "3".to_string())));
        assert_eq!(sent, &file);
        assert_eq!(sent.mime_type(), "image/jpeg");
        assert_eq!(sent.file_name(), "cover.JPG");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let file = FileUpload {
            field: "coverImage".into(),
            path: PathBuf::from("cover"),
        };
        assert_eq!(file.mime_type(), "application/octet-stream");
    }

    #[test]
    fn response_classification() {
        assert!(UpstreamResponse::new(401, json!({})).is_unauthorized());
        assert!(UpstreamResponse::new(204, json!(null)).is_success());

        let ok = UpstreamResponse::new(200, json!({"data": []})).into_result();
        assert_eq!(ok.unwrap(), json!({"data": []}));

        let err = UpstreamResponse::new(409, json!({"message": "Already borrowed"}))
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "Library API error (409): Already borrowed");
    }
}
