//! Tool registry for the Library Management System.
//!
//! Every tool maps its arguments to exactly one Library API request, which
//! then runs through the session [`Orchestrator`]. Three tools never reach
//! the API through it: `login`/`auth_login` log in directly, `auth_logout`
//! only forgets the cached tokens, and `get_image_url` builds a URL locally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::api::{Access, FileUpload, RequestSpec};
use crate::auth::{Credentials, Orchestrator, SessionId};
use crate::error::ToolError;

/// Multipart field carrying a book cover.
const COVER_FIELD: &str = "coverImage";

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates a successful result holding pretty-printed JSON.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(format!("Failed to serialise result: {e}")),
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the first text item.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|ToolContent::Text { text }| text.as_str())
    }
}

/// What a tool call resolves to before anything is sent.
#[derive(Debug)]
enum ToolAction {
    /// One API request, with an optional per-call token override.
    Call {
        request: RequestSpec,
        access_token: Option<String>,
    },
    /// Log in and cache the session's tokens.
    Login(Credentials),
    /// Forget the session's tokens.
    Logout,
    /// A result computed locally.
    Reply(Value),
}

/// Typed access to a tool's JSON arguments.
struct Arguments<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Arguments<'a> {
    fn new(value: &'a Value) -> Self {
        Self {
            map: value.as_object(),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map
            .and_then(|m| m.get(name))
            .filter(|v| !v.is_null())
    }

    /// A non-empty string; numeric identifiers are accepted as text.
    fn required_str(&self, name: &'static str) -> Result<String, ToolError> {
        match self.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            None | Some(Value::String(_)) => Err(ToolError::MissingArgument(name)),
            Some(_) => Err(ToolError::InvalidArgument {
                name,
                expected: "a string",
            }),
        }
    }

    fn optional_str(&self, name: &'static str) -> Result<Option<String>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ToolError::InvalidArgument {
                name,
                expected: "a string",
            }),
        }
    }

    /// Like [`Self::optional_str`], treating an empty string as absent.
    fn filter_str(&self, name: &'static str) -> Result<Option<String>, ToolError> {
        Ok(self.optional_str(name)?.filter(|s| !s.is_empty()))
    }

    fn optional_integer(&self, name: &'static str) -> Result<Option<i64>, ToolError> {
        let invalid = || ToolError::InvalidArgument {
            name,
            expected: "an integer",
        };
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    fn integer_or(&self, name: &'static str, default: i64) -> Result<i64, ToolError> {
        Ok(self.optional_integer(name)?.unwrap_or(default))
    }

    fn required_integer(&self, name: &'static str) -> Result<i64, ToolError> {
        self.optional_integer(name)?
            .ok_or(ToolError::MissingArgument(name))
    }

    fn flag(&self, name: &'static str) -> Result<Option<bool>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(_) => Err(ToolError::InvalidArgument {
                name,
                expected: "a boolean",
            }),
        }
    }

    fn access_token(&self) -> Result<Option<String>, ToolError> {
        self.filter_str("access_token")
    }
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: Option<impl Into<Value>>) {
    if let Some(v) = value {
        fields.insert(key.to_string(), v.into());
    }
}

/// Builds `<origin>/api/images/{id}` from the API base URL.
///
/// A trailing `api` segment on the base is dropped before `api/images` is
/// appended, so both `https://host` and `https://host/api` resolve alike.
#[must_use]
pub fn image_url(base_url: &Url, image_id: &str) -> String {
    let ends_with_api = base_url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        == Some("api");

    let mut url = base_url.clone();
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        if ends_with_api {
            segments.pop();
        }
        segments.extend(["api", "images", image_id]);
    }
    url.to_string()
}

/// Routes tool calls for one server onto the Library API.
pub struct ToolRouter {
    orchestrator: Arc<Orchestrator>,
    base_url: Url,
    allowed_paths: Vec<PathBuf>,
}

impl ToolRouter {
    /// Creates a router.
    ///
    /// `base_url` is only used by `get_image_url`. Cover uploads must lie
    /// inside `allowed_paths`; an empty list allows any path.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, base_url: Url, allowed_paths: Vec<PathBuf>) -> Self {
        Self {
            orchestrator,
            base_url,
            allowed_paths,
        }
    }

    /// Runs one tool call for `session`.
    pub async fn call(&self, session: &SessionId, name: &str, arguments: &Value) -> ToolCallResult {
        match self.dispatch(session, name, arguments).await {
            Ok(body) => ToolCallResult::json(&body),
            Err(e) => {
                debug!(tool = name, error = %e, "Tool call failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }

    /// Releases everything held for an ended session.
    pub async fn end_session(&self, session: &SessionId) {
        self.orchestrator.end_session(session).await;
    }

    async fn dispatch(
        &self,
        session: &SessionId,
        name: &str,
        arguments: &Value,
    ) -> Result<Value, ToolError> {
        match self.plan(name, &Arguments::new(arguments))? {
            ToolAction::Call {
                request,
                access_token,
            } => {
                if let Some(path) = request.upload_path() {
                    self.validate_path(path)?;
                }
                Ok(self
                    .orchestrator
                    .perform_call(session, access_token.as_deref(), &request)
                    .await?)
            }
            ToolAction::Login(credentials) => {
                let summary = self.orchestrator.login(session, &credentials).await?;
                Ok(json!({
                    "status": "ok",
                    "cached": true,
                    "hasRefreshToken": summary.has_refresh_token,
                    "expiresAt": summary.expires_at.map(|e| e.to_rfc3339()),
                }))
            }
            ToolAction::Logout => {
                self.orchestrator.logout(session).await;
                Ok(json!({ "cached": false }))
            }
            ToolAction::Reply(value) => Ok(value),
        }
    }

    /// Checks that an upload path exists inside one of the allowed paths.
    fn validate_path(&self, path: &Path) -> Result<(), ToolError> {
        if self.allowed_paths.is_empty() {
            return Ok(());
        }

        let canonical = path.canonicalize().map_err(|e| {
            ToolError::PathDenied(format!("Failed to resolve path '{}': {e}", path.display()))
        })?;

        let allowed = self
            .allowed_paths
            .iter()
            .filter_map(|p| p.canonicalize().ok())
            .any(|p| canonical.starts_with(p));

        if allowed {
            Ok(())
        } else {
            Err(ToolError::PathDenied(
                "Access denied: path is outside the configured allowed directories".to_string(),
            ))
        }
    }

    /// Resolves a tool name and its arguments to an action.
    #[allow(clippy::too_many_lines)]
    fn plan(&self, name: &str, args: &Arguments<'_>) -> Result<ToolAction, ToolError> {
        let token = args.access_token()?;
        let session = |request: RequestSpec| ToolAction::Call {
            request,
            access_token: token.clone(),
        };
        let public = |request: RequestSpec| ToolAction::Call {
            request: request.public(),
            access_token: None,
        };

        let action = match name {
            // Public
            "health_check" => public(RequestSpec::get(["health"])),
            "get_genres" => public(RequestSpec::get(["books", "genres"])),
            "get_book_reviews" => {
                let book_id = args.required_str("book_id")?;
                public(
                    RequestSpec::get(["reviews", "book", book_id.as_str()])
                        .query("page", args.integer_or("page", 1)?)
                        .query("limit", args.integer_or("limit", 10)?),
                )
            }
            "auth_register" => {
                let mut body = Map::new();
                body.insert("email".into(), args.required_str("email")?.into());
                body.insert("password".into(), args.required_str("password")?.into());
                body.insert("firstName".into(), args.required_str("first_name")?.into());
                body.insert("lastName".into(), args.required_str("last_name")?.into());
                insert_opt(&mut body, "phone", args.optional_str("phone")?);
                public(
                    RequestSpec::new(Method::POST, ["auth", "register"], Access::Public)
                        .json(Value::Object(body)),
                )
            }

            // Catalogue
            "list_books" => {
                let available = args.flag("available_only")?.filter(|a| *a).map(|_| "true");
                session(
                    RequestSpec::get(["books"])
                        .query("page", args.integer_or("page", 1)?)
                        .query("limit", args.integer_or("limit", 12)?)
                        .query_opt("genre", args.filter_str("genre")?)
                        .query_opt("available", available)
                        .query_opt("sort", args.filter_str("sort")?),
                )
            }
            "search_books" => session(
                RequestSpec::get(["books", "search"])
                    .query("q", args.required_str("query")?)
                    .query("page", args.integer_or("page", 1)?)
                    .query("limit", args.integer_or("limit", 12)?),
            ),
            "get_book" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::get(["books", book_id.as_str()]))
            }

            // Auth
            "login" | "auth_login" => ToolAction::Login(Credentials::new(
                args.required_str("email")?,
                args.required_str("password")?,
            )),
            "auth_me" => session(RequestSpec::get(["auth", "me"])),
            "update_profile" => {
                let mut body = Map::new();
                insert_opt(&mut body, "firstName", args.optional_str("first_name")?);
                insert_opt(&mut body, "lastName", args.optional_str("last_name")?);
                insert_opt(&mut body, "phone", args.optional_str("phone")?);
                session(
                    RequestSpec::new(Method::PUT, ["auth", "profile"], Access::Session)
                        .json(Value::Object(body)),
                )
            }
            "auth_logout" => ToolAction::Logout,

            // Books (admin)
            "create_book" => {
                let fields = book_fields(args, true)?;
                session(
                    RequestSpec::new(Method::POST, ["books"], Access::Session)
                        .form_or_json(fields, cover_upload(args)?),
                )
            }
            "update_book" => {
                let book_id = args.required_str("book_id")?;
                let fields = book_fields(args, false)?;
                session(
                    RequestSpec::new(Method::PUT, ["books", book_id.as_str()], Access::Session)
                        .form_or_json(fields, cover_upload(args)?),
                )
            }
            "delete_book" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::new(
                    Method::DELETE,
                    ["books", book_id.as_str()],
                    Access::Session,
                ))
            }

            // Borrows
            "borrow_book" => session(
                RequestSpec::new(Method::POST, ["borrows"], Access::Session)
                    .json(json!({ "bookId": args.required_str("book_id")? })),
            ),
            "return_book" | "renew_book" | "pay_fine" | "approve_borrow_request" => {
                let action = match name {
                    "return_book" => "return",
                    "renew_book" => "renew",
                    "pay_fine" => "pay-fine",
                    _ => "approve",
                };
                let borrow_id = args.required_str("borrow_id")?;
                session(RequestSpec::new(
                    Method::PUT,
                    ["borrows", borrow_id.as_str(), action],
                    Access::Session,
                ))
            }
            "reject_borrow_request" => {
                let borrow_id = args.required_str("borrow_id")?;
                let mut body = Map::new();
                insert_opt(&mut body, "reason", args.filter_str("reason")?);
                session(
                    RequestSpec::new(
                        Method::PUT,
                        ["borrows", borrow_id.as_str(), "reject"],
                        Access::Session,
                    )
                    .json(Value::Object(body)),
                )
            }
            "get_my_borrows" => session(
                RequestSpec::get(["borrows", "my-borrows"])
                    .query("page", args.integer_or("page", 1)?)
                    .query("limit", args.integer_or("limit", 10)?)
                    .query_opt("status", args.filter_str("status")?),
            ),
            "get_current_borrows" => session(RequestSpec::get(["borrows", "current"])),
            "get_my_fines" => session(RequestSpec::get(["borrows", "my-fines"])),
            "get_all_borrows" => session(
                RequestSpec::get(["borrows"])
                    .query("page", args.integer_or("page", 1)?)
                    .query("limit", args.integer_or("limit", 20)?)
                    .query_opt("status", args.filter_str("status")?),
            ),
            "get_overdue_borrows" => session(RequestSpec::get(["borrows", "overdue"])),
            "get_pending_borrow_requests" => session(
                RequestSpec::get(["borrows", "pending"])
                    .query("page", args.integer_or("page", 1)?)
                    .query("limit", args.integer_or("limit", 20)?),
            ),

            // Wishlist
            "get_wishlist" => session(RequestSpec::get(["wishlist"])),
            "add_to_wishlist" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::new(
                    Method::POST,
                    ["wishlist", "add", book_id.as_str()],
                    Access::Session,
                ))
            }
            "remove_from_wishlist" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::new(
                    Method::DELETE,
                    ["wishlist", "remove", book_id.as_str()],
                    Access::Session,
                ))
            }
            "check_wishlist" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::get(["wishlist", "check", book_id.as_str()]))
            }

            // Reviews
            "add_review" => {
                let mut body = Map::new();
                body.insert("bookId".into(), args.required_str("book_id")?.into());
                body.insert("rating".into(), args.required_integer("rating")?.into());
                insert_opt(&mut body, "comment", args.optional_str("comment")?);
                session(
                    RequestSpec::new(Method::POST, ["reviews"], Access::Session)
                        .json(Value::Object(body)),
                )
            }
            "update_review" => {
                let review_id = args.required_str("review_id")?;
                let mut body = Map::new();
                insert_opt(&mut body, "rating", args.optional_integer("rating")?);
                insert_opt(&mut body, "comment", args.optional_str("comment")?);
                session(
                    RequestSpec::new(Method::PUT, ["reviews", review_id.as_str()], Access::Session)
                        .json(Value::Object(body)),
                )
            }
            "delete_review" => {
                let review_id = args.required_str("review_id")?;
                session(RequestSpec::new(
                    Method::DELETE,
                    ["reviews", review_id.as_str()],
                    Access::Session,
                ))
            }
            "get_my_review" => {
                let book_id = args.required_str("book_id")?;
                session(RequestSpec::get(["reviews", "my-review", book_id.as_str()]))
            }

            // Admin
            "get_dashboard_stats" => session(RequestSpec::get(["admin", "dashboard"])),
            "get_users" => session(
                RequestSpec::get(["admin", "users"])
                    .query("page", args.integer_or("page", 1)?)
                    .query("limit", args.integer_or("limit", 20)?)
                    .query_opt("search", args.filter_str("search")?),
            ),
            "get_user_details" => {
                let user_id = args.required_str("user_id")?;
                session(RequestSpec::get(["admin", "users", user_id.as_str()]))
            }
            "toggle_user_status" => {
                let user_id = args.required_str("user_id")?;
                session(RequestSpec::new(
                    Method::PUT,
                    ["admin", "users", user_id.as_str(), "toggle-status"],
                    Access::Session,
                ))
            }

            // Images
            "get_image_url" => {
                let image_id = args.required_str("image_id")?;
                ToolAction::Reply(json!({ "url": image_url(&self.base_url, &image_id) }))
            }

            _ => return Err(ToolError::UnknownTool(name.to_string())),
        };
        Ok(action)
    }

    /// Returns the list of available tools.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            // === Public ===
            tool(
                "health_check",
                "Lightweight liveness probe confirming the Library API is reachable. \
                 Returns the health status and backend timestamp.",
                object_schema(json!({}), &[]),
            ),
            tool(
                "get_genres",
                "List all genres available for filtering the catalogue.",
                object_schema(json!({}), &[]),
            ),
            tool(
                "get_book_reviews",
                "Retrieve public reviews for a book, paginated.",
                object_schema(
                    json!({
                        "book_id": string_param("Identifier of the book"),
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 10)")
                    }),
                    &["book_id"],
                ),
            ),
            tool(
                "auth_register",
                "Create a new user account. The password is sent to the API only and is \
                 never stored. Tokens are not cached; use login afterwards.",
                object_schema(
                    json!({
                        "email": string_param("Unique email for the user"),
                        "password": string_param("Account password"),
                        "first_name": string_param("First name"),
                        "last_name": string_param("Last name"),
                        "phone": string_param("Optional contact number")
                    }),
                    &["email", "password", "first_name", "last_name"],
                ),
            ),
            // === Catalogue ===
            tool(
                "list_books",
                "Retrieve a paginated slice of the catalogue. Attaches the session token \
                 when one is cached.",
                object_schema(
                    json!({
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 12)"),
                        "genre": string_param("Filter to a single genre"),
                        "available_only": {
                            "type": "boolean",
                            "description": "Only titles with available copies"
                        },
                        "sort": string_param("Backend sort key, e.g. newest or popular")
                    }),
                    &[],
                ),
            ),
            tool(
                "search_books",
                "Full-text search across books.",
                object_schema(
                    json!({
                        "query": string_param("Search string"),
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 12)")
                    }),
                    &["query"],
                ),
            ),
            tool(
                "get_book",
                "Retrieve details, availability and metadata for one book.",
                object_schema(json!({ "book_id": string_param("Identifier of the book") }), &["book_id"]),
            ),
            // === Auth ===
            tool(
                "login",
                "Authenticate once per session with email and password. Tokens are cached \
                 server-side and attached (and refreshed) automatically on later calls. \
                 Returns whether a refresh token is stored and the access token expiry.",
                credentials_schema(),
            ),
            tool(
                "auth_login",
                "Alias for login.",
                credentials_schema(),
            ),
            token_tool("auth_me", "Fetch the profile of the currently authenticated user."),
            tool(
                "update_profile",
                "Edit the authenticated user's profile. Omitted fields are left untouched.",
                object_schema(
                    with_access_token(json!({
                        "first_name": string_param("New first name"),
                        "last_name": string_param("New last name"),
                        "phone": string_param("New contact number")
                    })),
                    &[],
                ),
            ),
            tool(
                "auth_logout",
                "Clear the tokens cached for this session. Does not call the API.",
                object_schema(json!({}), &[]),
            ),
            // === Books (admin) ===
            tool(
                "create_book",
                "Create a book record (admin). Sent as multipart when cover_image_path is \
                 given, otherwise as JSON.",
                object_schema(
                    with_access_token(book_properties(false)),
                    &["isbn", "title", "author"],
                ),
            ),
            tool(
                "update_book",
                "Update a book record (admin). Only provided fields are changed; \
                 cover_image_path replaces the cover.",
                object_schema(with_access_token(book_properties(true)), &["book_id"]),
            ),
            id_tool("delete_book", "Delete a book (admin).", "book_id", "Identifier of the book"),
            // === Borrows ===
            id_tool(
                "borrow_book",
                "Create a borrow request for the authenticated user.",
                "book_id",
                "Identifier of the book",
            ),
            id_tool(
                "return_book",
                "Mark a borrow as returned.",
                "borrow_id",
                "Identifier of the borrow record",
            ),
            id_tool(
                "renew_book",
                "Request a renewal for an active borrow.",
                "borrow_id",
                "Identifier of the borrow record",
            ),
            tool(
                "get_my_borrows",
                "List the current user's borrow history, paginated.",
                object_schema(
                    with_access_token(json!({
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 10)"),
                        "status": string_param("Filter by borrow status, e.g. pending or returned")
                    })),
                    &[],
                ),
            ),
            token_tool(
                "get_current_borrows",
                "Fetch active borrows and outstanding fine totals for the current user.",
            ),
            token_tool("get_my_fines", "Retrieve fines for the authenticated user."),
            id_tool(
                "pay_fine",
                "Mark the fine on a borrow as paid.",
                "borrow_id",
                "Identifier of the borrow record",
            ),
            tool(
                "get_all_borrows",
                "List all borrow records across users (admin), paginated.",
                object_schema(
                    with_access_token(json!({
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 20)"),
                        "status": string_param("Filter by borrow status")
                    })),
                    &[],
                ),
            ),
            token_tool("get_overdue_borrows", "List overdue borrow records (admin)."),
            tool(
                "get_pending_borrow_requests",
                "List borrow requests awaiting approval (admin), paginated.",
                object_schema(
                    with_access_token(json!({
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 20)")
                    })),
                    &[],
                ),
            ),
            id_tool(
                "approve_borrow_request",
                "Approve a pending borrow request (admin).",
                "borrow_id",
                "Identifier of the borrow request",
            ),
            tool(
                "reject_borrow_request",
                "Reject a pending borrow request (admin) with an optional reason.",
                object_schema(
                    with_access_token(json!({
                        "borrow_id": string_param("Identifier of the borrow request"),
                        "reason": string_param("Optional explanation")
                    })),
                    &["borrow_id"],
                ),
            ),
            // === Wishlist ===
            token_tool("get_wishlist", "Fetch the authenticated user's wishlist."),
            id_tool(
                "add_to_wishlist",
                "Add a book to the wishlist.",
                "book_id",
                "Identifier of the book",
            ),
            id_tool(
                "remove_from_wishlist",
                "Remove a book from the wishlist.",
                "book_id",
                "Identifier of the book",
            ),
            id_tool(
                "check_wishlist",
                "Check whether a book is already in the wishlist.",
                "book_id",
                "Identifier of the book",
            ),
            // === Reviews ===
            tool(
                "add_review",
                "Submit a review for a book.",
                object_schema(
                    with_access_token(json!({
                        "book_id": string_param("Identifier of the book"),
                        "rating": integer_param("Numeric rating"),
                        "comment": string_param("Optional review text")
                    })),
                    &["book_id", "rating"],
                ),
            ),
            tool(
                "update_review",
                "Edit a review written by the current user.",
                object_schema(
                    with_access_token(json!({
                        "review_id": string_param("Identifier of the review"),
                        "rating": integer_param("New rating"),
                        "comment": string_param("New review text")
                    })),
                    &["review_id"],
                ),
            ),
            id_tool(
                "delete_review",
                "Delete a review (owner or admin).",
                "review_id",
                "Identifier of the review",
            ),
            id_tool(
                "get_my_review",
                "Fetch the current user's review for a book, if any.",
                "book_id",
                "Identifier of the book",
            ),
            // === Admin ===
            token_tool(
                "get_dashboard_stats",
                "Retrieve admin dashboard aggregates: counts, genre distribution, recent \
                 activity and most borrowed titles.",
            ),
            tool(
                "get_users",
                "List users (admin), paginated and optionally filtered.",
                object_schema(
                    with_access_token(json!({
                        "page": integer_param("1-based page number (default: 1)"),
                        "limit": integer_param("Page size (default: 20)"),
                        "search": string_param("Optional query to match users")
                    })),
                    &[],
                ),
            ),
            id_tool(
                "get_user_details",
                "View a user's profile, borrow history and fines (admin).",
                "user_id",
                "Identifier of the user",
            ),
            id_tool(
                "toggle_user_status",
                "Activate or deactivate a user account (admin).",
                "user_id",
                "Identifier of the user",
            ),
            // === Images ===
            tool(
                "get_image_url",
                "Build the public URL of an image without calling the API.",
                object_schema(
                    json!({ "image_id": string_param("Image identifier returned by the API") }),
                    &["image_id"],
                ),
            ),
        ]
    }
}

fn book_fields(args: &Arguments<'_>, create: bool) -> Result<Map<String, Value>, ToolError> {
    let mut fields = Map::new();
    for name in ["isbn", "title", "author"] {
        let value = if create {
            Some(args.required_str(name)?)
        } else {
            args.optional_str(name)?
        };
        insert_opt(&mut fields, name, value);
    }
    insert_opt(&mut fields, "description", args.optional_str("description")?);
    insert_opt(&mut fields, "genre", args.optional_str("genre")?);
    insert_opt(&mut fields, "totalCopies", args.optional_integer("total_copies")?);
    Ok(fields)
}

fn cover_upload(args: &Arguments<'_>) -> Result<Option<FileUpload>, ToolError> {
    Ok(args.filter_str("cover_image_path")?.map(|path| FileUpload {
        field: COVER_FIELD.to_string(),
        path: PathBuf::from(path),
    }))
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    }
}

/// A tool whose only parameter is the optional token override.
fn token_tool(name: &str, description: &str) -> ToolDefinition {
    tool(name, description, object_schema(with_access_token(json!({})), &[]))
}

/// A tool taking one required identifier plus the optional token override.
fn id_tool(name: &str, description: &str, id: &str, id_description: &str) -> ToolDefinition {
    let mut properties = Map::new();
    properties.insert(id.to_string(), string_param(id_description));
    tool(
        name,
        description,
        object_schema(with_access_token(Value::Object(properties)), &[id]),
    )
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn string_param(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn integer_param(description: &str) -> Value {
    json!({ "type": "integer", "description": description })
}

fn with_access_token(mut properties: Value) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "access_token".to_string(),
            string_param("Optional token override; defaults to the session's cached token"),
        );
    }
    properties
}

fn credentials_schema() -> Value {
    object_schema(
        json!({
            "email": string_param("Account email"),
            "password": string_param("Account password; used for this request only")
        }),
        &["email", "password"],
    )
}

fn book_properties(update: bool) -> Value {
    let mut properties = json!({
        "isbn": string_param("ISBN"),
        "title": string_param("Title"),
        "author": string_param("Author"),
        "description": string_param("Description"),
        "genre": string_param("Genre"),
        "total_copies": integer_param("Number of copies held"),
        "cover_image_path": string_param(
            "Local path of a cover image inside the allowed directories; sent as multipart"
        )
    });
    if update {
        if let Some(map) = properties.as_object_mut() {
            map.insert("book_id".to_string(), string_param("Identifier of the book"));
        }
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LibraryApi, RequestBody, TokenGrant, UpstreamResponse};
    use crate::auth::{AccessToken, CredentialStore, InMemoryCredentialStore, RefreshToken};
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Records every request and answers 200 with `{"ok": true}`.
    #[derive(Default)]
    struct RecordingApi {
        requests: StdMutex<Vec<(RequestSpec, Option<String>)>>,
    }

    #[async_trait]
    impl LibraryApi for RecordingApi {
        async fn issue(
            &self,
            request: &RequestSpec,
            bearer: Option<&str>,
        ) -> Result<UpstreamResponse, ApiError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.clone(), bearer.map(str::to_string)));
            Ok(UpstreamResponse::new(200, json!({"ok": true})))
        }

        async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenGrant, ApiError> {
            Err(ApiError::InvalidResponse("not scripted".into()))
        }

        async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, ApiError> {
            if credentials.password() == "correct" {
                Ok(TokenGrant {
                    access_token: AccessToken::new("A"),
                    refresh_token: Some(RefreshToken::new("R")),
                    expires_at: chrono::DateTime::from_timestamp(4_102_444_800, 0),
                })
            } else {
                Err(ApiError::from_status(401, &json!({"message": "Invalid credentials"})))
            }
        }
    }

    struct Fixture {
        router: ToolRouter,
        api: Arc<RecordingApi>,
        store: Arc<InMemoryCredentialStore>,
        session: SessionId,
    }

    fn fixture_with_paths(allowed_paths: Vec<PathBuf>) -> Fixture {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryCredentialStore::new());
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), api.clone(), 30));
        let base = Url::parse("https://library.example.com/api").unwrap();
        Fixture {
            router: ToolRouter::new(orchestrator, base, allowed_paths),
            api,
            store,
            session: SessionId::new("s1"),
        }
    }

    fn fixture() -> Fixture {
        fixture_with_paths(Vec::new())
    }

    fn planned(router: &ToolRouter, name: &str, args: Value) -> (RequestSpec, Option<String>) {
        match router.plan(name, &Arguments::new(&args)).unwrap() {
            ToolAction::Call {
                request,
                access_token,
            } => (request, access_token),
            other => panic!("expected an API call, got {other:?}"),
        }
    }

    fn text(result: &ToolCallResult) -> &str {
        result.first_text().unwrap()
    }

    #[test]
    fn tool_definitions_valid() {
        let tools = ToolRouter::definitions();
        assert_eq!(tools.len(), 40);

        let mut names = HashSet::new();
        for tool in &tools {
            assert!(names.insert(tool.name.clone()), "duplicate tool {}", tool.name);
            assert!(tool.input_schema.is_object());
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn every_defined_tool_is_routed() {
        let f = fixture();
        for tool in ToolRouter::definitions() {
            let result = f.router.plan(&tool.name, &Arguments::new(&Value::Null));
            assert!(
                !matches!(result, Err(ToolError::UnknownTool(_))),
                "{} is not routed",
                tool.name
            );
        }
    }

    #[test]
    fn required_parameters_match_schema() {
        let f = fixture();
        for tool in ToolRouter::definitions() {
            let required = tool.input_schema["required"].as_array().unwrap().clone();
            let result = f.router.plan(&tool.name, &Arguments::new(&json!({})));
            if required.is_empty() {
                assert!(result.is_ok(), "{} should not need arguments", tool.name);
            } else {
                assert!(
                    matches!(result, Err(ToolError::MissingArgument(_))),
                    "{} should reject missing arguments",
                    tool.name
                );
            }
        }
    }

    #[test]
    fn tool_call_result_text() {
        let result = ToolCallResult::text("Hello, world!");
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("Hello, world!"));

        let result = ToolCallResult::error("Something went wrong");
        assert!(result.is_error);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn list_books_applies_defaults_and_filters() {
        let f = fixture();
        let (request, token) = planned(&f.router, "list_books", json!({}));
        assert_eq!(request.label(), "GET /books");
        assert_eq!(request.access, Access::Session);
        assert_eq!(
            request.query,
            vec![("page".into(), "1".into()), ("limit".into(), "12".into())]
        );
        assert!(token.is_none());

        let (request, _) = planned(
            &f.router,
            "list_books",
            json!({"page": 2, "genre": "Fantasy", "available_only": true, "sort": ""}),
        );
        assert!(request.query.contains(&("page".into(), "2".into())));
        assert!(request.query.contains(&("genre".into(), "Fantasy".into())));
        assert!(request.query.contains(&("available".into(), "true".into())));
        assert!(!request.query.iter().any(|(k, _)| k == "sort"));

        let (request, _) = planned(&f.router, "list_books", json!({"available_only": false}));
        assert!(!request.query.iter().any(|(k, _)| k == "available"));
    }

    #[test]
    fn public_tools_skip_token_resolution() {
        let f = fixture();
        for (name, args, label) in [
            ("health_check", json!({}), "GET /health"),
            ("get_genres", json!({}), "GET /books/genres"),
            ("get_book_reviews", json!({"book_id": "b1"}), "GET /reviews/book/b1"),
            (
                "auth_register",
                json!({"email": "a@b.c", "password": "pw", "first_name": "A", "last_name": "B"}),
                "POST /auth/register",
            ),
        ] {
            let (request, token) = planned(&f.router, name, args);
            assert_eq!(request.access, Access::Public, "{name}");
            assert_eq!(request.label(), label);
            assert!(token.is_none());
        }
    }

    #[test]
    fn access_token_is_passed_as_override() {
        let f = fixture();
        let (request, token) = planned(
            &f.router,
            "get_my_borrows",
            json!({"status": "pending", "access_token": "explicit"}),
        );
        assert_eq!(request.label(), "GET /borrows/my-borrows");
        assert_eq!(
            request.query,
            vec![
                ("page".into(), "1".into()),
                ("limit".into(), "10".into()),
                ("status".into(), "pending".into()),
            ]
        );
        assert_eq!(token.as_deref(), Some("explicit"));

        let (_, token) = planned(&f.router, "auth_me", json!({"access_token": ""}));
        assert!(token.is_none());
    }

    #[test]
    fn borrow_actions_map_to_put_endpoints() {
        let f = fixture();
        for (name, suffix) in [
            ("return_book", "return"),
            ("renew_book", "renew"),
            ("pay_fine", "pay-fine"),
            ("approve_borrow_request", "approve"),
        ] {
            let (request, _) = planned(&f.router, name, json!({"borrow_id": "42"}));
            assert_eq!(request.label(), format!("PUT /borrows/42/{suffix}"));
            assert_eq!(request.body, RequestBody::Empty);
        }

        let (request, _) = planned(&f.router, "borrow_book", json!({"book_id": "b1"}));
        assert_eq!(request.label(), "POST /borrows");
        assert_eq!(request.body, RequestBody::Json(json!({"bookId": "b1"})));

        let (request, _) = planned(&f.router, "reject_borrow_request", json!({"borrow_id": "7"}));
        assert_eq!(request.body, RequestBody::Json(json!({})));
        let (request, _) = planned(
            &f.router,
            "reject_borrow_request",
            json!({"borrow_id": "7", "reason": "Damaged"}),
        );
        assert_eq!(request.body, RequestBody::Json(json!({"reason": "Damaged"})));
    }

    #[test]
    fn identifiers_stay_single_path_segments() {
        let f = fixture();
        let (request, _) = planned(&f.router, "get_book", json!({"book_id": "a/b c"}));
        assert_eq!(request.segments, vec!["books".to_string(), "a/b c".to_string()]);

        let (request, _) = planned(&f.router, "get_user_details", json!({"user_id": 17}));
        assert_eq!(request.label(), "GET /admin/users/17");
    }

    #[test]
    fn update_profile_sends_only_provided_fields() {
        let f = fixture();
        let (request, _) = planned(&f.router, "update_profile", json!({"phone": "555"}));
        assert_eq!(request.label(), "PUT /auth/profile");
        assert_eq!(request.body, RequestBody::Json(json!({"phone": "555"})));
    }

    #[test]
    fn reviews_build_bodies() {
        let f = fixture();
        let (request, _) = planned(
            &f.router,
            "add_review",
            json!({"book_id": "b1", "rating": 5, "comment": "Great"}),
        );
        assert_eq!(
            request.body,
            RequestBody::Json(json!({"bookId": "b1", "rating": 5, "comment": "Great"}))
        );

        let (request, _) = planned(&f.router, "update_review", json!({"review_id": "r1", "rating": "4"}));
        assert_eq!(request.label(), "PUT /reviews/r1");
        assert_eq!(request.body, RequestBody::Json(json!({"rating": 4})));
    }

    #[test]
    fn create_book_is_json_without_cover() {
        let f = fixture();
        let (request, _) = planned(
            &f.router,
            "create_book",
            json!({"isbn": "978", "title": "Dune", "author": "Herbert", "total_copies": 3}),
        );
        assert_eq!(request.label(), "POST /books");
        assert_eq!(
            request.body,
            RequestBody::Json(json!({
                "isbn": "978", "title": "Dune", "author": "Herbert", "totalCopies": 3
            }))
        );
    }

    #[test]
    fn update_book_with_cover_is_multipart() {
        let f = fixture();
        let (request, _) = planned(
            &f.router,
            "update_book",
            json!({"book_id": "b1", "title": "Dune", "cover_image_path": "/tmp/cover.png"}),
        );
        assert_eq!(request.label(), "PUT /books/b1");
        let RequestBody::Multipart { fields, file } = &request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(fields, &vec![("title".to_string(), "Dune".to_string())]);
        assert_eq!(file.field, "coverImage");
        assert_eq!(file.path, PathBuf::from("/tmp/cover.png"));
    }

    #[test]
    fn wrong_argument_types_are_rejected() {
        let f = fixture();
        let err = f
            .router
            .plan("list_books", &Arguments::new(&json!({"page": "two"})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { name: "page", .. }));

        let err = f
            .router
            .plan("get_book", &Arguments::new(&json!({"book_id": ["x"]})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { name: "book_id", .. }));
    }

    #[test]
    fn image_url_strips_api_suffix() {
        let url = Url::parse("https://library.example.com/api").unwrap();
        assert_eq!(
            image_url(&url, "img1"),
            "https://library.example.com/api/images/img1"
        );

        let url = Url::parse("http://localhost:5000").unwrap();
        assert_eq!(image_url(&url, "img1"), "http://localhost:5000/api/images/img1");

        let url = Url::parse("http://localhost:5000/v1/").unwrap();
        assert_eq!(
            image_url(&url, "a b"),
            "http://localhost:5000/v1/api/images/a%20b"
        );
    }

    #[tokio::test]
    async fn missing_parameter_is_a_tool_error_without_http() {
        let f = fixture();
        let result = f.router.call(&f.session, "get_book", &json!({})).await;
        assert!(result.is_error);
        assert_eq!(text(&result), "Missing required parameter: book_id");
        assert!(f.api.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let f = fixture();
        let result = f.router.call(&f.session, "launch_rocket", &json!({})).await;
        assert!(result.is_error);
        assert_eq!(text(&result), "Unknown tool: launch_rocket");
    }

    #[tokio::test]
    async fn get_image_url_makes_no_request() {
        let f = fixture();
        let result = f
            .router
            .call(&f.session, "get_image_url", &json!({"image_id": "abc"}))
            .await;
        assert!(!result.is_error);
        let body: Value = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(body["url"], "https://library.example.com/api/images/abc");
        assert!(f.api.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_caches_tokens_and_hides_them() {
        let f = fixture();
        let result = f
            .router
            .call(
                &f.session,
                "login",
                &json!({"email": "reader@example.com", "password": "correct"}),
            )
            .await;
        assert!(!result.is_error);
        let body: Value = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "cached": true,
                "hasRefreshToken": true,
                "expiresAt": "2100-01-01T00:00:00+00:00"
            })
        );
        assert!(!text(&result).contains("correct"));

        let record = f.store.get(&f.session).await.unwrap();
        assert_eq!(record.access_token(), &AccessToken::new("A"));

        f.router.call(&f.session, "auth_me", &json!({})).await;
        let requests = f.api.requests.lock().unwrap();
        assert_eq!(requests[0].1.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn failed_login_reports_upstream_error() {
        let f = fixture();
        let result = f
            .router
            .call(
                &f.session,
                "auth_login",
                &json!({"email": "reader@example.com", "password": "wrong"}),
            )
            .await;
        assert!(result.is_error);
        assert_eq!(text(&result), "Library API error (401): Invalid credentials");
        assert!(f.store.get(&f.session).await.is_none());
    }

    #[tokio::test]
    async fn logout_clears_the_session() {
        let f = fixture();
        f.store
            .set(&f.session, AccessToken::new("A"), None, None)
            .await;

        let result = f.router.call(&f.session, "auth_logout", &json!({})).await;
        assert!(!result.is_error);
        let body: Value = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(body, json!({"cached": false}));
        assert!(f.store.get(&f.session).await.is_none());
    }

    #[tokio::test]
    async fn cover_outside_allowed_paths_is_denied() {
        let allowed = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let cover = elsewhere.path().join("cover.png");
        std::fs::write(&cover, b"png").unwrap();

        let f = fixture_with_paths(vec![allowed.path().to_path_buf()]);
        let result = f
            .router
            .call(
                &f.session,
                "update_book",
                &json!({"book_id": "b1", "cover_image_path": cover}),
            )
            .await;
        assert!(result.is_error);
        assert!(text(&result).contains("Access denied"));
        assert!(f.api.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cover_inside_allowed_paths_is_sent() {
        let allowed = tempfile::tempdir().unwrap();
        let cover = allowed.path().join("cover.png");
        std::fs::write(&cover, b"png").unwrap();

        let f = fixture_with_paths(vec![allowed.path().to_path_buf()]);
        let result = f
            .router
            .call(
                &f.session,
                "update_book",
                &json!({"book_id": "b1", "cover_image_path": cover}),
            )
            .await;
        assert!(!result.is_error, "{}", text(&result));
        let requests = f.api.requests.lock().unwrap();
        assert_eq!(requests[0].0.upload_path(), Some(cover.as_path()));
    }

    #[tokio::test]
    async fn missing_cover_file_is_denied() {
        let allowed = tempfile::tempdir().unwrap();
        let f = fixture_with_paths(vec![allowed.path().to_path_buf()]);
        let result = f
            .router
            .call(
                &f.session,
                "update_book",
                &json!({"book_id": "b1", "cover_image_path": allowed.path().join("nope.png")}),
            )
            .await;
        assert!(result.is_error);
        assert!(text(&result).contains("Failed to resolve path"));
    }
}
