//! Remote managed databases.
//!
//! [`RemoteShard`] talks to a libsql server over the Hrana HTTP pipeline API
//! (`POST /v2/pipeline`). [`PlatformClient`] talks to the hosting platform's
//! management API to create, look up, and destroy databases and to mint auth
//! tokens for them.

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD as B64};
use rusqlite::types::Value;
use serde::Deserialize;
use serde_json::{Value as Json, json};
use tracing::debug;

use crate::{
  Error, Result,
  shard::{Rows, Stmt},
};

// ─── Hrana wire types ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireValue {
  Null,
  Integer { value: String },
  Float { value: f64 },
  Text { value: String },
  Blob { base64: String },
}

impl WireValue {
  fn into_value(self) -> Result<Value> {
    Ok(match self {
      Self::Null => Value::Null,
      Self::Integer { value } => Value::Integer(
        value
          .parse()
          .map_err(|_| Error::Remote(format!("bad integer value {value:?}")))?,
      ),
      Self::Float { value } => Value::Real(value),
      Self::Text { value } => Value::Text(value),
      Self::Blob { base64 } => Value::Blob(
        B64
          .decode(base64.trim_end_matches('='))
          .map_err(|e| Error::Remote(format!("bad blob encoding: {e}")))?,
      ),
    })
  }
}

fn encode_value(value: &Value) -> Json {
  match value {
    Value::Null => json!({ "type": "null" }),
    Value::Integer(i) => json!({ "type": "integer", "value": i.to_string() }),
    Value::Real(f) => json!({ "type": "float", "value": f }),
    Value::Text(s) => json!({ "type": "text", "value": s }),
    Value::Blob(b) => json!({ "type": "blob", "base64": B64.encode(b) }),
  }
}

fn encode_stmt(stmt: &Stmt, want_rows: bool) -> Json {
  json!({
    "sql": stmt.sql,
    "args": stmt.params.iter().map(encode_value).collect::<Vec<_>>(),
    "want_rows": want_rows,
  })
}

#[derive(Deserialize)]
struct PipelineResponse {
  results: Vec<StreamResult>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResult {
  Ok { response: StreamResponse },
  Error { error: WireError },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
  Execute { result: StmtResult },
  Batch { result: BatchResult },
  Sequence,
  Close,
}

#[derive(Deserialize)]
struct StmtResult {
  #[serde(default)]
  rows: Vec<Vec<WireValue>>,
}

#[derive(Deserialize)]
struct BatchResult {
  #[serde(default)]
  step_errors: Vec<Option<WireError>>,
}

#[derive(Deserialize)]
struct WireError {
  message: String,
}

// ─── Remote shard ────────────────────────────────────────────────────────────

/// A shard hosted by a remote libsql server.
///
/// Cheap to clone: `reqwest::Client` is reference-counted.
#[derive(Clone)]
pub struct RemoteShard {
  client:     reqwest::Client,
  endpoint:   String,
  auth_token: String,
}

impl RemoteShard {
  /// `url` may use the `libsql://` scheme, which is served over HTTPS.
  pub fn new(client: reqwest::Client, url: &str, auth_token: impl Into<String>) -> Self {
    let base = match url.strip_prefix("libsql://") {
      Some(host) => format!("https://{host}"),
      None => url.to_owned(),
    };
    Self {
      client,
      endpoint: format!("{}/v2/pipeline", base.trim_end_matches('/')),
      auth_token: auth_token.into(),
    }
  }

  pub fn endpoint(&self) -> &str { &self.endpoint }

  /// Send one request on a fresh stream and return its response.
  async fn send(&self, request: Json) -> Result<StreamResponse> {
    let body = json!({ "requests": [request, { "type": "close" }] });
    let response: PipelineResponse = self
      .client
      .post(&self.endpoint)
      .bearer_auth(&self.auth_token)
      .json(&body)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    match response.results.into_iter().next() {
      Some(StreamResult::Ok { response }) => Ok(response),
      Some(StreamResult::Error { error }) => Err(Error::Remote(error.message)),
      None => Err(Error::Remote("empty pipeline response".into())),
    }
  }

  pub async fn execute_batch(&self, sql: &str) -> Result<()> {
    self.send(json!({ "type": "sequence", "sql": sql })).await?;
    Ok(())
  }

  /// Run `stmts` as one server-side batch wrapped in `BEGIN`/`COMMIT`. Each
  /// step only runs if the previous one succeeded; a failure rolls back.
  pub async fn transaction(&self, stmts: &[Stmt]) -> Result<()> {
    let mut steps = vec![json!({ "stmt": encode_stmt(&Stmt::new("BEGIN"), false) })];
    for (i, stmt) in stmts.iter().enumerate() {
      steps.push(json!({
        "condition": { "type": "ok", "step": i },
        "stmt": encode_stmt(stmt, false),
      }));
    }
    let commit_step = steps.len();
    steps.push(json!({
      "condition": { "type": "ok", "step": commit_step - 1 },
      "stmt": encode_stmt(&Stmt::new("COMMIT"), false),
    }));
    steps.push(json!({
      "condition": { "type": "not", "cond": { "type": "ok", "step": commit_step } },
      "stmt": encode_stmt(&Stmt::new("ROLLBACK"), false),
    }));

    debug!(statements = stmts.len(), endpoint = %self.endpoint, "remote transaction");
    match self.send(json!({ "type": "batch", "batch": { "steps": steps } })).await? {
      StreamResponse::Batch { result } => {
        match result.step_errors.into_iter().flatten().next() {
          Some(error) => Err(Error::Remote(error.message)),
          None => Ok(()),
        }
      }
      _ => Err(Error::Remote("unexpected response to batch".into())),
    }
  }

  pub async fn query(&self, stmt: &Stmt) -> Result<Rows> {
    match self
      .send(json!({ "type": "execute", "stmt": encode_stmt(stmt, true) }))
      .await?
    {
      StreamResponse::Execute { result } => result
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(WireValue::into_value).collect::<Result<Vec<_>>>())
        .collect(),
      _ => Err(Error::Remote("unexpected response to execute".into())),
    }
  }
}

// ─── Management API ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DatabaseEnvelope {
  database: DatabaseInfo,
}

#[derive(Deserialize)]
struct DatabaseInfo {
  #[serde(rename = "Hostname")]
  hostname: String,
}

#[derive(Deserialize)]
struct TokenResponse {
  jwt: String,
}

/// Client for the hosting platform's database management API.
#[derive(Clone)]
pub struct PlatformClient {
  client:       reqwest::Client,
  base_url:     String,
  organization: String,
  api_token:    String,
}

impl PlatformClient {
  pub fn new(
    client: reqwest::Client,
    base_url: &str,
    organization: impl Into<String>,
    api_token: impl Into<String>,
  ) -> Self {
    Self {
      client,
      base_url: base_url.trim_end_matches('/').to_owned(),
      organization: organization.into(),
      api_token: api_token.into(),
    }
  }

  pub fn http(&self) -> &reqwest::Client { &self.client }

  fn databases_url(&self) -> String {
    format!("{}/v1/organizations/{}/databases", self.base_url, self.organization)
  }

  /// Create a database and return its hostname.
  pub async fn create_database(&self, name: &str, group: &str) -> Result<String> {
    let envelope: DatabaseEnvelope = self
      .client
      .post(self.databases_url())
      .bearer_auth(&self.api_token)
      .json(&json!({ "name": name, "group": group }))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(envelope.database.hostname)
  }

  /// Hostname of an existing database, or `None` if the platform has no
  /// record of it.
  pub async fn get_database(&self, name: &str) -> Result<Option<String>> {
    let response = self
      .client
      .get(format!("{}/{name}", self.databases_url()))
      .bearer_auth(&self.api_token)
      .send()
      .await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let envelope: DatabaseEnvelope = response.error_for_status()?.json().await?;
    Ok(Some(envelope.database.hostname))
  }

  /// Mint a full-access auth token for a database.
  pub async fn create_token(&self, name: &str) -> Result<String> {
    let token: TokenResponse = self
      .client
      .post(format!("{}/{name}/auth/tokens", self.databases_url()))
      .bearer_auth(&self.api_token)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(token.jwt)
  }

  /// Destroy a database. Deleting one that does not exist is not an error.
  pub async fn delete_database(&self, name: &str) -> Result<()> {
    let response = self
      .client
      .delete(format!("{}/{name}", self.databases_url()))
      .bearer_auth(&self.api_token)
      .send()
      .await?;
    if response.status() != reqwest::StatusCode::NOT_FOUND {
      response.error_for_status()?;
    }
    Ok(())
  }
}
