//! Agent transport abstraction
//!
//! The executor reaches an agent at (host, port) with a decrypted
//! credential and a command, and gets back either a structured result or a
//! classified failure. No particular wire protocol is mandated — anything
//! satisfying "send command, receive bounded-time structured result" fits
//! behind [`AgentTransport`].
//!
//! The default implementation speaks the agent's HTTP surface: the command
//! is POSTed to `/execute` with the credential in a secret header, and the
//! agent answers with the captured exit code and output streams. The
//! per-target deadline is enforced by the executor, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Where an agent lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub host: String,
    pub port: u16,
    pub ssh_user: String,
}

/// Structured result of a command executed on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Classified transport failures.
///
/// These are recorded per-target during fan-out — an unreachable agent is a
/// normal `failed` TaskLog, not a task-level exception.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, broken pipe, ...
    #[error("agent unreachable: {0}")]
    Unreachable(String),

    /// The agent answered but refused the command (auth, HTTP error).
    #[error("agent rejected command: {0}")]
    Rejected(String),

    /// The agent answered with something we could not parse.
    #[error("malformed agent response: {0}")]
    BadResponse(String),
}

/// Transport capability consumed by the task executor.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Execute `command` on the agent behind `endpoint`.
    ///
    /// `credential` is the decrypted SSH secret for this connection; it must
    /// never be logged by implementations.
    async fn execute(
        &self,
        endpoint: &AgentEndpoint,
        credential: &str,
        command: &str,
    ) -> Result<CommandOutput, TransportError>;
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
    ssh_user: &'a str,
}

/// HTTP transport to the agent's `/execute` endpoint.
///
/// The client is built once and reused across requests. Its own timeout is
/// a generous upper bound; the real per-target deadline lives in the
/// executor so a timeout is classified consistently.
pub struct HttpAgentTransport {
    client: reqwest::Client,
}

impl HttpAgentTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpAgentTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn execute(
        &self,
        endpoint: &AgentEndpoint,
        credential: &str,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        let url = format!("http://{}:{}/execute", endpoint.host, endpoint.port);

        trace!("dispatching command to {url}");

        let response = self
            .client
            .post(&url)
            .header("X-FLEET-SECRET", credential)
            .json(&ExecuteRequest {
                command,
                ssh_user: &endpoint.ssh_user,
            })
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::BadResponse(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| TransportError::BadResponse(e.to_string()))
    }
}
