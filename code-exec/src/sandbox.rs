//! Single-use sandbox containers.
//!
//! [`ContainerRuntime`] is the seam to the container engine; [`Sandbox`] is
//! the handle one run owns from creation until removal.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::{types::ResourceLimits, Result};

/// Environment variable carrying the base64-encoded source into the container.
pub const SOURCE_ENV: &str = "SOURCE_CODE";

const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// Everything the engine needs to create one sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub working_dir: String,
    pub limits: ResourceLimits,
}

impl ContainerSpec {
    /// Decodes the source code handed to the container, if any.
    pub fn source_code(&self) -> Option<String> {
        let prefix = format!("{}=", SOURCE_ENV);
        let encoded = self.env.iter().find_map(|var| var.strip_prefix(&prefix))?;
        let bytes = general_purpose::STANDARD.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

/// Container engine operations used by a sandbox run.
///
/// `wait` resolves with the exit status once the container stops on its own;
/// callers race it against their deadline and drop it if they lose.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure `image` is present locally, pulling it if needed
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create a container and return its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn wait(&self, id: &str) -> Result<i64>;

    /// Combined stdout/stderr, capped at `limit` bytes
    async fn logs(&self, id: &str, limit: usize) -> Result<String>;

    async fn stop(&self, id: &str) -> Result<()>;

    /// Remove the container, killing it first if it is still running
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Handle to one created container.
///
/// The container is removed by [`Sandbox::remove`]. A handle dropped before
/// that (task aborted, panic) schedules the removal on the current runtime.
pub struct Sandbox {
    id: String,
    runtime: Arc<dyn ContainerRuntime>,
    removed: bool,
}

impl Sandbox {
    /// Create a new sandbox container
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, spec: &ContainerSpec) -> Result<Self> {
        let id = runtime.create(spec).await?;
        debug!(sandbox = %id, image = %spec.image, "Created sandbox");
        Ok(Self {
            id,
            runtime,
            removed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn start(&self) -> Result<()> {
        self.runtime.start(&self.id).await
    }

    pub async fn wait(&self) -> Result<i64> {
        self.runtime.wait(&self.id).await
    }

    pub async fn logs(&self, limit: usize) -> Result<String> {
        self.runtime.logs(&self.id, limit).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.runtime.stop(&self.id).await
    }

    /// Remove the container. Consumes the handle so removal happens once.
    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        let result = self.runtime.remove(&self.id).await;
        match &result {
            Ok(()) => debug!(sandbox = %self.id, "Removed sandbox"),
            Err(e) => error!(sandbox = %self.id, "Failed to remove sandbox: {}", e),
        }
        result
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        let id = std::mem::take(&mut self.id);
        let runtime = self.runtime.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(sandbox = %id, "Sandbox dropped before removal, removing in background");
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        error!(sandbox = %id, "Failed to remove sandbox: {}", e);
                    }
                });
            }
            Err(_) => error!(sandbox = %id, "Sandbox leaked: no runtime to remove it on"),
        }
    }
}

/// Appends `chunk` to `buf` without letting it grow past `limit` bytes.
/// Returns `false` once the limit has been reached.
pub(crate) fn push_limited(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.extend_from_slice(chunk);
        return true;
    }
    buf.extend_from_slice(&chunk[..room]);
    false
}

/// Lossy UTF-8 conversion, with a marker when the output was cut.
pub(crate) fn finish_output(buf: Vec<u8>, truncated: bool) -> String {
    let mut output = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        output.push_str(TRUNCATION_MARKER);
    }
    output
}

pub(crate) fn encode_source(code: &str) -> String {
    format!("{}={}", SOURCE_ENV, general_purpose::STANDARD.encode(code))
}
