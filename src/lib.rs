//! Query routing over MCP tool servers and agents.
//!
//! A planner model picks the servers (or agents) a query needs, hybrid
//! keyword + vector retrieval narrows their tools, and an execution agent
//! answers with only those tools in context.

pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Name of the log file inside the data directory.
pub const LOG_FILE_NAME: &str = "orchestrator.log";

/// Platform data directory for the orchestrator.
///
/// - macOS: `~/Library/Application Support/mcp-orchestrator/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-orchestrator\`
/// - Linux: `$XDG_DATA_HOME/mcp-orchestrator/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-orchestrator/` only if none of the above resolve.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-orchestrator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-orchestrator")
}

/// Initialize the tracing subscriber, writing to `<log_dir>/orchestrator.log`.
///
/// Existing logs are rotated first (keeping the last 3). Each line is
/// flushed as it is written. `RUST_LOG` overrides the default filter.
pub fn init_tracing(log_dir: &Path, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_orchestrator=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== mcp-orchestrator starting ==="
    );
    Ok(())
}

/// Rotate `orchestrator.log` → `.1` → `.2` → … → `.{keep}`.
///
/// The oldest file beyond `keep` is deleted. Gaps in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
