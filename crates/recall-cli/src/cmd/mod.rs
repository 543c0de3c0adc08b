pub mod list;
pub mod purge;
pub mod replay;
pub mod show;
pub mod stats;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use recall_core::clock::Clock;
use recall_core::config::{self, RecallConfig};
use recall_core::engine::{EngineOptions, RecallEngine};
use recall_core::gateway::sqlite::SqliteBlobStore;
use recall_core::gateway::{Envelope, Gateway, GatewayRequest, GatewayResponse};
use recall_core::host::MemoryHost;
use recall_core::store::{HydrationReport, ShadowStore};
use recall_core::sync::StorageHandle;
use tracing::debug;

use crate::output::OutputMode;

pub type CliEngine = RecallEngine<MemoryHost, Box<dyn Clock>>;

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: RecallConfig,
    pub store_path: PathBuf,
    pub output: OutputMode,
}

impl Context {
    /// Resolve config and store path from the global flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit or default config file fails to load.
    pub fn resolve(
        config_path: Option<&Path>,
        store_override: Option<&Path>,
        output: OutputMode,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                config::load_config(path)?
            }
            None => match config::default_config_path() {
                Some(path) => config::load_config(&path)?,
                None => RecallConfig::default(),
            },
        };

        let store_path = store_override
            .map_or_else(|| config.storage.resolved_path(), Path::to_path_buf);

        Ok(Self {
            config,
            store_path,
            output,
        })
    }

    fn open_gateway(&self) -> Result<Gateway<SqliteBlobStore>> {
        let store = SqliteBlobStore::open(&self.store_path, self.config.storage.lock_timeout())?;
        Ok(Gateway::new(self.config.storage.allowed_caller.clone(), store))
    }

    /// Open the store and start an engine on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the host is not
    /// available.
    pub fn start_engine(&self, host: MemoryHost, clock: Box<dyn Clock>) -> Result<CliEngine> {
        let gateway = self.open_gateway()?;
        let storage = StorageHandle::spawn(gateway, self.config.storage.sync_options())
            .context("spawn storage worker")?;
        let engine =
            RecallEngine::start(host, clock, storage, EngineOptions::from(&self.config))?;
        Ok(engine)
    }

    /// Read the store once, without starting an engine or writing anything.
    /// The database is opened read-only and unlocked; a missing store reads
    /// as empty and is not created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the read is
    /// refused.
    pub fn read_store(&self) -> Result<(ShadowStore, HydrationReport)> {
        let Some(store) = SqliteBlobStore::open_read_only(&self.store_path)? else {
            debug!(store = %self.store_path.display(), "no store yet, reading as empty");
            return Ok(ShadowStore::hydrate(None, None, None));
        };
        let mut gateway = Gateway::new(self.config.storage.allowed_caller.clone(), store);
        let envelope = Envelope::new(self.config.storage.caller_id.clone(), GatewayRequest::GetAll);
        let state = match gateway
            .handle(&envelope)
            .map_err(|e| anyhow::anyhow!("{}: {e}", e.code()))?
        {
            GatewayResponse::State(state) => state,
            GatewayResponse::Written => bail!("gateway answered a read with a write ack"),
        };
        Ok(ShadowStore::hydrate(
            state.active.as_deref(),
            state.retained.as_deref(),
            state.last_purge_time,
        ))
    }
}

/// Epoch millis as a UTC timestamp, or the raw number if out of range.
pub fn format_millis(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_flag_overrides_config_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[storage]\npath = \"/nowhere/store.sqlite3\"\n")
            .expect("write config");
        let store = dir.path().join("override.sqlite3");

        let ctx = Context::resolve(Some(&config_path), Some(&store), OutputMode::Human)
            .expect("resolve");
        assert_eq!(ctx.store_path, store);

        let ctx = Context::resolve(Some(&config_path), None, OutputMode::Human).expect("resolve");
        assert_eq!(ctx.store_path, PathBuf::from("/nowhere/store.sqlite3"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = Context::resolve(Some(&dir.path().join("nope.toml")), None, OutputMode::Human)
            .expect_err("must fail");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn millis_render_as_utc() {
        assert_eq!(format_millis(0), "1970-01-01 00:00:00 UTC");
    }
}
