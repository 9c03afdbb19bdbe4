use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::collectors::collector::Collector;
use crate::config::CollectionOptions;
use crate::constants::{ERROR_STILL_RUNNING, RPC_SERVICE, SERVER_OUTPUT_DIR, SERVER_OUTPUT_FILENAME};
use crate::error::{DiagError, Result};
use crate::server::dispatcher::{Dispatcher, RpcError, RpcMethod, SERVER_ERROR};

/// Location of a finished archive as reported to RPC clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub basename: String,
    pub fullname: String,
}

impl ArchiveInfo {
    pub fn from_path(path: &Path) -> Self {
        Self {
            basename: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            fullname: path.to_string_lossy().to_string(),
        }
    }
}

/// Receives the outcome of every RPC-triggered collection, `None` on failure.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn publish(&self, artifact: Option<&ArchiveInfo>);
}

/// Runs collections on request, one at a time.
pub struct DiagService {
    collector: Collector,
    options: CollectionOptions,
    output_directory: String,
    output_filename: String,
    sink: Arc<dyn ArtifactSink>,
    in_flight: Mutex<()>,
}

impl DiagService {
    pub fn new(collector: Collector, options: CollectionOptions, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            collector,
            options,
            output_directory: SERVER_OUTPUT_DIR.to_string(),
            output_filename: SERVER_OUTPUT_FILENAME.to_string(),
            sink,
            in_flight: Mutex::new(()),
        }
    }

    /// Override where archives are written; `directory` is a prefix ending in `/`.
    pub fn with_output(mut self, directory: impl Into<String>, filename: impl Into<String>) -> Self {
        self.output_directory = directory.into();
        self.output_filename = filename.into();
        self
    }

    /// Run one collection.
    ///
    /// Archives left by earlier runs are removed first. The outcome goes to
    /// the artifact sink and is returned; a failed collection yields
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `DiagError::Busy` when another collection is still in flight.
    pub async fn diag(&self) -> Result<Option<ArchiveInfo>> {
        let _running = self.in_flight.try_lock().map_err(|_| {
            warn!("Diag collecting task is already running");
            DiagError::Busy
        })?;

        remove_previous_archives(Path::new(&self.output_directory));

        info!("Start data collecting");
        let artifact = match self
            .collector
            .collect(&self.options, &self.output_directory, &self.output_filename)
            .await
        {
            Ok(path) => {
                info!("Data was collected successfully");
                Some(ArchiveInfo::from_path(&path))
            }
            Err(e) => {
                error!("Data collecting failed: {}", e);
                None
            }
        };

        self.sink.publish(artifact.as_ref()).await;
        Ok(artifact)
    }
}

/// Delete `*.zip` files directly inside `directory`. Returns how many went.
pub fn remove_previous_archives(directory: &Path) -> usize {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Nothing to clean in {}: {}", directory.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_archive = path.extension().map_or(false, |ext| ext == "zip")
            && entry.file_type().map_or(false, |t| t.is_file());
        if !is_archive {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Error deleting {}: {}", path.display(), e),
        }
    }
    removed
}

/// `diag`: collect and return `{basename, fullname}`, or null on failure.
pub struct DiagMethod {
    service: Arc<DiagService>,
}

impl DiagMethod {
    pub fn new(service: Arc<DiagService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RpcMethod for DiagMethod {
    async fn call(&self, _params: Value) -> std::result::Result<Value, RpcError> {
        match self.service.diag().await {
            Ok(artifact) => serde_json::to_value(artifact)
                .map_err(|e| RpcError::new(SERVER_ERROR, e.to_string())),
            Err(DiagError::Busy) => Err(RpcError::new(SERVER_ERROR, ERROR_STILL_RUNNING)),
            Err(e) => Err(RpcError::new(SERVER_ERROR, e.to_string())),
        }
    }
}

/// `status`: liveness probe, always `"1"`.
pub struct StatusMethod;

#[async_trait]
impl RpcMethod for StatusMethod {
    async fn call(&self, _params: Value) -> std::result::Result<Value, RpcError> {
        Ok(Value::String("1".to_string()))
    }
}

/// Register `diag` and `status` under the diag service.
pub fn build_dispatcher(service: Arc<DiagService>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_method(RPC_SERVICE, "diag", Arc::new(DiagMethod::new(service)));
    dispatcher.add_method(RPC_SERVICE, "status", Arc::new(StatusMethod));
    dispatcher
}
