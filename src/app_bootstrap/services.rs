use std::{
    any::Any,
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::{
    acquisition::{
        media_tools::{MediaTools, ProcessMediaTools},
        metadata_retry::run_metadata_retry_pass,
        pipeline_worker::AcquisitionPipeline,
        retry_index::{default_index_path, RetryIndex},
        tools_probe::run_tools_probe,
    },
    app_context::PersistencePaths,
    catalog::{catalog_source::YtDlpCatalog, catalog_sync::CatalogSyncWorker},
    config::ClassifierConfig,
    config_persistence::run_config_writer,
    integration::classifier_keyring::load_classifier_credential,
    metadata::classifier::{Classifier, HttpClassifier},
    protocol::{ControlMessage, Message},
    state::SharedState,
};

pub struct BackgroundServicesConfig {
    pub bus_sender: broadcast::Sender<Message>,
    pub state: Arc<SharedState>,
    pub(crate) persistence_paths: PersistencePaths,
}

/// Handles of the worker threads, joined by [`BackgroundServices::shutdown`].
pub struct BackgroundServices {
    handles: Vec<(String, JoinHandle<()>)>,
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn spawn_service<F>(name: &str, body: F) -> Result<(String, JoinHandle<()>), String>
where
    F: FnOnce() + Send + 'static,
{
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
            if let Err(payload) = run_result {
                error!(
                    "{} thread terminated due to panic: {}",
                    thread_name,
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })
        .map_err(|err| format!("failed to spawn {name} thread: {err}"))?;
    Ok((name.to_string(), handle))
}

/// Remote classifier when both an endpoint and a credential are configured.
fn build_classifier(config: &ClassifierConfig) -> Option<Arc<dyn Classifier>> {
    if config.endpoint.is_empty() {
        info!("Classifier: no endpoint configured, using title patterns only");
        return None;
    }
    match load_classifier_credential() {
        Ok(Some(credential)) => {
            info!("Classifier: using {}", config.endpoint);
            Some(Arc::new(HttpClassifier::new(&config.endpoint, &credential)))
        }
        Ok(None) => {
            info!("Classifier: no credential stored, using title patterns only");
            None
        }
        Err(err) => {
            warn!("Classifier: {}; using title patterns only", err);
            None
        }
    }
}

pub fn spawn_background_services(
    config: BackgroundServicesConfig,
) -> Result<BackgroundServices, String> {
    let BackgroundServicesConfig {
        bus_sender,
        state,
        persistence_paths,
    } = config;
    let app_config = state.config();
    let tools: Arc<dyn MediaTools> = Arc::new(ProcessMediaTools::new(&app_config.tools));
    let classifier = build_classifier(&app_config.classifier);
    let mut handles = Vec::new();

    let writer_state = Arc::clone(&state);
    let writer_bus_receiver = bus_sender.subscribe();
    handles.push(spawn_service("config-writer", move || {
        run_config_writer(
            &writer_state,
            &persistence_paths.config_file,
            writer_bus_receiver,
        );
    })?);

    let probe_state = Arc::clone(&state);
    let probe_tools = Arc::clone(&tools);
    handles.push(spawn_service("tools-probe", move || {
        run_tools_probe(probe_state, probe_tools);
    })?);

    let catalog_state = Arc::clone(&state);
    let catalog_bus_receiver = bus_sender.subscribe();
    let catalog_bus_sender = bus_sender.clone();
    let ytdlp_path = app_config.tools.ytdlp_path.clone();
    handles.push(spawn_service("catalog-sync", move || {
        let mut worker = CatalogSyncWorker::new(
            catalog_state,
            Box::new(YtDlpCatalog::new(&ytdlp_path)),
            catalog_bus_receiver,
            catalog_bus_sender,
        );
        worker.run();
    })?);

    let pipeline_state = Arc::clone(&state);
    let pipeline_classifier = classifier.clone();
    let pipeline_bus_sender = bus_sender.clone();
    handles.push(spawn_service("pipeline", move || {
        let pipeline = AcquisitionPipeline::new(
            pipeline_state,
            tools,
            pipeline_classifier,
            pipeline_bus_sender,
        );
        pipeline.run();
    })?);

    if let Some(retry_classifier) = classifier {
        let retry_state = Arc::clone(&state);
        let retry_bus_sender = bus_sender.clone();
        let max_retries = app_config.classifier.max_pending_retries;
        handles.push(spawn_service("metadata-retry", move || {
            let index_path = default_index_path();
            let index = match RetryIndex::open(&index_path) {
                Ok(index) => index,
                Err(err) => {
                    warn!(
                        "MetadataRetry: cannot open {}: {}; skipping this start",
                        index_path.display(),
                        err
                    );
                    return;
                }
            };
            let summary = run_metadata_retry_pass(
                &retry_state,
                retry_classifier.as_ref(),
                &index,
                max_retries,
                Some(&retry_bus_sender),
            );
            info!(
                "MetadataRetry: resolved {}, still pending {}, exhausted {}, deferred {}",
                summary.resolved.len(),
                summary.still_pending.len(),
                summary.exhausted.len(),
                summary.deferred.len()
            );
        })?);
    } else {
        debug!("MetadataRetry: no classifier, pending entries stay as they are");
    }

    Ok(BackgroundServices { handles })
}

impl BackgroundServices {
    /// Raises the shutdown flag, wakes bus listeners and joins every worker.
    pub fn shutdown(self, state: &SharedState, bus_sender: &broadcast::Sender<Message>) {
        state.begin_shutdown();
        let _ = bus_sender.send(Message::Control(ControlMessage::Shutdown));
        for (name, handle) in self.handles {
            debug!("Shutdown: waiting for {}", name);
            if handle.join().is_err() {
                warn!("Shutdown: {} thread panicked", name);
            }
        }
    }
}
