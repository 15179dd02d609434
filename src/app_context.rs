use std::{path::PathBuf, sync::Arc};

use tokio::sync::broadcast;

use crate::{protocol::Message, state::SharedState};

#[derive(Clone)]
pub(crate) struct PersistencePaths {
    pub(crate) config_file: PathBuf,
}

#[derive(Clone)]
pub(crate) struct AppSharedState {
    pub(crate) bus_sender: broadcast::Sender<Message>,
    pub(crate) store: Arc<SharedState>,
}
