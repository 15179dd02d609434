//! Background readiness probe for the external tools.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::acquisition::media_tools::MediaTools;
use crate::state::SharedState;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Re-probes until shutdown and keeps `tools_ready` in step with the result.
pub fn run_tools_probe(state: Arc<SharedState>, tools: Arc<dyn MediaTools>) {
    let mut reported: Option<bool> = None;
    while !state.is_shutting_down() {
        let ready = tools.probe();
        if reported != Some(ready) {
            if ready {
                info!("ToolsProbe: download and normalization tools are ready");
            } else {
                warn!("ToolsProbe: tools unavailable; acquisition paused until they respond");
            }
            state.set_tools_ready(ready);
            reported = Some(ready);
        }

        let interval = Duration::from_secs(state.config().tools.probe_interval_secs);
        let wake_at = Instant::now() + interval;
        while Instant::now() < wake_at && !state.is_shutting_down() {
            std::thread::sleep(SHUTDOWN_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::run_tools_probe;
    use crate::acquisition::media_tools::{LoudnessMeasurement, MediaTools};
    use crate::config::{Config, NormalizationConfig};
    use crate::state::SharedState;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct SwitchTools(AtomicBool);

    impl MediaTools for SwitchTools {
        fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn download(&self, _id: &str, _prefix: &Path, _max_height: u32) -> Result<PathBuf, String> {
            Err("unused".to_string())
        }

        fn normalize(
            &self,
            _input: &Path,
            _output: &Path,
            _targets: &NormalizationConfig,
        ) -> Result<LoudnessMeasurement, String> {
            Err("unused".to_string())
        }
    }

    #[test]
    fn test_probe_sets_ready_flag_and_stops_on_shutdown() {
        let mut config = Config::default();
        config.tools.probe_interval_secs = 1;
        let state = Arc::new(SharedState::new(config));
        let tools = Arc::new(SwitchTools(AtomicBool::new(true)));

        let probe_state = Arc::clone(&state);
        let probe_tools: Arc<dyn MediaTools> = tools;
        let handle = std::thread::spawn(move || run_tools_probe(probe_state, probe_tools));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !state.tools_ready() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(state.tools_ready());

        state.begin_shutdown();
        handle.join().expect("probe thread should stop");
    }
}
