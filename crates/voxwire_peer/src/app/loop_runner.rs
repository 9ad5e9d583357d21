use std::process::ExitCode;

use tracing::error;
use voxwire::run_peer;

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    if let Err(err) = run_peer(app.config, app.bridge, app.metadata) {
        error!(error = %err, "peer_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
