//! Backend selection

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::provision::{ApiBackend, CliBackend, ControlPlane};
use crate::remote::RemoteExecutor;
use crate::storage::settings::CloudSettings;

/// Use `primary` when it initialized, otherwise downgrade to `fallback`.
///
/// `fallback` is only awaited when `primary` failed. Both failing is fatal.
pub async fn select_backend<F>(
    primary: Result<Arc<dyn ControlPlane>, OrchestratorError>,
    fallback: F,
) -> Result<Arc<dyn ControlPlane>, OrchestratorError>
where
    F: Future<Output = Result<Arc<dyn ControlPlane>, OrchestratorError>>,
{
    let primary_error = match primary {
        Ok(backend) => {
            info!("Using {} control-plane backend", backend.backend_name());
            return Ok(backend);
        }
        Err(e) => e,
    };

    warn!("Primary control-plane backend unavailable: {}", primary_error);
    match fallback.await {
        Ok(backend) => {
            warn!("Falling back to {} control-plane backend", backend.backend_name());
            Ok(backend)
        }
        Err(fallback_error) => Err(OrchestratorError::BackendUnavailable(format!(
            "primary: {}; fallback: {}",
            primary_error, fallback_error
        ))),
    }
}

/// Pick the API backend when credentials are present, else the CLI
pub async fn connect(
    settings: &CloudSettings,
    executor: Arc<dyn RemoteExecutor>,
) -> Result<Arc<dyn ControlPlane>, OrchestratorError> {
    let primary = ApiBackend::from_settings(settings).map(|b| Arc::new(b) as Arc<dyn ControlPlane>);
    select_backend(primary, async move {
        let cli = CliBackend::new(executor, settings);
        cli.verify().await?;
        Ok(Arc::new(cli) as Arc<dyn ControlPlane>)
    })
    .await
}
