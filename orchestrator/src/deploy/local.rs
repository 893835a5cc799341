//! Deploy the stack on this machine, optionally following a managed deployment

use std::sync::atomic::{AtomicUsize, Ordering};

use control_plane_client::DeploymentDetail;

use crate::deploy::{start_stack_step, upload_stack_step, wait_services_step, DeploySession};
use crate::events::{Emitter, Severity};
use crate::http::deployments::deployment_probe;
use crate::pipeline::{Pipeline, StepDefinition};
use crate::readiness::{wait_until_ready, Probe};

pub fn steps() -> Pipeline<DeploySession> {
    Pipeline::new("local")
        .step(upload_stack_step())
        .step(start_stack_step())
        .step(wait_services_step())
        .step(StepDefinition::new(
            "wait-deployment",
            "Waiting for managed deployment",
            |s: &mut DeploySession, em| {
                Box::pin(async move {
                    let Some(managed) = &s.managed else {
                        em.debug("No managed application configured").await;
                        return Ok(());
                    };
                    let deployments = managed
                        .client
                        .list_deployments(&managed.application_id)
                        .await?;
                    let Some(latest) = deployments.first() else {
                        em.warning(format!(
                            "Application {} has no deployments",
                            managed.application_id
                        ))
                        .await;
                        return Ok(());
                    };
                    em.info(format!("Following deployment {}", latest.id)).await;

                    let forwarded = AtomicUsize::new(0);
                    let (client, id) = (&managed.client, latest.id.as_str());
                    wait_until_ready(&s.readiness.deployment(), || {
                        let forwarded = &forwarded;
                        async move {
                            match client.get_deployment(id).await {
                                Ok(detail) => {
                                    forward_logs(&detail, forwarded, em).await;
                                    deployment_probe(&detail)
                                }
                                Err(e) if e.is_transient() => Probe::NotReady(e.to_string()),
                                Err(e) => Probe::Failed(e.to_string()),
                            }
                        }
                    })
                    .await
                    .into_result(&format!("deployment {}", id))
                })
            },
        ))
}

/// Emit the log lines not forwarded yet
async fn forward_logs(detail: &DeploymentDetail, forwarded: &AtomicUsize, emitter: &Emitter) {
    let already = forwarded.load(Ordering::Relaxed);
    for line in detail.logs.iter().skip(already) {
        let level = if line.stderr {
            Severity::Warning
        } else {
            Severity::Info
        };
        emitter.log(level, line.output.trim_end()).await;
    }
    forwarded.store(detail.logs.len().max(already), Ordering::Relaxed);
}
