//! Provision a cloud VM and deploy the stack onto it

use crate::deploy::{
    install_runtime_step, start_stack_step, upload_stack_step, wait_services_step,
    wait_ssh_step, DeploySession,
};
use crate::pipeline::{Pipeline, StepDefinition};

pub fn steps() -> Pipeline<DeploySession> {
    Pipeline::new("cloud-vm")
        .step(StepDefinition::new(
            "ensure-resource-group",
            "Ensuring resource group",
            |s: &mut DeploySession, em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    let group = provisioner.ensure_resource_group(&mut s.ctx).await?;
                    em.info(format!("Resource group {} in {}", group.name, group.location))
                        .await;
                    Ok(())
                })
            },
        ))
        .step(StepDefinition::new(
            "ensure-network",
            "Ensuring virtual network",
            |s: &mut DeploySession, _em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    provisioner.ensure_network(&mut s.ctx).await.map(|_| ())
                })
            },
        ))
        .step(StepDefinition::new(
            "ensure-security-group",
            "Ensuring security group",
            |s: &mut DeploySession, _em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    provisioner
                        .ensure_security_group(&mut s.ctx)
                        .await
                        .map(|_| ())
                })
            },
        ))
        .step(StepDefinition::new(
            "ensure-public-address",
            "Ensuring public address",
            |s: &mut DeploySession, _em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    let scope = s.scope.clone();
                    provisioner
                        .ensure_public_address(&mut s.ctx, &scope)
                        .await
                        .map(|_| ())
                })
            },
        ))
        .step(StepDefinition::new(
            "ensure-interface",
            "Ensuring network interface",
            |s: &mut DeploySession, _em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    provisioner.ensure_interface(&mut s.ctx).await.map(|_| ())
                })
            },
        ))
        .step(StepDefinition::new(
            "ensure-instance",
            "Ensuring compute instance",
            |s: &mut DeploySession, _em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    provisioner.ensure_instance(&mut s.ctx).await.map(|_| ())
                })
            },
        ))
        .step(StepDefinition::new(
            "wait-instance",
            "Waiting for instance to run",
            |s: &mut DeploySession, em| {
                Box::pin(async move {
                    let provisioner = s.provisioner()?.clone();
                    provisioner
                        .wait_until_running(&s.ctx, &s.readiness.instance())
                        .await?;
                    provisioner.refresh_public_address(&mut s.ctx).await?;
                    let address = s.ctx.public_address()?;
                    em.info(format!("Instance reachable at {}", address)).await;
                    Ok(())
                })
            },
        ))
        .step(wait_ssh_step())
        .step(install_runtime_step())
        .step(upload_stack_step())
        .step(start_stack_step())
        .step(wait_services_step())
}
