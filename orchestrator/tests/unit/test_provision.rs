//! Resource provisioner tests

use std::sync::Arc;
use std::time::Duration;

use control_plane_client::{PowerState, ResourceGroup};

use stackpilot::context::DeploymentContext;
use stackpilot::errors::OrchestratorError;
use stackpilot::provision::cli::CliBackend;
use stackpilot::provision::{select_backend, ControlPlane, Provisioner};
use stackpilot::readiness::ReadinessOptions;
use stackpilot::storage::settings::CloudSettings;

use crate::support::{command_failed, FakeControlPlane, FakeExecutor};

fn context() -> DeploymentContext {
    let mut ctx = DeploymentContext::new("shop", "westeurope");
    ctx.ssh_public_key = Some("ssh-ed25519 AAAA test".to_string());
    ctx
}

#[tokio::test]
async fn test_ensure_resource_group_is_idempotent() {
    let backend = Arc::new(FakeControlPlane::default());
    let provisioner = Provisioner::new(backend.clone());
    let mut ctx = context();

    let first = provisioner.ensure_resource_group(&mut ctx).await.unwrap();
    let second = provisioner.ensure_resource_group(&mut ctx).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(backend.create_count("group"), 1);
}

#[tokio::test]
async fn test_existing_group_location_wins() {
    let backend = Arc::new(FakeControlPlane::default());
    backend.groups.lock().unwrap().insert(
        "shop-rg".to_string(),
        ResourceGroup {
            id: "/groups/shop-rg".to_string(),
            name: "shop-rg".to_string(),
            location: "northeurope".to_string(),
            tags: Default::default(),
        },
    );
    let provisioner = Provisioner::new(backend.clone());
    let mut ctx = context();

    provisioner.ensure_resource_group(&mut ctx).await.unwrap();

    assert_eq!(ctx.location, "northeurope");
    assert_eq!(backend.create_count("group"), 0);
}

#[tokio::test]
async fn test_full_chain_fills_context() {
    let backend = Arc::new(FakeControlPlane {
        assigned_ip: Some("20.1.2.3".to_string()),
        ..Default::default()
    });
    let provisioner = Provisioner::new(backend.clone());
    let mut ctx = context();

    provisioner.ensure_resource_group(&mut ctx).await.unwrap();
    provisioner.ensure_network(&mut ctx).await.unwrap();
    let nsg = provisioner.ensure_security_group(&mut ctx).await.unwrap();
    provisioner.ensure_public_address(&mut ctx, "sub-1").await.unwrap();
    provisioner.ensure_interface(&mut ctx).await.unwrap();
    provisioner.ensure_instance(&mut ctx).await.unwrap();

    let ports: Vec<u16> = nsg.rules.iter().map(|r| r.destination_port).collect();
    assert_eq!(ports, vec![22, 80, 443]);
    assert_eq!(ctx.public_address().unwrap().to_string(), "20.1.2.3");
    assert_eq!(ctx.instance_id.as_deref(), Some("/instances/shop-vm"));

    // A second pass adopts everything
    provisioner.ensure_network(&mut ctx).await.unwrap();
    provisioner.ensure_instance(&mut ctx).await.unwrap();
    assert_eq!(backend.create_count("network"), 1);
    assert_eq!(backend.create_count("instance"), 1);
}

#[tokio::test]
async fn test_interface_needs_network_facts() {
    let provisioner = Provisioner::new(Arc::new(FakeControlPlane::default()));
    let mut ctx = context();
    let err = provisioner.ensure_interface(&mut ctx).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::MissingContext(_)));
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_running() {
    let backend = Arc::new(FakeControlPlane::default());
    *backend.power_states.lock().unwrap() = vec![PowerState::Starting, PowerState::Starting];
    let provisioner = Provisioner::new(backend.clone());
    let options = ReadinessOptions::new(Duration::from_secs(5), Duration::from_secs(60));

    provisioner
        .wait_until_running(&context(), &options)
        .await
        .unwrap();
    assert!(backend.power_states.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deallocated_instance_fails_fast() {
    let backend = Arc::new(FakeControlPlane::default());
    *backend.power_states.lock().unwrap() = vec![PowerState::Deallocated];
    let provisioner = Provisioner::new(backend);
    let options = ReadinessOptions::new(Duration::from_secs(5), Duration::from_secs(600));

    let err = provisioner
        .wait_until_running(&context(), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ProbeFailed(_)));
}

#[tokio::test]
async fn test_select_falls_back_when_primary_unavailable() {
    let fallback: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::default());
    let selected = select_backend(
        Err(OrchestratorError::ConfigError("token missing".to_string())),
        async move { Ok(fallback) },
    )
    .await
    .unwrap();
    assert_eq!(selected.backend_name(), "fake");
}

#[tokio::test]
async fn test_select_both_unavailable_is_fatal() {
    let err = select_backend(
        Err(OrchestratorError::ConfigError("token missing".to_string())),
        async { Err(OrchestratorError::Transport("cli not installed".to_string())) },
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, OrchestratorError::BackendUnavailable(_)));
    let text = err.to_string();
    assert!(text.contains("token missing"));
    assert!(text.contains("cli not installed"));
}

#[tokio::test]
async fn test_select_prefers_primary() {
    let primary: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::default());
    let selected = select_backend(Ok(primary), async {
        Err(OrchestratorError::Internal("fallback must not be used".to_string()))
    })
    .await
    .unwrap();
    assert_eq!(selected.backend_name(), "fake");
}

#[tokio::test]
async fn test_cli_backend_maps_not_found_to_none() {
    let executor = FakeExecutor::new();
    executor.on("group show", |command| {
        Err(command_failed(
            command,
            "ERROR: (ResourceGroupNotFound) Resource group 'shop-rg' could not be found.",
        ))
    });
    executor.on_stdout(
        "group create",
        r#"{"id": "/groups/shop-rg", "name": "shop-rg", "location": "westeurope", "tags": null}"#,
    );
    let settings = CloudSettings {
        subscription_id: "sub-1".to_string(),
        ..Default::default()
    };
    let backend = Arc::new(CliBackend::new(executor.clone(), &settings));
    let provisioner = Provisioner::new(backend);
    let mut ctx = context();

    let group = provisioner.ensure_resource_group(&mut ctx).await.unwrap();

    assert_eq!(group.id, "/groups/shop-rg");
    let creates = executor.calls_matching("group create");
    assert_eq!(creates.len(), 1);
    assert!(creates[0].contains("--subscription sub-1"));
    assert!(creates[0].ends_with("--output json"));
}

#[tokio::test]
async fn test_cli_backend_surfaces_other_failures() {
    let executor = FakeExecutor::new();
    executor.on_fail("group show", "ERROR: AuthorizationFailed");
    let backend = Arc::new(CliBackend::new(executor, &CloudSettings::default()));
    let err = Provisioner::new(backend)
        .ensure_resource_group(&mut context())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::CommandFailed { .. }));
}
