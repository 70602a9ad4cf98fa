use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use rsd_engine::MemoryRegistry;
use rsd_engine::PropertyMap;
use rsd_engine::RegistryBackend;
use rsd_engine::TopologyEvent;

use crate::common::exported_service;
use crate::common::start_node;
use crate::common::wait_for_children;
use crate::common::wait_until;
use crate::common::EchoProvider;
use crate::common::Events;
use crate::common::Recorder;

const GREETER_TYPE: &str = "com.acme.Greeter";
const GREETER_FILTER: &str = "(service.types=com.acme.Greeter)";
const GREETER_DIR: &str = "/rsd/services/com/acme/Greeter";

/// Case 1: a listener subscribing after an endpoint is already in the
/// registry receives it exactly once, before the subscribe call returns.
#[tokio::test]
async fn test_listener_sees_known_endpoints_on_subscribe() -> rsd_engine::Result<()> {
    crate::enable_logger();
    let registry: Arc<dyn RegistryBackend> = Arc::new(MemoryRegistry::new());
    let (_guard_a, node_a) = start_node(registry.clone()).await;
    let (_guard_b, node_b) = start_node(registry.clone()).await;

    // Export on node A and wait for the registry write to land
    let provider = EchoProvider::new("echo-a", &["rsd.echo"]);
    node_a.register_provider(provider.clone()).await;
    let service = exported_service(GREETER_TYPE);
    let registrations = node_a.export_service(&service, &PropertyMap::new()).await?;
    assert_eq!(registrations.len(), 1);
    wait_for_children(&registry, GREETER_DIR, 1).await;

    println!("[test_listener_sees_known_endpoints_on_subscribe] endpoint published, subscribing...");

    // Initial delivery completes before the subscribe call returns
    let recorder = Recorder::new();
    node_b.add_endpoint_listener(recorder.clone(), vec![GREETER_FILTER.to_string()]).await?;
    let added = recorder.added();
    assert_eq!(added.len(), 1);
    assert!(added[0].id().starts_with("echo://echo-a/"));

    // And never repeats
    sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.len(), 1);
    Ok(())
}

/// Case 2: unregistering the origin service retracts the endpoint and the
/// remote listener hears the removal exactly once.
#[tokio::test]
async fn test_removal_reaches_remote_listener_once() -> rsd_engine::Result<()> {
    crate::enable_logger();
    let registry: Arc<dyn RegistryBackend> = Arc::new(MemoryRegistry::new());
    let (_guard_a, node_a) = start_node(registry.clone()).await;
    let (_guard_b, node_b) = start_node(registry.clone()).await;

    let provider = EchoProvider::new("echo-a", &["rsd.echo"]);
    node_a.register_provider(provider.clone()).await;
    let service = exported_service(GREETER_TYPE);
    node_a.export_service(&service, &PropertyMap::new()).await?;
    wait_for_children(&registry, GREETER_DIR, 1).await;

    let recorder = Recorder::new();
    node_b.add_endpoint_listener(recorder.clone(), vec![GREETER_FILTER.to_string()]).await?;
    assert_eq!(recorder.added().len(), 1);

    // Tear the origin service down
    node_a.service_unregistered(service.service_id()).await;
    assert_eq!(provider.export_closes(), 1);
    wait_for_children(&registry, GREETER_DIR, 0).await;

    // Exactly one removal reaches node B
    wait_until("removal delivery", || recorder.removed().len() == 1).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.removed().len(), 1);
    assert_eq!(recorder.len(), 2);
    Ok(())
}

/// Case 3: two concurrent exports of the same service share one provider
/// call, and the provider endpoint survives until the last copy closes.
#[tokio::test]
async fn test_concurrent_exports_share_one_provider_call() -> rsd_engine::Result<()> {
    crate::enable_logger();
    let registry: Arc<dyn RegistryBackend> = Arc::new(MemoryRegistry::new());
    let (_guard, node) = start_node(registry).await;

    let provider = EchoProvider::new("echo", &["rsd.echo"]);
    provider.set_export_delay_ms(50);
    node.register_provider(provider.clone()).await;

    let service = exported_service(GREETER_TYPE);
    let props = PropertyMap::new();
    let (first, second) = tokio::join!(
        node.export_service(&service, &props),
        node.export_service(&service, &props),
    );
    let first = first?;
    let second = second?;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(provider.export_calls(), 1);

    first[0].close().await;
    assert_eq!(provider.export_closes(), 0);
    assert!(second[0].is_open());

    second[0].close().await;
    assert_eq!(provider.export_closes(), 1);
    Ok(())
}

/// Case 4: a remote export comes up as a live proxy on the interested node
/// and is torn down when the origin goes away.
#[tokio::test]
async fn test_import_lifecycle_follows_remote_export() -> rsd_engine::Result<()> {
    crate::enable_logger();
    let registry: Arc<dyn RegistryBackend> = Arc::new(MemoryRegistry::new());
    let (_guard_a, node_a) = start_node(registry.clone()).await;
    let (_guard_b, node_b) = start_node(registry.clone()).await;

    // Node B wants Greeter proxies wired through its own provider
    let importer = EchoProvider::new("echo-b", &["rsd.echo"]);
    node_b.register_provider(importer.clone()).await;
    let events = Events::new();
    node_b.subscribe_events(events.clone());
    node_b.add_service_interest(GREETER_FILTER).await?;

    // Node A exports
    let provider = EchoProvider::new("echo-a", &["rsd.echo"]);
    node_a.register_provider(provider.clone()).await;
    let service = exported_service(GREETER_TYPE);
    node_a.export_service(&service, &PropertyMap::new()).await?;

    // The proxy comes up on node B
    wait_until("import on node B", || importer.import_calls() == 1).await;
    wait_until("import event", || events.len() >= 1).await;
    assert!(matches!(events.events()[0], TopologyEvent::ImportRegistered { .. }));

    // Origin goes away, the proxy follows
    node_a.service_unregistered(service.service_id()).await;
    wait_until("proxy teardown", || importer.import_closes() == 1).await;
    wait_until("unregister event", || events.len() >= 2).await;
    assert!(matches!(events.events()[1], TopologyEvent::ImportUnregistered { .. }));
    Ok(())
}
