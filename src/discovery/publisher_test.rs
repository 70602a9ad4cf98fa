use std::sync::Arc;

use super::scope::type_path;
use super::EndpointPublisher;
use crate::config::BackoffPolicy;
use crate::registry::MemoryRegistry;
use crate::registry::RegistryBackend;
use crate::test_utils::endpoint_with;
use crate::Endpoint;
use crate::JsonEndpointCodec;
use crate::PropertyMap;

const BASE: &str = "/rsd/services";

fn publisher(reg: Arc<MemoryRegistry>) -> EndpointPublisher {
    let policy = BackoffPolicy {
        max_retries: 2,
        timeout_ms: 1000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    EndpointPublisher::new(reg, Arc::new(JsonEndpointCodec), BASE.to_string(), policy)
}

/// # Case 1: One node per declared service type
///
/// ## Setup
/// 1. Publish an endpoint declaring two types
///
/// ## Validation criteria
/// 1. Both type directories hold a node named after the endpoint id
/// 2. The payload decodes back to the endpoint
#[tokio::test]
async fn test_publish_per_type_case1() {
    let reg = Arc::new(MemoryRegistry::new());
    let publisher = publisher(reg.clone());
    let ep = endpoint_with("tcp://h1:9000/multi", &["com.acme.Greeter", "com.acme.Echo"], &[]);

    publisher.publish(&ep).await.unwrap();

    for ty in ["com.acme.Greeter", "com.acme.Echo"] {
        let children = reg.get_children(&type_path(BASE, ty), None).await.unwrap();
        assert_eq!(children, vec!["tcp:##h1:9000#multi".to_string()]);
        let data = reg
            .get_data(&format!("{}/{}", type_path(BASE, ty), "tcp:##h1:9000#multi"), None)
            .await
            .unwrap();
        let decoded: PropertyMap = serde_json::from_slice(&data).unwrap();
        assert_eq!(&decoded, ep.properties());
    }
}

/// # Case 2: Re-publishing overwrites instead of failing on NodeExists
#[tokio::test]
async fn test_republish_overwrites_case2() {
    let reg = Arc::new(MemoryRegistry::new());
    let publisher = publisher(reg.clone());
    let ep = endpoint_with("tcp://h1:9000/greeter", &["com.acme.Greeter"], &[]);
    publisher.publish(&ep).await.unwrap();

    let mut props = ep.properties().clone();
    props.insert("region".to_string(), "eu".into());
    let updated = Endpoint::new(props).unwrap();
    publisher.publish(&updated).await.unwrap();

    let node = format!("{}/{}", type_path(BASE, "com.acme.Greeter"), "tcp:##h1:9000#greeter");
    let data = reg.get_data(&node, None).await.unwrap();
    let decoded: PropertyMap = serde_json::from_slice(&data).unwrap();
    assert_eq!(&decoded, updated.properties());
}

/// # Case 3: Retract deletes the nodes, twice is fine
#[tokio::test]
async fn test_retract_case3() {
    let reg = Arc::new(MemoryRegistry::new());
    let publisher = publisher(reg.clone());
    let ep = endpoint_with("tcp://h1:9000/greeter", &["com.acme.Greeter"], &[]);
    publisher.publish(&ep).await.unwrap();

    publisher.retract(&ep).await.unwrap();
    let children = reg.get_children(&type_path(BASE, "com.acme.Greeter"), None).await.unwrap();
    assert!(children.is_empty());

    publisher.retract(&ep).await.unwrap();
}

/// # Case 4: Close drains everything and later publishes are ignored
#[tokio::test]
async fn test_close_case4() {
    let reg = Arc::new(MemoryRegistry::new());
    let publisher = publisher(reg.clone());
    let e1 = endpoint_with("tcp://h1:9000/greeter", &["com.acme.Greeter"], &[]);
    let e2 = endpoint_with("tcp://h2:9000/greeter", &["com.acme.Greeter"], &[]);
    publisher.publish(&e1).await.unwrap();
    publisher.publish(&e2).await.unwrap();

    publisher.close().await;
    let children = reg.get_children(&type_path(BASE, "com.acme.Greeter"), None).await.unwrap();
    assert!(children.is_empty());

    publisher.publish(&e1).await.unwrap();
    let children = reg.get_children(&type_path(BASE, "com.acme.Greeter"), None).await.unwrap();
    assert!(children.is_empty());
}

/// # Case 5: Published nodes are ephemeral, the registry reaps them with
/// the session
#[tokio::test]
async fn test_ephemeral_nodes_case5() {
    let reg = Arc::new(MemoryRegistry::new());
    let publisher = publisher(reg.clone());
    let ep = endpoint_with("tcp://h1:9000/greeter", &["com.acme.Greeter"], &[]);
    publisher.publish(&ep).await.unwrap();

    reg.expire_session();
    reg.reconnect();
    let children = reg.get_children(&type_path(BASE, "com.acme.Greeter"), None).await.unwrap();
    assert!(children.is_empty());
}

/// # Case 6: Retried publication survives a transient session loss
///
/// ## Setup
/// 1. Expire the session, then reconnect while the first backoff sleeps
///
/// ## Validation criteria
/// 1. publish_with_retry recovers and the node lands
/// 2. With the session kept expired the policy eventually gives up
#[tokio::test]
async fn test_publish_with_retry_case6() {
    let reg = Arc::new(MemoryRegistry::new());
    let policy = BackoffPolicy {
        max_retries: 3,
        timeout_ms: 1000,
        base_delay_ms: 20,
        max_delay_ms: 100,
    };
    let publisher = EndpointPublisher::new(reg.clone(), Arc::new(JsonEndpointCodec), BASE.to_string(), policy);
    let ep = endpoint_with("tcp://h1:9000/greeter", &["com.acme.Greeter"], &[]);

    reg.expire_session();
    let healer = reg.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        healer.reconnect();
    });
    publisher.publish_with_retry(&ep).await.unwrap();
    let children = reg.get_children(&type_path(BASE, "com.acme.Greeter"), None).await.unwrap();
    assert_eq!(children.len(), 1);

    publisher.retract(&ep).await.unwrap();
    reg.expire_session();
    assert!(publisher.publish_with_retry(&ep).await.is_err());
}
