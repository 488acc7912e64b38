use super::*;

#[test]
fn ids_are_unique_and_increasing() {
    let registry = InvocationRegistry::new();
    let (a, _rx_a) = registry.register(1, "chat");
    let (b, _rx_b) = registry.register(2, "chat");
    assert!(b > a);
    assert_eq!(registry.pending_count(), 2);
}

#[test]
fn take_removes_exactly_once() {
    let registry = InvocationRegistry::new();
    let (id, _rx) = registry.register(1, "chat");

    let entry = registry.take(1, id).unwrap();
    assert_eq!(entry.hub, "chat");
    assert!(registry.take(1, id).is_none());
    assert_eq!(registry.pending_count(), 0);
}

#[test]
fn take_ignores_other_connections() {
    let registry = InvocationRegistry::new();
    let (id, _rx) = registry.register(1, "chat");

    assert!(registry.take(2, id).is_none());
    assert_eq!(registry.pending_count(), 1);
}

#[test]
fn cancel_drops_the_responder() {
    let registry = InvocationRegistry::new();
    let (id, mut rx) = registry.register(1, "chat");

    assert!(registry.cancel(id));
    assert!(!registry.cancel(id));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn fail_connection_rejects_only_that_connection() {
    let registry = InvocationRegistry::new();
    let (_, rx_a) = registry.register(1, "chat");
    let (_, rx_b) = registry.register(1, "game");
    let (_, _rx_other) = registry.register(2, "chat");

    assert_eq!(registry.fail_connection(1, &ClientError::Stopped), 2);

    assert_eq!(rx_a.await.unwrap(), Err(ClientError::Stopped));
    assert_eq!(rx_b.await.unwrap(), Err(ClientError::Stopped));
    assert_eq!(registry.pending_count(), 1);
}
