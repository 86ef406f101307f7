//! Migration under load: an overloaded connection sheds a group to an
//! underloaded one, and the move is executed open-then-close.

mod harness;

use std::time::Duration;

use mintstream::core::stream::{LoadBalancer, Priority, SubscriptionGroup};

use harness::{balancer_config, stream_harness};

/// Drive synthetic traffic into the balancer so one connection reads hot:
/// `messages` completions inside the tps window, each with `latency` and
/// ~10KB of payload, a tenth of them failed.
async fn induce_load(balancer: &LoadBalancer, connection: u64, messages: u64, latency: Duration) {
    for msg in 0..messages {
        balancer.record_message_start(connection, msg);
    }
    tokio::time::advance(latency).await;
    for msg in 0..messages {
        balancer.record_message_complete(connection, msg, msg % 10 != 0, 10_240);
    }
}

#[tokio::test(start_paused = true)]
async fn overloaded_connection_sheds_a_group() {
    let balancer = LoadBalancer::new(balancer_config());
    balancer.register_connection(1);
    balancer.register_connection(2);

    // Connection 1 runs ~100 tps with heavy latency; connection 2 trickles.
    induce_load(&balancer, 1, 500, Duration::from_millis(900)).await;
    induce_load(&balancer, 2, 25, Duration::from_millis(1)).await;
    balancer.tick_load_calculation();

    let loads = balancer.metrics();
    assert!(loads[&1].load > 70.0, "hot connection load {}", loads[&1].load);
    assert!(loads[&2].load < 40.0, "cool connection load {}", loads[&2].load);

    let assignments = [
        ("bonding_curve".to_string(), 1u64),
        ("amm_pool".to_string(), 1u64),
        ("external_amm".to_string(), 2u64),
    ]
    .into_iter()
    .collect();

    let plan = balancer.plan_rebalance(&assignments, false);
    assert!(!plan.is_empty(), "spread above threshold must produce a plan");
    assert!(plan.len() <= 2, "batch size bounds each cycle");
    for request in &plan {
        assert_eq!(request.from, 1);
        assert_eq!(request.to, 2);
    }
}

#[tokio::test]
async fn migration_moves_group_between_connections() {
    let h = stream_harness();

    h.manager
        .subscribe(SubscriptionGroup::new(
            "bonding_curve",
            vec!["curve".into()],
            Priority::High,
        ))
        .await
        .unwrap();
    let from = h.manager.assignments()["bonding_curve"];
    let to = if from == 1 { 2 } else { 1 };

    let request = mintstream::core::stream::MigrationRequest {
        group: "bonding_curve".into(),
        from,
        to,
        reason: "induced".into(),
    };
    h.manager.migrate(&request).await.unwrap();

    // Open-then-close: the target subscribed before the source closed.
    let subscribes = h.state.subscribes.lock().unwrap().clone();
    let unsubscribes = h.state.unsubscribes.lock().unwrap().clone();
    assert_eq!(subscribes.len(), 2);
    assert_eq!(unsubscribes, vec!["bonding_curve".to_string()]);
    assert_eq!(h.manager.assignments()["bonding_curve"], to);

    // The group lives on exactly one connection.
    let status = h.manager.status();
    let on_target = status
        .pool
        .connections
        .iter()
        .find(|c| c.id == to)
        .map(|c| c.active_subscriptions)
        .unwrap_or(0);
    let on_source = status
        .pool
        .connections
        .iter()
        .find(|c| c.id == from)
        .map(|c| c.active_subscriptions)
        .unwrap_or(0);
    assert_eq!((on_source, on_target), (0, 1));

    h.manager.shutdown().await;
}
