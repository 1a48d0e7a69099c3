//! Integration tests for the bounded-queue harness against an in-process
//! grid node.

use std::time::Duration;

use anyhow::Result;

use grid_client::client::{ClusterConfig, ConnectPolicy};
use grid_client::node::{GridNode, NodeConfig};
use queue_harness::harness::{run_drain, run_producer_consumers, HarnessConfig};

fn spawn_node(queue_capacity: usize) -> Result<ClusterConfig> {
    let node = GridNode::bind(NodeConfig {
        listen: "127.0.0.1:0".to_string(),
        cluster: "dev".to_string(),
        queue_capacity,
    })?;
    Ok(ClusterConfig {
        name: "dev".to_string(),
        members: vec![node.local_addr().to_string()],
    })
}

fn config(cluster: ClusterConfig, items: u64, consumers: usize) -> HarnessConfig {
    HarnessConfig {
        cluster,
        connect: ConnectPolicy::default(),
        queue: "queue".to_string(),
        items,
        consumers,
        // Short poll to keep tests brisk; correctness never depends on it.
        poll_wait: Duration::from_millis(50),
    }
}

#[test]
fn single_consumer_receives_items_in_order() -> Result<()> {
    let cluster = spawn_node(64)?;

    let report = run_producer_consumers(&config(cluster, 50, 1))?;

    assert_eq!(report.per_consumer.len(), 1);
    let received = &report.per_consumer[0];
    assert_eq!(received, &(1..=50).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn all_consumers_terminate_and_partition_the_items() -> Result<()> {
    let cluster = spawn_node(64)?;
    let (items, consumers) = (120, 3);

    // run_producer_consumers returning at all proves every consumer
    // observed its sentinel and joined.
    let report = run_producer_consumers(&config(cluster, items, consumers))?;

    assert_eq!(report.per_consumer.len(), consumers);
    assert_eq!(report.total(), items as usize);
    // No duplicates, no omissions: the union is exactly 1..=items.
    assert_eq!(report.all_items(), (1..=items).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn bounded_queue_backpressure_loses_nothing() -> Result<()> {
    // Capacity far below the item count: the producer must block on a
    // full queue repeatedly, and still nothing may be lost.
    let cluster = spawn_node(8)?;

    let report = run_producer_consumers(&config(cluster, 100, 2))?;

    assert_eq!(report.all_items(), (1..=100).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn drain_preserves_production_order() -> Result<()> {
    let cluster = spawn_node(64)?;

    let mut harness = config(cluster, 14, 1);
    harness.poll_wait = Duration::from_millis(100);
    let drained = run_drain(&harness)?;

    assert_eq!(drained, (1..=14).collect::<Vec<u64>>());
    Ok(())
}
