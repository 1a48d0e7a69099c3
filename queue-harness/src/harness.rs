//! Producer/consumer protocol over the grid's bounded queue.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use grid_client::client::{ClusterConfig, ConnectPolicy, GridClient};

/// The poison-pill value. Receiving it is the sole termination signal for
/// a consumer loop; the producer enqueues exactly one per consumer.
pub const SENTINEL: &str = "END";

pub fn sentinel() -> Value {
    Value::String(SENTINEL.to_string())
}

pub fn is_sentinel(item: &Value) -> bool {
    item.as_str() == Some(SENTINEL)
}

/// Parameters for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub cluster: ClusterConfig,
    pub connect: ConnectPolicy,
    pub queue: String,
    /// The producer enqueues `1..=items` in order.
    pub items: u64,
    /// Concurrent consumers; also the number of sentinels enqueued.
    pub consumers: usize,
    /// How long a consumer waits after seeing an empty size snapshot
    /// before re-checking.
    pub poll_wait: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            connect: ConnectPolicy::default(),
            queue: "queue".to_string(),
            items: 100,
            consumers: 2,
            poll_wait: Duration::from_millis(500),
        }
    }
}

/// Items received by each consumer, in the order that consumer saw them.
#[derive(Debug)]
pub struct HarnessReport {
    pub per_consumer: Vec<Vec<u64>>,
}

impl HarnessReport {
    /// Total non-sentinel items consumed across all consumers.
    pub fn total(&self) -> usize {
        self.per_consumer.iter().map(Vec::len).sum()
    }

    /// All received items merged and sorted, for whole-run accounting.
    pub fn all_items(&self) -> Vec<u64> {
        let mut items: Vec<u64> = self.per_consumer.iter().flatten().copied().collect();
        items.sort_unstable();
        items
    }
}

/// Runs one producer and `consumers` concurrent consumer threads, each on
/// its own grid session, until every consumer has observed its sentinel.
///
/// Which consumer receives which item is undefined; the queue only
/// guarantees that the union of what they receive is the produced
/// sequence, in FIFO order overall.
pub fn run_producer_consumers(config: &HarnessConfig) -> Result<HarnessReport> {
    let producer = {
        let config = config.clone();
        thread::Builder::new()
            .name("queue-producer".to_string())
            .spawn(move || produce(&config))
            .context("failed to spawn producer thread")?
    };

    let consumers: Vec<_> = (0..config.consumers)
        .map(|id| {
            let config = config.clone();
            thread::Builder::new()
                .name(format!("queue-consumer-{id}"))
                .spawn(move || consume(&config, id))
                .with_context(|| format!("failed to spawn consumer thread {id}"))
        })
        .collect::<Result<_>>()?;

    producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;

    let mut per_consumer = Vec::with_capacity(config.consumers);
    for (id, handle) in consumers.into_iter().enumerate() {
        let received = handle
            .join()
            .map_err(|_| anyhow!("consumer thread {id} panicked"))??;
        per_consumer.push(received);
    }

    Ok(HarnessReport { per_consumer })
}

fn produce(config: &HarnessConfig) -> Result<()> {
    let mut client = GridClient::connect(&config.cluster, &config.connect)
        .context("producer failed to reach the grid")?;

    // Blocks whenever the bounded queue is full; backpressure, not loss.
    for item in 1..=config.items {
        client.queue_put(&config.queue, json!(item))?;
        debug!(item, "produced");
    }
    for _ in 0..config.consumers {
        client.queue_put(&config.queue, sentinel())?;
    }

    info!(
        items = config.items,
        sentinels = config.consumers,
        "producer finished"
    );
    Ok(())
}

fn consume(config: &HarnessConfig, id: usize) -> Result<Vec<u64>> {
    let mut client = GridClient::connect(&config.cluster, &config.connect)
        .with_context(|| format!("consumer {id} failed to reach the grid"))?;

    let mut received = Vec::new();
    loop {
        // Size is a racy snapshot; this pre-check only spaces out probes
        // while the queue looks idle. Correctness rests on the blocking
        // take and the sentinel alone.
        if client.queue_size(&config.queue)? == 0 {
            debug!(consumer = id, "queue is empty, waiting");
            thread::sleep(config.poll_wait);
            continue;
        }

        let item = client.queue_take(&config.queue)?;
        if is_sentinel(&item) {
            break;
        }

        let value = item
            .as_u64()
            .ok_or_else(|| anyhow!("unexpected queue item {item}"))?;
        debug!(consumer = id, item = value, "consumed");
        received.push(value);
    }

    info!(
        consumer = id,
        received = received.len(),
        "consumer observed the sentinel"
    );
    Ok(received)
}

/// The no-concurrent-reader variant: fill the queue, pause, then drain it
/// sequentially from a single session. Returns the drained items in
/// arrival order, which must match production order exactly.
///
/// The producer and the drain share one thread, so `items + 1` (the
/// sentinel) must fit the node's queue capacity or the fill would block
/// with nobody left to drain.
pub fn run_drain(config: &HarnessConfig) -> Result<Vec<u64>> {
    let mut client = GridClient::connect(&config.cluster, &config.connect)
        .context("drain harness failed to reach the grid")?;

    for item in 1..=config.items {
        client.queue_put(&config.queue, json!(item))?;
        debug!(item, "produced");
    }
    client.queue_put(&config.queue, sentinel())?;

    // Give the grid a moment to settle before the size snapshot; display
    // only, the drain below trusts the sentinel.
    thread::sleep(config.poll_wait);
    let size = client.queue_size(&config.queue)?;
    info!(size, "queue settled, draining");

    let mut drained = Vec::new();
    loop {
        let item = client.queue_take(&config.queue)?;
        if is_sentinel(&item) {
            break;
        }
        drained.push(
            item.as_u64()
                .ok_or_else(|| anyhow!("unexpected queue item {item}"))?,
        );
    }
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_only_the_reserved_string() {
        assert!(is_sentinel(&sentinel()));
        assert!(!is_sentinel(&json!("end")));
        assert!(!is_sentinel(&json!(42)));
    }
}
