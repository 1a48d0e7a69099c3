//! Blocking store client for one grid session.
//!
//! Every operation is one request/response round trip on a single TCP
//! connection. Workers that need isolation (separate processes, separate
//! consumer threads) each open their own client; nothing here is shared.

use std::io::{self, BufReader};
use std::net::TcpStream;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::protocol::{read_message, write_message, ErrorCode, Request, Response};

/// Identifies the grid session to join: a cluster name plus the member
/// addresses to try.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub members: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            members: vec![
                "127.0.0.1:5701".to_string(),
                "127.0.0.1:5702".to_string(),
                "127.0.0.1:5703".to_string(),
            ],
        }
    }
}

/// Bounded connect retry with doubling backoff.
///
/// Each attempt tries every cluster member once; between attempts the
/// client sleeps for the current delay plus a little jitter, then doubles
/// the delay. There is no unbounded retry loop: after `max_attempts` the
/// connect fails with [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
        }
    }
}

/// A connected grid session.
pub struct GridClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl GridClient {
    /// Connects to the first reachable cluster member and performs the
    /// session handshake.
    ///
    /// I/O failures rotate to the next member and, once the list is
    /// exhausted, back off per `policy`. A node that actively rejects the
    /// handshake (wrong cluster name) fails immediately; retrying cannot
    /// fix that.
    pub fn connect(cluster: &ClusterConfig, policy: &ConnectPolicy) -> Result<Self> {
        let mut delay = policy.initial_delay;
        let mut last_error: Option<io::Error> = None;

        for attempt in 1..=policy.max_attempts.max(1) {
            for member in &cluster.members {
                match Self::try_connect(member, &cluster.name) {
                    Ok(client) => {
                        debug!(member = %member, attempt, "connected to grid");
                        return Ok(client);
                    }
                    Err(StoreError::Unavailable(err)) => {
                        debug!(member = %member, attempt, error = %err, "member unreachable");
                        last_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }

            if attempt < policy.max_attempts {
                let jitter = rand::thread_rng().gen_range(Duration::ZERO..=delay / 4);
                warn!(
                    attempt,
                    delay_ms = (delay + jitter).as_millis() as u64,
                    "no cluster member reachable, backing off"
                );
                std::thread::sleep(delay + jitter);
                delay *= 2;
            }
        }

        Err(StoreError::Unavailable(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no cluster members configured")
        })))
    }

    fn try_connect(member: &str, cluster: &str) -> Result<Self> {
        let stream = TcpStream::connect(member)?;
        let mut client = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };
        match client.call(&Request::Hello {
            cluster: cluster.to_string(),
        })? {
            Response::Ok => Ok(client),
            other => Err(unexpected(&other)),
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        write_message(&mut self.writer, request)?;
        let response = read_message::<_, Response>(&mut self.reader)?.ok_or_else(|| {
            StoreError::Unavailable(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "grid node closed the connection",
            ))
        })?;

        match response {
            Response::Error {
                code: ErrorCode::LockNotHeld,
                message,
            } => Err(StoreError::LockNotHeld { key: message }),
            Response::Error {
                code: ErrorCode::Rejected,
                message,
            } => Err(StoreError::Rejected { reason: message }),
            other => Ok(other),
        }
    }

    /// Reads the value for `key`, or `None` if absent.
    pub fn get(&mut self, map: &str, key: &str) -> Result<Option<Value>> {
        match self.call(&Request::Get {
            map: map.to_string(),
            key: key.to_string(),
        })? {
            Response::Value { value } => Ok(value),
            other => Err(unexpected(&other)),
        }
    }

    /// Unconditionally overwrites the value for `key`.
    pub fn put(&mut self, map: &str, key: &str, value: Value) -> Result<()> {
        match self.call(&Request::Put {
            map: map.to_string(),
            key: key.to_string(),
            value,
        })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Atomically replaces the value iff it still equals `expected`
    /// (`None` matches an absent key). Returns whether the swap happened.
    pub fn compare_and_swap(
        &mut self,
        map: &str,
        key: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool> {
        match self.call(&Request::CompareAndSwap {
            map: map.to_string(),
            key: key.to_string(),
            expected,
            new,
        })? {
            Response::Swapped { swapped } => Ok(swapped),
            other => Err(unexpected(&other)),
        }
    }

    /// Blocks until this session holds the exclusive lock on `key`.
    pub fn lock(&mut self, map: &str, key: &str) -> Result<()> {
        match self.call(&Request::Lock {
            map: map.to_string(),
            key: key.to_string(),
        })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Releases the lock on `key`. Calling this without holding the lock
    /// is a programming error and fails with [`StoreError::LockNotHeld`].
    pub fn unlock(&mut self, map: &str, key: &str) -> Result<()> {
        match self.call(&Request::Unlock {
            map: map.to_string(),
            key: key.to_string(),
        })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Runs `f` with the lock on `key` held, releasing it on every exit
    /// path of `f`.
    ///
    /// When `f` fails, the unlock still happens and `f`'s error wins; an
    /// unlock failure after a successful `f` is reported. If the worker
    /// process dies outright inside the critical section, the node frees
    /// its locks when the connection drops, so the next acquirer is not
    /// blocked forever either way.
    pub fn with_lock<T, E>(
        &mut self,
        map: &str,
        key: &str,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        self.lock(map, key)?;
        let outcome = f(self);
        match self.unlock(map, key) {
            Ok(()) => outcome,
            Err(unlock_err) => match outcome {
                // The critical section's own failure is the interesting one.
                Err(err) => Err(err),
                Ok(_) => Err(unlock_err.into()),
            },
        }
    }

    /// Enqueues an item, blocking while the queue is at capacity.
    pub fn queue_put(&mut self, queue: &str, item: Value) -> Result<()> {
        match self.call(&Request::QueuePut {
            queue: queue.to_string(),
            item,
        })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Dequeues the head item, blocking while the queue is empty.
    pub fn queue_take(&mut self, queue: &str) -> Result<Value> {
        match self.call(&Request::QueueTake {
            queue: queue.to_string(),
        })? {
            Response::Item { item } => Ok(item),
            other => Err(unexpected(&other)),
        }
    }

    /// Snapshot of the queue length. Eventually consistent the moment it
    /// is returned; useful as a liveness hint, never for synchronization
    /// decisions.
    pub fn queue_size(&mut self, queue: &str) -> Result<usize> {
        match self.call(&Request::QueueSize {
            queue: queue.to_string(),
        })? {
            Response::Size { size } => Ok(size),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> StoreError {
    StoreError::Protocol(format!("unexpected response {response:?}"))
}
