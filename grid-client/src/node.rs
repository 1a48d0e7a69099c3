//! A single-process grid node.
//!
//! This is the data-grid side of the [`crate::client`] contract: named
//! maps with per-key atomic operations and an exclusive lock table, plus
//! named bounded queues with blocking put/take. It deliberately replicates
//! nothing; a single process holding all state trivially gives the
//! linearizable single-key semantics the experiment harnesses rely on,
//! which is exactly what they need from a collaborator in tests and local
//! runs.
//!
//! # Threading model
//!
//! One accept thread plus one handler thread per connection. A connection
//! is one session: it serves one request at a time, so a session blocked
//! in `lock` or `queue_take` simply parks its own thread while other
//! sessions proceed. Handler threads exit when the peer disconnects.

use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::{read_message, write_message, ErrorCode, Request, Response};

/// Default upper bound on items a named queue will hold before `put`
/// blocks the producer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Configuration for a grid node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind, e.g. "127.0.0.1:5701". Port 0 picks an ephemeral
    /// port, which tests use.
    pub listen: String,
    /// Cluster name checked against the client handshake.
    pub cluster: String,
    /// Capacity of every named queue created on this node.
    pub queue_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5701".to_string(),
            cluster: "dev".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A running grid node.
///
/// Dropping the handle does not stop the node; it serves connections for
/// the lifetime of the process. That is all the harnesses and tests need,
/// and it keeps the accept loop free of shutdown plumbing.
pub struct GridNode {
    local_addr: SocketAddr,
    accept_handle: thread::JoinHandle<()>,
}

impl GridNode {
    /// Binds the listener and starts serving in background threads.
    ///
    /// Returns once the socket is bound, so [`Self::local_addr`] is
    /// immediately usable for client connections.
    pub fn bind(config: NodeConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen)
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let local_addr = listener.local_addr().context("listener has no local addr")?;
        let state = Arc::new(GridState::new(config));

        info!(addr = %local_addr, cluster = %state.cluster, "grid node listening");

        let accept_handle = thread::Builder::new()
            .name(format!("grid-node-{local_addr}"))
            .spawn(move || accept_loop(listener, state))
            .context("failed to spawn grid accept thread")?;

        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// The bound address, including the resolved ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks the caller for the node's lifetime. Used by the standalone
    /// binary; the accept loop only ends when the process does.
    pub fn join(self) -> Result<()> {
        self.accept_handle
            .join()
            .map_err(|_| anyhow::anyhow!("grid accept thread panicked"))
    }
}

fn accept_loop(listener: TcpListener, state: Arc<GridState>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let session = state.next_session.fetch_add(1, Ordering::Relaxed);
                let state = Arc::clone(&state);
                let spawned = thread::Builder::new()
                    .name(format!("grid-session-{session}"))
                    .spawn(move || {
                        let result = handle_session(stream, &state, session);
                        // A vanished peer must not leave the lock table
                        // wedged, whatever happened on the wire.
                        state.release_session(session);
                        if let Err(err) = result {
                            warn!(session, error = %err, "session ended with error");
                        }
                    });
                if let Err(err) = spawned {
                    warn!(error = %err, "failed to spawn session thread");
                }
            }
            Err(err) => warn!(error = %err, "failed to accept connection"),
        }
    }
}

/// Serves one connection: handshake first, then a request/response loop
/// until the peer disconnects.
fn handle_session(stream: TcpStream, state: &GridState, session: u64) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    match read_message::<_, Request>(&mut reader)? {
        Some(Request::Hello { cluster }) if cluster == state.cluster => {
            write_message(&mut writer, &Response::Ok)?;
        }
        Some(Request::Hello { cluster }) => {
            write_message(
                &mut writer,
                &Response::Error {
                    code: ErrorCode::Rejected,
                    message: format!(
                        "wrong cluster name {:?}, this node serves {:?}",
                        cluster, state.cluster
                    ),
                },
            )?;
            return Ok(());
        }
        Some(_) => {
            write_message(
                &mut writer,
                &Response::Error {
                    code: ErrorCode::Rejected,
                    message: "hello handshake required before any operation".to_string(),
                },
            )?;
            return Ok(());
        }
        None => return Ok(()),
    }

    debug!(session, peer = %peer, "session established");

    while let Some(request) = read_message::<_, Request>(&mut reader)? {
        let response = state.apply(session, request);
        write_message(&mut writer, &response)?;
    }

    debug!(session, peer = %peer, "session closed");
    Ok(())
}

type LockId = (String, String);

struct LockEntry {
    holder: u64,
    /// Reentrancy depth for the holding session. Locks are reentrant only
    /// within the same logical holder.
    depth: u32,
}

/// Both channel ends of a named queue. The state map keeps one receiver
/// alive, so a blocking `send`/`recv` on a clone can never observe a
/// disconnected channel.
#[derive(Clone)]
struct NamedQueue {
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

struct GridState {
    cluster: String,
    queue_capacity: usize,
    next_session: AtomicU64,
    maps: Mutex<HashMap<String, HashMap<String, Value>>>,
    locks: Mutex<HashMap<LockId, LockEntry>>,
    lock_freed: Condvar,
    queues: Mutex<HashMap<String, NamedQueue>>,
}

impl GridState {
    fn new(config: NodeConfig) -> Self {
        Self {
            cluster: config.cluster,
            queue_capacity: config.queue_capacity,
            next_session: AtomicU64::new(1),
            maps: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_freed: Condvar::new(),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn apply(&self, session: u64, request: Request) -> Response {
        match request {
            Request::Hello { .. } => Response::Error {
                code: ErrorCode::Rejected,
                message: "session already established".to_string(),
            },
            Request::Get { map, key } => Response::Value {
                value: self.get(&map, &key),
            },
            Request::Put { map, key, value } => {
                self.put(&map, key, value);
                Response::Ok
            }
            Request::CompareAndSwap {
                map,
                key,
                expected,
                new,
            } => Response::Swapped {
                swapped: self.compare_and_swap(&map, key, expected, new),
            },
            Request::Lock { map, key } => {
                self.lock(session, map, key);
                Response::Ok
            }
            Request::Unlock { map, key } => {
                if self.unlock(session, &map, &key) {
                    Response::Ok
                } else {
                    // The message carries the bare key; the client maps
                    // this code onto its typed LockNotHeld error.
                    Response::Error {
                        code: ErrorCode::LockNotHeld,
                        message: key,
                    }
                }
            }
            Request::QueuePut { queue, item } => match self.queue(&queue).tx.send(item) {
                Ok(()) => Response::Ok,
                Err(_) => Response::Error {
                    code: ErrorCode::Rejected,
                    message: format!("queue {queue:?} is closed"),
                },
            },
            Request::QueueTake { queue } => match self.queue(&queue).rx.recv() {
                Ok(item) => Response::Item { item },
                Err(_) => Response::Error {
                    code: ErrorCode::Rejected,
                    message: format!("queue {queue:?} is closed"),
                },
            },
            Request::QueueSize { queue } => Response::Size {
                size: self.queue(&queue).rx.len(),
            },
        }
    }

    fn get(&self, map: &str, key: &str) -> Option<Value> {
        self.maps
            .lock()
            .unwrap()
            .get(map)
            .and_then(|entries| entries.get(key).cloned())
    }

    fn put(&self, map: &str, key: String, value: Value) {
        self.maps
            .lock()
            .unwrap()
            .entry(map.to_string())
            .or_default()
            .insert(key, value);
    }

    /// The entire read-compare-write runs under the map mutex, which is
    /// what makes this a single atomic step from the client's view.
    fn compare_and_swap(
        &self,
        map: &str,
        key: String,
        expected: Option<Value>,
        new: Value,
    ) -> bool {
        let mut maps = self.maps.lock().unwrap();
        let entries = maps.entry(map.to_string()).or_default();
        if entries.get(&key) == expected.as_ref() {
            entries.insert(key, new);
            true
        } else {
            false
        }
    }

    /// Blocks until the session owns the lock. Re-acquiring a lock the
    /// session already holds bumps the reentrancy depth.
    fn lock(&self, session: u64, map: String, key: String) {
        let id = (map, key);
        let mut locks = self.locks.lock().unwrap();
        loop {
            match locks.get_mut(&id) {
                None => {
                    locks.insert(
                        id,
                        LockEntry {
                            holder: session,
                            depth: 1,
                        },
                    );
                    return;
                }
                Some(entry) if entry.holder == session => {
                    entry.depth += 1;
                    return;
                }
                Some(_) => locks = self.lock_freed.wait(locks).unwrap(),
            }
        }
    }

    /// Returns false when the session does not hold the lock.
    fn unlock(&self, session: u64, map: &str, key: &str) -> bool {
        let id = (map.to_string(), key.to_string());
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(&id) {
            Some(entry) if entry.holder == session => {
                entry.depth -= 1;
                if entry.depth == 0 {
                    locks.remove(&id);
                    self.lock_freed.notify_all();
                }
                true
            }
            _ => false,
        }
    }

    /// Drops every lock a session still holds. Called when its connection
    /// goes away so a crashed worker cannot block the next acquirer
    /// forever.
    fn release_session(&self, session: u64) {
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|_, entry| entry.holder != session);
        if locks.len() != before {
            warn!(
                session,
                released = before - locks.len(),
                "released locks abandoned by closed session"
            );
            self.lock_freed.notify_all();
        }
    }

    /// Looks up a queue by name, creating it on first use. Returns cloned
    /// channel ends so blocking put/take never happens under the registry
    /// mutex.
    fn queue(&self, name: &str) -> NamedQueue {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = bounded(self.queue_capacity);
                NamedQueue { tx, rx }
            })
            .clone()
    }
}
