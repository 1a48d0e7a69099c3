//! JSON line protocol between the store client and a grid node.
//!
//! Every request is answered with exactly one response on the same
//! connection, in order. Messages are newline-delimited JSON objects,
//! which keeps the wire format inspectable with netcat-style tools.

use std::io::{self, BufRead, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Requests a client may send to a grid node.
///
/// `map` and `queue` name the structure being addressed; structures are
/// created on first use and live for the node's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Session handshake. Must be the first request on a connection.
    Hello { cluster: String },
    Get { map: String, key: String },
    Put { map: String, key: String, value: Value },
    /// Atomically replace the value iff the current value equals
    /// `expected`. `expected: None` matches an absent key, so this doubles
    /// as put-if-absent.
    CompareAndSwap {
        map: String,
        key: String,
        expected: Option<Value>,
        new: Value,
    },
    /// Block until this session holds the exclusive lock for the key.
    Lock { map: String, key: String },
    Unlock { map: String, key: String },
    /// Block while the queue is at capacity.
    QueuePut { queue: String, item: Value },
    /// Block while the queue is empty.
    QueueTake { queue: String },
    QueueSize { queue: String },
}

/// Responses a grid node sends back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Value { value: Option<Value> },
    Swapped { swapped: bool },
    Item { item: Value },
    Size { size: usize },
    Error { code: ErrorCode, message: String },
}

/// Machine-readable failure codes, so the client can map server-side
/// refusals onto its own error taxonomy without parsing prose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    LockNotHeld,
    Rejected,
}

/// Reads the next message, skipping blank lines. Returns `None` on a
/// clean EOF.
pub fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: BufRead,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

/// Encodes a message as one JSON line and flushes it to the peer.
pub fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    #[test]
    fn roundtrip_request() {
        let message = Request::CompareAndSwap {
            map: "distributed-map".into(),
            key: "0".into(),
            expected: Some(json!(41)),
            new: json!(42),
        };

        let mut encoded = Vec::new();
        write_message(&mut encoded, &message).expect("write message");

        let mut reader = Cursor::new(encoded);
        let parsed = read_message::<_, Request>(&mut reader)
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }

    #[test]
    fn skips_blank_lines_and_stops_at_eof() {
        let mut reader = Cursor::new(b"\n\n{\"type\":\"ok\"}\n".to_vec());

        let parsed = read_message::<_, Response>(&mut reader)
            .expect("read message")
            .expect("expected message");
        assert_eq!(parsed, Response::Ok);

        let end = read_message::<_, Response>(&mut reader).expect("read at eof");
        assert!(end.is_none());
    }
}
