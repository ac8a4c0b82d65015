//! Traffic sinks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use crate::record::TrafficRecord;

/// Pending records a file sink buffers before producers start waiting.
const SINK_BACKLOG: usize = 256;

/// Upper bound on records drained from the queue per write burst.
const BURST_LIMIT: usize = 32;

/// Failures a sink can report.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("traffic log i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("traffic record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink is closed")]
    Closed,
}

/// Destination for intercepted traffic records.
///
/// Sinks must never block the message path on their own durability: a slow
/// or failing sink reports an error that the interceptor logs and skips.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log(&self, record: TrafficRecord) -> Result<(), SinkError>;

    /// Release the sink; queued records are still written out. Safe to call
    /// more than once.
    async fn close(&self) -> Result<(), SinkError>;
}

pub type SharedSink = Arc<dyn LogSink>;

/// Produces the sink set for each newly bound connection.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn create(&self, connection_id: &str) -> Result<Vec<SharedSink>, SinkError>;
}

/// JSON-lines file sink.
///
/// Producers enqueue records into a bounded queue; a writer task drains the
/// queue in bursts, appending each burst as a single buffered write followed
/// by one flush. Durability therefore lags the queue by at most one burst,
/// and an idle sink costs nothing. Closing the sink drops the queue's sender
/// half, letting the writer finish whatever is still queued and exit.
pub struct FileSink {
    tx: Mutex<Option<mpsc::Sender<TrafficRecord>>>,
}

impl FileSink {
    /// Open `path` for appending (creating missing parent directories) and
    /// spawn the writer task.
    pub async fn start(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = open_append(path.as_ref()).await?;
        let (tx, rx) = mpsc::channel(SINK_BACKLOG);

        tokio::spawn(drain_queue(file, rx));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File, SinkError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

/// Writer half of a [`FileSink`].
///
/// `recv_many` returns however many records are queued, up to the burst
/// limit, so bursts coalesce under load and degrade to one-record writes
/// when traffic is sparse. A record that fails to encode is skipped; a
/// failed write loses that burst but keeps the sink alive.
async fn drain_queue(mut file: tokio::fs::File, mut rx: mpsc::Receiver<TrafficRecord>) {
    let mut pending = Vec::with_capacity(BURST_LIMIT);
    let mut buf = Vec::new();

    while rx.recv_many(&mut pending, BURST_LIMIT).await > 0 {
        buf.clear();
        for record in pending.drain(..) {
            match serde_json::to_vec(&record) {
                Ok(line) => {
                    buf.extend_from_slice(&line);
                    buf.push(b'\n');
                }
                Err(err) => tracing::error!(%err, "skipping unencodable traffic record"),
            }
        }

        if let Err(err) = write_burst(&mut file, &buf).await {
            tracing::error!(%err, "traffic log burst lost");
        }
    }

    tracing::debug!("traffic sink writer exiting");
}

async fn write_burst(file: &mut tokio::fs::File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await
}

#[async_trait]
impl LogSink for FileSink {
    async fn log(&self, record: TrafficRecord) -> Result<(), SinkError> {
        let tx = {
            let guard = self.tx.lock().await;
            guard.clone().ok_or(SinkError::Closed)?
        };
        tx.send(record).await.map_err(|_| SinkError::Closed)
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.tx.lock().await.take();
        Ok(())
    }
}

/// Creates one JSON-lines file per connection under a base directory.
pub struct FileSinkFactory {
    directory: PathBuf,
}

impl FileSinkFactory {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    async fn create(&self, connection_id: &str) -> Result<Vec<SharedSink>, SinkError> {
        let path = self.directory.join(format!("{connection_id}.jsonl"));
        let sink = FileSink::start(path).await?;
        Ok(vec![Arc::new(sink)])
    }
}

/// Sink that retains every record in memory; intended for tests.
#[derive(Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<TrafficRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TrafficRecord> {
        self.records.lock().expect("records lock poisoned").clone()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn log(&self, record: TrafficRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .push(record);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use interceptor::{ConnectionId, Envelope};

    use super::*;
    use crate::record::Direction;

    fn record() -> TrafficRecord {
        TrafficRecord::new(
            Direction::Outbound,
            ConnectionId::new(),
            "peer",
            &Envelope::none("a", "b"),
        )
    }

    async fn read_lines(path: &Path) -> Vec<String> {
        // The writer drains asynchronously; poll briefly instead of assuming
        // a fixed delay is enough.
        for _ in 0..50 {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                if !contents.is_empty() {
                    return contents.lines().map(str::to_string).collect();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.jsonl");

        let sink = FileSink::start(&path).await.unwrap();
        sink.log(record()).await.unwrap();
        sink.log(record()).await.unwrap();
        sink.close().await.unwrap();

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 2);
        for line in lines {
            serde_json::from_str::<TrafficRecord>(&line).unwrap();
        }
    }

    #[tokio::test]
    async fn closed_sink_rejects_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::start(dir.path().join("t.jsonl")).await.unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.log(record()).await, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/t.jsonl");

        let sink = FileSink::start(&path).await.unwrap();
        sink.log(record()).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(read_lines(&path).await.len(), 1);
    }
}
