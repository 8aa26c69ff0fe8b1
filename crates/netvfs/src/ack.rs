//! Deferred write acknowledgments.
//!
//! A random-access write returns as soon as its command and payload are on
//! the wire. A background worker consumes the server's answers in order, one
//! per write, and keeps the first failure for the stream to raise later.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::Error;
use crate::framing::FramedReader;
use crate::session::{read_ready, read_response};
use crate::utils::Result;

enum Ack {
    /// One outstanding write answer.
    Write,
    /// Everything queued before this has been acknowledged.
    Stop,
}

struct Worker {
    tx: mpsc::UnboundedSender<Ack>,
    handle: JoinHandle<()>,
}

type Deferred = Arc<std::sync::Mutex<Option<Error>>>;

pub(crate) struct AckPipeline<R> {
    reader: Arc<Mutex<FramedReader<R>>>,
    worker: Option<Worker>,
    deferred: Deferred,
    idle_timeout: Duration,
}

impl<R> AckPipeline<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub(crate) fn new(reader: Arc<Mutex<FramedReader<R>>>, idle_timeout: Duration) -> Self {
        AckPipeline {
            reader,
            worker: None,
            deferred: Arc::new(std::sync::Mutex::new(None)),
            idle_timeout,
        }
    }

    /// True while acknowledgments may still be outstanding.
    pub(crate) fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Queue the acknowledgment of a write that was just sent.
    ///
    /// Restarts the worker if it stopped after idling.
    pub(crate) async fn enqueue(&mut self) {
        if let Some(worker) = &self.worker {
            if worker.tx.send(Ack::Write).is_ok() {
                return;
            }
        }

        // An idle worker refuses new work but finishes its backlog first.
        if let Some(worker) = self.worker.take() {
            join(worker.handle).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ack::Write);
        let handle = tokio::spawn(run(
            rx,
            Arc::clone(&self.reader),
            Arc::clone(&self.deferred),
            self.idle_timeout,
        ));
        debug!("acknowledgment worker started");
        self.worker = Some(Worker { tx, handle });
    }

    /// Wait until every queued acknowledgment has been consumed.
    pub(crate) async fn drain(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(Ack::Stop);
            join(worker.handle).await;
        }
    }

    /// The first failure since the last call, if any.
    pub(crate) fn take_error(&self) -> Option<Error> {
        self.deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!("acknowledgment worker failed: {e}");
    }
}

async fn run<R: AsyncRead + Unpin>(
    mut rx: mpsc::UnboundedReceiver<Ack>,
    reader: Arc<Mutex<FramedReader<R>>>,
    deferred: Deferred,
    idle_timeout: Duration,
) {
    loop {
        match timeout(idle_timeout, rx.recv()).await {
            Ok(Some(Ack::Write)) => acknowledge(&reader, &deferred).await,
            Ok(Some(Ack::Stop)) | Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Ok(ack) = rx.try_recv() {
                    if let Ack::Write = ack {
                        acknowledge(&reader, &deferred).await;
                    }
                }
                debug!("acknowledgment worker idle");
                break;
            }
        }
    }
}

async fn acknowledge<R: AsyncRead + Unpin>(
    reader: &Mutex<FramedReader<R>>,
    deferred: &std::sync::Mutex<Option<Error>>,
) {
    let mut reader = reader.lock().await;
    if let Err(err) = read_ack(&mut *reader).await {
        error!("write failed: {err}");
        let mut slot = deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }
}

async fn read_ack<R: AsyncRead + Unpin>(reader: &mut FramedReader<R>) -> Result<()> {
    let response = read_response(reader).await?;
    let ready = read_ready(reader).await;
    response.into_result().and(ready)
}

#[cfg(test)]
fn pipeline(wire: &'static [u8], idle_timeout: Duration) -> AckPipeline<&'static [u8]> {
    use crate::framing::MAX_LINE_LENGTH;

    let reader = FramedReader::new(wire, MAX_LINE_LENGTH, Duration::from_secs(5));
    AckPipeline::new(Arc::new(Mutex::new(reader)), idle_timeout)
}

#[tokio::test]
async fn acknowledgments_in_order() {
    let mut acks = pipeline(b"OK\nREADY\nOK\nREADY\nOK\n", Duration::from_secs(5));
    acks.enqueue().await;
    acks.enqueue().await;
    assert!(acks.is_running());

    acks.drain().await;
    assert!(!acks.is_running());
    assert!(acks.take_error().is_none());

    // Nothing beyond the two answers was consumed.
    let mut reader = acks.reader.lock().await;
    assert!(read_response(&mut *reader).await.unwrap().is_ok());
}

#[tokio::test]
async fn first_failure_wins() {
    let wire = b"ERROR code=\"unauthorised\" details=\"ro\"\nREADY\nERROR code=\"eof\"\nREADY\n";
    let mut acks = pipeline(wire, Duration::from_secs(5));
    acks.enqueue().await;
    acks.enqueue().await;
    acks.drain().await;

    assert!(matches!(acks.take_error(), Some(Error::PermissionDenied(d)) if d == "ro"));
    assert!(acks.take_error().is_none());
}

#[tokio::test]
async fn idle_worker_restarts() {
    let mut acks = pipeline(b"OK\nREADY\nOK\nREADY\n", Duration::from_millis(20));
    acks.enqueue().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!acks.is_running());

    acks.enqueue().await;
    acks.drain().await;
    assert!(acks.take_error().is_none());

    let mut reader = acks.reader.lock().await;
    assert!(matches!(reader.read_line().await, Err(Error::Io(_))));
}
