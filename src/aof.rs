use bytes::BytesMut;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::codec::FrameReader;
use crate::frame::{self, Frame};

pub const DEFAULT_FSYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("append-only log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("append-only log is corrupt after {records} records: {source}")]
    Corrupt {
        records: usize,
        #[source]
        source: frame::Error,
    },
    #[error("append-only log stopped after an earlier failure: {0}")]
    Failed(String),
}

/// The append-only file: every accepted write command, RESP encoded, in the order it was applied.
///
/// Writes go to the OS as soon as they are appended but are only forced to disk by a background
/// task every `fsync_interval`, so a crash loses at most that much. The handle is cheap to clone.
///
/// A failed write or fsync stops the log for good: every later call returns [`Error::Failed`] and
/// [`Aof::failed`] resolves.
#[derive(Clone)]
pub struct Aof {
    inner: Arc<InnerAof>,
}

struct InnerAof {
    path: PathBuf,
    // Single writer. Replay, appends and fsyncs all go through this lock.
    log: Mutex<LogFile>,
    failure: StdMutex<Option<String>>,
    failed: CancellationToken,
    shutdown: CancellationToken,
    flusher: StdMutex<Option<JoinHandle<()>>>,
}

struct LogFile {
    file: File,
    // Length of the file up to the end of the last complete record.
    len: u64,
}

impl Aof {
    /// Opens the log at `path`, creating it if needed. With `Some(interval)` a background task
    /// syncs the file every `interval` until [`Aof::shutdown`]. With `None` the file is only synced
    /// on demand.
    pub async fn open(
        path: impl AsRef<Path>,
        fsync_interval: Option<Duration>,
    ) -> Result<Aof, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await?;

        Aof::from_file(path, file, fsync_interval).await
    }

    async fn from_file(
        path: PathBuf,
        file: File,
        fsync_interval: Option<Duration>,
    ) -> Result<Aof, Error> {
        let len = file.metadata().await?.len();

        let inner = Arc::new(InnerAof {
            path,
            log: Mutex::new(LogFile { file, len }),
            failure: StdMutex::new(None),
            failed: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            flusher: StdMutex::new(None),
        });

        if let Some(interval) = fsync_interval {
            let flusher = tokio::spawn(flush_periodically(
                Arc::downgrade(&inner),
                inner.shutdown.clone(),
                interval,
            ));
            *inner.flusher.lock().unwrap() = Some(flusher);
        }

        info!(
            path = %inner.path.display(),
            ?fsync_interval,
            "Opened append-only log"
        );

        Ok(Aof { inner })
    }

    /// Appends `frame` to the log.
    pub async fn append(&self, frame: &Frame) -> Result<(), Error> {
        let mut log = self.lock().await?;
        self.inner.write(&mut log, frame).await
    }

    /// Runs `apply` and logs `frame` unless the reply is an error, all while holding the writer
    /// lock. Commands are therefore logged in the exact order they hit the store.
    pub async fn record<F>(&self, frame: &Frame, apply: F) -> Result<Frame, Error>
    where
        F: FnOnce() -> Frame,
    {
        let mut log = self.lock().await?;

        let reply = apply();
        if !reply.is_error() {
            self.inner.write(&mut log, frame).await?;
        }

        Ok(reply)
    }

    /// Feeds every logged frame to `apply`, oldest first, and returns how many there were.
    ///
    /// Meant to run once at startup, before anything is appended.
    #[instrument(name = "replay", skip(self, apply), fields(path = %self.inner.path.display()))]
    pub async fn replay<F>(&self, mut apply: F) -> Result<usize, Error>
    where
        F: FnMut(Frame),
    {
        let mut log = self.lock().await?;
        log.file.seek(SeekFrom::Start(0)).await?;

        let mut reader = FrameReader::new(&mut log.file);
        let mut records = 0;

        loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => {
                    debug!("Replaying {}", frame);
                    apply(frame);
                    records += 1;
                }
                Ok(None) => break,
                Err(frame::Error::Io(err)) => return Err(err.into()),
                Err(source) => return Err(Error::Corrupt { records, source }),
            }
        }

        info!(records, "Replayed append-only log");
        Ok(records)
    }

    /// Forces everything appended so far to disk.
    pub async fn sync(&self) -> Result<(), Error> {
        self.check_failure()?;
        self.inner.sync().await
    }

    /// Resolves once the log has stopped after a write or fsync failure.
    pub async fn failed(&self) -> Error {
        self.inner.failed.cancelled().await;
        self.check_failure()
            .err()
            .unwrap_or_else(|| Error::Failed("unknown failure".to_string()))
    }

    /// Stops the background flush task and syncs one last time.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.inner.shutdown.cancel();

        let flusher = self.inner.flusher.lock().unwrap().take();
        if let Some(flusher) = flusher {
            if let Err(err) = flusher.await {
                error!("Append-only log flush task failed: {}", err);
            }
        }

        self.sync().await?;
        info!(path = %self.inner.path.display(), "Closed append-only log");

        Ok(())
    }

    async fn lock(&self) -> Result<MutexGuard<'_, LogFile>, Error> {
        self.check_failure()?;
        Ok(self.inner.log.lock().await)
    }

    fn check_failure(&self) -> Result<(), Error> {
        match self.inner.failure.lock().unwrap().as_ref() {
            Some(err) => Err(Error::Failed(err.clone())),
            None => Ok(()),
        }
    }
}

impl InnerAof {
    async fn write(&self, log: &mut LogFile, frame: &Frame) -> Result<(), Error> {
        let Err(err) = log.write_frame(frame).await else {
            return Ok(());
        };

        error!("Failed to append to append-only log: {}", err);
        self.fail(&err);

        // Drop whatever part of the record made it to the file.
        if let Err(err) = log.file.set_len(log.len).await {
            error!("Failed to truncate append-only log: {}", err);
        }

        Err(err)
    }

    async fn sync(&self) -> Result<(), Error> {
        let log = self.log.lock().await;
        log.file.sync_data().await?;
        Ok(())
    }

    fn fail(&self, err: &Error) {
        self.failure
            .lock()
            .unwrap()
            .get_or_insert_with(|| err.to_string());
        self.failed.cancel();
    }
}

impl LogFile {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        frame.write_to(&mut buf);

        self.file.write_all(&buf).await?;
        // Tokio hands the write off to a blocking thread; wait for it to land before releasing the
        // lock so the next writer can't overtake it.
        self.file.flush().await?;
        self.len += buf.len() as u64;

        Ok(())
    }
}

impl Drop for InnerAof {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn flush_periodically(aof: Weak<InnerAof>, shutdown: CancellationToken, every: Duration) {
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(aof) = aof.upgrade() else {
            break;
        };

        if let Err(err) = aof.sync().await {
            error!("Failed to sync append-only log: {}", err);
            aof.fail(&err);
            break;
        }
    }

    debug!("Append-only log flush task stopped");
}
