use std::future::{self, Future};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

use crate::aof::{self, Aof};
use crate::commands::{self, Command};
use crate::connection::Connection;
use crate::frame::{self, Frame};
use crate::store::Store;
use crate::Error;

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    /// `None` disables persistence.
    pub aof: Option<AofConfig>,
}

#[derive(Clone, Debug)]
pub struct AofConfig {
    pub path: PathBuf,
    /// `None` disables the periodic fsync.
    pub fsync_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            aof: Some(AofConfig::default()),
        }
    }
}

impl Default for AofConfig {
    fn default() -> Self {
        AofConfig {
            path: PathBuf::from("appendonly.aof"),
            fsync_interval: Some(aof::DEFAULT_FSYNC_INTERVAL),
        }
    }
}

/// Binds the listener and serves until the process receives Ctrl-C.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.bind, config.port)).await?;

    serve(listener, config.aof, async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await
}

/// Restores the store from the append-only log, then accepts connections on `listener` until
/// `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    aof: Option<AofConfig>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let store = Store::new();

    let aof = match aof {
        Some(config) => Some(restore(&store, &config).await?),
        None => None,
    };

    info!("Redis server listening on {}", listener.local_addr()?);

    let failed = {
        let aof = aof.clone();
        async move {
            match aof {
                Some(aof) => aof.failed().await,
                None => future::pending().await,
            }
        }
    };

    tokio::pin!(shutdown);
    tokio::pin!(failed);

    loop {
        let (socket, client_address) = tokio::select! {
            res = listener.accept() => res?,
            _ = &mut shutdown => break,
            err = &mut failed => {
                error!("Append-only log failed, shutting down: {}", err);
                return Err(err.into());
            }
        };
        let store = store.clone();
        let aof = aof.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, store, aof).await {
                error!("Connection error: {}", e);
            }
        });
    }

    info!("Shutting down");
    if let Some(aof) = aof {
        aof.shutdown().await?;
    }

    Ok(())
}

async fn restore(store: &Store, config: &AofConfig) -> Result<Aof, Error> {
    let aof = Aof::open(&config.path, config.fsync_interval).await?;

    aof.replay(|frame| {
        let res = commands::dispatch(frame, store);
        if let Frame::Error(e) = res {
            warn!("Logged command failed on replay: {}", e);
        }
    })
    .await?;

    Ok(aof)
}

/// Runs one command frame against the store and returns the reply. Successful write commands are
/// appended to `aof`, if any. Only a failing log is an error; everything else is a reply.
pub async fn apply(frame: Frame, store: &Store, aof: Option<&Aof>) -> Result<Frame, Error> {
    let cmd = match Command::try_from(frame.clone()) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("Rejected command: {}", e);
            return Ok(Frame::Error(e.to_string()));
        }
    };

    match aof {
        Some(aof) if cmd.is_write() => {
            let res = aof
                .record(&frame, || commands::execute(cmd, store))
                .await?;
            Ok(res)
        }
        _ => Ok(commands::execute(cmd, store)),
    }
}

#[instrument(
    name = "connection",
    skip(stream, store, aof),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    aof: Option<Aof>,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(frame::Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                // The rest of the stream can't be trusted, tell the client and hang up.
                let res = Frame::Error(format!("ERR protocol error; {}", e));
                conn.write_frame(&res).await?;
                return Err(e.into());
            }
        };

        debug!("Received frame from client: {}", frame);
        let res = apply(frame, &store, aof.as_ref()).await?;
        debug!("Sending response to client: {}", res);

        conn.write_frame(&res).await?;
    }

    info!("Connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn apply_logs_successful_writes_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        let aof = Aof::open(dir.path().join("appendonly.aof"), None)
            .await
            .unwrap();

        let frames = [
            Frame::command(["SET", "foo", "bar"]),
            Frame::command(["GET", "foo"]),
            Frame::command(["SET", "foo"]),
            Frame::command(["HSET", "h", "f", "v"]),
            Frame::command(["PING"]),
            Frame::command(["NOPE"]),
        ];
        for frame in frames {
            apply(frame, &store, Some(&aof)).await.unwrap();
        }

        let mut logged = vec![];
        aof.replay(|frame| logged.push(frame)).await.unwrap();

        assert_eq!(
            logged,
            vec![
                Frame::command(["SET", "foo", "bar"]),
                Frame::command(["HSET", "h", "f", "v"]),
            ]
        );
    }

    #[tokio::test]
    async fn apply_without_log() {
        let store = Store::new();

        let res = apply(Frame::command(["SET", "foo", "bar"]), &store, None)
            .await
            .unwrap();
        assert_eq!(res, Frame::Simple("OK".to_string()));

        let res = apply(Frame::command(["GET", "foo"]), &store, None)
            .await
            .unwrap();
        assert_eq!(res, Frame::Bulk(Bytes::from("bar")));
    }

    #[tokio::test]
    async fn restore_from_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig {
            path: dir.path().join("appendonly.aof"),
            fsync_interval: None,
        };

        let store = Store::new();
        restore(&store, &config).await.unwrap();

        assert!(store.is_empty());
        assert!(config.path.exists());
    }

    #[tokio::test]
    async fn restore_rebuilds_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig {
            path: dir.path().join("appendonly.aof"),
            fsync_interval: None,
        };

        let live = Store::new();
        {
            let aof = Aof::open(&config.path, None).await.unwrap();
            for frame in [
                Frame::command(["SET", "a", "1"]),
                Frame::command(["SET", "a", "2"]),
                Frame::command(["SET", "b", ""]),
                Frame::command(["HSET", "h", "x", "1"]),
                Frame::command(["HSET", "h", "y", "2"]),
                Frame::command(["HSET", "h", "x", "3"]),
            ] {
                apply(frame, &live, Some(&aof)).await.unwrap();
            }
            aof.shutdown().await.unwrap();
        }

        let restored = Store::new();
        restore(&restored, &config).await.unwrap();

        for key in ["a", "b", "missing"] {
            assert_eq!(restored.get(key), live.get(key));
        }
        let mut expected = live.hgetall("h").unwrap();
        let mut actual = restored.hgetall("h").unwrap();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(restored.len(), live.len());
        assert_eq!(restored.hash_count(), live.hash_count());
    }
}
