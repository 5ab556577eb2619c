//! Server Context and Accept Loop
//!
//! [`ServerContext`] owns everything that is shared between connections:
//! the store, the snapshot manager, the optional append-only log, the
//! command handler and the background timers. It is built once from a
//! [`Config`] and handed to every session behind an `Arc`.
//!
//! ## Startup Restore
//!
//! Before any session serves commands the data is restored exactly once per
//! process:
//!
//! 1. Load the snapshot file, if there is one
//! 2. Replay the append-only log, if enabled
//! 3. Start the log flusher and one timer per save rule
//!
//! Sessions call [`ServerContext::ensure_restored`]; the first caller does
//! the work and everyone else waits for it to finish.
//!
//! A snapshot or log that cannot be read is logged and skipped: the server
//! comes up with whatever was restored before the failure.

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::persistence::{
    start_save_timers, AppendOnlyLog, PeriodicTask, PersistenceError, ReplayStats, SnapshotManager,
};
use crate::storage::StorageEngine;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Shared state for one running server.
pub struct ServerContext {
    config: Config,
    storage: Arc<StorageEngine>,
    snapshots: Arc<SnapshotManager>,
    aof: Option<Arc<AppendOnlyLog>>,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    restored: OnceCell<()>,
    /// Flusher and save rule timers; dropping them stops the tasks
    timers: Mutex<Vec<PeriodicTask>>,
}

impl ServerContext {
    /// Builds the context, opening the append-only log if it is enabled.
    ///
    /// Nothing is loaded from disk yet; see [`ServerContext::ensure_restored`].
    pub fn new(config: Config) -> Result<Self, PersistenceError> {
        let storage = Arc::new(StorageEngine::new());
        let snapshots = Arc::new(SnapshotManager::new(
            config.snapshot_path(),
            config.save_rules.clone(),
        ));

        let aof = if config.appendonly {
            Some(Arc::new(AppendOnlyLog::open(
                config.aof_path(),
                config.appendfsync,
            )?))
        } else {
            None
        };

        let mut command_handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&snapshots))
            .with_password(config.requirepass.clone());
        if let Some(aof) = &aof {
            command_handler = command_handler.with_aof(Arc::clone(aof));
        }

        Ok(Self {
            config,
            storage,
            snapshots,
            aof,
            command_handler,
            stats: Arc::new(ConnectionStats::new()),
            restored: OnceCell::new(),
            timers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// A handler for a new session.
    pub fn command_handler(&self) -> CommandHandler {
        self.command_handler.clone()
    }

    /// Restores persisted data and starts the timers, once per process.
    ///
    /// Unreadable persisted data does not fail this; only a restore task
    /// that could not run is returned as an error.
    pub async fn ensure_restored(&self) -> Result<(), PersistenceError> {
        self.restored
            .get_or_try_init(|| self.restore())
            .await
            .map(|_| ())
    }

    async fn restore(&self) -> Result<(), PersistenceError> {
        let storage = Arc::clone(&self.storage);
        let snapshots = Arc::clone(&self.snapshots);
        let aof = self.aof.clone();

        let replayed = tokio::task::spawn_blocking(move || -> Option<ReplayStats> {
            if let Err(e) = snapshots.load(&storage) {
                error!(
                    path = %snapshots.path().display(),
                    error = %e,
                    "Failed to load snapshot, starting empty"
                );
            }

            let aof = aof?;
            let replay = CommandHandler::for_replay(storage, snapshots);
            match AppendOnlyLog::replay(aof.path(), &replay) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    error!(path = %aof.path().display(), error = %e, "Failed to replay append-only log");
                    None
                }
            }
        })
        .await
        .map_err(|e| PersistenceError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(aof) = &self.aof {
            timers.push(aof.start_flusher());
        }
        timers.extend(start_save_timers(
            Arc::clone(&self.snapshots),
            Arc::clone(&self.storage),
        ));

        info!(
            keys = self.storage.len(),
            replayed = replayed.map(|stats| stats.applied).unwrap_or(0),
            timers = timers.len(),
            "Data restored"
        );
        Ok(())
    }
}

/// A bound listener plus the context its sessions share.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Binds `addr` and builds the server context from `config`.
    pub async fn bind(addr: &str, config: Config) -> anyhow::Result<Self> {
        let ctx = Arc::new(ServerContext::new(config)?);
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, ctx })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Restores data, then accepts connections until the task is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        self.ctx.ensure_restored().await?;
        accept_loop(self.listener, self.ctx).await;
        Ok(())
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let ctx = Arc::clone(&ctx);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, ctx).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsyncPolicy, SaveRule};
    use crate::connection::{ConnectionError, ConnectionHandler};
    use crate::protocol::RespValue;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn command(args: &[&str]) -> RespValue {
        RespValue::array(
            args.iter()
                .map(|s| RespValue::bulk_string(Bytes::from(s.to_string())))
                .collect(),
        )
    }

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_restore_from_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ServerContext::new(config_in(dir.path())).unwrap();

        ctx.ensure_restored().await.unwrap();
        assert!(ctx.storage().is_empty());
    }

    #[tokio::test]
    async fn test_restore_loads_snapshot_then_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.appendonly = true;
        config.appendfsync = FsyncPolicy::Always;

        // Snapshot holds a=1 and b=1, the log then overwrites a
        let seed = StorageEngine::new();
        seed.set(Bytes::from("a"), Bytes::from("1"));
        seed.set(Bytes::from("b"), Bytes::from("1"));
        SnapshotManager::new(config.snapshot_path(), Vec::new())
            .save(&seed)
            .unwrap();
        std::fs::write(
            config.aof_path(),
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n2\r\n",
        )
        .unwrap();

        let ctx = ServerContext::new(config).unwrap();
        ctx.ensure_restored().await.unwrap();

        assert_eq!(ctx.storage().get(&Bytes::from("a")).unwrap().value, Bytes::from("2"));
        assert_eq!(ctx.storage().get(&Bytes::from("b")).unwrap().value, Bytes::from("1"));
    }

    #[tokio::test]
    async fn test_restore_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.appendonly = true;
        std::fs::write(
            config.aof_path(),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\nold\r\n",
        )
        .unwrap();

        let ctx = ServerContext::new(config).unwrap();
        ctx.ensure_restored().await.unwrap();

        ctx.storage().set(Bytes::from("k"), Bytes::from("new"));
        ctx.ensure_restored().await.unwrap();

        assert_eq!(ctx.storage().get(&Bytes::from("k")).unwrap().value, Bytes::from("new"));
    }

    #[tokio::test]
    async fn test_restore_starts_save_timers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.save_rules = vec![SaveRule { interval: Duration::from_millis(20), changes: 1 }];
        let snapshot_path = config.snapshot_path();

        let ctx = ServerContext::new(config).unwrap();
        ctx.ensure_restored().await.unwrap();

        let handler = ctx.command_handler();
        handler.execute(command(&["SET", "k", "v"]));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(snapshot_path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_still_serves_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.appendonly = true;
        std::fs::write(config.snapshot_path(), b"garbage").unwrap();
        std::fs::write(
            config.aof_path(),
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n",
        )
        .unwrap();

        let ctx = Arc::new(ServerContext::new(config).unwrap());
        ctx.ensure_restored().await.unwrap();

        // The log is still replayed on top of the empty store
        assert_eq!(ctx.storage().get(&Bytes::from("a")).unwrap().value, Bytes::from("1"));

        for _ in 0..2 {
            let stream = tokio_test::io::Builder::new()
                .read(b"*1\r\n$4\r\nPING\r\n")
                .write(b"+PONG\r\n")
                .read(b"*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n")
                .write(b"+OK\r\n")
                .build();
            let addr = "127.0.0.1:9999".parse().unwrap();
            let result = ConnectionHandler::new(stream, addr, Arc::clone(&ctx)).run().await;
            assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        }
        assert!(ctx.storage().exists(&Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_server_serves_clients() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind("127.0.0.1:0", config_in(dir.path()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = Arc::clone(server.context());
        tokio::spawn(server.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$6\r\ndurakv\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");
        assert!(ctx.storage().exists(&Bytes::from("name")));
    }

}
