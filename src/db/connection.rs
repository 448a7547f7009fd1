use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::{
    error::{is_corruption, read_error, StoreError},
    migrations::run_migrations,
};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    poisoned: AtomicBool,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// Handle to the sample store.
///
/// All statements run on one dedicated worker thread that owns the SQLite connection,
/// so every call against a given instance is serialized. Clones share the worker.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let mut conn = Connection::open(path).map_err(|err| {
        if is_corruption(&err) {
            StoreError::Corrupt(err.to_string())
        } else {
            StoreError::Unavailable(format!("failed to open SQLite database: {err}"))
        }
    })?;

    for (pragma, value) in [
        ("journal_mode", "WAL"),
        ("synchronous", "FULL"),
        ("foreign_keys", "ON"),
    ] {
        if let Err(err) = conn.pragma_update(None, pragma, value) {
            if is_corruption(&err) {
                return Err(StoreError::Corrupt(err.to_string()));
            }
            error!("Failed to set {pragma}={value}: {err}");
        }
    }

    let integrity: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(read_error)?;
    if integrity != "ok" {
        return Err(StoreError::Corrupt(format!("quick_check reported: {integrity}")));
    }

    run_migrations(&mut conn)?;
    Ok(conn)
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed to create database directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StoreError>>();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("blo-tracker-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .map_err(|err| {
                StoreError::Unavailable(format!("failed to spawn database worker thread: {err}"))
            })?;

        let ready = ready_rx.recv().map_err(|_| {
            StoreError::Unavailable("database worker exited before signaling readiness".into())
        })?;

        if let Err(err) = ready {
            let _ = worker.join();
            return Err(err);
        }

        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
                poisoned: AtomicBool::new(false),
            }),
            db_path: Arc::new(db_path),
        })
    }

    /// Discards the database files at `db_path` and opens a fresh, empty store.
    ///
    /// This is the only way back from `StoreError::Corrupt`. Every other handle to the
    /// old store must be dropped first.
    pub fn recreate(db_path: PathBuf) -> Result<Self, StoreError> {
        for suffix in ["", "-wal", "-shm"] {
            let mut target = db_path.clone().into_os_string();
            target.push(suffix);
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StoreError::Unavailable(format!(
                        "failed to remove {}: {err}",
                        PathBuf::from(target).display()
                    )))
                }
            }
        }

        warn!("Recreating sample store at {}", db_path.display());
        Self::new(db_path)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_poisoned() {
            return Err(StoreError::Corrupt(
                "store instance was poisoned by an earlier corruption error".into(),
            ));
        }

        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| StoreError::Unavailable(format!("failed to send command to DB thread: {err}")))?;

        let result = reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("database thread terminated unexpectedly".into()))?;

        if let Err(StoreError::Corrupt(reason)) = &result {
            if !self.inner.poisoned.swap(true, Ordering::AcqRel) {
                error!("Sample store at {} is corrupt: {reason}", self.db_path.display());
            }
        }

        result
    }
}
