use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anchor_client::solana_sdk::pubkey::Pubkey;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_LEASE_TTL_SECS, LEASE_FILE_EXTENSION, STATE_FILE_EXTENSION, STATE_FILE_PREFIX,
};
use crate::errors::{CrankError, Result};
use crate::states::LedgerState;

/// Persistence for per-mint distribution state.
///
/// `load` yields a zero state when nothing was saved yet and `save`
/// replaces the state atomically. The lease marks a run in progress and
/// must fail with [`CrankError::RunInProgress`] while held.
pub trait LedgerStore: Send + Sync {
    fn load(&self, mint: &Pubkey) -> Result<LedgerState>;

    fn save(&self, mint: &Pubkey, state: &LedgerState) -> Result<()>;

    fn acquire_lease(&self, mint: &Pubkey) -> Result<()>;

    fn release_lease(&self, mint: &Pubkey) -> Result<()>;
}

/// Held lease, released on drop
pub struct RunLease<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    mint: Pubkey,
}

impl<'a, S: LedgerStore + ?Sized> RunLease<'a, S> {
    pub fn acquire(store: &'a S, mint: &Pubkey) -> Result<Self> {
        store.acquire_lease(mint)?;
        debug!(mint = %mint, "run lease acquired");
        Ok(Self { store, mint: *mint })
    }
}

impl<S: LedgerStore + ?Sized> Drop for RunLease<'_, S> {
    fn drop(&mut self) {
        match self.store.release_lease(&self.mint) {
            Ok(()) => debug!(mint = %self.mint, "run lease released"),
            Err(err) => warn!(mint = %self.mint, error = %err, "Unable to release run lease"),
        }
    }
}

/// Contents of a lease file: `<pid> <rfc3339 timestamp>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LeaseHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut parts = contents.split_whitespace();
        let pid = parts.next()?.parse().ok()?;
        let acquired_at = DateTime::parse_from_rfc3339(parts.next()?).ok()?;
        Some(Self {
            pid,
            acquired_at: acquired_at.with_timezone(&Utc),
        })
    }

    fn is_older_than(&self, ttl: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// `None` where the platform offers no process table to look at
fn process_alive(pid: u32) -> Option<bool> {
    let proc = Path::new("/proc");
    if !proc.join("self").exists() {
        return None;
    }
    Some(proc.join(pid.to_string()).exists())
}

/// `state-<mint>.json` files under one directory.
///
/// A lease left behind by a process that died without releasing it is
/// reclaimed once its holder is gone from the process table or it is
/// older than the lease TTL.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    lease_ttl: Duration,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, mint: &Pubkey) -> PathBuf {
        self.dir
            .join(format!("{STATE_FILE_PREFIX}{mint}.{STATE_FILE_EXTENSION}"))
    }

    pub fn lease_path(&self, mint: &Pubkey) -> PathBuf {
        self.dir
            .join(format!("{STATE_FILE_PREFIX}{mint}.{LEASE_FILE_EXTENSION}"))
    }

    /// Holder recorded in the lease file, `None` if there is no lease or
    /// it cannot be parsed
    pub fn lease_holder(&self, mint: &Pubkey) -> Result<Option<LeaseHolder>> {
        match fs::read_to_string(self.lease_path(mint)) {
            Ok(contents) => Ok(LeaseHolder::parse(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn lease_is_stale(&self, path: &Path, holder: Option<LeaseHolder>) -> Result<bool> {
        let Some(holder) = holder else {
            // crashed between create and write; judge by file age
            let modified = fs::metadata(path)?.modified()?;
            return Ok(modified
                .elapsed()
                .map(|age| age > self.lease_ttl)
                .unwrap_or(false));
        };
        if holder.is_older_than(self.lease_ttl) {
            return Ok(true);
        }
        Ok(holder.pid != std::process::id() && process_alive(holder.pid) == Some(false))
    }

    fn create_lease(&self, path: &Path) -> io::Result<()> {
        let mut lock = OpenOptions::new().write(true).create_new(true).open(path)?;
        let holder = LeaseHolder::current();
        writeln!(lock, "{} {}", holder.pid, holder.acquired_at.to_rfc3339())
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self, mint: &Pubkey) -> Result<LedgerState> {
        let path = self.state_path(mint);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(LedgerState::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, mint: &Pubkey, state: &LedgerState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.state_path(mint);
        let staging = path.with_extension(format!("{STATE_FILE_EXTENSION}.tmp"));

        let mut file = File::create(&staging)?;
        file.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&staging, &path)?;
        debug!(path = %path.display(), "ledger state saved");
        Ok(())
    }

    fn acquire_lease(&self, mint: &Pubkey) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lease_path(mint);
        match self.create_lease(&path) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }

        let holder = self.lease_holder(mint)?;
        if !self.lease_is_stale(&path, holder)? {
            return Err(CrankError::RunInProgress(*mint));
        }
        warn!(
            mint = %mint,
            pid = ?holder.map(|h| h.pid),
            acquired_at = ?holder.map(|h| h.acquired_at),
            "Reclaiming stale run lease"
        );
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        // another process may reclaim it first
        match self.create_lease(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(CrankError::RunInProgress(*mint))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn release_lease(&self, mint: &Pubkey) -> Result<()> {
        match fs::remove_file(self.lease_path(mint)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<Pubkey, LedgerState>>,
    leases: Mutex<HashSet<Pubkey>>,
    saves: Mutex<usize>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        *guard(&self.saves)
    }

    pub fn is_leased(&self, mint: &Pubkey) -> bool {
        guard(&self.leases).contains(mint)
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self, mint: &Pubkey) -> Result<LedgerState> {
        Ok(guard(&self.states).get(mint).cloned().unwrap_or_default())
    }

    fn save(&self, mint: &Pubkey, state: &LedgerState) -> Result<()> {
        guard(&self.states).insert(*mint, state.clone());
        *guard(&self.saves) += 1;
        Ok(())
    }

    fn acquire_lease(&self, mint: &Pubkey) -> Result<()> {
        if !guard(&self.leases).insert(*mint) {
            return Err(CrankError::RunInProgress(*mint));
        }
        Ok(())
    }

    fn release_lease(&self, mint: &Pubkey) -> Result<()> {
        guard(&self.leases).remove(mint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::RunRecord;

    fn sample_state() -> LedgerState {
        let mut state = LedgerState::default();
        state
            .record_run(RunRecord {
                timestamp: chrono::Utc::now(),
                success_count: 3,
                fail_count: 2,
                total_distributed: 4_200,
                records: Vec::new(),
            })
            .unwrap();
        state
    }

    #[test]
    fn missing_file_loads_zero_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        assert_eq!(store.load(&Pubkey::new_unique()).unwrap(), LedgerState::default());
    }

    #[test]
    fn save_then_load_and_no_staging_file_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        let state = sample_state();

        store.save(&mint, &state).unwrap();
        assert_eq!(store.load(&mint).unwrap(), state);

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec![format!("state-{mint}.json")]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        fs::write(store.state_path(&mint), "{ not json").unwrap();
        assert!(matches!(store.load(&mint), Err(CrankError::LedgerFormat(_))));
    }

    #[test]
    fn lease_is_exclusive_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        let other = Pubkey::new_unique();

        let lease = RunLease::acquire(&store, &mint).unwrap();
        assert!(store.lease_path(&mint).exists());
        assert!(matches!(
            RunLease::acquire(&store, &mint),
            Err(CrankError::RunInProgress(m)) if m == mint
        ));
        let _other = RunLease::acquire(&store, &other).unwrap();

        drop(lease);
        assert!(!store.lease_path(&mint).exists());
        let _again = RunLease::acquire(&store, &mint).unwrap();
    }

    #[test]
    fn lease_records_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();

        let _lease = RunLease::acquire(&store, &mint).unwrap();
        let holder = store.lease_holder(&mint).unwrap().unwrap();
        assert_eq!(holder.pid, std::process::id());
        assert!(!holder.is_older_than(Duration::from_secs(60)));
    }

    #[test]
    fn expired_lease_from_a_crashed_run_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        fs::write(store.lease_path(&mint), "999999 2020-01-01T00:00:00+00:00\n").unwrap();

        let lease = RunLease::acquire(&store, &mint).unwrap();
        assert_eq!(store.lease_holder(&mint).unwrap().unwrap().pid, std::process::id());
        drop(lease);
        assert!(!store.lease_path(&mint).exists());
    }

    #[test]
    fn fresh_lease_of_a_live_process_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        let live = format!("{} {}\n", std::process::id(), Utc::now().to_rfc3339());
        fs::write(store.lease_path(&mint), &live).unwrap();

        assert!(matches!(
            RunLease::acquire(&store, &mint),
            Err(CrankError::RunInProgress(_))
        ));
        assert_eq!(fs::read_to_string(store.lease_path(&mint)).unwrap(), live);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn fresh_lease_of_a_dead_process_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mint = Pubkey::new_unique();
        // above any kernel pid_max
        fs::write(
            store.lease_path(&mint),
            format!("{} {}\n", u32::MAX, Utc::now().to_rfc3339()),
        )
        .unwrap();

        let _lease = RunLease::acquire(&store, &mint).unwrap();
    }

    #[test]
    fn short_ttl_reclaims_unreadable_lease() {
        let dir = tempfile::tempdir().unwrap();
        let mint = Pubkey::new_unique();
        let patient = JsonFileStore::new(dir.path());
        fs::write(patient.lease_path(&mint), "").unwrap();
        assert!(matches!(
            RunLease::acquire(&patient, &mint),
            Err(CrankError::RunInProgress(_))
        ));

        std::thread::sleep(Duration::from_millis(20));
        let impatient = JsonFileStore::new(dir.path()).with_lease_ttl(Duration::from_millis(1));
        let _lease = RunLease::acquire(&impatient, &mint).unwrap();
    }

    #[test]
    fn memory_store_counts_saves_and_leases() {
        let store = MemoryStore::new();
        let mint = Pubkey::new_unique();
        {
            let _lease = RunLease::acquire(&store, &mint).unwrap();
            assert!(store.is_leased(&mint));
            store.save(&mint, &sample_state()).unwrap();
        }
        assert!(!store.is_leased(&mint));
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load(&mint).unwrap().total_distributed, 4_200);
    }
}
