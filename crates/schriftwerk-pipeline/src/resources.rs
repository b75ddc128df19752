// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resource lifecycle manager.
//
// Every transient the pipeline creates (source bytes, page rasters, output
// files) is allocated through a per-job `JobResources` scope. Each allocation
// returns a `TransientResource` guard that releases itself when dropped, and
// the scope releases whatever is left when the job ends. A manager-wide ledger
// counts allocations and releases so tests can assert that nothing leaked.
//
// Layout on disk:
//
//   <root>/<job-id>/<resource-id>-<name>
//
// Directories left behind by a crashed process are removed by
// `ResourceManager::sweep_stale`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use schriftwerk_core::JobId;
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, info, instrument, warn};

/// Directory name used under the system temp dir.
const TEMP_DIR_NAME: &str = "schriftwerk";

/// Job directories older than this are considered abandoned.
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(30 * 60);

/// What a transient holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The source PDF bytes.
    Source,
    /// A rasterized page image.
    Raster,
    /// The reassembled artifact before it is handed to the caller.
    Output,
}

impl ResourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Raster => "raster",
            Self::Output => "output",
        }
    }
}

/// Identifier of one allocation, unique within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Counters shared by every scope of one manager.
#[derive(Debug, Default)]
struct Ledger {
    next_id: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
    active_jobs: Mutex<HashSet<String>>,
}

impl Ledger {
    fn next_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Where an allocation lives.
#[derive(Debug)]
enum Location {
    File(PathBuf),
    Memory { bytes: usize },
}

#[derive(Debug)]
struct Entry {
    kind: ResourceKind,
    location: Location,
}

/// The live allocations of one job.
#[derive(Debug)]
struct Registry {
    job: JobId,
    entries: Mutex<HashMap<ResourceId, Entry>>,
    ledger: Arc<Ledger>,
}

impl Registry {
    fn insert(&self, id: ResourceId, kind: ResourceKind, location: Location) {
        lock(&self.entries).insert(id, Entry { kind, location });
        self.ledger.allocated.fetch_add(1, Ordering::SeqCst);
    }

    /// Release `id` if it is still live. Returns whether anything happened.
    fn release(&self, id: ResourceId) -> bool {
        let entry = lock(&self.entries).remove(&id);
        match entry {
            Some(entry) => {
                dispose(self.job, id, entry);
                self.ledger.released.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn release_all(&self) -> usize {
        let drained: Vec<(ResourceId, Entry)> = lock(&self.entries).drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            dispose(self.job, id, entry);
            self.ledger.released.fetch_add(1, Ordering::SeqCst);
        }
        count
    }

    fn is_live(&self, id: ResourceId) -> bool {
        lock(&self.entries).contains_key(&id)
    }

    fn live_count(&self) -> usize {
        lock(&self.entries).len()
    }
}

/// Remove the backing storage of an entry. Failures are logged, never raised:
/// release must not fail the job that is being cleaned up.
fn dispose(job: JobId, id: ResourceId, entry: Entry) {
    match entry.location {
        Location::File(path) => match fs::remove_file(&path) {
            Ok(()) => debug!(%job, %id, kind = entry.kind.as_str(), "Transient file removed"),
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                debug!(%job, %id, kind = entry.kind.as_str(), "Transient file was never written")
            }
            Err(err) => warn!(
                %job, %id, path = %path.display(), error = %err,
                "Failed to remove transient file"
            ),
        },
        Location::Memory { bytes } => {
            debug!(%job, %id, kind = entry.kind.as_str(), bytes, "Memory transient released")
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceManager
// ---------------------------------------------------------------------------

/// Owns the scratch root and the allocation ledger.
///
/// One manager is created per process and passed to the orchestrator
/// explicitly.
#[derive(Debug)]
pub struct ResourceManager {
    root: PathBuf,
    ledger: Arc<Ledger>,
}

impl ResourceManager {
    /// Use `root` as the scratch directory, creating it if needed.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|err| {
            SchriftwerkError::Resource(format!(
                "cannot create scratch directory {}: {err}",
                root.display()
            ))
        })?;
        debug!("Resource manager ready");
        Ok(Self {
            root,
            ledger: Arc::new(Ledger::default()),
        })
    }

    /// Use `<system temp>/schriftwerk` as the scratch directory.
    pub fn in_system_temp() -> Result<Self> {
        Self::new(std::env::temp_dir().join(TEMP_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the resource scope of one job.
    pub fn scope(&self, job: JobId) -> Result<JobResources> {
        let name = job.to_string();
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir).map_err(|err| {
            SchriftwerkError::Resource(format!(
                "cannot create job directory {}: {err}",
                dir.display()
            ))
        })?;
        lock(&self.ledger.active_jobs).insert(name);
        debug!(%job, dir = %dir.display(), "Job scope opened");
        Ok(JobResources {
            dir,
            registry: Arc::new(Registry {
                job,
                entries: Mutex::new(HashMap::new()),
                ledger: Arc::clone(&self.ledger),
            }),
        })
    }

    /// Allocations made since the manager was created.
    pub fn allocated_total(&self) -> u64 {
        self.ledger.allocated.load(Ordering::SeqCst)
    }

    /// Releases performed since the manager was created.
    pub fn released_total(&self) -> u64 {
        self.ledger.released.load(Ordering::SeqCst)
    }

    /// Allocations not yet released, across all jobs.
    pub fn live_count(&self) -> u64 {
        self.allocated_total().saturating_sub(self.released_total())
    }

    /// Remove job directories under the root that are older than `max_age`
    /// and do not belong to a job in progress. Returns how many were removed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            SchriftwerkError::Resource(format!("cannot list {}: {err}", self.root.display()))
        })?;
        let now = SystemTime::now();
        let active = lock(&self.ledger.active_jobs).clone();

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if active.contains(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let path = entry.path();
            let outcome = if metadata.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match outcome {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Stale scratch entry removed");
                    removed += 1;
                }
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove stale scratch entry"),
            }
        }

        if removed > 0 {
            info!(removed, "Stale scratch entries swept");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// JobResources
// ---------------------------------------------------------------------------

/// The resource scope of one job. Dropping it releases every allocation that
/// is still live and removes the job directory.
#[derive(Debug)]
pub struct JobResources {
    dir: PathBuf,
    registry: Arc<Registry>,
}

impl JobResources {
    pub fn job_id(&self) -> JobId {
        self.registry.job
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a file path in the job directory. The file itself is created
    /// by the caller; releasing removes it if it exists.
    pub fn allocate_file(&self, kind: ResourceKind, name: &str) -> TransientResource {
        let id = self.registry.ledger.next_id();
        let path = self.dir.join(format!("{id}-{name}"));
        self.registry.insert(id, kind, Location::File(path.clone()));
        debug!(job = %self.registry.job, %id, kind = kind.as_str(), "File transient allocated");
        TransientResource {
            id,
            kind,
            path: Some(path),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Track an in-memory buffer of `bytes` bytes.
    pub fn register_memory(&self, kind: ResourceKind, bytes: usize) -> TransientResource {
        let id = self.registry.ledger.next_id();
        self.registry.insert(id, kind, Location::Memory { bytes });
        debug!(job = %self.registry.job, %id, kind = kind.as_str(), bytes, "Memory transient registered");
        TransientResource {
            id,
            kind,
            path: None,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Release one allocation. Releasing twice is a no-op.
    pub fn release(&self, id: ResourceId) -> bool {
        self.registry.release(id)
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.registry.is_live(id)
    }

    /// Allocations of this job not yet released.
    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Release everything still live and remove the job directory.
    /// Safe to call more than once.
    pub fn release_all(&self) -> usize {
        let released = self.registry.release_all();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => warn!(
                job = %self.registry.job, dir = %self.dir.display(), error = %err,
                "Failed to remove job directory"
            ),
        }
        lock(&self.registry.ledger.active_jobs).remove(&self.registry.job.to_string());
        if released > 0 {
            debug!(job = %self.registry.job, released, "Job scope released");
        }
        released
    }
}

impl Drop for JobResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ---------------------------------------------------------------------------
// TransientResource
// ---------------------------------------------------------------------------

/// Guard for one allocation. Released on drop unless released earlier.
#[derive(Debug)]
pub struct TransientResource {
    id: ResourceId,
    kind: ResourceKind,
    path: Option<PathBuf>,
    registry: Arc<Registry>,
}

impl TransientResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Backing file, for file transients.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.registry.is_live(self.id)
    }

    /// Release now instead of at drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TransientResource {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
