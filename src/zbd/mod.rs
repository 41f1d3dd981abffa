//! Zoned Block Device I/O adaptation core: retargets read/write/trim
//! requests from a generator that knows nothing about zone constraints so
//! every issued request is legal on a host-aware or host-managed device.

pub mod adjuster;
pub mod backend;
pub mod builder;
pub mod completion;
pub mod error;
pub mod io_unit;
pub mod reset;
pub mod table;
pub mod validator;
pub mod zone;

pub use adjuster::{AdjustOutcome, NoopQuiesce, Quiesce};
pub use completion::ZoneReservation;
pub use error::{unaligned_write, Error};
pub use io_unit::{Direction, IoUnit, RunState, Workload};
pub use table::ZoneTable;
pub use validator::{BlockSizeRange, JobConfig};
pub use zone::{Zone, ZoneCondition, ZoneModel, ZoneState, ZoneType};

use backend::ZoneIoctlBackend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Per-job registry of zone tables, shared by refcount across any files
/// that reference the same device path.
///
/// The refcounting itself is `Arc<ZoneTable>` (see [`table::ZoneTable`]'s
/// doc comment); this registry exists only so that a second `open_device`
/// call for an already-open path returns the same `Arc` rather than
/// building a second table.
pub struct Job {
    tables: Mutex<HashMap<PathBuf, Arc<ZoneTable>>>,
}

impl Job {
    pub fn new() -> Self {
        Job {
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Build-or-share the zone table for `path`, then run the Configuration
    /// Validator against it. Idempotent per path.
    pub fn open_device(
        &self,
        path: &Path,
        backend: &dyn ZoneIoctlBackend,
        config: &JobConfig,
        is_writer: bool,
    ) -> Result<Arc<ZoneTable>, Error> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.get(path) {
            return Ok(Arc::clone(existing));
        }

        let zone_size_bytes = config.zone_size.unwrap_or(0);
        let table = builder::build_zone_table(backend, zone_size_bytes >> 9)?;
        validator::validate_direct_io(&table, config, is_writer)?;
        validator::validate_block_sizes(&table, config)?;

        let table = Arc::new(table);
        tables.insert(path.to_path_buf(), Arc::clone(&table));
        info!(path = %path.display(), nr_zones = table.nr_zones, "opened zoned device");
        Ok(table)
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-file handle into a job's shared [`ZoneTable`], scoping the I/O
/// range this file is responsible for. `file_reset` and `adjust_block`
/// operate per-file.
pub struct FileZoneCtx {
    table: Arc<ZoneTable>,
    io_range: (u64, u64),
    read_beyond_wp: bool,
}

impl FileZoneCtx {
    pub fn new(table: Arc<ZoneTable>, io_range: (u64, u64), read_beyond_wp: bool) -> Self {
        FileZoneCtx {
            table,
            io_range,
            read_beyond_wp,
        }
    }

    pub fn table(&self) -> &Arc<ZoneTable> {
        &self.table
    }

    /// Pre-reset zones that would interfere with verification writes.
    pub fn reset_for_start(
        &self,
        backend: &dyn ZoneIoctlBackend,
        verify_enabled: bool,
        writing: bool,
        verifying_now: bool,
        min_bs_sectors: u64,
    ) -> Result<(), Error> {
        reset::file_reset(&self.table, backend, self.io_range, verify_enabled, writing, verifying_now, min_bs_sectors)
    }

    /// Per-request adjustment.
    pub fn adjust_block<'t>(
        &'t self,
        backend: &dyn ZoneIoctlBackend,
        quiesce: &dyn Quiesce,
        io_unit: &mut IoUnit,
    ) -> Result<AdjustOutcome<'t>, Error> {
        adjuster::adjust_block(&self.table, backend, quiesce, io_unit, self.read_beyond_wp)
    }
}

// There is no explicit teardown call here: the last `Arc` clone of a
// `ZoneTable` dropping (via `FileZoneCtx`'s lifetime and `Job`'s own
// lifetime) is the refcount release; `ZoneTable` owns no resource beyond
// memory, so there is nothing further to tear down.
