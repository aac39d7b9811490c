//! Memory-mapped file format for a rotunda database.
//!
//! A database is one file: a fixed header, a data-source descriptor table,
//! an archive descriptor table, one consolidation-accumulator record per
//! (archive, data source), and then one contiguous block of `rows ×
//! ds_count` f64 slots per archive. Unknown values are stored as NaN.
//!
//! # File Format
//!
//! ```text
//! [0..64)        Header (FileHeader)
//! [64..A)        Data-source table (ds_count × 96 bytes)
//! [A..B)         Archive table (rra_count × 32 bytes)
//! [B..C)         Accumulator table (rra_count × ds_count × 24 bytes)
//! [C..)          Row data, per archive: rows × ds_count f64, row-major
//! ```
//!
//! `C` is the value reported as `header_size`.
//!
//! # Safety
//!
//! This module uses unsafe operations for direct access to the mmap'd
//! region. All offsets derive from a layout that is validated against the
//! actual file size during create/open, and every record size is a
//! multiple of 8 so field alignment holds throughout.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::MmapMut;

use crate::error::{FileError, Result};
use crate::schema::{ConsolidationFn, DsDef, DsKind, RraDef};

/// Magic bytes identifying a rotunda database file.
const FILE_MAGIC: [u8; 4] = *b"RTND";

/// Current file format version.
const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 64;

/// Size of one data-source descriptor in bytes.
const DS_RECORD_SIZE: usize = 96;

/// Size of one archive descriptor in bytes.
const RRA_RECORD_SIZE: usize = 32;

/// Size of one consolidation-accumulator record in bytes.
const CDP_RECORD_SIZE: usize = 24;

/// Size of one row value slot in bytes.
const VALUE_SIZE: usize = 8;

/// Capacity of the fixed name and raw-value fields (including the NUL).
const NAME_FIELD: usize = 24;

/// Fixed header at the start of every database file.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FileHeader {
    /// Magic bytes for file type identification.
    magic: [u8; 4],
    /// File format version.
    version: u32,
    /// Step interval in seconds.
    step: u64,
    /// Number of data sources.
    ds_count: u32,
    /// Number of archives.
    rra_count: u32,
    /// Timestamp of the most recent applied update.
    last_update: i64,
    /// Reserved space (padding to 64 bytes).
    _reserved: [u8; 32],
}

/// On-disk descriptor and mutable state of one data source.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DsRecord {
    /// NUL-padded data source name.
    name: [u8; NAME_FIELD],
    /// Data source type tag (see `DsKind` encoding).
    kind: u32,
    _pad: u32,
    /// Heartbeat in seconds.
    heartbeat: u64,
    /// Smallest acceptable rate; NaN when unbounded.
    min: f64,
    /// Largest acceptable rate; NaN when unbounded.
    max: f64,
    /// NUL-padded raw token of the last seen sample; `U` when unknown.
    last_ds: [u8; NAME_FIELD],
    /// Rate·seconds accumulated in the current step interval.
    pub pdp_value: f64,
    /// Unknown seconds accumulated in the current step interval.
    pub unknown_sec: u64,
}

impl DsRecord {
    /// Builds the initial record for a freshly created database.
    fn new(def: &DsDef) -> Self {
        Self {
            name: pack_str(&def.name),
            kind: def.kind as u32,
            _pad: 0,
            heartbeat: def.heartbeat,
            min: def.min.unwrap_or(f64::NAN),
            max: def.max.unwrap_or(f64::NAN),
            last_ds: pack_str("U"),
            pdp_value: 0.0,
            unknown_sec: 0,
        }
    }

    /// Decodes the immutable definition part of this record.
    pub fn def(&self) -> Result<DsDef> {
        let kind = match self.kind {
            x if x == DsKind::Gauge as u32 => DsKind::Gauge,
            x if x == DsKind::Counter as u32 => DsKind::Counter,
            x if x == DsKind::Derive as u32 => DsKind::Derive,
            x if x == DsKind::Absolute as u32 => DsKind::Absolute,
            other => {
                return Err(FileError::Corrupt {
                    path: String::new(),
                    reason: format!("unknown data source type tag {other}"),
                }
                .into());
            }
        };

        Ok(DsDef {
            name: unpack_str(&self.name),
            kind,
            heartbeat: self.heartbeat,
            min: if self.min.is_nan() { None } else { Some(self.min) },
            max: if self.max.is_nan() { None } else { Some(self.max) },
        })
    }

    /// Returns the raw token of the last seen sample.
    pub fn last_ds(&self) -> String {
        unpack_str(&self.last_ds)
    }

    /// Stores the raw token of the last seen sample.
    ///
    /// The token must fit the fixed field; callers enforce the length
    /// limit before accepting the update.
    pub fn set_last_ds(&mut self, token: &str) {
        self.last_ds = pack_str(token);
    }
}

/// On-disk descriptor and cursor of one archive.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RraRecord {
    /// Consolidation function tag (see `ConsolidationFn` encoding).
    cf: u32,
    /// Circular write cursor, in `[0, rows)`.
    pub cur_row: u32,
    /// X-files factor.
    xff: f64,
    /// Primary data points per row.
    pdp_per_row: u32,
    /// Row capacity.
    rows: u32,
    _reserved: u64,
}

impl RraRecord {
    fn new(def: &RraDef) -> Self {
        Self {
            cf: def.cf as u32,
            cur_row: 0,
            xff: def.xff,
            pdp_per_row: def.pdp_per_row,
            rows: def.rows,
            _reserved: 0,
        }
    }

    /// Decodes the immutable definition part of this record.
    pub fn def(&self) -> Result<RraDef> {
        let cf = match self.cf {
            x if x == ConsolidationFn::Average as u32 => ConsolidationFn::Average,
            x if x == ConsolidationFn::Min as u32 => ConsolidationFn::Min,
            x if x == ConsolidationFn::Max as u32 => ConsolidationFn::Max,
            x if x == ConsolidationFn::Last as u32 => ConsolidationFn::Last,
            other => {
                return Err(FileError::Corrupt {
                    path: String::new(),
                    reason: format!("unknown consolidation function tag {other}"),
                }
                .into());
            }
        };

        Ok(RraDef {
            cf,
            xff: self.xff,
            pdp_per_row: self.pdp_per_row,
            rows: self.rows,
        })
    }
}

/// Persisted consolidation accumulator for one (archive, data source) pair.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CdpRecord {
    /// Accumulated value; NaN while no known primary data point arrived.
    pub value: f64,
    /// Unknown primary data points since the last row emission.
    pub unknown_pdps: u32,
    /// Primary data points seen since the last row emission.
    pub seen_pdps: u32,
    _reserved: u64,
}

impl CdpRecord {
    fn new() -> Self {
        Self {
            value: f64::NAN,
            unknown_pdps: 0,
            seen_pdps: 0,
            _reserved: 0,
        }
    }
}

/// Encodes a string into a fixed NUL-padded field.
fn pack_str(s: &str) -> [u8; NAME_FIELD] {
    let mut field = [0u8; NAME_FIELD];
    let bytes = s.as_bytes();
    field[..bytes.len()].copy_from_slice(bytes);
    field
}

/// Decodes a NUL-padded field back into a string.
fn unpack_str(field: &[u8; NAME_FIELD]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Pre-computed offsets for one database file.
#[derive(Debug, Clone)]
struct DbLayout {
    /// Offset of the data-source table.
    ds_table_offset: usize,
    /// Offset of the archive table.
    rra_table_offset: usize,
    /// Offset of the accumulator table.
    cdp_table_offset: usize,
    /// Offset of the row data region (the reported header size).
    data_offset: usize,
    /// Absolute offset of each archive's row block.
    rra_data_offsets: Vec<usize>,
    /// Total file size in bytes.
    file_size: usize,
    /// Number of data sources (row stride).
    ds_count: usize,
}

impl DbLayout {
    /// Computes the layout for the given table shapes.
    fn new(ds_count: usize, rra_rows: &[u32]) -> Self {
        let rra_count = rra_rows.len();

        let ds_table_offset = HEADER_SIZE;
        let rra_table_offset = ds_table_offset + ds_count * DS_RECORD_SIZE;
        let cdp_table_offset = rra_table_offset + rra_count * RRA_RECORD_SIZE;
        let data_offset = cdp_table_offset + rra_count * ds_count * CDP_RECORD_SIZE;

        let mut rra_data_offsets = Vec::with_capacity(rra_count);
        let mut cursor = data_offset;
        for &rows in rra_rows {
            rra_data_offsets.push(cursor);
            cursor += rows as usize * ds_count * VALUE_SIZE;
        }

        Self {
            ds_table_offset,
            rra_table_offset,
            cdp_table_offset,
            data_offset,
            rra_data_offsets,
            file_size: cursor,
            ds_count,
        }
    }

    /// Byte offset of one data-source record.
    fn ds_offset(&self, ds: usize) -> usize {
        self.ds_table_offset + ds * DS_RECORD_SIZE
    }

    /// Byte offset of one archive record.
    fn rra_offset(&self, rra: usize) -> usize {
        self.rra_table_offset + rra * RRA_RECORD_SIZE
    }

    /// Byte offset of one accumulator record.
    fn cdp_offset(&self, rra: usize, ds: usize) -> usize {
        self.cdp_table_offset + (rra * self.ds_count + ds) * CDP_RECORD_SIZE
    }

    /// Byte offset of one row value slot.
    fn value_offset(&self, rra: usize, row: u32, ds: usize) -> usize {
        self.rra_data_offsets[rra] + (row as usize * self.ds_count + ds) * VALUE_SIZE
    }
}

/// Memory-mapped database file.
///
/// `DbFile` exposes raw, structural access: typed reads and writes of the
/// header, descriptor records, accumulator records, and row value slots.
/// All time and consolidation semantics live above this layer.
///
/// # Thread Safety
///
/// Designed for the single-writer, multiple-reader pattern; the per-path
/// lock registry coordinates access, the mapping itself is freely shared.
#[derive(Debug)]
pub struct DbFile {
    /// Memory mapping of the database file.
    mmap: MmapMut,
    /// Pre-computed offsets.
    layout: DbLayout,
    /// Path to the file (for error reporting).
    path: String,
}

// SAFETY: DbFile is used under the single-writer discipline enforced by the
// per-path lock registry; the mapping itself may move between threads.
unsafe impl Send for DbFile {}

// SAFETY: shared access only performs reads of validated offsets; mutation
// requires &mut and the registry's write lock.
unsafe impl Sync for DbFile {}

impl DbFile {
    /// Creates a new database file with the given definitions.
    ///
    /// The file is pre-allocated to its exact final size. All row value
    /// slots start as NaN (unknown) and all accumulators start empty; the
    /// caller layers creation-time seeding on top.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::AlreadyExists`] if the target exists, or
    /// [`FileError::Io`]/[`FileError::MemoryMap`] on filesystem failure.
    pub fn create<P: AsRef<Path>>(
        path: P,
        step: u64,
        start: i64,
        data_sources: &[DsDef],
        archives: &[RraDef],
    ) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        if path.exists() {
            return Err(FileError::AlreadyExists { path: path_str }.into());
        }

        let rra_rows: Vec<u32> = archives.iter().map(|r| r.rows).collect();
        let layout = DbLayout::new(data_sources.len(), &rra_rows);

        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FileError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        file.set_len(layout.file_size as u64)
            .map_err(|e| FileError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: the file was just created with the exact layout size and
        // we hold the only descriptor to it.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| FileError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        let header = FileHeader {
            magic: FILE_MAGIC,
            version: FORMAT_VERSION,
            step,
            ds_count: data_sources.len() as u32,
            rra_count: archives.len() as u32,
            last_update: start,
            _reserved: [0; 32],
        };
        // SAFETY: the mapping starts page-aligned and is at least
        // HEADER_SIZE bytes, which holds one FileHeader.
        unsafe {
            ptr::write(mmap.as_mut_ptr() as *mut FileHeader, header);
        }

        for (i, def) in data_sources.iter().enumerate() {
            let offset = layout.ds_offset(i);
            // SAFETY: ds_offset is inside the table region sized for
            // ds_count records, and DS_RECORD_SIZE is a multiple of 8.
            unsafe {
                ptr::write(mmap.as_mut_ptr().add(offset) as *mut DsRecord, DsRecord::new(def));
            }
        }

        for (i, def) in archives.iter().enumerate() {
            let offset = layout.rra_offset(i);
            // SAFETY: rra_offset is inside the table region sized for
            // rra_count records.
            unsafe {
                ptr::write(mmap.as_mut_ptr().add(offset) as *mut RraRecord, RraRecord::new(def));
            }
        }

        for rra in 0..archives.len() {
            for ds in 0..data_sources.len() {
                let offset = layout.cdp_offset(rra, ds);
                // SAFETY: cdp_offset is inside the accumulator table sized
                // for rra_count × ds_count records.
                unsafe {
                    ptr::write(mmap.as_mut_ptr().add(offset) as *mut CdpRecord, CdpRecord::new());
                }
            }
        }

        // Row data starts out all-unknown.
        let nan_bits = f64::NAN.to_bits();
        let slot_count = (layout.file_size - layout.data_offset) / VALUE_SIZE;
        // SAFETY: the data region is slot_count × 8 bytes, 8-aligned.
        let data_ptr = unsafe { mmap.as_mut_ptr().add(layout.data_offset) as *mut u64 };
        for i in 0..slot_count {
            // SAFETY: i is bounded by slot_count, staying inside the
            // mapped data region.
            unsafe {
                ptr::write(data_ptr.add(i), nan_bits);
            }
        }

        tracing::debug!(path = %path_str, step, file_size = layout.file_size, "created database file");

        Ok(Self {
            mmap,
            layout,
            path: path_str,
        })
    }

    /// Opens an existing database file and validates its structure.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::NotFound`] if the file is missing, or
    /// [`FileError::Corrupt`] when the magic, version, descriptor tags, or
    /// file size do not match the declared layout.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        if !path.exists() {
            return Err(FileError::NotFound { path: path_str }.into());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FileError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: the file was successfully opened with read/write access.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| FileError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        if mmap.len() < HEADER_SIZE {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: format!(
                    "file is {} bytes, smaller than the {HEADER_SIZE} byte header",
                    mmap.len()
                ),
            }
            .into());
        }

        // SAFETY: at least HEADER_SIZE bytes are mapped and the mapping is
        // page-aligned, so one FileHeader can be read from the start.
        let header = unsafe { ptr::read(mmap.as_ptr() as *const FileHeader) };

        if header.magic != FILE_MAGIC {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: format!(
                    "bad magic bytes: expected {FILE_MAGIC:?}, found {:?}",
                    header.magic
                ),
            }
            .into());
        }
        if header.version != FORMAT_VERSION {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: format!(
                    "unsupported format version {} (expected {FORMAT_VERSION})",
                    header.version
                ),
            }
            .into());
        }
        if header.step == 0 || header.ds_count == 0 || header.rra_count == 0 {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: "zero step, data source count, or archive count".to_string(),
            }
            .into());
        }

        // The archive table must fit before we can size the data region.
        let tables_end = HEADER_SIZE
            + header.ds_count as usize * DS_RECORD_SIZE
            + header.rra_count as usize * RRA_RECORD_SIZE;
        if mmap.len() < tables_end {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: "file truncated inside the descriptor tables".to_string(),
            }
            .into());
        }

        let rra_table_offset = HEADER_SIZE + header.ds_count as usize * DS_RECORD_SIZE;
        let mut rra_rows = Vec::with_capacity(header.rra_count as usize);
        for i in 0..header.rra_count as usize {
            let offset = rra_table_offset + i * RRA_RECORD_SIZE;
            // SAFETY: offset is below tables_end, which was checked
            // against the mapped length.
            let record = unsafe { ptr::read(mmap.as_ptr().add(offset) as *const RraRecord) };
            if record.rows == 0 || record.pdp_per_row == 0 || record.cur_row >= record.rows {
                return Err(FileError::Corrupt {
                    path: path_str,
                    reason: format!("archive {i} has an invalid descriptor"),
                }
                .into());
            }
            rra_rows.push(record.rows);
        }

        let layout = DbLayout::new(header.ds_count as usize, &rra_rows);
        if mmap.len() != layout.file_size {
            return Err(FileError::Corrupt {
                path: path_str,
                reason: format!(
                    "file size mismatch: {} bytes, layout requires {}",
                    mmap.len(),
                    layout.file_size
                ),
            }
            .into());
        }

        let db = Self {
            mmap,
            layout,
            path: path_str,
        };

        // Decode every descriptor once so bad enum tags surface here
        // rather than deep inside an update.
        for i in 0..db.ds_count() {
            db.ds_record(i).def().map_err(|_| FileError::Corrupt {
                path: db.path.clone(),
                reason: format!("data source {i} has an invalid descriptor"),
            })?;
        }
        for i in 0..db.rra_count() {
            db.rra_record(i).def().map_err(|_| FileError::Corrupt {
                path: db.path.clone(),
                reason: format!("archive {i} has an invalid descriptor"),
            })?;
        }

        Ok(db)
    }

    fn header(&self) -> FileHeader {
        // SAFETY: the header was validated during create/open.
        unsafe { ptr::read(self.mmap.as_ptr() as *const FileHeader) }
    }

    /// Step interval in seconds.
    pub fn step(&self) -> u64 {
        self.header().step
    }

    /// Number of data sources.
    pub fn ds_count(&self) -> usize {
        self.header().ds_count as usize
    }

    /// Number of archives.
    pub fn rra_count(&self) -> usize {
        self.header().rra_count as usize
    }

    /// Timestamp of the most recent applied update.
    pub fn last_update(&self) -> i64 {
        self.header().last_update
    }

    /// Advances the last-update timestamp.
    pub fn set_last_update(&mut self, timestamp: i64) {
        let header_ptr = self.mmap.as_mut_ptr() as *mut FileHeader;
        // SAFETY: only the last_update field of the validated header is
        // written; the pointer covers the start of the mapping.
        unsafe {
            ptr::write(&mut (*header_ptr).last_update, timestamp);
        }
    }

    /// Size in bytes of everything preceding the row data region.
    pub fn header_size(&self) -> usize {
        self.layout.data_offset
    }

    /// Format version rendered the way introspection reports it.
    pub fn version_tag(&self) -> String {
        format!("{:04}", self.header().version)
    }

    /// Reads one data-source record.
    pub fn ds_record(&self, ds: usize) -> DsRecord {
        let offset = self.layout.ds_offset(ds);
        // SAFETY: ds is bounded by ds_count and the table region was
        // validated against the file size.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset) as *const DsRecord) }
    }

    /// Writes one data-source record.
    pub fn set_ds_record(&mut self, ds: usize, record: DsRecord) {
        let offset = self.layout.ds_offset(ds);
        // SAFETY: same bounds as ds_record; writes stay inside the table.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut DsRecord, record);
        }
    }

    /// Reads one archive record.
    pub fn rra_record(&self, rra: usize) -> RraRecord {
        let offset = self.layout.rra_offset(rra);
        // SAFETY: rra is bounded by rra_count and the table region was
        // validated against the file size.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset) as *const RraRecord) }
    }

    /// Writes one archive record.
    pub fn set_rra_record(&mut self, rra: usize, record: RraRecord) {
        let offset = self.layout.rra_offset(rra);
        // SAFETY: same bounds as rra_record.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut RraRecord, record);
        }
    }

    /// Reads one consolidation-accumulator record.
    pub fn cdp_record(&self, rra: usize, ds: usize) -> CdpRecord {
        let offset = self.layout.cdp_offset(rra, ds);
        // SAFETY: both indices are bounded by the validated table shape.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset) as *const CdpRecord) }
    }

    /// Writes one consolidation-accumulator record.
    pub fn set_cdp_record(&mut self, rra: usize, ds: usize, record: CdpRecord) {
        let offset = self.layout.cdp_offset(rra, ds);
        // SAFETY: same bounds as cdp_record.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut CdpRecord, record);
        }
    }

    /// Reads one row value slot. NaN means unknown.
    pub fn row_value(&self, rra: usize, row: u32, ds: usize) -> f64 {
        let offset = self.layout.value_offset(rra, row, ds);
        // SAFETY: row is bounded by the archive's row capacity and ds by
        // ds_count; the block offsets come from the validated layout.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset) as *const f64) }
    }

    /// Writes one row value slot. NaN means unknown.
    pub fn set_row_value(&mut self, rra: usize, row: u32, ds: usize, value: f64) {
        let offset = self.layout.value_offset(rra, row, ds);
        // SAFETY: same bounds as row_value.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut f64, value);
        }
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            FileError::Io {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    /// Returns the path of this database file.
    pub fn path(&self) -> &str {
        &self.path
    }
}
