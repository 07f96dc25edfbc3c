//! DMA buffer binding and user-to-bus address translation.
//!
//! [`DmaMemory`] takes the caller's buffer description, validates it against
//! the channel's DMA page size, and builds the scatter-gather segment table
//! the engines translate through. Every bus address handed to the card goes
//! through [`DmaMemory::translate`]; a naked user pointer never reaches a
//! register write.
//!
//! Physical addresses come from `/proc/self/pagemap`. When the process lacks
//! the privilege to see page frame numbers the provider falls back to an
//! identity mapping with a warning; that covers the dummy card and tests,
//! while production runs privileged exactly like the kernel-bypass stack the
//! driver descends from.
//!
//! Each binding drops a registration marker (id + owning PID) under the
//! state directory so that [`cleanup_orphans`] can reclaim pinnings left
//! behind by crashed processes.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::parameters::BufferParameters;
use crate::paths;

/// Required alignment of the buffer base address.
const BASE_ALIGNMENT: usize = 4096;

/// One physically contiguous run of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// User-space address of the run.
    pub user_address: usize,
    /// Bus address the card uses for the same bytes.
    pub bus_address: u64,
    /// Length of the run in bytes.
    pub length: usize,
}

/// A pinned, card-addressable view of one DMA buffer.
#[derive(Debug)]
pub struct DmaMemory {
    base: usize,
    size: usize,
    /// Sorted by user address; contiguous in user space.
    segments: Vec<Segment>,
    registration: Option<Registration>,
    /// Keeps a file-backed mapping alive for the buffer lifetime.
    _backing: Option<MmapMut>,
}

impl DmaMemory {
    /// Binds the buffer described by `params` for DMA.
    ///
    /// `dma_page_size` is the channel's DMA page size; the buffer must be a
    /// positive multiple of it. `registration_id` names the marker file used
    /// for orphan cleanup; pass `None` for unregistered (dummy/test) use.
    ///
    /// # Errors
    ///
    /// `BufferUnaligned` / `BufferTooSmall` on contract violations, `Io` when
    /// a file-backed buffer cannot be created or mapped.
    pub fn bind(
        params: &BufferParameters,
        dma_page_size: usize,
        registration_id: Option<String>,
    ) -> Result<Self> {
        let (base, size, backing) = match params {
            BufferParameters::Memory { address, size } => (*address, *size, None),
            BufferParameters::File { path, size } => {
                let map = map_buffer_file(path, *size)?;
                (map.as_ptr() as usize, *size, Some(map))
            }
        };

        if size == 0 || size % dma_page_size != 0 {
            return Err(Error::BufferTooSmall {
                size,
                page_size: dma_page_size,
            });
        }
        if base % BASE_ALIGNMENT != 0 {
            return Err(Error::BufferUnaligned {
                address: base,
                alignment: BASE_ALIGNMENT,
            });
        }

        let segments = physical_segments(base, size)?;
        let registration = match registration_id {
            Some(id) => Some(Registration::create(&paths::buffer_registry_dir(), id, size)?),
            None => None,
        };

        log::debug!(
            "bound DMA buffer at 0x{base:x}, size 0x{size:x}, {} segment(s)",
            segments.len()
        );

        Ok(Self {
            base,
            size,
            segments,
            registration,
            _backing: backing,
        })
    }

    /// User-space base address of the buffer.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Total size of the buffer in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The scatter-gather segment table, sorted by user address.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Translates a buffer offset to the bus address the card must use.
    ///
    /// # Errors
    ///
    /// `OffsetOutOfRange` when `offset >= size`.
    pub fn translate(&self, offset: usize) -> Result<u64> {
        if offset >= self.size {
            return Err(Error::OffsetOutOfRange {
                offset,
                size: self.size,
            });
        }
        let user = self.base + offset;
        // Find the last segment starting at or before `user`.
        let idx = self
            .segments
            .partition_point(|seg| seg.user_address <= user)
            .saturating_sub(1);
        let seg = &self.segments[idx];
        debug_assert!(user >= seg.user_address && user < seg.user_address + seg.length);
        Ok(seg.bus_address + (user - seg.user_address) as u64)
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Err(err) = registration.remove() {
                // The card may still be writing into memory the host is
                // about to reuse; this must not pass silently.
                log::error!("failed to deregister DMA buffer: {err}");
            }
        }
    }
}

/// Creates (or reuses) and maps the file backing a DMA buffer.
fn map_buffer_file(path: &Path, size: usize) -> Result<MmapMut> {
    let io = |operation: &'static str| {
        move |source: std::io::Error| Error::Io { operation, source }
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io("creating buffer directory"))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io("opening buffer file"))?;
    file.set_len(size as u64)
        .map_err(io("sizing buffer file"))?;
    // SAFETY: the mapping is private to this process's view of the file and
    // outlives every translation derived from it (kept in `_backing`).
    let map = unsafe { MmapMut::map_mut(&file) }.map_err(io("mapping buffer file"))?;
    // Fault every page in so the pagemap walk sees it resident.
    let page = host_page_size();
    for offset in (0..size).step_by(page) {
        // SAFETY: offset < size, within the mapping; volatile so the touch
        // is not elided.
        unsafe { std::ptr::read_volatile(map.as_ptr().add(offset)) };
    }
    Ok(map)
}

/// Host page size in bytes.
fn host_page_size() -> usize {
    nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map_or(4096, |v| v as usize)
}

/// Builds the physical segment table for `[base, base + size)`.
///
/// Walks `/proc/self/pagemap` and merges physically contiguous pages. Falls
/// back to a single identity segment when page frame numbers are hidden.
fn physical_segments(base: usize, size: usize) -> Result<Vec<Segment>> {
    match pagemap_segments(base, size) {
        Ok(Some(segments)) => Ok(segments),
        Ok(None) => {
            log::warn!(
                "page frame numbers unavailable (need CAP_SYS_ADMIN); \
                 using identity bus addresses"
            );
            Ok(vec![Segment {
                user_address: base,
                bus_address: base as u64,
                length: size,
            }])
        }
        Err(source) => Err(Error::Io {
            operation: "reading pagemap",
            source,
        }),
    }
}

/// Bus address of a small host region outside a bound buffer (e.g. the
/// CRORC ready-FIFO mapping), using the same pagemap-or-identity policy as
/// buffer binding. The region must not cross a page boundary.
pub(crate) fn region_bus_address(base: usize) -> Result<u64> {
    let page = host_page_size();
    let aligned = base & !(page - 1);
    let segments = physical_segments(aligned, page)?;
    Ok(segments[0].bus_address + (base - aligned) as u64)
}

/// Reads PFNs for the range; `Ok(None)` when the kernel hides them.
fn pagemap_segments(base: usize, size: usize) -> std::io::Result<Option<Vec<Segment>>> {
    const PFN_MASK: u64 = (1 << 55) - 1;
    const PAGE_PRESENT: u64 = 1 << 63;

    let page = host_page_size();
    let mut pagemap = File::open("/proc/self/pagemap")?;
    let mut segments: Vec<Segment> = Vec::new();

    let mut addr = base;
    while addr < base + size {
        pagemap.seek(SeekFrom::Start((addr / page * 8) as u64))?;
        let mut entry = [0u8; 8];
        pagemap.read_exact(&mut entry)?;
        let entry = u64::from_le_bytes(entry);

        if entry & PAGE_PRESENT == 0 {
            return Ok(None);
        }
        let pfn = entry & PFN_MASK;
        if pfn == 0 {
            // Unprivileged readers see zeroed frame numbers.
            return Ok(None);
        }
        let bus = pfn * page as u64;

        match segments.last_mut() {
            Some(last)
                if last.bus_address + last.length as u64 == bus
                    && last.user_address + last.length == addr =>
            {
                last.length += page;
            }
            _ => segments.push(Segment {
                user_address: addr,
                bus_address: bus,
                length: page,
            }),
        }
        addr += page;
    }

    Ok(Some(segments))
}

/// Marker file recording a live DMA buffer registration.
#[derive(Debug)]
struct Registration {
    path: PathBuf,
    id: String,
}

impl Registration {
    fn create(dir: &Path, id: String, size: usize) -> Result<Self> {
        let io = |operation: &'static str| {
            move |source: std::io::Error| Error::Io { operation, source }
        };
        fs::create_dir_all(dir).map_err(io("creating buffer registry"))?;
        let path = dir.join(&id);
        let body = format!("pid={}\nsize={size}\n", std::process::id());
        fs::write(&path, body).map_err(io("writing buffer registration"))?;
        Ok(Self { path, id })
    }

    fn remove(self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|_| Error::BufferDeregistrationFailed {
            id: self.id.clone(),
        })
    }
}

/// Reclaims buffer registrations left behind by dead processes.
///
/// Scans `dir` for marker files, checks the recorded PID against `/proc`,
/// and removes markers whose owner no longer exists. Markers of live
/// processes are never touched. When `/proc` itself is unavailable the scan
/// is skipped; better to leak a marker than to free a live buffer.
///
/// Returns the ids that were reclaimed.
///
/// # Errors
///
/// Fails only when the registry directory exists but cannot be read.
pub fn cleanup_orphans(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    if !Path::new("/proc").exists() {
        log::warn!("/proc unavailable, skipping orphaned buffer cleanup");
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|source| Error::Io {
        operation: "reading buffer registry",
        source,
    })?;

    let mut reclaimed = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(pid) = registration_pid(&path) else {
            continue;
        };
        if Path::new(&format!("/proc/{pid}")).exists() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                let id = entry.file_name().to_string_lossy().into_owned();
                log::info!("reclaimed orphaned DMA buffer registration {id} (pid {pid})");
                reclaimed.push(id);
            }
            Err(err) => log::warn!("could not remove {}: {err}", path.display()),
        }
    }
    Ok(reclaimed)
}

/// Parses the `pid=` line of a registration marker.
fn registration_pid(path: &Path) -> Option<u32> {
    let body = fs::read_to_string(path).ok()?;
    body.lines()
        .find_map(|line| line.strip_prefix("pid="))
        .and_then(|pid| pid.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_buffer(dir: &Path, size: usize) -> BufferParameters {
        BufferParameters::File {
            path: dir.join("buffer"),
            size,
        }
    }

    #[test]
    fn bind_validates_size() {
        let dir = tempfile::tempdir().unwrap();
        let err = DmaMemory::bind(&file_buffer(dir.path(), 8192 + 1), 8192, None);
        assert!(matches!(err, Err(Error::BufferTooSmall { .. })));

        let err = DmaMemory::bind(
            &BufferParameters::Memory { address: 0x1000, size: 0 },
            8192,
            None,
        );
        assert!(matches!(err, Err(Error::BufferTooSmall { size: 0, .. })));
    }

    #[test]
    fn bind_validates_alignment() {
        let err = DmaMemory::bind(
            &BufferParameters::Memory {
                address: 0x1004,
                size: 8192,
            },
            8192,
            None,
        );
        assert!(matches!(err, Err(Error::BufferUnaligned { .. })));
    }

    #[test]
    fn translate_walks_segments() {
        let dir = tempfile::tempdir().unwrap();
        let memory = DmaMemory::bind(&file_buffer(dir.path(), 64 * 1024), 8192, None).unwrap();

        assert_eq!(memory.size(), 64 * 1024);
        assert!(!memory.segments().is_empty());

        let first = memory.translate(0).unwrap();
        let second = memory.translate(4096).unwrap();
        // Both land inside the table and differ by the page distance when
        // they share a segment.
        if memory.segments().len() == 1 {
            assert_eq!(second - first, 4096);
        }
        // One past the end is rejected, the last byte is fine.
        assert!(memory.translate(64 * 1024 - 1).is_ok());
        assert!(matches!(
            memory.translate(64 * 1024),
            Err(Error::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn registration_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        // Redirect the registry through an explicit Registration.
        let reg = Registration::create(dir.path(), "test_buf".into(), 8192).unwrap();
        let marker = dir.path().join("test_buf");
        assert!(marker.exists());
        assert_eq!(registration_pid(&marker), Some(std::process::id()));
        reg.remove().unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn cleanup_reclaims_only_dead_owners() {
        let dir = tempfile::tempdir().unwrap();
        // A marker owned by this (live) process.
        fs::write(
            dir.path().join("live"),
            format!("pid={}\nsize=8192\n", std::process::id()),
        )
        .unwrap();
        // A marker owned by a PID far beyond pid_max.
        fs::write(dir.path().join("dead"), "pid=99999999\nsize=8192\n").unwrap();
        // A malformed marker is left alone.
        fs::write(dir.path().join("junk"), "not a marker").unwrap();

        let reclaimed = cleanup_orphans(dir.path()).unwrap();
        assert_eq!(reclaimed, vec!["dead".to_string()]);
        assert!(dir.path().join("live").exists());
        assert!(dir.path().join("junk").exists());
        assert!(!dir.path().join("dead").exists());
    }

    #[test]
    fn cleanup_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimed = cleanup_orphans(&dir.path().join("nope")).unwrap();
        assert!(reclaimed.is_empty());
    }
}
