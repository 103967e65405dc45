use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// Base address of the `str_rd` stream-reader IP core on the AXI bus.
pub const AXI_STR_RD_ADDR: u32 = 0x8002_0000;

/// Size of the mapped register window.
pub const REGISTER_SPAN: usize = 0x100;

/// Register offsets inside the window.
pub const OFFSET_READ_LEN: usize = 0;
pub const OFFSET_WRITE_LEN: usize = 4;
pub const OFFSET_RESIDUE: usize = 8;
/// First of the four data words; reading it pops one FIFO entry.
pub const OFFSET_DATA: usize = 16;
const DATA_WORDS: usize = 4;

/// Upper bound on entries popped by one [`UioFifo::drain`] call.
const MAX_DRAIN_PER_CALL: usize = 1 << 20;

/// Default sysfs directory listing the UIO node of the `str_rd` core.
pub fn default_sysfs_base() -> PathBuf {
    PathBuf::from(format!(
        "/sys/devices/platform/axi/{AXI_STR_RD_ADDR:08x}.str_rd/uio"
    ))
}

/// Resolve the `/dev/uioN` node for the `str_rd` core.
///
/// `sysfs_base` is the `.../uio` directory of the platform device; its
/// first `uio*` entry names the device node.
pub fn find_uio_device(sysfs_base: impl AsRef<Path>) -> Result<PathBuf> {
    let base = sysfs_base.as_ref();
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return Err(TransportError::DeviceNotFound(base.to_path_buf())),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("uio"))
        .collect();
    names.sort();

    match names.first() {
        Some(name) => {
            let dev = PathBuf::from("/dev").join(name);
            debug!(?dev, "resolved uio device");
            Ok(dev)
        }
        None => Err(TransportError::DeviceNotFound(base.to_path_buf())),
    }
}

/// Word-addressed access to a register window.
///
/// Reads take `&mut self` because reading the FIFO data window pops an entry.
pub trait RegisterBlock {
    /// Read the 32-bit register at byte `offset`.
    fn read_u32(&mut self, offset: usize) -> u32;
}

/// Read-only memory map of a generic-UIO device.
pub struct UioMap {
    map: Mmap,
    path: PathBuf,
}

impl UioMap {
    /// Open and map the register window of `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        // SAFETY: the mapping is read-only and only accessed through volatile
        // word reads inside `REGISTER_SPAN`; the device node stays mapped for
        // the lifetime of `UioMap`.
        let map = unsafe { MmapOptions::new().len(REGISTER_SPAN).map(&file) }.map_err(
            |source| TransportError::Open {
                path: path.clone(),
                source,
            },
        )?;

        info!(?path, "mapped uio register window");
        Ok(Self { map, path })
    }

    /// Path of the mapped device.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterBlock for UioMap {
    fn read_u32(&mut self, offset: usize) -> u32 {
        if offset % 4 != 0 || offset + 4 > self.map.len() {
            warn!(offset, "register read outside mapped window");
            return 0;
        }
        // SAFETY: bounds and alignment were checked above; the mapping base is
        // page aligned, so `offset` multiple of 4 gives an aligned u32.
        unsafe { std::ptr::read_volatile(self.map.as_ptr().add(offset).cast::<u32>()) }
    }
}

/// FIFO fill state reported by the status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoStatus {
    pub read_len: u32,
    pub write_len: u32,
    pub residue: u32,
}

impl FifoStatus {
    /// True when neither whole entries nor residue words are pending.
    pub fn is_empty(&self) -> bool {
        self.read_len == 0 && self.residue == 0
    }
}

/// Hardware FIFO exposed through a register window.
pub struct UioFifo<R = UioMap> {
    regs: R,
}

impl UioFifo<UioMap> {
    /// Open the FIFO behind a generic-UIO device node.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(UioMap::open(path)?))
    }
}

impl<R: RegisterBlock> UioFifo<R> {
    /// Wrap an already-mapped register block.
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Read the status registers.
    pub fn status(&mut self) -> FifoStatus {
        FifoStatus {
            read_len: self.regs.read_u32(OFFSET_READ_LEN),
            write_len: self.regs.read_u32(OFFSET_WRITE_LEN),
            residue: self.regs.read_u32(OFFSET_RESIDUE),
        }
    }

    /// Pop one 96-bit entry (the fourth data word is read and ignored).
    pub fn pop(&mut self) -> [u32; 3] {
        let mut words = [0u32; DATA_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.regs.read_u32(OFFSET_DATA + 4 * i);
        }
        [words[0], words[1], words[2]]
    }

    /// Pop entries until the FIFO reports empty, handing each to `sink`.
    ///
    /// Returns the number of entries popped.
    pub fn drain(&mut self, mut sink: impl FnMut([u32; 3])) -> usize {
        let mut popped = 0usize;
        while popped < MAX_DRAIN_PER_CALL {
            if self.status().is_empty() {
                break;
            }
            sink(self.pop());
            popped += 1;
        }
        if popped == MAX_DRAIN_PER_CALL {
            warn!(popped, "fifo did not report empty; deferring remaining entries");
        }
        popped
    }

    /// Borrow the register block.
    pub fn get_ref(&self) -> &R {
        &self.regs
    }

    /// Consume the FIFO and return the register block.
    pub fn into_inner(self) -> R {
        self.regs
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// In-memory register block: each queued entry is four data words.
    struct FakeFifo {
        entries: VecDeque<[u32; 4]>,
        current: Option<[u32; 4]>,
        write_len: u32,
    }

    impl FakeFifo {
        fn with_entries(entries: &[[u32; 4]]) -> Self {
            Self {
                entries: entries.iter().copied().collect(),
                current: None,
                write_len: 7,
            }
        }
    }

    impl RegisterBlock for FakeFifo {
        fn read_u32(&mut self, offset: usize) -> u32 {
            match offset {
                OFFSET_READ_LEN => self.entries.len() as u32,
                OFFSET_WRITE_LEN => self.write_len,
                OFFSET_RESIDUE => 0,
                OFFSET_DATA => {
                    self.current = self.entries.pop_front();
                    self.current.map(|w| w[0]).unwrap_or(0)
                }
                o if (OFFSET_DATA + 4..OFFSET_DATA + 16).contains(&o) => {
                    let idx = (o - OFFSET_DATA) / 4;
                    self.current.map(|w| w[idx]).unwrap_or(0)
                }
                _ => 0,
            }
        }
    }

    #[test]
    fn status_reads_counters() {
        let mut fifo = UioFifo::new(FakeFifo::with_entries(&[[1, 2, 3, 4], [5, 6, 7, 8]]));
        let status = fifo.status();
        assert_eq!(status.read_len, 2);
        assert_eq!(status.write_len, 7);
        assert_eq!(status.residue, 0);
        assert!(!status.is_empty());
    }

    #[test]
    fn drain_pops_until_empty() {
        let mut fifo = UioFifo::new(FakeFifo::with_entries(&[
            [1, 2, 3, 0xdead],
            [4, 5, 6, 0xbeef],
            [7, 8, 9, 0],
        ]));

        let mut seen = Vec::new();
        let popped = fifo.drain(|entry| seen.push(entry));

        assert_eq!(popped, 3);
        assert_eq!(seen, vec![[1, 2, 3], [4, 5, 6], [7, 8, 9]]);
        assert!(fifo.status().is_empty());
    }

    #[test]
    fn drain_on_empty_fifo_is_noop() {
        let mut fifo = UioFifo::new(FakeFifo::with_entries(&[]));
        assert_eq!(fifo.drain(|_| panic!("no entries expected")), 0);
    }

    #[test]
    fn find_device_picks_first_uio_entry() {
        let base = std::env::temp_dir().join(format!("ocsenc-uio-{}", std::process::id()));
        std::fs::create_dir_all(base.join("uio4")).unwrap();
        std::fs::create_dir_all(base.join("uio2")).unwrap();
        std::fs::create_dir_all(base.join("power")).unwrap();

        let dev = find_uio_device(&base).unwrap();
        assert_eq!(dev, PathBuf::from("/dev/uio2"));

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn find_device_missing_base() {
        let err = find_uio_device("/nonexistent-ocsenc/uio").unwrap_err();
        assert!(matches!(err, TransportError::DeviceNotFound(_)));
    }

    #[test]
    fn default_sysfs_base_names_str_rd_core() {
        assert_eq!(
            default_sysfs_base(),
            PathBuf::from("/sys/devices/platform/axi/80020000.str_rd/uio")
        );
    }
}
