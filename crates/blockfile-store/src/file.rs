use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, trace};

use crate::config::{CreateMode, ShareMode, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::traits::{check_range, BackingStore};

/// The currently mapped view of the file.
enum ViewMap {
    Read(Mmap),
    Write(MmapMut),
}

struct MappedView {
    offset: u64,
    length: u64,
    map: ViewMap,
}

impl MappedView {
    fn contains(&self, offset: u64, length: u64) -> bool {
        offset >= self.offset && offset + length <= self.offset + self.length
    }
}

/// File-backed store with memory-mapped windows.
///
/// At most one view is mapped at a time. A window request inside the current
/// view reuses it; anything else unmaps it and maps a new view whose bounds
/// are rounded out to the configured granularity and clamped to the file
/// size. Resizing always unmaps.
pub struct FileStore {
    path: PathBuf,
    file: File,
    size: u64,
    config: StoreConfig,
    view: Option<MappedView>,
}

impl FileStore {
    /// Open (or create) a store file according to `config`.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        validate_config(path, &config)?;

        let writable = config.access_mode.is_writable();
        let mut options = OpenOptions::new();
        options.read(true).write(writable);
        match config.create_mode {
            CreateMode::CreateNew => {
                options.create_new(true);
            }
            CreateMode::CreateAlways => {
                options.create(true).truncate(true);
            }
            CreateMode::OpenExisting => {}
            CreateMode::OpenAlways => {
                options.create(writable);
            }
            CreateMode::TruncateExisting => {
                options.truncate(true);
            }
        }

        let file = options.open(path)?;
        acquire_lock(&file, path, config.share_mode)?;
        let size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size,
            create_mode = %config.create_mode,
            access_mode = ?config.access_mode,
            "opened store file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            config,
            view: None,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Offset and length of the currently mapped view, if any.
    pub fn mapped_view(&self) -> Option<(u64, u64)> {
        self.view.as_ref().map(|v| (v.offset, v.length))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if !self.config.access_mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn unmap(&mut self) {
        if let Some(view) = self.view.take() {
            trace!(offset = view.offset, length = view.length, "unmapping view");
        }
    }

    /// Make sure the current view covers `offset..offset + length` and
    /// return the position of `offset` inside it.
    fn map_range(&mut self, offset: u64, length: u64) -> StoreResult<usize> {
        if let Some(view) = &self.view {
            if view.contains(offset, length) {
                return Ok((offset - view.offset) as usize);
            }
        }
        self.unmap();

        let granularity = self.config.view_granularity;
        let begin = align_down(offset, granularity);
        let end = align_up(offset + length, granularity).min(self.size);
        let view_length = usize::try_from(end - begin).map_err(|_| {
            StoreError::InvalidConfig(format!("view of {} bytes exceeds address space", end - begin))
        })?;

        let mut options = MmapOptions::new();
        options.offset(begin).len(view_length);
        // SAFETY: the file stays open for the lifetime of the mapping and the
        // store is the single writer for it.
        let map = if self.config.access_mode.is_writable() {
            ViewMap::Write(unsafe { options.map_mut(&self.file)? })
        } else {
            ViewMap::Read(unsafe { options.map(&self.file)? })
        };
        trace!(offset = begin, length = end - begin, "mapped view");

        self.view = Some(MappedView {
            offset: begin,
            length: end - begin,
            map,
        });
        Ok((offset - begin) as usize)
    }
}

impl BackingStore for FileStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn resize(&mut self, new_size: u64) -> StoreResult<()> {
        self.check_writable()?;
        if new_size == self.size {
            return Ok(());
        }
        self.unmap();
        self.file.set_len(new_size)?;
        trace!(from = self.size, to = new_size, "resized store file");
        self.size = new_size;
        Ok(())
    }

    fn window(&mut self, offset: u64, length: u64) -> StoreResult<&[u8]> {
        check_range(offset, length, self.size)?;
        if length == 0 {
            return Ok(&[]);
        }
        let start = self.map_range(offset, length)?;
        let end = start + length as usize;
        match &self.view {
            Some(MappedView {
                map: ViewMap::Read(map),
                ..
            }) => Ok(&map[start..end]),
            Some(MappedView {
                map: ViewMap::Write(map),
                ..
            }) => Ok(&map[start..end]),
            None => Err(unmapped()),
        }
    }

    fn window_mut(&mut self, offset: u64, length: u64) -> StoreResult<&mut [u8]> {
        self.check_writable()?;
        check_range(offset, length, self.size)?;
        if length == 0 {
            return Ok(&mut []);
        }
        let start = self.map_range(offset, length)?;
        let end = start + length as usize;
        match &mut self.view {
            Some(MappedView {
                map: ViewMap::Write(map),
                ..
            }) => Ok(&mut map[start..end]),
            Some(MappedView {
                map: ViewMap::Read(_),
                ..
            }) => Err(StoreError::ReadOnly),
            None => Err(unmapped()),
        }
    }

    fn flush(&mut self) -> StoreResult<()> {
        if let Some(MappedView {
            map: ViewMap::Write(map),
            ..
        }) = &self.view
        {
            map.flush()?;
        }
        if self.config.access_mode.is_writable() {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        !self.config.access_mode.is_writable()
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("config", &self.config)
            .field("view", &self.mapped_view())
            .finish()
    }
}

fn validate_config(path: &Path, config: &StoreConfig) -> StoreResult<()> {
    let g = config.view_granularity;
    if g == 0 || !g.is_power_of_two() {
        return Err(StoreError::InvalidConfig(format!(
            "view granularity {g} is not a power of two"
        )));
    }
    if config.access_mode.is_writable() {
        return Ok(());
    }
    match config.create_mode {
        CreateMode::OpenExisting => Ok(()),
        CreateMode::OpenAlways if path.exists() => Ok(()),
        mode => Err(StoreError::InvalidConfig(format!(
            "{mode} requires read-write access"
        ))),
    }
}

fn acquire_lock(file: &File, path: &Path, share_mode: ShareMode) -> StoreResult<()> {
    let result = match share_mode {
        ShareMode::Exclusive => fs2::FileExt::try_lock_exclusive(file),
        ShareMode::Read => fs2::FileExt::try_lock_shared(file),
        ShareMode::ReadWrite => return Ok(()),
    };
    result.map_err(|e| {
        if e.kind() == fs2::lock_contended_error().kind() {
            StoreError::Locked(path.to_path_buf())
        } else {
            StoreError::Io(e)
        }
    })
}

fn unmapped() -> StoreError {
    StoreError::Io(io::Error::other("no view mapped"))
}

fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.saturating_add(alignment - 1) & !(alignment - 1)
}
