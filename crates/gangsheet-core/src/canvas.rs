use crate::config::EngineConfig;
use crate::error::{Result, SheetError};
use image::RgbaImage;
use memmap2::MmapMut;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

const BYTES_PER_PIXEL: u64 = 4;

enum Backing {
    Heap(Vec<u8>),
    Disk {
        map: MmapMut,
        // Held for its lifetime; dropping unlinks the spool file.
        file: NamedTempFile,
    },
    Released,
}

/// A sheet-part pixel buffer (RGBA8), heap- or disk-backed by size.
///
/// Always zero-initialized (fully transparent). Exclusively owned by the
/// packing loop for the part's lifetime; `release()` is idempotent and also
/// runs from `Drop`, so every exit path cleans up.
pub struct SheetCanvas {
    width: u32,
    height: u32,
    backing: Backing,
    writes_since_flush: u32,
    flush_interval: u32,
}

impl SheetCanvas {
    /// Bytes required for a `w`×`h` RGBA canvas.
    pub fn byte_len(w: u32, h: u32) -> u64 {
        (w as u64) * (h as u64) * BYTES_PER_PIXEL
    }

    /// Allocates a zeroed canvas. Buffers above the configured threshold are
    /// backed by a memory-mapped spool file instead of process heap.
    pub fn allocate(width: u32, height: u32, cfg: &EngineConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SheetError::Canvas(format!(
                "zero-sized canvas {}x{}",
                width, height
            )));
        }
        let len = Self::byte_len(width, height);
        let backing = if len > cfg.mmap_threshold_bytes() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("gangsheet-").suffix(".raw");
            let file = match &cfg.spool_dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            file.as_file().set_len(len)?;
            // Freshly extended file pages read back as zeros.
            let map = unsafe { MmapMut::map_mut(file.as_file())? };
            debug!(
                width,
                height,
                bytes = len,
                spool = %file.path().display(),
                "allocated disk-backed canvas"
            );
            Backing::Disk { map, file }
        } else {
            debug!(width, height, bytes = len, "allocated heap canvas");
            Backing::Heap(vec![0u8; len as usize])
        };
        Ok(Self {
            width,
            height,
            backing,
            writes_since_flush: 0,
            flush_interval: cfg.flush_interval.max(1),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_disk_backed(&self) -> bool {
        matches!(self.backing, Backing::Disk { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self.backing, Backing::Released)
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.backing {
            Backing::Heap(v) => Ok(v.as_mut_slice()),
            Backing::Disk { map, .. } => Ok(&mut map[..]),
            Backing::Released => Err(SheetError::Canvas("write after release".into())),
        }
    }

    /// Raw RGBA bytes, row-major.
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.backing {
            Backing::Heap(v) => Ok(v.as_slice()),
            Backing::Disk { map, .. } => Ok(&map[..]),
            Backing::Released => Err(SheetError::Canvas("read after release".into())),
        }
    }

    /// Copies `sub` into the canvas with its top-left at `(x, y)`, clipped
    /// to canvas bounds. Disk-backed canvases flush every N writes.
    pub fn write_region(&mut self, x: u32, y: u32, sub: &RgbaImage) -> Result<()> {
        let (cw, ch) = (self.width, self.height);
        let (sw, sh) = sub.dimensions();
        if x >= cw || y >= ch {
            return Ok(());
        }
        let copy_w = sw.min(cw - x) as usize;
        let copy_h = sh.min(ch - y) as usize;
        if copy_w == 0 || copy_h == 0 {
            return Ok(());
        }
        let src = sub.as_raw();
        let src_stride = (sw as usize) * 4;
        let dst_stride = (cw as usize) * 4;
        let dst = self.bytes_mut()?;
        for row in 0..copy_h {
            let s = row * src_stride;
            let d = ((y as usize + row) * dst_stride) + (x as usize) * 4;
            dst[d..d + copy_w * 4].copy_from_slice(&src[s..s + copy_w * 4]);
        }
        self.writes_since_flush += 1;
        if self.is_disk_backed() && self.writes_since_flush >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes a disk-backed buffer to its spool file. No-op for heap.
    pub fn flush(&mut self) -> Result<()> {
        if let Backing::Disk { map, .. } = &self.backing {
            trace!(writes = self.writes_since_flush, "flushing canvas");
            map.flush()?;
        }
        self.writes_since_flush = 0;
        Ok(())
    }

    /// Drops the buffer; for disk backing the spool file is unlinked.
    /// Idempotent, and also invoked from `Drop`.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.backing, Backing::Released) {
            Backing::Heap(v) => {
                trace!(bytes = v.len(), "released heap canvas");
                drop(v);
            }
            Backing::Disk { map, file } => {
                trace!(spool = %file.path().display(), "released disk-backed canvas");
                // Unmap before the spool file is unlinked.
                drop(map);
                drop(file);
            }
            Backing::Released => {}
        }
    }
}

impl Drop for SheetCanvas {
    fn drop(&mut self) {
        self.release();
    }
}
