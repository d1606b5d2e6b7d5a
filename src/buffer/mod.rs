//! DMA-BUF import engine
//!
//! Negotiates the (format, modifier) table with the GPU importer, validates
//! frozen descriptors against it and turns them into [`ImportedBuffer`]s.
//! Ownership does all the fd bookkeeping: `import` consumes the descriptor, a
//! failed import drops it (closing its fds once), and `release` consumes the
//! imported buffer so it cannot be released twice.

pub mod descriptor;
pub mod formats;
pub mod gpu;

pub use descriptor::{BufferDescriptor, DmabufPlane, ParamsBuilder, ParamsError};
pub use formats::DmabufFormat;
pub use gpu::{GbmImporter, GpuHandle, GpuImporter, PassthroughImporter, TextureId};

use formats::{fallback_table, fourcc_name, plane_count};
use log::{debug, info, warn};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid buffer parameters: {0}")]
    InvalidParams(String),
    #[error("unsupported format {0:#010x}")]
    UnsupportedFormat(u32),
    #[error("unsupported modifier {modifier:#x} for format {format:#010x}")]
    UnsupportedModifier { format: u32, modifier: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("GPU import failed: {0}")]
    Gpu(String),
    #[error("buffer was left unusable by an earlier failure")]
    Inert,
}

/// A client buffer living on the GPU. Owns the plane fds until released.
#[derive(Debug)]
#[must_use = "imported buffers must be handed back to BufferImportEngine::release"]
pub struct ImportedBuffer {
    descriptor: BufferDescriptor,
    handle: GpuHandle,
}

impl ImportedBuffer {
    pub fn handle(&self) -> GpuHandle {
        self.handle
    }

    pub fn width(&self) -> i32 {
        self.descriptor.width()
    }

    pub fn height(&self) -> i32 {
        self.descriptor.height()
    }

    pub fn format(&self) -> u32 {
        self.descriptor.format()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }
}

pub struct BufferImportEngine {
    gpu: Box<dyn GpuImporter>,
    formats: Vec<DmabufFormat>,
    negotiated: bool,
    live: usize,
}

impl BufferImportEngine {
    pub fn new(gpu: Box<dyn GpuImporter>) -> Self {
        Self {
            gpu,
            formats: Vec::new(),
            negotiated: false,
            live: 0,
        }
    }

    pub fn importer_name(&self) -> &'static str {
        self.gpu.name()
    }

    /// Queries the importer once and caches the result, falling back to the
    /// static LINEAR table when the query is unavailable. An importer that
    /// answers with an empty list leaves the table empty.
    pub fn negotiate_formats(&mut self) -> &[DmabufFormat] {
        if !self.negotiated {
            self.formats = match self.gpu.query_dmabuf_formats() {
                Some(formats) => formats,
                None => {
                    debug!(
                        "{} importer has no format query, using the fallback table",
                        self.gpu.name()
                    );
                    fallback_table()
                }
            };
            self.negotiated = true;
            info!(
                "📦 DMA-BUF formats negotiated: {}",
                self.formats
                    .iter()
                    .map(|f| fourcc_name(f.format))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        &self.formats
    }

    pub fn formats(&self) -> &[DmabufFormat] {
        &self.formats
    }

    pub fn validate(&self, descriptor: &BufferDescriptor) -> Result<(), ValidationError> {
        if descriptor.width() <= 0 || descriptor.height() <= 0 {
            return Err(ValidationError::InvalidParams(format!(
                "size {}x{}",
                descriptor.width(),
                descriptor.height()
            )));
        }
        if descriptor.format() == 0 {
            return Err(ValidationError::InvalidParams("format is zero".into()));
        }
        if !descriptor.is_valid() {
            return Err(ValidationError::InvalidParams(
                "planes are empty or disagree on the modifier".into(),
            ));
        }
        if let Some(expected) = plane_count(descriptor.format()) {
            if descriptor.planes().len() != expected {
                return Err(ValidationError::InvalidParams(format!(
                    "{} needs {} planes, got {}",
                    fourcc_name(descriptor.format()),
                    expected,
                    descriptor.planes().len()
                )));
            }
        }

        let format = descriptor.format();
        let mut known_format = false;
        for entry in self.formats.iter().filter(|f| f.format == format) {
            known_format = true;
            match descriptor.modifier() {
                None => return Ok(()),
                Some(modifier) if modifier == entry.modifier => return Ok(()),
                Some(_) => {}
            }
        }
        if !known_format {
            return Err(ValidationError::UnsupportedFormat(format));
        }
        Err(ValidationError::UnsupportedModifier {
            format,
            modifier: descriptor.modifier().unwrap_or_default(),
        })
    }

    /// Validates and imports. On failure the descriptor is dropped here and its
    /// fds closed.
    pub fn import(&mut self, descriptor: BufferDescriptor) -> Result<ImportedBuffer, ImportError> {
        self.validate(&descriptor)?;
        let handle = self.gpu.import_dmabuf(&descriptor)?;
        self.live += 1;
        debug!(
            "Imported {}x{} {} as GPU handle {}",
            descriptor.width(),
            descriptor.height(),
            fourcc_name(descriptor.format()),
            handle.0
        );
        Ok(ImportedBuffer { descriptor, handle })
    }

    /// Destroys the GPU object, then closes the fds.
    pub fn release(&mut self, buffer: ImportedBuffer) {
        self.gpu.destroy_import(buffer.handle);
        self.live = self.live.saturating_sub(1);
        debug!("Released GPU handle {}", buffer.handle.0);
    }

    pub fn texture(&mut self, buffer: &ImportedBuffer) -> Result<TextureId, ImportError> {
        self.gpu.create_texture(buffer.handle).map_err(|e| {
            warn!("Texture creation for handle {} failed: {}", buffer.handle.0, e);
            e
        })
    }

    /// Imported buffers not yet released.
    pub fn live_imports(&self) -> usize {
        self.live
    }
}
