//! Color and depth surface cache
//!
//! Surfaces are keyed by their base address register value (256-byte units).
//! An entry is created the first time a base address is bound and lives for
//! the rest of the process. Base address 0 means "unbound" and is never
//! cached.

use crate::backend::{HostBackend, ImageDesc, ImageHandle, SurfaceFormat};
use crate::registers::{CbColorInfo, DbDepthInfo, SurfaceSize};
use cafe_core::GpuError;
use std::collections::HashMap;

// CB_COLORn_INFO.FORMAT values
pub const COLOR_5_6_5: u32 = 0x08;
pub const COLOR_8_8_8_8: u32 = 0x1A;
pub const COLOR_16_16_16_16: u32 = 0x1F;
pub const COLOR_16_16_16_16_FLOAT: u32 = 0x20;
pub const COLOR_32_32_32_32: u32 = 0x22;
pub const COLOR_32_32_32_32_FLOAT: u32 = 0x23;

// DB_DEPTH_INFO.FORMAT values
pub const DEPTH_16: u32 = 1;
pub const DEPTH_X8_24: u32 = 2;
pub const DEPTH_8_24: u32 = 3;

/// Host format for a color buffer
pub fn color_format(info: CbColorInfo) -> SurfaceFormat {
    match info.format() {
        COLOR_8_8_8_8 => SurfaceFormat::Rgba8,
        COLOR_5_6_5 => SurfaceFormat::Rgb565,
        COLOR_16_16_16_16 => SurfaceFormat::Rgba16,
        COLOR_16_16_16_16_FLOAT => SurfaceFormat::Rgba16F,
        COLOR_32_32_32_32 => SurfaceFormat::Rgba32,
        COLOR_32_32_32_32_FLOAT => SurfaceFormat::Rgba32F,
        other => {
            tracing::debug!("Unmapped color format 0x{:02X}, using RGBA8", other);
            SurfaceFormat::Rgba8
        }
    }
}

/// Host format for a depth buffer
pub fn depth_format(info: DbDepthInfo) -> SurfaceFormat {
    match info.format() {
        DEPTH_16 => SurfaceFormat::Depth16,
        DEPTH_X8_24 | DEPTH_8_24 => SurfaceFormat::Depth24Stencil8,
        _ => SurfaceFormat::Depth32F,
    }
}

/// A cached render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub image: ImageHandle,
    /// Base address register value
    pub base: u32,
    /// Size register value at creation
    pub size: SurfaceSize,
    /// Info register value at creation
    pub info: u32,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceKind {
    Color,
    Depth,
}

/// Cache of color and depth surfaces
#[derive(Debug, Default)]
pub struct SurfaceCache {
    color: HashMap<u32, Surface>,
    depth: HashMap<u32, Surface>,
    /// Number of host images created
    created: u64,
}

impl SurfaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the color buffer at `base`.
    ///
    /// Returns `Ok(None)` for base 0. A hit returns the existing surface even
    /// if `size` or `info` no longer match the values it was created with.
    pub fn get_color(
        &mut self,
        backend: &mut dyn HostBackend,
        base: u32,
        size: SurfaceSize,
        info: CbColorInfo,
    ) -> Result<Option<Surface>, GpuError> {
        self.get(backend, SurfaceKind::Color, base, size, info.0, color_format(info))
    }

    /// Fetch or create the depth buffer at `base`
    pub fn get_depth(
        &mut self,
        backend: &mut dyn HostBackend,
        base: u32,
        size: SurfaceSize,
        info: DbDepthInfo,
    ) -> Result<Option<Surface>, GpuError> {
        self.get(backend, SurfaceKind::Depth, base, size, info.0, depth_format(info))
    }

    fn get(
        &mut self,
        backend: &mut dyn HostBackend,
        kind: SurfaceKind,
        base: u32,
        size: SurfaceSize,
        info: u32,
        format: SurfaceFormat,
    ) -> Result<Option<Surface>, GpuError> {
        if base == 0 {
            return Ok(None);
        }

        let map = match kind {
            SurfaceKind::Color => &mut self.color,
            SurfaceKind::Depth => &mut self.depth,
        };

        if let Some(surface) = map.get(&base) {
            if surface.size != size || surface.info != info {
                tracing::debug!(
                    "{:?} surface 0x{:X} reused with size 0x{:08X} info 0x{:08X} (created with 0x{:08X} 0x{:08X})",
                    kind,
                    base,
                    size.0,
                    info,
                    surface.size.0,
                    surface.info
                );
            }
            return Ok(Some(*surface));
        }

        let width = size.pitch();
        let height = size.height();
        let image = backend
            .create_image(&ImageDesc { width, height, format })
            .map_err(GpuError::Backend)?;

        tracing::debug!(
            "Created {:?} surface 0x{:X}: {}x{} {:?}",
            kind,
            base,
            width,
            height,
            format
        );

        let surface = Surface {
            image,
            base,
            size,
            info,
            width,
            height,
            format,
        };
        map.insert(base, surface);
        self.created += 1;
        Ok(Some(surface))
    }

    pub fn color_surface(&self, base: u32) -> Option<&Surface> {
        self.color.get(&base)
    }

    pub fn contains_color(&self, base: u32) -> bool {
        self.color.contains_key(&base)
    }

    pub fn contains_depth(&self, base: u32) -> bool {
        self.depth.contains_key(&base)
    }

    /// Cached color surface base addresses
    pub fn color_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.color.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.color.len() + self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of host images created so far
    pub fn created(&self) -> u64 {
        self.created
    }
}
