//! 2D and cube textures, and the fallback textures bound on unused units.

use crate::backend::{
    BackendError, CubeFace, FilterMode, GraphicsBackend, TexelData, TextureDescriptor,
    TextureFormat, TextureHandle, TextureRegion, TextureTarget, WrapMode,
};
use crate::error::RenderResult;
use crate::loader::hdr::HdrImage;
use crate::shader::RESERVED_TEXTURE_UNITS;

/// Sampling and upload options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureOptions {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_filter: Option<FilterMode>,
    pub wrap: WrapMode,
    /// Reverse row order on upload, for images stored top row first
    pub flip_y: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mipmap_filter: None,
            wrap: WrapMode::Repeat,
            flip_y: false,
        }
    }
}

impl TextureOptions {
    pub fn nearest() -> Self {
        Self {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            ..Self::default()
        }
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_flip_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    /// Allocate a full mip chain and generate it after upload.
    pub fn with_mipmaps(mut self, filter: FilterMode) -> Self {
        self.mipmap_filter = Some(filter);
        self
    }

    fn apply(&self, desc: TextureDescriptor) -> TextureDescriptor {
        let desc = desc
            .with_filter(self.min_filter, self.mag_filter)
            .with_wrap(self.wrap);
        match self.mipmap_filter {
            Some(filter) => {
                let levels = full_mip_chain(desc.width.max(desc.height));
                desc.with_mip_levels(levels).with_mipmap_filter(filter)
            }
            None => desc,
        }
    }
}

/// Levels of a complete mip chain for a base size.
pub fn full_mip_chain(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

/// Refuse linear filtering of 32-bit float textures on devices without it.
fn check_filtering(backend: &dyn GraphicsBackend, desc: &TextureDescriptor) -> RenderResult<()> {
    if desc.format.requires_float_linear_extension()
        && desc.uses_linear_filtering()
        && !backend.capabilities().float_linear_filtering
    {
        return Err(BackendError::FeatureNotSupported(format!(
            "linear filtering of {:?} texture {:?} (OES_texture_float_linear)",
            desc.format, desc.label
        ))
        .into());
    }
    Ok(())
}

fn flip_rows<T: Copy>(data: &[T], row_len: usize) -> Vec<T> {
    if row_len == 0 {
        return data.to_vec();
    }
    data.chunks(row_len).rev().flatten().copied().collect()
}

/// A 2D texture
#[derive(Debug)]
pub struct Texture2D {
    handle: TextureHandle,
    desc: TextureDescriptor,
}

impl Texture2D {
    /// Allocate storage without contents.
    pub fn new(backend: &mut dyn GraphicsBackend, desc: TextureDescriptor) -> RenderResult<Self> {
        check_filtering(backend, &desc)?;
        let handle = backend.create_texture(&desc)?;
        log::debug!(
            "Texture2D {:?}: {}x{} {:?}, {} level(s)",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels
        );
        Ok(Self { handle, desc })
    }

    /// Upload 8-bit RGBA pixels stored top row first.
    pub fn from_rgba8(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        srgb: bool,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let format = if srgb {
            TextureFormat::Rgba8UnormSrgb
        } else {
            TextureFormat::Rgba8Unorm
        };
        let desc = options.apply(TextureDescriptor::new_2d(width, height, format).with_label(label));
        let texture = Self::new(backend, desc)?;
        let data = if options.flip_y {
            flip_rows(pixels, width as usize * 4)
        } else {
            pixels.to_vec()
        };
        texture.upload(backend, 0, TexelData::U8(&data));
        if options.mipmap_filter.is_some() {
            backend.generate_mipmaps(texture.handle);
        }
        Ok(texture)
    }

    /// Upload a decoded bitmap.
    pub fn from_image(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        image: &image::RgbaImage,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        Self::from_rgba8(
            backend,
            label,
            image.width(),
            image.height(),
            image.as_raw(),
            true,
            options,
        )
    }

    /// Upload HDR radiance as an RGB float texture.
    pub fn from_hdr(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        hdr: &HdrImage,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let desc = options.apply(
            TextureDescriptor::new_2d(hdr.width, hdr.height, TextureFormat::Rgb32Float).with_label(label),
        );
        let texture = Self::new(backend, desc)?;
        let data = if options.flip_y {
            flip_rows(&hdr.data, hdr.width as usize * 3)
        } else {
            hdr.data.clone()
        };
        texture.upload(backend, 0, TexelData::F32(&data));
        if options.mipmap_filter.is_some() {
            backend.generate_mipmaps(texture.handle);
        }
        Ok(texture)
    }

    /// Single-level texture meant as a color attachment.
    pub fn render_target(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        let desc = TextureDescriptor::new_2d(width, height, format)
            .with_label(label)
            .with_wrap(WrapMode::ClampToEdge);
        Self::new(backend, desc)
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    /// Replace the contents of one level, rows bottom first.
    pub fn upload(&self, backend: &mut dyn GraphicsBackend, level: u32, data: TexelData) {
        let (width, height) = self.desc.level_size(level);
        backend.write_texture(
            self.handle,
            &TextureRegion::level_2d(level, width, height),
            data,
        );
    }

    pub fn bind(&self, backend: &mut dyn GraphicsBackend, unit: u32) {
        backend.bind_texture(unit, TextureTarget::Texture2D, Some(self.handle));
    }

    /// Read one level back as RGBA floats, rows bottom first.
    pub fn read_pixels(&self, backend: &mut dyn GraphicsBackend, level: u32) -> RenderResult<Vec<f32>> {
        let (width, height) = self.desc.level_size(level);
        Ok(backend.read_texture(self.handle, &TextureRegion::level_2d(level, width, height))?)
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture(self.handle);
    }
}

/// A cube texture, square faces in GL face order
#[derive(Debug)]
pub struct TextureCubeMap {
    handle: TextureHandle,
    desc: TextureDescriptor,
}

impl TextureCubeMap {
    /// Allocate a cube map; `size` is clamped to the device limit.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        size: u32,
        format: TextureFormat,
        mip_levels: u32,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let max = backend.capabilities().max_cube_map_size;
        let size = if size > max {
            log::warn!("TextureCubeMap '{}': size {} clamped to {}", label, size, max);
            max
        } else {
            size.max(1)
        };

        let mut desc = TextureDescriptor::new_cube(size, format)
            .with_label(label)
            .with_filter(options.min_filter, options.mag_filter)
            .with_mip_levels(mip_levels.min(full_mip_chain(size)));
        if let Some(filter) = options.mipmap_filter {
            desc = desc.with_mipmap_filter(filter);
        }
        check_filtering(backend, &desc)?;
        let handle = backend.create_texture(&desc)?;
        log::debug!(
            "TextureCubeMap '{}': {}² {:?}, {} level(s)",
            label,
            size,
            format,
            desc.mip_levels
        );
        Ok(Self { handle, desc })
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Edge length of level 0
    pub fn size(&self) -> u32 {
        self.desc.width
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn level_size(&self, level: u32) -> u32 {
        self.desc.level_size(level).0
    }

    pub fn upload_face(
        &self,
        backend: &mut dyn GraphicsBackend,
        face: CubeFace,
        level: u32,
        data: TexelData,
    ) {
        let region = TextureRegion::cube_face(face, level, self.level_size(level));
        backend.write_texture(self.handle, &region, data);
    }

    pub fn generate_mipmaps(&self, backend: &mut dyn GraphicsBackend) {
        backend.generate_mipmaps(self.handle);
    }

    pub fn bind(&self, backend: &mut dyn GraphicsBackend, unit: u32) {
        backend.bind_texture(unit, TextureTarget::CubeMap, Some(self.handle));
    }

    /// Read one face level back as RGBA floats.
    pub fn read_face(
        &self,
        backend: &mut dyn GraphicsBackend,
        face: CubeFace,
        level: u32,
    ) -> RenderResult<Vec<f32>> {
        let region = TextureRegion::cube_face(face, level, self.level_size(level));
        Ok(backend.read_texture(self.handle, &region)?)
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture(self.handle);
    }
}

/// 1x1 placeholders sampled by optional maps that are missing or still loading
#[derive(Debug)]
pub struct FallbackTextures {
    white: Texture2D,
    black_cube: TextureCubeMap,
}

impl FallbackTextures {
    pub fn new(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        let white = Texture2D::from_rgba8(
            backend,
            "fallback.white",
            1,
            1,
            &[255, 255, 255, 255],
            false,
            TextureOptions::nearest(),
        )?;
        let black_cube = TextureCubeMap::new(
            backend,
            "fallback.black_cube",
            1,
            TextureFormat::Rgba8Unorm,
            1,
            TextureOptions::nearest(),
        )?;
        for face in CubeFace::ALL {
            black_cube.upload_face(backend, face, 0, TexelData::U8(&[0, 0, 0, 255]));
        }
        Ok(Self { white, black_cube })
    }

    pub fn white(&self) -> &Texture2D {
        &self.white
    }

    pub fn black_cube(&self) -> &TextureCubeMap {
        &self.black_cube
    }

    /// Bind both placeholders on every reserved sampler unit.
    pub fn bind_all(&self, backend: &mut dyn GraphicsBackend) {
        for unit in 0..RESERVED_TEXTURE_UNITS {
            self.white.bind(backend, unit);
            self.black_cube.bind(backend, unit);
        }
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        self.white.destroy(backend);
        self.black_cube.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, HeadlessBackend};

    #[test]
    fn test_float_linear_filtering_requires_capability() {
        let mut backend = HeadlessBackend::new(4, 4).with_capabilities(Capabilities {
            float_linear_filtering: false,
            ..Capabilities::default()
        });
        let hdr = HdrImage::new(1, 1, vec![1.0, 2.0, 3.0]).unwrap();

        let err = Texture2D::from_hdr(&mut backend, "sky", &hdr, TextureOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Feature not supported"));
        assert!(Texture2D::from_hdr(&mut backend, "sky", &hdr, TextureOptions::nearest()).is_ok());
    }

    #[test]
    fn test_hdr_upload_flips_rows() {
        let mut backend = HeadlessBackend::new(4, 4);
        let hdr = HdrImage::new(1, 2, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]).unwrap();
        let texture = Texture2D::from_hdr(
            &mut backend,
            "sky",
            &hdr,
            TextureOptions::default().with_flip_y(true),
        )
        .unwrap();
        let pixels = texture.read_pixels(&mut backend, 0).unwrap();
        assert_eq!(pixels, vec![2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_cube_size_is_clamped() {
        let mut backend = HeadlessBackend::new(4, 4).with_capabilities(Capabilities {
            max_cube_map_size: 16,
            ..Capabilities::default()
        });
        let cube = TextureCubeMap::new(
            &mut backend,
            "env",
            512,
            TextureFormat::Rgba16Float,
            10,
            TextureOptions::default(),
        )
        .unwrap();
        assert_eq!(cube.size(), 16);
        assert_eq!(cube.mip_levels(), 5);
    }

    #[test]
    fn test_fallbacks_cover_every_reserved_unit() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fallbacks = FallbackTextures::new(&mut backend).unwrap();
        fallbacks.bind_all(&mut backend);
        for unit in 0..RESERVED_TEXTURE_UNITS {
            assert_eq!(
                backend.bound_texture(unit, TextureTarget::Texture2D),
                Some(fallbacks.white().handle())
            );
            assert_eq!(
                backend.bound_texture(unit, TextureTarget::CubeMap),
                Some(fallbacks.black_cube().handle())
            );
        }
        let black = fallbacks
            .black_cube()
            .read_face(&mut backend, CubeFace::NegativeZ, 0)
            .unwrap();
        assert_eq!(black, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain(1), 1);
        assert_eq!(full_mip_chain(32), 6);
        assert_eq!(full_mip_chain(33), 6);
    }
}
