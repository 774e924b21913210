//! GPU textures used by the shadow pass.
//!
//! Helpers for the two kinds of textures the shadow system deals with: the
//! depth target the light renders into and the RGBA cutout textures whose
//! alpha decides which texels cast shadows. Both are handed to the backend as
//! bare `wgpu::Texture` handles; the backend creates its own views and
//! sampler.

use anyhow::*;
use image::{ImageFormat, load_from_memory_with_format};

/// Depth format of shadow maps created by this crate.
pub const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Create a square shadow map the light pass can render into and shading can
/// sample.
///
/// `COPY_SRC` is set so the depth can be read back for inspection.
pub fn create_shadow_map(device: &wgpu::Device, size: u32, label: &str) -> wgpu::Texture {
    let size = wgpu::Extent3d {
        width: size.max(1),
        height: size.max(1),
        depth_or_array_layers: 1,
    };
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_MAP_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[SHADOW_MAP_FORMAT],
    })
}

/// Upload an RGBA image as a cutout texture.
///
/// Cutout textures are copied into the backend's texture array, hence
/// `COPY_SRC`.
pub fn create_cutout_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    img: &image::RgbaImage,
    label: &str,
) -> wgpu::Texture {
    let (width, height) = img.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        img.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    texture
}

/// Decode raw image file data (PNG, JPEG) into RGBA8.
///
/// `format` is an optional file extension hint. If None, the format is guessed.
pub fn decode_rgba(bytes: &[u8], format: Option<&str>) -> Result<image::RgbaImage> {
    let img = match format {
        None => image::load_from_memory(bytes)?,
        Some(fmt) => {
            let format = ImageFormat::from_extension(fmt)
                .ok_or_else(|| anyhow!("unknown image format '{}'", fmt))?;
            load_from_memory_with_format(bytes, format)?
        }
    };
    Ok(img.to_rgba8())
}

pub fn create_cutout_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("cutout sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_png_with_and_without_hint() {
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([1, 2, 3, 128]));
        let bytes = encode_png(&img);
        let guessed = decode_rgba(&bytes, None).unwrap();
        let hinted = decode_rgba(&bytes, Some("png")).unwrap();
        assert_eq!(guessed, img);
        assert_eq!(hinted, img);
    }

    #[test]
    fn unknown_extension_is_an_error() {
        assert!(decode_rgba(&[], Some("nope")).is_err());
    }
}
