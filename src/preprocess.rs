use crate::config::{ChannelFormat, ImageProcessorConfig, ImageSize};
use crate::error::Result;
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};
use log::debug;
use std::path::Path;

/// load image from path, converted to RGB
pub fn read_image<P: AsRef<Path>>(image_path: P) -> Result<RgbImage> {
    let image = ImageReader::open(image_path)?
        .with_guessed_format()?
        .decode()?;
    Ok(image.to_rgb8())
}

/// Output `(width, height)` of `DetrImageProcessor` resizing: shortest edge to `size`, unless
/// that would push the longest edge past `max_size`.
pub fn shortest_edge_size(
    (width, height): (u32, u32),
    size: u32,
    max_size: Option<u32>,
) -> (u32, u32) {
    let mut size = size;
    // unrounded short side when the long side cap applies, the long side is scaled from it
    let mut raw_size = None;
    if let Some(max_size) = max_size {
        let min_original = width.min(height) as f64;
        let max_original = width.max(height) as f64;
        if max_original / min_original * size as f64 > max_size as f64 {
            let raw = max_size as f64 * min_original / max_original;
            size = raw.round_ties_even() as u32;
            raw_size = Some(raw);
        }
    }
    if (height <= width && height == size) || (width <= height && width == size) {
        return (width, height);
    }
    let short = raw_size.unwrap_or(size as f64);
    if width < height {
        (size, (short * height as f64 / width as f64) as u32)
    } else {
        ((short * width as f64 / height as f64) as u32, size)
    }
}

/// Output `(width, height)` of Detectron2's `ResizeShortestEdge`, a `min_size` of 0 keeps the
/// original size.
pub fn resize_shortest_edge_size(
    (width, height): (u32, u32),
    min_size: u32,
    max_size: u32,
) -> (u32, u32) {
    if min_size == 0 {
        return (width, height);
    }
    let (w, h) = (width as f64, height as f64);
    let scale = min_size as f64 / w.min(h);
    let (mut new_w, mut new_h) = if h < w {
        (scale * w, min_size as f64)
    } else {
        (min_size as f64, scale * h)
    };
    let longest = new_w.max(new_h);
    if max_size > 0 && longest > max_size as f64 {
        let scale = max_size as f64 / longest;
        new_w *= scale;
        new_h *= scale;
    }
    ((new_w + 0.5) as u32, (new_h + 0.5) as u32)
}

/// resize target for a Hugging Face image processor config
pub fn processor_size(config: &ImageProcessorConfig, original: (u32, u32)) -> (u32, u32) {
    if !config.do_resize {
        return original;
    }
    match config.size {
        ImageSize::Edges {
            shortest_edge,
            longest_edge,
        } => shortest_edge_size(original, shortest_edge, longest_edge.or(config.max_size)),
        ImageSize::Shortest(size) => shortest_edge_size(original, size, config.max_size),
        ImageSize::Exact { height, width } => (width, height),
    }
}

/// bilinear resize, no copy when the size is unchanged
pub fn resize_image(image: &RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    debug!(
        "resizing image {:?} to {:?}",
        image.dimensions(),
        (width, height)
    );
    DynamicImage::ImageRgb8(image.clone())
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8()
}

/// per channel pixel transform applied when building the input tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub format: ChannelFormat,
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// raw 0..255 values
    pub fn identity(format: ChannelFormat) -> Self {
        Self {
            format,
            scale: 1.0,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    pub fn from_processor(config: &ImageProcessorConfig) -> Self {
        let mut normalization = Self::identity(ChannelFormat::Rgb);
        if config.do_rescale {
            normalization.scale = config.rescale_factor;
        }
        if config.do_normalize {
            normalization.mean = config.image_mean;
            normalization.std = config.image_std;
        }
        normalization
    }
}

/// load image into a `(3, height, width)` f32 tensor
pub fn image_to_tensor(
    image: &RgbImage,
    normalization: &Normalization,
    device: &Device,
) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let data = image.as_raw().clone();
    let data = Tensor::from_vec(data, (height as usize, width as usize, 3), device)?
        .permute((2, 0, 1))?
        .contiguous()?;
    let data = match normalization.format {
        ChannelFormat::Rgb => data,
        ChannelFormat::Bgr => {
            let order = Tensor::new(&[2u32, 1, 0], device)?;
            data.index_select(&order, 0)?
        }
    };
    let mean = Tensor::new(&normalization.mean, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&normalization.std, device)?.reshape((3, 1, 1))?;
    let tensor = data
        .to_dtype(DType::F32)?
        .affine(normalization.scale as f64, 0.0)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(tensor)
}
