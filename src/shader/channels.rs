//! Procedural channel textures.

use super::uniforms::ChannelSource;
use crate::frame::PixelFrame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const CHANNEL_SIZE: u32 = 256;

const NOISE_SEED: u64 = 0x5eed_ca57;

/// Generates the RGBA texture for a procedural source, rows bottom to top.
/// Returns `None` for [`ChannelSource::Stream`].
pub fn procedural_texture(source: ChannelSource) -> Option<PixelFrame> {
    let size = CHANNEL_SIZE;
    let frame = match source {
        ChannelSource::Stream => return None,
        ChannelSource::Noise => {
            let mut rng = StdRng::seed_from_u64(NOISE_SEED);
            let mut data = vec![0u8; (size * size * 4) as usize];
            for px in data.chunks_exact_mut(4) {
                px[0] = rng.random();
                px[1] = rng.random();
                px[2] = rng.random();
                px[3] = 255;
            }
            PixelFrame::from_data(size, size, crate::frame::PixelFormat::Rgba, data)
        }
        ChannelSource::Gradient => generate(size, |x, y| {
            let u = x as f32 / (size - 1) as f32;
            let v = y as f32 / (size - 1) as f32;
            [(u * 255.0) as u8, (v * 255.0) as u8, ((1.0 - u) * 255.0) as u8, 255]
        }),
        ChannelSource::Stripes => generate(size, |x, _| {
            if (x / 16) % 2 == 0 {
                [255, 255, 255, 255]
            } else {
                [0, 0, 0, 255]
            }
        }),
        ChannelSource::Checker => generate(size, |x, y| {
            if ((x / 32) + (y / 32)) % 2 == 0 {
                [230, 230, 230, 255]
            } else {
                [40, 40, 40, 255]
            }
        }),
    };
    Some(frame)
}

/// `y` counts from the bottom row.
fn generate(size: u32, texel: impl Fn(u32, u32) -> [u8; 4]) -> PixelFrame {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            data.extend_from_slice(&texel(x, y));
        }
    }
    PixelFrame::from_data(size, size, crate::frame::PixelFormat::Rgba, data)
}
