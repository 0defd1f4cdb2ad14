//! Table de décodage: convertit une trame brute dans son `PixelFormat` vendeur
//! vers une image canonique 8 bits par canal (BGR ou mono), redimensionnée à
//! la résolution d'affichage avant publication.

use crate::{CameraFrame, PixelFormat};
use image::{imageops::FilterType, ImageBuffer, Luma, Rgb};

/// Image décodée, toujours 8 bits/canal, mono ou BGR.
#[derive(Debug, Clone)]
pub enum Canonical {
    Mono(ImageBuffer<Luma<u8>, Vec<u8>>),
    Bgr(ImageBuffer<Rgb<u8>, Vec<u8>>),
}

impl Canonical {
    pub fn width(&self) -> u32 {
        match self {
            Canonical::Mono(img) => img.width(),
            Canonical::Bgr(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Canonical::Mono(img) => img.height(),
            Canonical::Bgr(img) => img.height(),
        }
    }

    pub fn resize(&self, width: u32, height: u32) -> Canonical {
        match self {
            Canonical::Mono(img) => {
                Canonical::Mono(image::imageops::resize(img, width, height, FilterType::Triangle))
            }
            Canonical::Bgr(img) => {
                Canonical::Bgr(image::imageops::resize(img, width, height, FilterType::Triangle))
            }
        }
    }

    pub fn into_raw(self) -> Vec<u8> {
        match self {
            Canonical::Mono(img) => img.into_raw(),
            Canonical::Bgr(img) => img.into_raw(),
        }
    }
}

/// Décode une trame brute vers sa forme canonique. Une étiquette de format
/// inconnue ne peut pas survenir via l'énumération fermée `PixelFormat`; les
/// formats Bayer/YUV non encore démosaïqués retombent sur un passage mono
/// direct (chemin pass-through) accompagné d'un avertissement.
pub fn decode(frame: &CameraFrame) -> Canonical {
    match frame.pixel_format {
        PixelFormat::Mono8 => mono8(frame),
        PixelFormat::RGB8 => rgb8(frame),
        PixelFormat::BGR8 => bgr8(frame),
        PixelFormat::RGBA8 => rgba8(frame),
        PixelFormat::BGRA8 => bgra8(frame),
        PixelFormat::Mono16 => mono16(frame),
        PixelFormat::BayerRG8
        | PixelFormat::BayerGB8
        | PixelFormat::BayerGR8
        | PixelFormat::BayerBG8 => {
            log::warn!(
                "pixel format {:?} not demosaiced, passing through as mono8",
                frame.pixel_format
            );
            mono8(frame)
        }
        PixelFormat::YUV422 | PixelFormat::YUV422Packed => {
            log::warn!("pixel format {:?} not color-converted, passing through as mono8", frame.pixel_format);
            mono8(frame)
        }
    }
}

fn mono8(frame: &CameraFrame) -> Canonical {
    Canonical::Mono(
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

fn mono16(frame: &CameraFrame) -> Canonical {
    let downshifted: Vec<u8> = frame
        .data
        .chunks_exact(2)
        .map(|c| (u16::from_le_bytes([c[0], c[1]]) >> 8) as u8)
        .collect();
    Canonical::Mono(
        ImageBuffer::from_raw(frame.width, frame.height, downshifted)
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

fn rgb8(frame: &CameraFrame) -> Canonical {
    Canonical::Bgr(
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

fn bgr8(frame: &CameraFrame) -> Canonical {
    let swapped: Vec<u8> = frame
        .data
        .chunks_exact(3)
        .flat_map(|c| [c[2], c[1], c[0]])
        .collect();
    Canonical::Bgr(
        ImageBuffer::from_raw(frame.width, frame.height, swapped)
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

fn rgba8(frame: &CameraFrame) -> Canonical {
    let dropped: Vec<u8> = frame.data.chunks_exact(4).flat_map(|c| [c[0], c[1], c[2]]).collect();
    Canonical::Bgr(
        ImageBuffer::from_raw(frame.width, frame.height, dropped)
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

fn bgra8(frame: &CameraFrame) -> Canonical {
    let swapped: Vec<u8> = frame
        .data
        .chunks_exact(4)
        .flat_map(|c| [c[2], c[1], c[0]])
        .collect();
    Canonical::Bgr(
        ImageBuffer::from_raw(frame.width, frame.height, swapped)
            .unwrap_or_else(|| ImageBuffer::new(frame.width, frame.height)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(format: PixelFormat, channels: usize) -> CameraFrame {
        let (w, h) = (4u32, 4u32);
        CameraFrame {
            data: vec![128u8; (w * h) as usize * channels],
            width: w,
            height: h,
            pixel_format: format,
            device_timestamp_ns: 0,
            frame_id: 0,
        }
    }

    #[test]
    fn mono8_decodes_to_mono_canonical_of_same_dimensions() {
        let frame = test_frame(PixelFormat::Mono8, 1);
        let canonical = decode(&frame);
        assert!(matches!(canonical, Canonical::Mono(_)));
        assert_eq!(canonical.width(), 4);
        assert_eq!(canonical.height(), 4);
    }

    #[test]
    fn bgr8_decodes_to_bgr_canonical() {
        let frame = test_frame(PixelFormat::BGR8, 3);
        let canonical = decode(&frame);
        assert!(matches!(canonical, Canonical::Bgr(_)));
    }

    #[test]
    fn unknown_bayer_tag_falls_through_to_mono_pass_through() {
        let frame = test_frame(PixelFormat::BayerRG8, 1);
        let canonical = decode(&frame);
        assert!(matches!(canonical, Canonical::Mono(_)));
    }

    #[test]
    fn resize_produces_requested_dimensions() {
        let frame = test_frame(PixelFormat::Mono8, 1);
        let canonical = decode(&frame).resize(640, 480);
        assert_eq!(canonical.width(), 640);
        assert_eq!(canonical.height(), 480);
    }
}
