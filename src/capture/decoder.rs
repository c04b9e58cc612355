//! Raw sensor buffer to display-ready RGB conversion.
//!
//! The whole pipeline speaks interleaved RGB: the decoder output feeds the
//! `RGB24` display texture and the PNG snapshot path unchanged. BGR8 is
//! therefore the format that swaps channel order and RGB8 passes through.
//!
//! Every call allocates a fresh output buffer. The raw input belongs to the
//! transport's ring and may be released the moment `decode` returns.

use thiserror::Error;

use super::frame::{Frame, PixelFormat};
use super::transport::RawFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported pixel format {format} for {width}x{height} buffer of {len} bytes")]
    UnsupportedFormat {
        format: String,
        width: u32,
        height: u32,
        len: usize,
    },

    #[error("raw buffer size mismatch: expected {expected} bytes, got {got}")]
    BufferMismatch { expected: usize, got: usize },
}

/// Convert one raw sensor buffer into an interleaved RGB frame.
///
/// Pure and lock-free; safe to call from the capture thread.
pub fn decode(
    raw: &[u8],
    width: u32,
    height: u32,
    format: &RawFormat,
) -> Result<Frame, DecodeError> {
    let w = width as usize;
    let h = height as usize;

    match format {
        RawFormat::Known(pf) => {
            let expected = w * h * pf.raw_bytes_per_pixel();
            if raw.len() != expected {
                return Err(DecodeError::BufferMismatch {
                    expected,
                    got: raw.len(),
                });
            }
            let pixels = match pf {
                PixelFormat::Mono8 => expand_mono(raw),
                PixelFormat::Rgb8 => raw.to_vec(),
                PixelFormat::Bgr8 => swap_bgr(raw),
                // Pattern name encodes the first two pixels of the first
                // row; the (red_row, red_col) site offsets below are what
                // make the four kernels distinct.
                PixelFormat::BayerRg8 => demosaic_bilinear(raw, w, h, 0, 0),
                PixelFormat::BayerGr8 => demosaic_bilinear(raw, w, h, 0, 1),
                PixelFormat::BayerGb8 => demosaic_bilinear(raw, w, h, 1, 0),
                PixelFormat::BayerBg8 => demosaic_bilinear(raw, w, h, 1, 1),
            };
            Ok(Frame::new(width, height, *pf, pixels))
        }
        RawFormat::Other(name) => {
            // Unknown single-channel layouts render as grayscale; anything
            // else cannot be interpreted and the frame is dropped upstream.
            if raw.len() == w * h {
                Ok(Frame::new(width, height, PixelFormat::Mono8, expand_mono(raw)))
            } else {
                Err(DecodeError::UnsupportedFormat {
                    format: name.clone(),
                    width,
                    height,
                    len: raw.len(),
                })
            }
        }
    }
}

fn expand_mono(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() * 3);
    for &v in raw {
        out.extend_from_slice(&[v, v, v]);
    }
    out
}

fn swap_bgr(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for px in raw.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

/// Mirror-reflect an out-of-bounds coordinate back into `0..n`.
///
/// Reflection by one preserves the Bayer phase of the sampled site, which a
/// clamp would not: clamping at the border would pull a neighbor of the
/// wrong color into the interpolation.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let j = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    j.clamp(0, n - 1) as usize
}

/// Bilinear demosaic of an 8-bit Bayer mosaic into interleaved RGB.
///
/// `(red_row, red_col)` locate the red site within each 2x2 cell; blue sits
/// diagonally opposite and the remaining two sites are green.
fn demosaic_bilinear(raw: &[u8], w: usize, h: usize, red_row: usize, red_col: usize) -> Vec<u8> {
    let mut out = vec![0u8; w * h * 3];
    let at = |x: isize, y: isize| -> u32 { raw[reflect(y, h) * w + reflect(x, w)] as u32 };

    for y in 0..h {
        for x in 0..w {
            let xi = x as isize;
            let yi = y as isize;

            let edges = || (at(xi - 1, yi) + at(xi + 1, yi) + at(xi, yi - 1) + at(xi, yi + 1)) / 4;
            let diagonals = || {
                (at(xi - 1, yi - 1) + at(xi + 1, yi - 1) + at(xi - 1, yi + 1) + at(xi + 1, yi + 1))
                    / 4
            };
            let horizontal = || (at(xi - 1, yi) + at(xi + 1, yi)) / 2;
            let vertical = || (at(xi, yi - 1) + at(xi, yi + 1)) / 2;

            let on_red_row = y % 2 == red_row;
            let on_red_col = x % 2 == red_col;

            let (r, g, b) = match (on_red_row, on_red_col) {
                // Red site: greens on the edges, blues on the diagonals.
                (true, true) => (at(xi, yi), edges(), diagonals()),
                // Blue site: the mirror image.
                (false, false) => (diagonals(), edges(), at(xi, yi)),
                // Green site in a red row: reds left/right, blues above/below.
                (true, false) => (horizontal(), at(xi, yi), vertical()),
                // Green site in a blue row: the transpose.
                (false, true) => (vertical(), at(xi, yi), horizontal()),
            };

            let idx = (y * w + x) * 3;
            out[idx] = r as u8;
            out[idx + 1] = g as u8;
            out[idx + 2] = b as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 8;
    const H: u32 = 6;

    /// Build a uniform Bayer mosaic: every red site carries `r`, every green
    /// site `g`, every blue site `b`.
    fn bayer_mosaic(red_row: usize, red_col: usize, r: u8, g: u8, b: u8) -> Vec<u8> {
        let (w, h) = (W as usize, H as usize);
        let mut raw = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                raw[y * w + x] = match (y % 2 == red_row, x % 2 == red_col) {
                    (true, true) => r,
                    (false, false) => b,
                    _ => g,
                };
            }
        }
        raw
    }

    fn assert_uniform(frame: &Frame, rgb: [u8; 3]) {
        assert_eq!(frame.pixels.len(), (W * H * 3) as usize);
        for px in frame.pixels.chunks_exact(3) {
            assert_eq!(px, rgb);
        }
    }

    #[test]
    fn output_is_always_three_channels() {
        for format in PixelFormat::ALL {
            let raw = vec![7u8; (W * H) as usize * format.raw_bytes_per_pixel()];
            let frame = decode(&raw, W, H, &RawFormat::Known(format)).unwrap();
            assert_eq!(frame.pixels.len(), (W * H * 3) as usize);
            assert_eq!(frame.channels, 3);
            assert_eq!(frame.source_format, format);
        }
    }

    #[test]
    fn mono_replicates_into_all_channels() {
        let raw: Vec<u8> = (0..(W * H) as usize).map(|i| (i * 5 % 251) as u8).collect();
        let frame = decode(&raw, W, H, &RawFormat::Known(PixelFormat::Mono8)).unwrap();
        for (i, px) in frame.pixels.chunks_exact(3).enumerate() {
            assert_eq!(px, [raw[i], raw[i], raw[i]]);
        }
    }

    #[test]
    fn rgb_passes_through_untouched() {
        let raw: Vec<u8> = (0..(W * H * 3) as usize).map(|i| (i % 256) as u8).collect();
        let frame = decode(&raw, W, H, &RawFormat::Known(PixelFormat::Rgb8)).unwrap();
        assert_eq!(&frame.pixels[..], &raw[..]);
    }

    #[test]
    fn bgr_swaps_to_rgb() {
        let raw = [10u8, 20, 30].repeat((W * H) as usize);
        let frame = decode(&raw, W, H, &RawFormat::Known(PixelFormat::Bgr8)).unwrap();
        assert_uniform(&frame, [30, 20, 10]);
    }

    #[test]
    fn each_bayer_pattern_recovers_its_color() {
        let cases = [
            (PixelFormat::BayerRg8, 0, 0),
            (PixelFormat::BayerGr8, 0, 1),
            (PixelFormat::BayerGb8, 1, 0),
            (PixelFormat::BayerBg8, 1, 1),
        ];
        for (format, red_row, red_col) in cases {
            let raw = bayer_mosaic(red_row, red_col, 200, 100, 50);
            let frame = decode(&raw, W, H, &RawFormat::Known(format)).unwrap();
            assert_uniform(&frame, [200, 100, 50]);
        }
    }

    #[test]
    fn mismatched_bayer_pattern_corrupts_color() {
        // A pure-red RGGB mosaic read as BGGR lands the red samples on the
        // blue sites: silent channel swap, which is exactly why the
        // patterns are not interchangeable.
        let raw = bayer_mosaic(0, 0, 255, 0, 0);
        let frame = decode(&raw, W, H, &RawFormat::Known(PixelFormat::BayerBg8)).unwrap();
        assert_uniform(&frame, [0, 0, 255]);
    }

    #[test]
    fn unknown_single_channel_format_falls_back_to_grayscale() {
        let raw = vec![90u8; (W * H) as usize];
        let format = RawFormat::Other("Mono10".into());
        let frame = decode(&raw, W, H, &format).unwrap();
        assert_uniform(&frame, [90, 90, 90]);
    }

    #[test]
    fn unknown_format_with_odd_layout_is_rejected() {
        let raw = vec![0u8; (W * H * 2) as usize];
        let err = decode(&raw, W, H, &RawFormat::Other("Mono16".into())).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { .. }));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let raw = vec![0u8; 10];
        let err = decode(&raw, W, H, &RawFormat::Known(PixelFormat::Mono8)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::BufferMismatch {
                expected: (W * H) as usize,
                got: 10
            }
        );
    }
}
