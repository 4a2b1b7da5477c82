//! Frame validation utilities for test pattern verification.
//!
//! These check that converted images and dequeued buffers look like what a
//! known source produces. Useful for integration testing with virtual
//! cameras.

use crate::error::ValidationError;
use crate::image::Image;
use crate::traits::DequeuedBuffer;

/// Minimum luminance change across a frame for it to count as a gradient.
const MIN_GRADIENT_RANGE: f32 = 50.0;

/// Color of the pixel at `(x, y)`. Grey images report the same value for
/// all three channels.
#[must_use]
pub fn pixel_at(image: &Image, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    if x >= image.width() || y >= image.height() {
        return None;
    }
    let offset = y as usize * image.pitch() + x as usize;
    let [r, g, b] = image.channels();
    Some((*r.get(offset)?, *g.get(offset)?, *b.get(offset)?))
}

/// Validates that an image contains a horizontal gradient.
///
/// Samples the center row every 10 pixels and checks that luminance
/// increases from left to right, with a significant change overall.
///
/// # Errors
///
/// Returns [`ValidationError::NotIncreasing`] on a drop of more than one
/// luminance step, or [`ValidationError::InsufficientRange`] for a nearly
/// solid image.
pub fn validate_gradient(image: &Image) -> Result<(), ValidationError> {
    let center_y = image.height() / 2;
    let mut first = None;
    let mut previous: Option<f32> = None;

    for x in (0..image.width()).step_by(10) {
        let (r, g, b) = pixel_at(image, x, center_y)
            .ok_or(ValidationError::PixelOutOfBounds { x, y: center_y })?;

        // Rec. 601 luma
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(previous) = previous {
            // Allow small decreases due to rounding
            if luminance < previous - 1.0 {
                return Err(ValidationError::NotIncreasing {
                    x,
                    luminance,
                    previous,
                });
            }
        }
        if first.is_none() {
            first = Some(luminance);
        }
        previous = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, previous) {
        let change = last - first;
        if change < MIN_GRADIENT_RANGE {
            return Err(ValidationError::InsufficientRange(change));
        }
    }
    Ok(())
}

/// Validates that every `step`-th pixel of an image has the given color.
///
/// # Errors
///
/// Returns [`ValidationError::ColorMismatch`] for the first pixel outside
/// `tolerance`.
pub fn validate_uniform(
    image: &Image,
    expected: (u8, u8, u8),
    tolerance: u8,
    step: usize,
) -> Result<(), ValidationError> {
    let step = step.max(1);
    for y in (0..image.height()).step_by(step) {
        for x in (0..image.width()).step_by(step) {
            let actual =
                pixel_at(image, x, y).ok_or(ValidationError::PixelOutOfBounds { x, y })?;
            if !colors_match(actual, expected, tolerance) {
                return Err(ValidationError::ColorMismatch {
                    x,
                    y,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Validates that dequeued buffers carry consecutive sequence numbers.
///
/// # Errors
///
/// Returns [`ValidationError::EmptySequence`] for an empty slice and
/// [`ValidationError::SequenceGap`] at the first gap.
pub fn validate_frame_sequence(buffers: &[DequeuedBuffer]) -> Result<(), ValidationError> {
    if buffers.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in buffers.windows(2).enumerate() {
        let [prev, curr] = pair else {
            continue;
        };
        let expected = prev.sequence.wrapping_add(1);
        if curr.sequence != expected {
            return Err(ValidationError::SequenceGap {
                index: index + 1,
                expected,
                found: curr.sequence,
            });
        }
    }
    Ok(())
}

/// Whether all three channels differ by at most `tolerance`.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;
    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageKind, Planes};

    fn gradient(width: u32, height: u32) -> Image {
        let mut data = Vec::with_capacity((width * height) as usize);
        for _ in 0..height {
            #[allow(clippy::cast_possible_truncation)]
            data.extend((0..width).map(|x| (x * 255 / width) as u8));
        }
        Image::from_grey(width, height, data).expect("dimensions match")
    }

    fn buffers(sequences: &[u32]) -> Vec<DequeuedBuffer> {
        sequences
            .iter()
            .map(|&sequence| DequeuedBuffer {
                index: 0,
                bytes_used: 0,
                sequence,
            })
            .collect()
    }

    #[test]
    fn test_validate_gradient_success() {
        let result = validate_gradient(&gradient(640, 480));
        assert!(result.is_ok(), "Gradient validation should succeed: {result:?}");
    }

    #[test]
    fn test_validate_gradient_solid_image() {
        let image = Image::from_grey(64, 8, vec![128; 512]).expect("dimensions match");
        let result = validate_gradient(&image);
        assert!(matches!(result, Err(ValidationError::InsufficientRange(_))));
    }

    #[test]
    fn test_validate_gradient_reversed() {
        let mut image = gradient(640, 4);
        if let Planes::Grey(data) = image.planes_mut() {
            data.reverse();
        }
        let result = validate_gradient(&image);
        assert!(matches!(result, Err(ValidationError::NotIncreasing { .. })));
    }

    #[test]
    fn test_validate_uniform() {
        let mut image = Image::new(ImageKind::Rgb, 8, 8);
        if let Planes::Rgb { r, g, b } = image.planes_mut() {
            r.fill(10);
            g.fill(20);
            b.fill(30);
        }
        validate_uniform(&image, (11, 19, 30), 1, 1).expect("within tolerance");

        let result = validate_uniform(&image, (10, 20, 40), 2, 3);
        assert!(matches!(
            result,
            Err(ValidationError::ColorMismatch { x: 0, y: 0, .. })
        ));
    }

    #[test]
    fn test_validate_frame_sequence_success() {
        let result = validate_frame_sequence(&buffers(&[4, 5, 6, 7]));
        assert!(result.is_ok(), "Frame sequence validation should succeed: {result:?}");
    }

    #[test]
    fn test_validate_frame_sequence_empty() {
        assert_eq!(
            validate_frame_sequence(&[]),
            Err(ValidationError::EmptySequence)
        );
    }

    #[test]
    fn test_validate_frame_sequence_with_gap() {
        assert_eq!(
            validate_frame_sequence(&buffers(&[0, 1, 3])),
            Err(ValidationError::SequenceGap {
                index: 2,
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_pixel_at_bounds() {
        let image = Image::from_grey(2, 2, vec![1, 2, 3, 4]).expect("dimensions match");
        assert_eq!(pixel_at(&image, 1, 1), Some((4, 4, 4)));
        assert_eq!(pixel_at(&image, 2, 0), None);
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match((100, 150, 200), (100, 150, 200), 0));
        assert!(colors_match((100, 150, 200), (105, 155, 205), 10));
        assert!(!colors_match((100, 150, 200), (120, 150, 200), 10));
    }
}
