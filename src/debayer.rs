//! Nearest-neighbor demosaic of an RGGB Bayer mosaic.
//!
//! Each 2x2 cell `R G / G B` of the mosaic becomes a 2x2 block of output
//! pixels. Red and blue are replicated over the whole block. Green keeps one
//! sample per output row: the top green fills the upper row, the bottom green
//! the lower row.

use crate::convert::{require_kind, row, RawLayout};
use crate::error::ConvertError;
use crate::image::{Image, ImageKind, Planes};

/// Demosaic an 8-bit RGGB region into an RGB image.
pub fn debayer(out: &mut Image, src: &[u8], layout: &RawLayout) -> Result<(), ConvertError> {
    require_kind(out, ImageKind::Rgb)?;
    layout.validate()?;
    if out.width() % 2 != 0 || out.height() % 2 != 0 {
        return Err(ConvertError::InvalidParameter(
            "demosaic needs even image dimensions",
        ));
    }

    // Whole cells only.
    let dx = (out.width().min(layout.width - layout.x0) & !1) as usize;
    let dy = (out.height().min(layout.height - layout.y0) & !1) as usize;
    let pitch = out.pitch();
    let stride = layout.pitch as usize + layout.padding as usize;
    let Planes::Rgb { r, g, b } = out.planes_mut() else {
        return Ok(());
    };
    if dx == 0 || dy == 0 {
        return Ok(());
    }

    let cells = r
        .chunks_exact_mut(2 * pitch)
        .zip(g.chunks_exact_mut(2 * pitch))
        .zip(b.chunks_exact_mut(2 * pitch))
        .take(dy / 2)
        .enumerate();

    for (cell_row, ((r_rows, g_rows), b_rows)) in cells {
        let y = layout.y0 as usize + 2 * cell_row;
        let top = row(src, layout.x0 as usize + y * stride, dx)?;
        let bottom = row(src, layout.x0 as usize + (y + 1) * stride, dx)?;

        let (r_top, r_bottom) = r_rows.split_at_mut(pitch);
        let (g_top, g_bottom) = g_rows.split_at_mut(pitch);
        let (b_top, b_bottom) = b_rows.split_at_mut(pitch);

        for (x, (even_row, odd_row)) in top.chunks_exact(2).zip(bottom.chunks_exact(2)).enumerate() {
            let (&[red, green_top], &[green_bottom, blue]) = (even_row, odd_row) else {
                continue;
            };
            let cell = 2 * x..2 * x + 2;
            fill(r_top, cell.clone(), red);
            fill(g_top, cell.clone(), green_top);
            fill(g_bottom, cell.clone(), green_bottom);
            fill(b_top, cell, blue);
        }

        // Red and blue are line doubled.
        copy_row(r_bottom, r_top, dx);
        copy_row(b_bottom, b_top, dx);
    }
    Ok(())
}

fn fill(plane_row: &mut [u8], cell: std::ops::Range<usize>, value: u8) {
    if let Some(dst) = plane_row.get_mut(cell) {
        dst.fill(value);
    }
}

fn copy_row(dst: &mut [u8], src: &[u8], len: usize) {
    if let (Some(d), Some(s)) = (dst.get_mut(..len), src.get(..len)) {
        d.copy_from_slice(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::unpack_raw10_debayer;

    /// Build an RGGB mosaic with constant values per color site.
    fn mosaic(width: usize, height: usize, red: u8, green: u8, blue: u8) -> Vec<u8> {
        let mut data = vec![0; width * height];
        for (y, line) in data.chunks_exact_mut(width).enumerate() {
            for (x, px) in line.iter_mut().enumerate() {
                *px = match (y % 2, x % 2) {
                    (0, 0) => red,
                    (1, 1) => blue,
                    _ => green,
                };
            }
        }
        data
    }

    fn assert_line_doubled(plane: &[u8], width: usize) {
        for (i, pair) in plane.chunks_exact(2 * width).enumerate() {
            let (upper, lower) = pair.split_at(width);
            assert_eq!(upper, lower, "row pair {i}");
        }
    }

    #[test]
    fn test_constant_mosaic_reconstructs_constant_planes() {
        let src = mosaic(8, 6, 10, 20, 30);
        let mut image = Image::new(ImageKind::Rgb, 8, 6);

        debayer(&mut image, &src, &RawLayout::full(8, 6, 0)).expect("debayer should succeed");

        let [r, g, b] = image.channels();
        assert!(r.iter().all(|&v| v == 10));
        assert!(g.iter().all(|&v| v == 20));
        assert!(b.iter().all(|&v| v == 30));
        for plane in [r, g, b] {
            assert_line_doubled(plane, 8);
        }
    }

    #[test]
    fn test_cell_replication() {
        // One 2x2 cell per color site value.
        let src = vec![
            1, 2, 5, 6, //
            3, 4, 7, 8,
        ];
        let mut image = Image::new(ImageKind::Rgb, 4, 2);

        debayer(&mut image, &src, &RawLayout::full(4, 2, 0)).expect("debayer should succeed");

        let [r, g, b] = image.channels();
        assert_eq!(r, &[1, 1, 5, 5, 1, 1, 5, 5]);
        assert_eq!(g, &[2, 2, 6, 6, 3, 3, 7, 7]);
        assert_eq!(b, &[4, 4, 8, 8, 4, 4, 8, 8]);
        assert_line_doubled(r, 4);
        assert_line_doubled(b, 4);
    }

    #[test]
    fn test_padding_and_crop() {
        // 6x4 mosaic with 2 bytes of padding per row, cropped at (2, 2).
        let mut src = Vec::new();
        for line in mosaic(6, 4, 10, 20, 30).chunks_exact(6) {
            src.extend_from_slice(line);
            src.extend_from_slice(&[0xFF, 0xFF]);
        }
        let mut image = Image::new(ImageKind::Rgb, 4, 2);

        debayer(&mut image, &src, &RawLayout::full(6, 4, 2).with_origin(2, 2))
            .expect("debayer should succeed");

        let [r, g, b] = image.channels();
        assert!(r.iter().all(|&v| v == 10));
        assert!(g.iter().all(|&v| v == 20));
        assert!(b.iter().all(|&v| v == 30));
    }

    #[test]
    fn test_rejects_odd_dimensions_and_grey() {
        let src = mosaic(4, 4, 1, 2, 3);
        let layout = RawLayout::full(4, 4, 0);

        let mut odd = Image::new(ImageKind::Rgb, 3, 4);
        assert!(matches!(
            debayer(&mut odd, &src, &layout),
            Err(ConvertError::InvalidParameter(_))
        ));

        let mut grey = Image::new(ImageKind::Grey, 4, 4);
        assert!(matches!(
            debayer(&mut grey, &src, &layout),
            Err(ConvertError::WrongImageKind { .. })
        ));

        let mut rgb = Image::new(ImageKind::Rgb, 4, 4);
        assert!(matches!(
            debayer(&mut rgb, &src, &layout.with_origin(0, 4)),
            Err(ConvertError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unpack_then_debayer_packed_mosaic() {
        let (width, height) = (8usize, 4usize);
        let plain = mosaic(width, height, 10, 20, 30);
        let mut packed = Vec::new();
        for line in plain.chunks_exact(width) {
            for group in line.chunks_exact(4) {
                packed.extend_from_slice(group);
                packed.push(0b0101_0101);
            }
        }
        let mut image = Image::new(ImageKind::Rgb, 8, 4);

        unpack_raw10_debayer(&mut image, &packed, 0, &RawLayout::full(8, 4, 0))
            .expect("unpack and debayer should succeed");

        let [r, g, b] = image.channels();
        assert!(r.iter().all(|&v| v == 10));
        assert!(g.iter().all(|&v| v == 20));
        assert!(b.iter().all(|&v| v == 30));
    }
}
