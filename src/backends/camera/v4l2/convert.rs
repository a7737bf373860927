// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion from V4L2 capture formats to RGBA

/// Convert YUYV (YUV 4:2:2) to RGBA
///
/// YUYV: Y0 U0 Y1 V0, each 4-byte group encodes 2 pixels. BT.601 coefficients.
pub fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    'outer: for chunk in data.chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        for y in [y0, y1] {
            if rgba.len() >= pixel_count * 4 {
                break 'outer;
            }
            rgba.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgba.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgba.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
            rgba.push(255);
        }
    }

    rgba.resize(pixel_count * 4, 0);
    rgba
}

/// Convert packed RGB24 to RGBA by adding alpha=255
pub fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray() {
        // Neutral chroma gives gray pixels equal to luma
        let data = [128, 128, 64, 128];
        let rgba = yuyv_to_rgba(&data, 2, 1);
        assert_eq!(rgba, vec![128, 128, 128, 255, 64, 64, 64, 255]);
    }

    #[test]
    fn test_yuyv_short_buffer_is_padded() {
        let rgba = yuyv_to_rgba(&[128, 128, 128, 128], 4, 1);
        assert_eq!(rgba.len(), 16);
    }

    #[test]
    fn test_rgb_to_rgba() {
        assert_eq!(rgb_to_rgba(&[1, 2, 3, 4, 5, 6]), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }
}
