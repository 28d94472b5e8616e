// PIXEL CONVERT - planar YUV 4:2:0 to RGBA
//
// Software decoders hand out I420 planes with row padding (strides).
// The display wants packed RGBA, so every decoded picture goes through here
// once, on the decode worker.

use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// SD video
    #[default]
    BT601,
    /// HD video
    BT709,
}

impl ColorSpace {
    /// (Wr, Wb); Wg = 1 - Wr - Wb
    fn coefficients(self) -> (f32, f32) {
        match self {
            Self::BT601 => (0.299, 0.114),
            Self::BT709 => (0.2126, 0.0722),
        }
    }

    /// Pick by picture height, the usual convention when the stream doesn't say.
    pub fn for_height(height: usize) -> Self {
        if height >= 720 {
            Self::BT709
        } else {
            Self::BT601
        }
    }
}

/// Borrowed I420 picture: full-resolution Y, quarter-resolution U and V.
#[derive(Debug, Clone, Copy)]
pub struct I420Planes<'a> {
    pub width: usize,
    pub height: usize,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub uv_stride: usize,
}

/// Limited-range YUV to RGBA with pre-computed fixed-point tables.
pub struct YuvToRgba {
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl YuvToRgba {
    pub fn new(color_space: ColorSpace) -> Self {
        let (wr, wb) = color_space.coefficients();
        let wg = 1.0 - wr - wb;
        // Chroma spans 16..240, stretch to full range
        let chroma_scale = 255.0 / 224.0;

        let cr_r = 2.0 * (1.0 - wr) * chroma_scale;
        let cb_g = -2.0 * wb * (1.0 - wb) / wg * chroma_scale;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg * chroma_scale;
        let cb_b = 2.0 * (1.0 - wb) * chroma_scale;

        let mut tables = Self {
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        for i in 0..256 {
            let y = i as i32 - 16;
            let uv = i as f32 - 128.0;
            tables.y_table[i] = (y * 298 + 128) >> 8; // 298/256 ≈ 255/219
            tables.u_table_g[i] = (uv * cb_g).round() as i32;
            tables.u_table_b[i] = (uv * cb_b).round() as i32;
            tables.v_table_r[i] = (uv * cr_r).round() as i32;
            tables.v_table_g[i] = (uv * cr_g).round() as i32;
        }
        tables
    }

    /// Convert, or `None` when a plane is shorter than its declared geometry.
    pub fn convert(&self, planes: &I420Planes<'_>) -> Option<RgbaImage> {
        let (width, height) = (planes.width, planes.height);
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);
        if width == 0
            || height == 0
            || planes.y_stride < width
            || planes.uv_stride < chroma_w
            || planes.y.len() < planes.y_stride * (height - 1) + width
            || planes.u.len() < planes.uv_stride * (chroma_h - 1) + chroma_w
            || planes.v.len() < planes.uv_stride * (chroma_h - 1) + chroma_w
        {
            return None;
        }

        let mut rgba = vec![0u8; width * height * 4];
        for row in 0..height {
            let y_row = &planes.y[row * planes.y_stride..];
            let uv_offset = (row / 2) * planes.uv_stride;
            let u_row = &planes.u[uv_offset..];
            let v_row = &planes.v[uv_offset..];
            let out = &mut rgba[row * width * 4..(row + 1) * width * 4];

            for x in 0..width {
                let luma = self.y_table[y_row[x] as usize];
                let u = u_row[x / 2] as usize;
                let v = v_row[x / 2] as usize;

                let px = &mut out[x * 4..x * 4 + 4];
                px[0] = (luma + self.v_table_r[v]).clamp(0, 255) as u8;
                px[1] = (luma + self.u_table_g[u] + self.v_table_g[v]).clamp(0, 255) as u8;
                px[2] = (luma + self.u_table_b[u]).clamp(0, 255) as u8;
                px[3] = 255;
            }
        }

        RgbaImage::from_raw(width as u32, height as u32, rgba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, y: u8, u: u8, v: u8, pad: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let y_stride = width + pad;
        let uv_stride = width.div_ceil(2) + pad;
        (
            vec![y; y_stride * height],
            vec![u; uv_stride * height.div_ceil(2)],
            vec![v; uv_stride * height.div_ceil(2)],
        )
    }

    fn convert_solid(y: u8, u: u8, v: u8) -> [u8; 4] {
        let (yp, up, vp) = solid(4, 4, y, u, v, 3);
        let planes = I420Planes {
            width: 4,
            height: 4,
            y: &yp,
            u: &up,
            v: &vp,
            y_stride: 7,
            uv_stride: 5,
        };
        let image = YuvToRgba::new(ColorSpace::BT601).convert(&planes).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        image.get_pixel(3, 3).0
    }

    #[test]
    fn test_black_white_grey() {
        assert_eq!(convert_solid(16, 128, 128), [0, 0, 0, 255]);
        assert_eq!(convert_solid(235, 128, 128), [255, 255, 255, 255]);
        let grey = convert_solid(126, 128, 128);
        assert_eq!(grey[0], grey[1]);
        assert_eq!(grey[1], grey[2]);
    }

    #[test]
    fn test_primary_red() {
        // BT.601 limited-range red
        let [r, g, b, a] = convert_solid(81, 90, 240);
        assert!(r >= 250, "r = {}", r);
        assert!(g <= 5, "g = {}", g);
        assert!(b <= 5, "b = {}", b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_short_planes_rejected() {
        let planes = I420Planes {
            width: 4,
            height: 4,
            y: &[0; 8],
            u: &[0; 4],
            v: &[0; 4],
            y_stride: 4,
            uv_stride: 2,
        };
        assert!(YuvToRgba::new(ColorSpace::BT601).convert(&planes).is_none());
    }

    #[test]
    fn test_odd_dimensions() {
        let (yp, up, vp) = solid(3, 3, 16, 128, 128, 0);
        let planes = I420Planes {
            width: 3,
            height: 3,
            y: &yp,
            u: &up,
            v: &vp,
            y_stride: 3,
            uv_stride: 2,
        };
        let image = YuvToRgba::new(ColorSpace::BT709).convert(&planes).unwrap();
        assert_eq!(image.dimensions(), (3, 3));
    }
}
