//! Radiance RGBE (`.hdr`) decoding.
//!
//! Supports the `32-bit_rle_rgbe` format with adaptive run-length encoded
//! scanlines and flat files. All eight resolution-line orientations are
//! normalised to rows top first, columns left to right.

use thiserror::Error;

/// Malformed Radiance data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HdrError {
    #[error("missing '#?RADIANCE' or '#?RGBE' magic")]
    MissingMagic,
    #[error("unsupported pixel format '{0}'")]
    UnsupportedFormat(String),
    #[error("missing or malformed resolution line: '{0}'")]
    InvalidResolution(String),
    #[error("unexpected end of data in scanline {0}")]
    UnexpectedEof(u32),
    #[error("wrong scanline width: expected {expected}, found {found}")]
    WrongScanlineWidth { expected: u32, found: u32 },
    #[error("bad scanline marker in scanline {0}")]
    BadScanline(u32),
    #[error("bad run length in scanline {0}")]
    BadRunLength(u32),
    #[error("pixel data of {len} floats does not match {width}x{height}")]
    SizeMismatch { width: u32, height: u32, len: usize },
}

/// Linear RGB radiance, rows top first
#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    /// `width * height` RGB triples
    pub data: Vec<f32>,
    /// Product of the `EXPOSURE=` headers, 1.0 when absent.
    ///
    /// Informational only: `data` holds the stored values unscaled and no
    /// texture upload applies it.
    pub exposure: f32,
}

/// Number of elements in a `width * height` grid of `channels`, if addressable.
fn grid_len(width: u32, height: u32, channels: usize) -> Option<usize> {
    (width as usize).checked_mul(height as usize)?.checked_mul(channels)
}

impl HdrImage {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, HdrError> {
        if grid_len(width, height, 3) != Some(data.len()) {
            return Err(HdrError::SizeMismatch {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            exposure: 1.0,
        })
    }

    /// Single-color image, handy as a flat environment.
    pub fn solid(width: u32, height: u32, color: [f32; 3]) -> Self {
        Self {
            width,
            height,
            data: color.repeat(width as usize * height as usize),
            exposure: 1.0,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

/// Convert one RGBE quadruple to linear floats.
pub fn rgbe_to_float(rgbe: [u8; 4]) -> [f32; 3] {
    if rgbe[3] == 0 {
        return [0.0; 3];
    }
    let scale = 2f32.powi(rgbe[3] as i32 - 136);
    [
        rgbe[0] as f32 * scale,
        rgbe[1] as f32 * scale,
        rgbe[2] as f32 * scale,
    ]
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> Option<&'a str> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.pos..];
        let end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        std::str::from_utf8(&rest[..end]).ok().map(|l| l.trim_end_matches('\r'))
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(slice)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }
}

/// Layout of the stored pixels as given by the resolution line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Orientation {
    width: u32,
    height: u32,
    /// Scanlines run along X (the usual case) rather than along Y
    rows_major: bool,
    /// `+Y`: the first stored row is the bottom one
    bottom_up: bool,
    /// `-X`: the first stored column is the right one
    right_to_left: bool,
}

impl Orientation {
    /// `(scanline length, scanline count)` as stored in the file
    fn stored(&self) -> (u32, u32) {
        if self.rows_major {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        }
    }

    /// Reorder stored RGBE pixels into rows top first.
    fn normalise(&self, stored: &[u8]) -> Vec<u8> {
        if self.rows_major && !self.bottom_up && !self.right_to_left {
            return stored.to_vec();
        }
        let (w, h) = (self.width as usize, self.height as usize);
        let (scan_len, _) = self.stored();
        let mut out = vec![0u8; stored.len()];
        for y in 0..h {
            for x in 0..w {
                let sy = if self.bottom_up { h - 1 - y } else { y };
                let sx = if self.right_to_left { w - 1 - x } else { x };
                let (scanline, offset) = if self.rows_major { (sy, sx) } else { (sx, sy) };
                let src = (scanline * scan_len as usize + offset) * 4;
                let dst = (y * w + x) * 4;
                out[dst..dst + 4].copy_from_slice(&stored[src..src + 4]);
            }
        }
        out
    }
}

/// Parse `-Y 512 +X 1024` (and the other axis orders).
fn parse_resolution(line: &str) -> Result<Orientation, HdrError> {
    let invalid = || HdrError::InvalidResolution(line.to_string());
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [first_axis, first, second_axis, second] = tokens.as_slice() else {
        return Err(invalid());
    };
    let axis = |token: &str| -> Option<(char, char)> {
        let mut chars = token.chars();
        let sign = chars.next()?;
        let axis = chars.next()?;
        (matches!(sign, '+' | '-') && matches!(axis, 'X' | 'Y') && chars.next().is_none())
            .then_some((sign, axis))
    };
    let (a, b) = (axis(first_axis).ok_or_else(invalid)?, axis(second_axis).ok_or_else(invalid)?);
    let first: u32 = first.parse().map_err(|_| invalid())?;
    let second: u32 = second.parse().map_err(|_| invalid())?;
    if first == 0 || second == 0 || grid_len(first, second, 4).is_none() {
        return Err(invalid());
    }
    let (rows_major, (x_sign, width), (y_sign, height)) = match (a, b) {
        ((ys, 'Y'), (xs, 'X')) => (true, (xs, second), (ys, first)),
        ((xs, 'X'), (ys, 'Y')) => (false, (xs, first), (ys, second)),
        _ => return Err(invalid()),
    };
    Ok(Orientation {
        width,
        height,
        rows_major,
        bottom_up: y_sign == '+',
        right_to_left: x_sign == '-',
    })
}

/// Decode a Radiance file into linear RGB floats.
pub fn decode(bytes: &[u8]) -> Result<HdrImage, HdrError> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let magic = cursor.line().ok_or(HdrError::MissingMagic)?;
    if !(magic.starts_with("#?RADIANCE") || magic.starts_with("#?RGBE")) {
        return Err(HdrError::MissingMagic);
    }

    let mut exposure = 1.0;
    loop {
        let line = cursor
            .line()
            .ok_or_else(|| HdrError::InvalidResolution(String::new()))?;
        if line.is_empty() {
            break;
        }
        if let Some(format) = line.strip_prefix("FORMAT=") {
            if format.trim() != "32-bit_rle_rgbe" {
                return Err(HdrError::UnsupportedFormat(format.trim().to_string()));
            }
        } else if let Some(value) = line.strip_prefix("EXPOSURE=") {
            match value.trim().parse::<f32>() {
                Ok(value) => exposure *= value,
                Err(_) => log::warn!("HDR: ignoring malformed exposure '{}'", value),
            }
        }
    }

    let resolution = cursor
        .line()
        .ok_or_else(|| HdrError::InvalidResolution(String::new()))?;
    let orientation = parse_resolution(resolution)?;
    let (width, height) = (orientation.width, orientation.height);

    let (scan_len, scanlines) = orientation.stored();
    let len = grid_len(scan_len, scanlines, 4)
        .ok_or_else(|| HdrError::InvalidResolution(resolution.to_string()))?;
    let stored = read_pixels(&mut cursor, scan_len, scanlines, len)?;
    let rgbe = orientation.normalise(&stored);
    let data = rgbe
        .chunks_exact(4)
        .flat_map(|p| rgbe_to_float([p[0], p[1], p[2], p[3]]))
        .collect();

    log::debug!("HDR: decoded {}x{} (exposure {})", width, height, exposure);
    Ok(HdrImage {
        width,
        height,
        data,
        exposure,
    })
}

fn read_flat(cursor: &mut Cursor<'_>, len: usize) -> Result<Vec<u8>, HdrError> {
    cursor
        .take(len)
        .map(<[u8]>::to_vec)
        .ok_or(HdrError::UnexpectedEof(0))
}

fn read_pixels(
    cursor: &mut Cursor<'_>,
    width: u32,
    height: u32,
    len: usize,
) -> Result<Vec<u8>, HdrError> {
    // Run-length encoding only exists for scanlines of 8..=0x7fff pixels
    if !(8..=0x7fff).contains(&width) {
        return read_flat(cursor, len);
    }

    // Every RLE scanline carries at least its 4-byte marker
    let remaining = cursor.bytes.len() - cursor.pos;
    if remaining / 4 < height as usize {
        return Err(HdrError::UnexpectedEof((remaining / 4) as u32));
    }

    let start = cursor.pos;
    let mut out = Vec::with_capacity(width as usize * 4);
    let mut planes = vec![0u8; width as usize * 4];

    for scanline in 0..height {
        let header = cursor.take(4).ok_or(HdrError::UnexpectedEof(scanline))?;
        let is_rle = header[0] == 2 && header[1] == 2 && header[2] & 0x80 == 0;
        if !is_rle {
            if scanline == 0 {
                // Not run-length encoded at all
                cursor.pos = start;
                return read_flat(cursor, len);
            }
            return Err(HdrError::BadScanline(scanline));
        }
        let found = ((header[2] as u32) << 8) | header[3] as u32;
        if found != width {
            return Err(HdrError::WrongScanlineWidth {
                expected: width,
                found,
            });
        }

        // Four channel planes, each a sequence of runs and literals
        let w = width as usize;
        for channel in 0..4 {
            let plane = &mut planes[channel * w..(channel + 1) * w];
            let mut x = 0;
            while x < w {
                let count = cursor.byte().ok_or(HdrError::UnexpectedEof(scanline))? as usize;
                if count > 128 {
                    let run = count - 128;
                    if x + run > w {
                        return Err(HdrError::BadRunLength(scanline));
                    }
                    let value = cursor.byte().ok_or(HdrError::UnexpectedEof(scanline))?;
                    plane[x..x + run].fill(value);
                    x += run;
                } else {
                    if count == 0 || x + count > w {
                        return Err(HdrError::BadRunLength(scanline));
                    }
                    let literal = cursor.take(count).ok_or(HdrError::UnexpectedEof(scanline))?;
                    plane[x..x + count].copy_from_slice(literal);
                    x += count;
                }
            }
        }

        for x in 0..w {
            out.extend_from_slice(&[planes[x], planes[w + x], planes[2 * w + x], planes[3 * w + x]]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn header(resolution: &str) -> Vec<u8> {
        format!("#?RADIANCE\nFORMAT=32-bit_rle_rgbe\nEXPOSURE=2.0\n\n{resolution}\n").into_bytes()
    }

    /// One RLE scanline of width 8: red as a run, green as literals, blue and exponent as runs.
    fn scanline(width_marker: [u8; 2]) -> Vec<u8> {
        let mut line = vec![2, 2, width_marker[0], width_marker[1]];
        line.extend_from_slice(&[128 + 8, 128]);
        line.push(8);
        line.extend_from_slice(&[0, 16, 32, 48, 64, 80, 96, 112]);
        line.extend_from_slice(&[128 + 8, 64]);
        line.extend_from_slice(&[128 + 8, 137]);
        line
    }

    #[test]
    fn test_decode_rle_scanlines() {
        let mut bytes = header("-Y 2 +X 8");
        bytes.extend(scanline([0, 8]));
        bytes.extend(scanline([0, 8]));

        let image = decode(&bytes).unwrap();
        assert_eq!((image.width, image.height), (8, 2));
        assert_eq!(image.exposure, 2.0);
        // value = byte * 2^(137 - 136)
        assert_eq!(image.pixel(0, 0), Some([256.0, 0.0, 128.0]));
        assert_eq!(image.pixel(3, 1), Some([256.0, 96.0, 128.0]));
    }

    #[test]
    fn test_decode_flat_pixels() {
        let mut bytes = header("-Y 1 +X 2");
        bytes.extend_from_slice(&[128, 64, 32, 129, 0, 0, 0, 0]);
        let image = decode(&bytes).unwrap();
        assert_eq!(image.pixel(0, 0), Some([0.5, 0.25, 0.125]));
        assert_eq!(image.pixel(1, 0), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_wrong_scanline_width_fails() {
        let mut bytes = header("-Y 1 +X 8");
        bytes.extend(scanline([0, 9]));
        assert_eq!(
            decode(&bytes),
            Err(HdrError::WrongScanlineWidth { expected: 8, found: 9 })
        );
    }

    #[test]
    fn test_corrupted_second_marker_fails() {
        let mut bytes = header("-Y 2 +X 8");
        bytes.extend(scanline([0, 8]));
        let mut broken = scanline([0, 8]);
        broken[1] = 3;
        bytes.extend(broken);
        assert_eq!(decode(&bytes), Err(HdrError::BadScanline(1)));
    }

    #[test]
    fn test_truncated_data_fails() {
        let mut bytes = header("-Y 2 +X 8");
        bytes.extend(scanline([0, 8]));
        assert_eq!(decode(&bytes), Err(HdrError::UnexpectedEof(1)));
    }

    #[rstest]
    #[case::magic(b"P6\n1 1\n".to_vec(), HdrError::MissingMagic)]
    #[case::format(
        b"#?RADIANCE\nFORMAT=32-bit_rle_xyze\n\n-Y 1 +X 1\n".to_vec(),
        HdrError::UnsupportedFormat("32-bit_rle_xyze".to_string())
    )]
    #[case::resolution(
        b"#?RGBE\n\n-Y one +X 1\n".to_vec(),
        HdrError::InvalidResolution("-Y one +X 1".to_string())
    )]
    fn test_malformed_headers(#[case] bytes: Vec<u8>, #[case] expected: HdrError) {
        assert_eq!(decode(&bytes), Err(expected));
    }

    #[rstest]
    #[case("-Y 4 +X 8", (8, 4))]
    #[case("+Y 4 -X 8", (8, 4))]
    #[case("+X 8 -Y 4", (8, 4))]
    fn test_resolution_axis_orders(#[case] line: &str, #[case] expected: (u32, u32)) {
        let orientation = parse_resolution(line).unwrap();
        assert_eq!((orientation.width, orientation.height), expected);
    }

    /// 2x2 flat image whose stored pixels have red values 1, 2, 3, 4 in file order.
    fn ordered_pixels(resolution: &str) -> HdrImage {
        let mut bytes = header(resolution);
        for red in 1..=4u8 {
            bytes.extend_from_slice(&[red, 0, 0, 136]);
        }
        decode(&bytes).unwrap()
    }

    fn reds(image: &HdrImage) -> Vec<f32> {
        image.data.chunks_exact(3).map(|p| p[0]).collect()
    }

    #[rstest]
    #[case::top_down("-Y 2 +X 2", [1.0, 2.0, 3.0, 4.0])]
    #[case::bottom_up("+Y 2 +X 2", [3.0, 4.0, 1.0, 2.0])]
    #[case::mirrored("-Y 2 -X 2", [2.0, 1.0, 4.0, 3.0])]
    #[case::columns("+X 2 -Y 2", [1.0, 3.0, 2.0, 4.0])]
    fn test_orientation_normalised_to_top_rows_first(
        #[case] resolution: &str,
        #[case] expected: [f32; 4],
    ) {
        assert_eq!(reds(&ordered_pixels(resolution)), expected);
    }

    #[test]
    fn test_exposure_is_not_applied_to_pixels() {
        let image = ordered_pixels("-Y 2 +X 2");
        assert_eq!(image.exposure, 2.0);
        assert_eq!(image.pixel(0, 0), Some([1.0, 0.0, 0.0]));
    }

    #[rstest]
    #[case::flat("-Y 65536 +X 65536")]
    #[case::rle("-Y 4000000000 +X 16")]
    fn test_huge_resolution_without_data_fails(#[case] resolution: &str) {
        let bytes = format!("#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n{resolution}\n").into_bytes();
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_unaddressable_resolution_is_invalid() {
        let line = "-Y 4294967295 +X 4294967295";
        assert_eq!(
            parse_resolution(line),
            Err(HdrError::InvalidResolution(line.to_string()))
        );
    }

    #[test]
    fn test_new_rejects_mismatched_length() {
        assert!(HdrImage::new(u32::MAX, u32::MAX, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_rgbe_zero_exponent_is_black() {
        assert_eq!(rgbe_to_float([255, 255, 255, 0]), [0.0; 3]);
    }
}
