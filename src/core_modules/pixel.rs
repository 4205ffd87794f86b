// THEORY (single-pixel heuristics):
// The `Pixel` module is the smallest unit of the engine: one RGBA pixel plus the
// measurements that can be taken from that pixel alone. Light segmentation only
// needs three of them: brightness (Rec. 601 luma), and the HSV triple on the
// 8-bit scale common to camera tooling (hue 0..180, saturation and value 0..255).
//
// Key principles:
// 1) Single-pixel scope: nothing here looks at neighbours or history.
// 2) Integer-friendly output: the HSV triple is rounded into bytes so masks can
//    compare against the byte thresholds of `DetectionConfig` directly.

pub mod pixel {
    pub type Channel = u8;
    pub type Luminance = f64;

    const CHANNELS: usize = 4;

    /// Hue, saturation and value on the 8-bit scale (H 0..180, S/V 0..255).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hsv {
        pub hue: u8,
        pub saturation: u8,
        pub value: u8,
    }

    /// A "dumb" data container for a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
        pub alpha: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Self {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// Reads the pixel at `index` (in pixels, not bytes) of an RGBA buffer.
        #[inline]
        pub fn from_rgba_buffer(buffer: &[u8], index: usize) -> Self {
            let start = index * CHANNELS;
            Self::new(
                buffer[start],
                buffer[start + 1],
                buffer[start + 2],
                buffer[start + 3],
            )
        }

        /// Perceived brightness (Rec. 601 luma) on the 0..255 scale.
        pub fn luminance(&self) -> Luminance {
            0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
        }

        /// HSV on the 8-bit scale. Gray pixels report hue 0.
        pub fn hsv(&self) -> Hsv {
            let red = self.red as f32;
            let green = self.green as f32;
            let blue = self.blue as f32;

            let maximum_channel = red.max(green.max(blue));
            let minimum_channel = red.min(green.min(blue));
            let chroma = maximum_channel - minimum_channel;

            let saturation = if maximum_channel <= 0.0 {
                0.0
            } else {
                chroma / maximum_channel * 255.0
            };

            let hue_degrees = if chroma <= 0.0 {
                0.0
            } else {
                let (base_difference, sector_offset) = if maximum_channel == red {
                    (green - blue, 0.0)
                } else if maximum_channel == green {
                    (blue - red, 2.0)
                } else {
                    (red - green, 4.0)
                };
                let mut degrees = (base_difference / chroma + sector_offset) * 60.0;
                if degrees < 0.0 {
                    degrees += 360.0;
                }
                degrees
            };

            Hsv {
                // 360 degrees folds onto 180 byte steps; 359.x rounds to 180 which wraps to 0.
                hue: ((hue_degrees / 2.0).round() as u16 % 180) as u8,
                saturation: saturation.round().min(255.0) as u8,
                value: maximum_channel as u8,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn white_is_unsaturated_and_bright() {
        let hsv = Pixel::new(255, 255, 255, 255).hsv();
        assert_eq!(hsv, Hsv { hue: 0, saturation: 0, value: 255 });
    }

    #[test]
    fn amber_lands_in_the_yellow_orange_band() {
        // 255,191,0 is ~45 degrees, i.e. ~22 on the 0..180 scale.
        let hsv = Pixel::new(255, 191, 0, 255).hsv();
        assert!((20..=30).contains(&hsv.hue), "hue was {}", hsv.hue);
        assert_eq!(hsv.saturation, 255);
        assert_eq!(hsv.value, 255);
    }

    #[test]
    fn primary_hues_use_half_degree_steps() {
        assert_eq!(Pixel::new(255, 0, 0, 255).hsv().hue, 0);
        assert_eq!(Pixel::new(0, 255, 0, 255).hsv().hue, 60);
        assert_eq!(Pixel::new(0, 0, 255, 255).hsv().hue, 120);
    }

    #[test]
    fn luminance_of_gray_equals_channel_value() {
        let pixel = Pixel::new(200, 200, 200, 255);
        assert!((pixel.luminance() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn reads_pixels_out_of_a_flat_buffer() {
        let buffer = [1, 2, 3, 4, 10, 20, 30, 40];
        assert_eq!(Pixel::from_rgba_buffer(&buffer, 1), Pixel::new(10, 20, 30, 40));
    }
}
