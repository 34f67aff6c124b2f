use color_eyre::{eyre::eyre, Result};

use super::frame::{Frame, PixelFormat};

/// Extract the luma plane of a device buffer as a packed grayscale frame.
///
/// Device buffers may be longer than the image (`bytesused` padding);
/// trailing bytes are ignored.
pub fn decode_luma(data: &[u8], format: PixelFormat, width: usize, height: usize) -> Result<Frame> {
    let pixels = width * height;
    match format {
        PixelFormat::Grey => {
            let luma = data
                .get(..pixels)
                .ok_or_else(|| eyre!("GREY buffer too short: {} < {}", data.len(), pixels))?;
            Ok(Frame::new(luma.to_vec(), width, height)?)
        }
        PixelFormat::Yuyv4 => {
            // Y0 U Y1 V: luma on even bytes
            let packed = data
                .get(..pixels * 2)
                .ok_or_else(|| eyre!("YUYV buffer too short: {} < {}", data.len(), pixels * 2))?;
            let luma: Vec<u8> = packed.iter().step_by(2).copied().collect();
            Ok(Frame::new(luma, width, height)?)
        }
        #[cfg(feature = "v4l2-capture")]
        PixelFormat::Mjpeg => {
            let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?
                .into_luma8();
            if (image.width() as usize, image.height() as usize) != (width, height) {
                return Err(eyre!(
                    "MJPEG frame is {}x{}, expected {}x{}",
                    image.width(),
                    image.height(),
                    width,
                    height
                ));
            }
            Ok(Frame::new(image.into_raw(), width, height)?)
        }
        #[cfg(not(feature = "v4l2-capture"))]
        PixelFormat::Mjpeg => Err(eyre!("MJPEG decoding requires the v4l2-capture feature")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_takes_even_bytes() {
        let data = [10, 128, 20, 128, 30, 128, 40, 128];
        let frame = decode_luma(&data, PixelFormat::Yuyv4, 2, 2).unwrap();
        assert_eq!(frame.data().as_ref(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_grey_ignores_padding() {
        let data = [1, 2, 3, 4, 0, 0];
        let frame = decode_luma(&data, PixelFormat::Grey, 2, 2).unwrap();
        assert_eq!(frame.data().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(decode_luma(&[0; 5], PixelFormat::Yuyv4, 2, 2).is_err());
        assert!(decode_luma(&[0; 3], PixelFormat::Grey, 2, 2).is_err());
    }
}
