//! # Camera equipment

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use image::{DynamicImage, ImageResult};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A JPEG encoded frame from one of the rig's cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedFrame {
    /// Index of the camera which took the frame
    pub camera: u32,

    /// Authoritative timestamp of the frame
    pub timestamp_ns: u64,

    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StampedFrame {
    /// Encode an image into a frame with the given JPEG quality.
    pub fn from_dyn_image(
        camera: u32,
        timestamp_ns: u64,
        image: &DynamicImage,
        quality: u8,
    ) -> ImageResult<Self> {
        let mut jpeg = Vec::<u8>::new();
        image.write_to(&mut jpeg, image::ImageOutputFormat::Jpeg(quality))?;

        Ok(Self {
            camera,
            timestamp_ns,
            jpeg,
        })
    }

    /// Decode the frame back into an image.
    pub fn to_dyn_image(&self) -> ImageResult<DynamicImage> {
        image::load_from_memory_with_format(&self.jpeg, image::ImageFormat::Jpeg)
    }

    /// File name of this frame within a chunk.
    pub fn file_name(&self, chunk_index: u64) -> String {
        format!(
            "camera{:04}_{}_{}.jpg",
            chunk_index, self.camera, self.timestamp_ns
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn test_frame_encoding() {
        let img = DynamicImage::new_rgb8(32, 24);
        let frame = StampedFrame::from_dyn_image(2, 42, &img, 80).unwrap();

        assert!(!frame.jpeg.is_empty());
        assert_eq!(frame.file_name(7), "camera0007_2_42.jpg");

        let back = frame.to_dyn_image().unwrap();
        assert_eq!(back.width(), 32);
        assert_eq!(back.height(), 24);
    }
}
