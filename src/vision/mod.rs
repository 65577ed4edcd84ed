//! Image preprocessing for the Aquila model.
//!
//! Aquila was trained on RGB images padded to 16:9 with the training-set mean
//! pixel and then resized to 299 x 299. Callers hand in OpenCV-style BGR
//! frames; [`ImagePreprocessor::prepare`] replicates the training transform.

mod prep;

pub use prep::{
    bgr_to_rgb, center_crop_to, pad_to_aspect, resize_to, BgrImage, CanonicalTensor,
    ImagePreprocessor,
};
