//! Built-in channels.

pub mod image;
pub mod image_codec;
pub mod input;
pub mod latest;
pub mod tracking;

pub use image::{
    DisplayFrame, DoubleBuffer, ImageChannel, ImageSettings, ImageStats, DECODE_WAKE_INTERVAL,
    IMAGE_CHANNEL_TYPE, SCREEN_ADDRESS,
};
#[cfg(feature = "jpeg")]
pub use image_codec::JpegCodec;
pub use image_codec::{codec_for, DecodedImage, ImageCodec, RawCodec};
pub use input::{
    InputChannel, InputEvent, INPUT_CHANNEL_TYPE, INPUT_QUEUE_CAPACITY, MESSAGE_HANDLER_PREFIX,
};
pub use latest::NewestQueue;
pub use tracking::{Pose, XRTrackingChannel, XR_TRACKING_ADDRESS, XR_TRACKING_CHANNEL_TYPE};
