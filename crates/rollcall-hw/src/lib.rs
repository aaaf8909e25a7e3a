//! rollcall-hw: Webcam capture for the rollcall kiosk.
//!
//! Opens a V4L2 device, negotiates YUYV or MJPG, and hands out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
