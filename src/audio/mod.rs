pub mod backend;
pub mod capture;
pub mod chunk;
pub mod clip;
pub mod codec;
pub mod device_thread;
pub mod playback;
pub mod render;

#[cfg(feature = "native-audio")]
pub mod native;

pub use backend::{AudioFrame, CaptureConfig, InputDevice, OutputDevice};
pub use capture::{CaptureEvent, CaptureState, CapturedFrame, MicrophoneCapture};
pub use chunk::ChunkAssembler;
pub use clip::{decode_clip, Clip, ClipFormat};
pub use device_thread::DeviceThread;
pub use playback::{PlaybackEvent, PlaybackPayload, PlaybackQueue};
pub use render::RenderBuffer;
