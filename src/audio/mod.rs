pub mod backend;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
pub mod playback;
pub mod recorder;
#[cfg(feature = "cpal-audio")]
pub mod speaker;
pub mod vad;
pub mod wav;
