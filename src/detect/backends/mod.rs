pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionDetector;
pub use stub::ScriptedProvider;

#[cfg(feature = "backend-tract")]
pub use tract::TractProvider;
