pub mod decoder;
pub mod frame;
pub mod session;
pub mod sim;
pub mod transport;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use session::{DeviceSession, ParamUpdate, SessionEvent, SessionStatus};
