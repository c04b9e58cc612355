pub mod window;

pub use window::Viewer;
