pub mod facade;
pub mod preset;

pub use facade::ControlFacade;
pub use preset::Preset;
