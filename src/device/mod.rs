pub mod adb;
pub mod traits;

pub use adb::AdbDevice;
pub use traits::Device;
