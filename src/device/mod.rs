pub mod adb;
pub mod capture;
pub mod transport;
