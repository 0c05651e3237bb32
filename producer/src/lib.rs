pub mod capture;
pub mod encoder;
pub mod lifecycle;
pub mod mjpeg;
pub mod source;
