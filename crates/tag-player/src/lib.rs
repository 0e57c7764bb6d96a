pub mod config;
pub mod container;
pub mod controller;
pub mod device;
pub mod error;
pub mod motor;
pub mod playback;
pub mod session;
pub mod source;
pub mod status;
pub mod storage;
pub mod stream_buffer;
pub mod tags;
pub mod transport;
