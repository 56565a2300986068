pub mod demod;
pub mod sample;
pub mod spectrum;
pub mod window;
