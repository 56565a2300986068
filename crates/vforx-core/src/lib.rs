pub mod bus;
pub mod channel;
pub mod channelizer;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod protocol;
pub mod receiver;
pub mod reconstructor;
pub mod redraw;
pub mod sampler;
pub mod waterfall;
