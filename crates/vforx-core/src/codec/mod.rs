pub mod format;

pub use format::{Converter, FormatInfo, SampleFormat};
