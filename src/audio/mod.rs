//! Audio input collaborators. The feature core only ever sees mono f32 samples.

pub mod decode;

pub use decode::{decode_file, downmix, AudioData};
