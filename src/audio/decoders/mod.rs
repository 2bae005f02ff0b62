pub mod vorbis;

pub use vorbis::VorbisDecoder;
