pub mod ffmpeg;
pub mod transcoder;
