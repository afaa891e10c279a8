pub mod audio;
pub mod clock;
pub mod decode;
pub mod input;
pub mod songs;
