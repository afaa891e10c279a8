pub mod beats;
pub mod judgment;
pub mod motion;
pub mod note;
pub mod session;
pub mod stats;
pub mod timeline;
