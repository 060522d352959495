pub mod error;
pub mod info;
pub mod status;
pub mod warp;
