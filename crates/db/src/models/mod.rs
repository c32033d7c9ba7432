pub mod clip;
pub mod status;
pub mod video;
