//! Services which define the core logic behind the routes.
pub mod collage;
pub mod errors;
pub mod jobs;
pub mod media;
pub mod storage;
#[cfg(test)]
pub mod testing;
pub mod tinify;
pub mod workspace;
