//! Data models for the asset library.

mod batch;
mod blob;
mod container;
mod job;
mod media;
mod model;
mod recycle;
mod texture;

pub use batch::*;
pub use blob::*;
pub use container::*;
pub use job::*;
pub use media::*;
pub use model::*;
pub use recycle::*;
pub use texture::*;
