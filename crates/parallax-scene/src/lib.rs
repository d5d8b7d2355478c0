#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera model with pose and intrinsics.
pub mod camera;

/// In-memory reconstruction store and the scene access trait.
pub mod reconstruction;

/// Scene entities: tracks, views and their identifiers.
pub mod scene;

pub use camera::{CameraIntrinsics, PinholeCamera};
pub use reconstruction::{Reconstruction, SceneError, SceneStore};
pub use scene::{Track, TrackId, View, ViewId};
