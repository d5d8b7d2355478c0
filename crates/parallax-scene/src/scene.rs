//! Track and view entities of a reconstruction.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use glam::{DVec2, DVec4};

use crate::camera::PinholeCamera;

/// Identifier of a track, one physical 3D point observed across views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {}", self.0)
    }
}

/// Identifier of a view, one posed camera with its observed features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view {}", self.0)
    }
}

/// A 3D scene point together with the set of views that observe it.
///
/// The position is homogeneous and absent until the track has been
/// estimated, so a committed position and the estimated state cannot
/// disagree.
#[derive(Debug, Clone, Default)]
pub struct Track {
    point: Option<DVec4>,
    views: BTreeSet<ViewId>,
}

impl Track {
    /// Whether a 3D position has been estimated for this track.
    pub fn estimated(&self) -> bool {
        self.point.is_some()
    }

    /// The homogeneous 3D position, if estimated.
    pub fn point(&self) -> Option<DVec4> {
        self.point
    }

    /// Writes the 3D position, marking the track estimated.
    pub fn set_point(&mut self, point: DVec4) {
        self.point = Some(point);
    }

    /// The views observing this track.
    pub fn views(&self) -> &BTreeSet<ViewId> {
        &self.views
    }

    pub(crate) fn add_view(&mut self, view_id: ViewId) {
        self.views.insert(view_id);
    }
}

/// One camera instance together with its observed features.
#[derive(Debug, Clone)]
pub struct View {
    camera: PinholeCamera,
    estimated: bool,
    observations: HashMap<TrackId, DVec2>,
}

impl View {
    /// Creates an unestimated view with the given camera.
    pub fn new(camera: PinholeCamera) -> Self {
        Self {
            camera,
            estimated: false,
            observations: HashMap::new(),
        }
    }

    /// The camera of this view.
    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    /// Whether the camera pose of this view has been estimated.
    pub fn is_estimated(&self) -> bool {
        self.estimated
    }

    /// Marks the view pose as estimated or not.
    pub fn set_estimated(&mut self, estimated: bool) {
        self.estimated = estimated;
    }

    /// The pixel observation of `track_id` in this view, if any.
    pub fn observation(&self, track_id: TrackId) -> Option<DVec2> {
        self.observations.get(&track_id).copied()
    }

    /// Number of features observed by this view.
    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub(crate) fn add_observation(&mut self, track_id: TrackId, pixel: DVec2) {
        self.observations.insert(track_id, pixel);
    }
}
