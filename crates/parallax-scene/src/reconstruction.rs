//! In-memory reconstruction store shared between estimation workers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use glam::{DVec2, DVec4};
use thiserror::Error;

use crate::camera::PinholeCamera;
use crate::scene::{Track, TrackId, View, ViewId};

/// Errors raised by reconstruction store mutations.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The referenced view does not exist.
    #[error("unknown {0}")]
    UnknownView(ViewId),
    /// The referenced track does not exist.
    #[error("unknown {0}")]
    UnknownTrack(TrackId),
}

/// Read and commit access to a reconstruction, as needed by track estimation.
///
/// Implementations must allow concurrent reads from multiple workers while a
/// single worker commits an unrelated track.
pub trait SceneStore: Sync {
    /// All track ids in the store.
    fn track_ids(&self) -> Vec<TrackId>;

    /// Whether the track exists.
    fn contains_track(&self, track_id: TrackId) -> bool;

    /// Current homogeneous position of the track, if estimated.
    fn track_point(&self, track_id: TrackId) -> Option<DVec4>;

    /// Whether the track has an estimated position.
    fn is_track_estimated(&self, track_id: TrackId) -> bool {
        self.track_point(track_id).is_some()
    }

    /// Ids of the views observing the track.
    fn observing_views(&self, track_id: TrackId) -> Vec<ViewId>;

    /// Whether the view pose has been estimated.
    fn is_view_estimated(&self, view_id: ViewId) -> bool;

    /// Camera of the view.
    fn view_camera(&self, view_id: ViewId) -> Option<PinholeCamera>;

    /// Pixel observation of the track in the view.
    fn observation(&self, view_id: ViewId, track_id: TrackId) -> Option<DVec2>;

    /// Writes the track position and marks it estimated, in one step.
    fn commit_track_point(&self, track_id: TrackId, point: DVec4);
}

/// An in-memory reconstruction: posed views and the tracks they observe.
///
/// Views and track membership are built up front with the `&mut self`
/// methods. Track positions are behind per-track locks so that estimation
/// workers can commit one track through a shared reference while other
/// workers keep reading unrelated tracks and views.
#[derive(Debug, Default)]
pub struct Reconstruction {
    views: HashMap<ViewId, View>,
    tracks: HashMap<TrackId, RwLock<Track>>,
    next_view_id: u64,
    next_track_id: u64,
}

impl Reconstruction {
    /// Creates an empty reconstruction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unestimated view with the given camera.
    pub fn add_view(&mut self, camera: PinholeCamera) -> ViewId {
        let view_id = ViewId(self.next_view_id);
        self.next_view_id += 1;
        self.views.insert(view_id, View::new(camera));
        view_id
    }

    /// Adds an empty, unestimated track.
    pub fn add_track(&mut self) -> TrackId {
        let track_id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        self.tracks.insert(track_id, RwLock::new(Track::default()));
        track_id
    }

    /// Records that `view_id` observes `track_id` at `pixel`.
    pub fn add_observation(
        &mut self,
        view_id: ViewId,
        track_id: TrackId,
        pixel: DVec2,
    ) -> Result<(), SceneError> {
        let track = self
            .tracks
            .get_mut(&track_id)
            .ok_or(SceneError::UnknownTrack(track_id))?;
        let view = self
            .views
            .get_mut(&view_id)
            .ok_or(SceneError::UnknownView(view_id))?;
        view.add_observation(track_id, pixel);
        track
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .add_view(view_id);
        Ok(())
    }

    /// Marks a view pose as estimated or not.
    pub fn set_view_estimated(&mut self, view_id: ViewId, estimated: bool) -> Result<(), SceneError> {
        self.views
            .get_mut(&view_id)
            .ok_or(SceneError::UnknownView(view_id))?
            .set_estimated(estimated);
        Ok(())
    }

    /// The view with the given id.
    pub fn view(&self, view_id: ViewId) -> Option<&View> {
        self.views.get(&view_id)
    }

    /// Number of views in the store.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Number of tracks in the store.
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl SceneStore for Reconstruction {
    fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    fn contains_track(&self, track_id: TrackId) -> bool {
        self.tracks.contains_key(&track_id)
    }

    fn track_point(&self, track_id: TrackId) -> Option<DVec4> {
        self.tracks
            .get(&track_id)?
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .point()
    }

    fn observing_views(&self, track_id: TrackId) -> Vec<ViewId> {
        match self.tracks.get(&track_id) {
            Some(track) => track
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .views()
                .iter()
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    fn is_view_estimated(&self, view_id: ViewId) -> bool {
        self.views.get(&view_id).is_some_and(View::is_estimated)
    }

    fn view_camera(&self, view_id: ViewId) -> Option<PinholeCamera> {
        self.views.get(&view_id).map(|view| *view.camera())
    }

    fn observation(&self, view_id: ViewId, track_id: TrackId) -> Option<DVec2> {
        self.views.get(&view_id)?.observation(track_id)
    }

    fn commit_track_point(&self, track_id: TrackId, point: DVec4) {
        if let Some(track) = self.tracks.get(&track_id) {
            track
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .set_point(point);
        }
    }
}
