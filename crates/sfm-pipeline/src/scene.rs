//! Views, map points and the handles that link them.
//!
//! Views and map points live in append-only pools owned by [`Scene`]; the
//! integer handles [`ViewId`] and [`MapPointId`] stay valid until the scene
//! is cleared. Every `(view, feature)` pair in a map point's observation list
//! is mirrored by `feature.mpnt == Some(point)`, and [`Scene::bind`] is the
//! only way to create that link.

use crate::feature::Feature;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sfm_core::{camera_center, median, CameraModel, Iso3, Pt3, Real};

/// Stable handle of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewId(pub(crate) usize);

impl ViewId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewId({})", self.0)
    }
}

/// Stable handle of a map point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapPointId(pub(crate) usize);

impl MapPointId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MapPointId({})", self.0)
    }
}

/// Pose state of a view. `Valid` is never left once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseState {
    Null,
    /// Externally supplied pose guess, not yet confirmed.
    Hint,
    Valid,
}

/// One captured, calibrated camera view.
#[derive(Debug, Clone)]
pub struct View {
    pub camera: CameraModel,
    pub image: RgbImage,
    pub features: Vec<Feature>,
    pub state: PoseState,
    /// `T_C_W`; meaningful for `Hint` and `Valid` views.
    pub pose: Iso3,
    /// Views whose match pair from this view passed the quality gate.
    pub links: Vec<ViewId>,
    /// Match pairs computed with this view as query.
    pub pair_count: usize,
    /// Features currently bound to a map point.
    pub mpnt_count: usize,
    /// Excluded from pose re-estimation.
    pub fixed: bool,
    /// Update cycle in which the pose was last estimated.
    pub last_update: usize,
}

impl View {
    pub fn new(
        camera: CameraModel,
        image: RgbImage,
        features: Vec<Feature>,
        hint: Option<Iso3>,
    ) -> Self {
        let (state, pose) = match hint {
            Some(pose) => (PoseState::Hint, pose),
            None => (PoseState::Null, Iso3::identity()),
        };
        Self {
            camera,
            image,
            features,
            state,
            pose,
            links: Vec::new(),
            pair_count: 0,
            mpnt_count: 0,
            fixed: false,
            last_update: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == PoseState::Valid
    }

    pub fn center(&self) -> Pt3 {
        camera_center(&self.pose)
    }

    /// Reprojection error of `point` against feature `f`, in undistorted pixels.
    pub fn reprojection_error(&self, f: usize, point: &Pt3) -> Real {
        self.features
            .get(f)
            .map_or(Real::INFINITY, |ft| {
                self.camera.reprojection_error(&self.pose, &ft.pix, point)
            })
    }

    /// RGB at feature `f`, or `None` when it falls outside the image.
    fn sample_color(&self, f: usize) -> Option<[u8; 3]> {
        let pix = self.features.get(f)?.pix;
        let (x, y) = (pix.x.round(), pix.y.round());
        if x < 0.0 || y < 0.0 {
            return None;
        }
        self.image
            .get_pixel_checked(x as u32, y as u32)
            .map(|p| p.0)
    }
}

/// A `(view, feature)` pair supporting a map point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub view: ViewId,
    pub feature: usize,
}

/// A reconstructed 3D point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub position: Pt3,
    /// Mean colour of the supporting pixels.
    pub color: [u8; 3],
    /// Median reprojection error over the observations.
    pub err: Real,
    /// The last re-triangulation passed its error and parallax gates.
    /// Cleared points keep their position and bindings but anchor no pose.
    pub valid: bool,
    pub observations: Vec<Observation>,
}

impl MapPoint {
    fn new(position: Pt3) -> Self {
        Self {
            position,
            color: [0, 0, 0],
            err: Real::INFINITY,
            valid: true,
            observations: Vec::new(),
        }
    }

    /// Usable as a 2D-3D anchor for registration.
    pub fn is_trusted(&self, max_err: Real) -> bool {
        self.valid && self.err <= max_err
    }
}

/// Arena of views and map points.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub(crate) views: Vec<View>,
    pub(crate) map_points: Vec<MapPoint>,
}

impl Scene {
    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn map_points(&self) -> &[MapPoint] {
        &self.map_points
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(id.0)
    }

    pub fn map_point(&self, id: MapPointId) -> Option<&MapPoint> {
        self.map_points.get(id.0)
    }

    /// View behind a handle minted by this scene.
    pub(crate) fn view_at(&self, id: ViewId) -> &View {
        &self.views[id.0]
    }

    /// Map point behind a handle minted by this scene.
    pub(crate) fn point_at(&self, id: MapPointId) -> &MapPoint {
        &self.map_points[id.0]
    }

    pub(crate) fn view_mut(&mut self, id: ViewId) -> &mut View {
        &mut self.views[id.0]
    }

    pub fn view_ids(&self) -> impl Iterator<Item = ViewId> {
        (0..self.views.len()).map(ViewId)
    }

    pub(crate) fn push_view(&mut self, view: View) -> ViewId {
        self.views.push(view);
        ViewId(self.views.len() - 1)
    }

    /// Map point bound to feature `f` of `view`.
    pub fn point_of(&self, view: ViewId, f: usize) -> Option<MapPointId> {
        self.views.get(view.0)?.features.get(f)?.mpnt
    }

    /// Mark a view valid at `pose`.
    pub(crate) fn set_view_pose(&mut self, view: ViewId, pose: Iso3, cycle: usize) {
        let v = &mut self.views[view.0];
        v.state = PoseState::Valid;
        v.pose = pose;
        v.last_update = cycle;
    }

    pub(crate) fn add_map_point(&mut self, position: Pt3) -> MapPointId {
        self.map_points.push(MapPoint::new(position));
        MapPointId(self.map_points.len() - 1)
    }

    /// Stop trusting a map point until a later refresh succeeds.
    pub(crate) fn invalidate(&mut self, id: MapPointId) {
        self.map_points[id.0].valid = false;
    }

    /// Move a map point and refresh its colour and error.
    pub(crate) fn set_position(&mut self, id: MapPointId, position: Pt3) {
        let mp = &mut self.map_points[id.0];
        mp.position = position;
        mp.valid = true;
        self.refresh(id);
    }

    /// Attach feature `f` of `view` to a map point.
    ///
    /// Refused when the feature already supports a point or the point
    /// already has an observation from this view.
    pub(crate) fn bind(&mut self, id: MapPointId, view: ViewId, f: usize) -> bool {
        let Some(feature) = self.views[view.0].features.get(f) else {
            return false;
        };
        if feature.mpnt.is_some() {
            return false;
        }
        let mp = &mut self.map_points[id.0];
        if mp.observations.iter().any(|o| o.view == view) {
            return false;
        }
        mp.observations.push(Observation { view, feature: f });

        let v = &mut self.views[view.0];
        v.features[f].mpnt = Some(id);
        v.mpnt_count += 1;
        self.refresh(id);
        true
    }

    /// Median reprojection error of `position` over a point's observations;
    /// infinite for an unknown point.
    pub fn observation_error(&self, id: MapPointId, position: &Pt3) -> Real {
        let Some(mp) = self.map_points.get(id.0) else {
            return Real::INFINITY;
        };
        let errs: Vec<Real> = mp
            .observations
            .iter()
            .map(|o| self.views[o.view.0].reprojection_error(o.feature, position))
            .collect();
        median(&errs).unwrap_or(Real::INFINITY)
    }

    /// Recompute the colour and median error of a map point from current poses.
    pub(crate) fn refresh(&mut self, id: MapPointId) {
        let position = self.map_points[id.0].position;
        let err = self.observation_error(id, &position);

        let mut sum = [0u32; 3];
        let mut count = 0u32;
        for o in &self.map_points[id.0].observations {
            if let Some(rgb) = self.views[o.view.0].sample_color(o.feature) {
                for (s, c) in sum.iter_mut().zip(rgb) {
                    *s += u32::from(c);
                }
                count += 1;
            }
        }

        let mp = &mut self.map_points[id.0];
        mp.err = err;
        if count > 0 {
            mp.color = sum.map(|s| ((s + count / 2) / count) as u8);
        }
    }

    /// Refresh every map point observed by `view`, after its pose changed.
    pub(crate) fn refresh_view_points(&mut self, view: ViewId) {
        let ids: Vec<MapPointId> = self.views[view.0]
            .features
            .iter()
            .filter_map(|f| f.mpnt)
            .collect();
        for id in ids {
            self.refresh(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Contrast;
    use image::Rgb;
    use sfm_core::{FxFyCxCySkew, Pt2, Vec3};

    fn camera() -> CameraModel {
        CameraModel::pinhole(FxFyCxCySkew::new(100.0, 100.0, 50.0, 50.0))
    }

    fn posed_view(pose: Iso3, pixels: &[Pt2], value: u8) -> View {
        let features = pixels
            .iter()
            .map(|p| Feature::new(*p, 1.0, 0.0, Contrast::Positive, vec![1.0]))
            .collect();
        let image = RgbImage::from_pixel(100, 100, Rgb([value, value, 2 * value]));
        let mut view = View::new(camera(), image, features, Some(pose));
        view.state = PoseState::Valid;
        view
    }

    fn two_view_scene() -> (Scene, Pt3) {
        let point = Pt3::new(0.1, -0.2, 4.0);
        let poses = [
            Iso3::identity(),
            Iso3::new(Vec3::new(-0.5, 0.0, 0.0), Vec3::zeros()),
        ];
        let mut scene = Scene::default();
        for (k, pose) in poses.iter().enumerate() {
            let px = camera().project_point(&pose.transform_point(&point)).unwrap();
            // second feature lies outside the image
            scene.push_view(posed_view(*pose, &[px, Pt2::new(-20.0, 10.0)], 10 * (k as u8 + 1)));
        }
        (scene, point)
    }

    #[test]
    fn bind_keeps_back_references_symmetric() {
        let (mut scene, point) = two_view_scene();
        let id = scene.add_map_point(point);
        assert!(scene.bind(id, ViewId(0), 0));
        assert!(scene.bind(id, ViewId(1), 0));

        for o in &scene.point_at(id).observations {
            assert_eq!(scene.point_of(o.view, o.feature), Some(id));
        }
        assert_eq!(scene.view_at(ViewId(0)).mpnt_count, 1);
        assert!(scene.point_at(id).err < 1e-9);
        assert_eq!(scene.point_at(id).color, [15, 15, 30]);
    }

    #[test]
    fn bind_refuses_duplicates() {
        let (mut scene, point) = two_view_scene();
        let a = scene.add_map_point(point);
        let b = scene.add_map_point(point);
        assert!(scene.bind(a, ViewId(0), 0));
        // feature already taken
        assert!(!scene.bind(b, ViewId(0), 0));
        // point already observed from view 0
        assert!(!scene.bind(a, ViewId(0), 1));
        // no such feature
        assert!(!scene.bind(b, ViewId(1), 7));
        assert_eq!(scene.point_at(a).observations.len(), 1);
        assert!(scene.point_at(b).observations.is_empty());
    }

    #[test]
    fn colour_ignores_features_outside_image() {
        let (mut scene, point) = two_view_scene();
        let id = scene.add_map_point(point);
        assert!(scene.bind(id, ViewId(1), 1));
        assert_eq!(scene.point_at(id).color, [0, 0, 0]);
        assert!(scene.bind(id, ViewId(0), 0));
        assert_eq!(scene.point_at(id).color, [10, 10, 20]);
    }

    #[test]
    fn error_follows_position() {
        let (mut scene, point) = two_view_scene();
        let id = scene.add_map_point(point);
        scene.bind(id, ViewId(0), 0);
        scene.bind(id, ViewId(1), 0);
        scene.set_position(id, point + Vec3::new(0.04, 0.0, 0.0));
        assert!((scene.point_at(id).err - 1.0).abs() < 1e-9);
    }

    #[test]
    fn invalidated_point_is_not_trusted_until_moved() {
        let (mut scene, point) = two_view_scene();
        let id = scene.add_map_point(point);
        scene.bind(id, ViewId(0), 0);
        scene.bind(id, ViewId(1), 0);
        assert!(scene.point_at(id).is_trusted(1.0));

        scene.invalidate(id);
        assert!(!scene.point_at(id).is_trusted(1.0));
        assert_eq!(scene.point_at(id).position, point);
        assert_eq!(scene.point_of(ViewId(1), 0), Some(id));

        scene.set_position(id, point);
        assert!(scene.point_at(id).is_trusted(1.0));
    }

    #[test]
    fn unknown_handles_are_none() {
        let (mut scene, point) = two_view_scene();
        let id = scene.add_map_point(point);
        assert!(scene.view(ViewId(1)).is_some());
        assert!(scene.view(ViewId(2)).is_none());
        assert!(scene.map_point(id).is_some());
        assert!(scene.map_point(MapPointId(7)).is_none());
        assert_eq!(scene.point_of(ViewId(9), 0), None);
        assert_eq!(scene.observation_error(MapPointId(7), &point), Real::INFINITY);

        // handles round-tripped through serde are checked, not trusted
        let forged: ViewId = serde_json::from_str("42").unwrap();
        assert!(scene.view(forged).is_none());
    }

    #[test]
    fn ids_display_their_index() {
        assert_eq!(ViewId(3).to_string(), "ViewId(3)");
        assert_eq!(MapPointId(0).index(), 0);
    }
}
