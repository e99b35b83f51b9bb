use anyhow::Result;
use nalgebra::{Isometry3, Vector3};
use sfm_core::{
    BrownConrady5, CameraModel, Distortion, FxFyCxCySkew, Iso3, Pt2, Pt3, RansacOptions, Vec2,
};
use sfm_optim::{pnp_ransac, stereo_pose_ransac, triangulate_point_ransac, RayObservation};

fn camera() -> CameraModel {
    CameraModel::new(
        FxFyCxCySkew::new(620.0, 615.0, 320.0, 240.0),
        Distortion::BrownConrady5 {
            params: BrownConrady5 {
                k1: -0.05,
                k2: 0.01,
                k3: 0.0,
                p1: 0.0002,
                p2: -0.0001,
                iters: 20,
            },
        },
    )
}

fn points() -> Vec<Pt3> {
    (0..60usize)
        .map(|i| {
            Pt3::new(
                ((i * 7) % 12) as f64 * 0.15 - 0.8,
                ((i * 5) % 9) as f64 * 0.15 - 0.6,
                5.0 + ((i * 3) % 7) as f64 * 0.2,
            )
        })
        .collect()
}

fn project(cam: &CameraModel, pose: &Iso3, pts: &[Pt3]) -> Vec<Pt2> {
    pts.iter()
        .map(|p| {
            cam.project_point(&pose.transform_point(p))
                .expect("point in front")
        })
        .collect()
}

#[test]
fn stereo_triangulation_and_pnp_agree_up_to_scale() -> Result<()> {
    let cam = camera();
    let world = points();
    let pose1 = Isometry3::new(
        Vector3::new(-0.6, 0.05, 0.1),
        Vector3::new(0.01, 0.12, -0.02),
    );
    let pose2 = Isometry3::new(
        Vector3::new(0.7, -0.1, 0.2),
        Vector3::new(-0.03, -0.15, 0.01),
    );

    let pix0 = project(&cam, &Iso3::identity(), &world);
    let mut pix1 = project(&cam, &pose1, &world);
    for i in (0..pix1.len()).step_by(10) {
        pix1[i] += Vec2::new(35.0, 45.0);
    }

    let opts = RansacOptions {
        confidence: 0.9999,
        ..RansacOptions::with_thresh(1.0)
    };
    let (rel, inliers) = stereo_pose_ransac(&cam, &pix0, &cam, &pix1, &opts)?;
    assert_eq!(inliers.len(), 54);
    assert!(inliers.iter().all(|i| i % 10 != 0));
    assert!(rel.rotation.angle_to(&pose1.rotation) < 1e-6);

    // The stereo baseline has unit length, so structure is scaled by 1/|t|.
    let scale = pose1.translation.vector.norm();
    let mut structure = Vec::new();
    for &i in &inliers {
        let obs = [
            RayObservation::new(Iso3::identity(), &cam, &pix0[i]),
            RayObservation::new(rel, &cam, &pix1[i]),
        ];
        let (p, _) = triangulate_point_ransac(&obs, &opts)?;
        assert!((p.coords * scale - world[i].coords).norm() < 1e-5);
        structure.push((i, p));
    }

    let pix2 = project(&cam, &pose2, &world);
    let (px, pw): (Vec<Pt2>, Vec<Pt3>) = structure.iter().map(|&(i, p)| (pix2[i], p)).unzip();
    let (est2, pnp_inliers) = pnp_ransac(&cam, &px, &pw, &RansacOptions::with_thresh(1.0))?;
    assert_eq!(pnp_inliers.len(), px.len());
    assert!(est2.rotation.angle_to(&pose2.rotation) < 1e-6);
    assert!((est2.translation.vector * scale - pose2.translation.vector).norm() < 1e-5);
    Ok(())
}
