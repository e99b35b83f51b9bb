use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use log::info;
use serde::{Deserialize, Serialize};
use sfm_core::{CameraModel, Iso3, Pt2, Real, Vec3};
use sfm_pipeline::{Contrast, EngineConfig, Feature, PoseState, QueueDetector, SfmEngine};

/// Incremental structure-from-motion over pre-extracted features.
#[derive(Debug, Parser)]
#[command(author, version, about = "Incremental structure-from-motion over pre-extracted features")]
struct Args {
    /// Path to JSON file containing the scene (views with features).
    #[arg(long)]
    input: String,

    /// Optional path to JSON EngineConfig. Defaults are used for missing fields.
    #[arg(long)]
    config: Option<String>,

    /// Upper bound on update cycles.
    #[arg(long, default_value_t = 50)]
    max_updates: usize,
}

/// Pose as axis-angle rotation plus translation, `T_C_W`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PoseRecord {
    rotation: [Real; 3],
    translation: [Real; 3],
}

impl From<&Iso3> for PoseRecord {
    fn from(pose: &Iso3) -> Self {
        Self {
            rotation: pose.rotation.scaled_axis().into(),
            translation: pose.translation.vector.into(),
        }
    }
}

impl PoseRecord {
    fn to_iso(self) -> Iso3 {
        Iso3::new(Vec3::from(self.translation), Vec3::from(self.rotation))
    }
}

fn default_scale() -> Real {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeatureRecord {
    pix: [Real; 2],
    #[serde(default = "default_scale")]
    scale: Real,
    #[serde(default)]
    orientation: Real,
    contrast: Contrast,
    descriptor: Vec<f32>,
}

impl FeatureRecord {
    fn to_feature(&self) -> Feature {
        Feature::new(
            Pt2::new(self.pix[0], self.pix[1]),
            self.scale,
            self.orientation,
            self.contrast,
            self.descriptor.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ViewRecord {
    camera: CameraModel,
    width: u32,
    height: u32,
    #[serde(default)]
    hint: Option<PoseRecord>,
    features: Vec<FeatureRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SceneInput {
    views: Vec<ViewRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ViewReport {
    state: PoseState,
    pose: Option<PoseRecord>,
    fixed: bool,
    mpnt_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointReport {
    position: [Real; 3],
    color: [u8; 3],
    err: Real,
    observations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Report {
    updates: usize,
    converged: bool,
    views: Vec<ViewReport>,
    map_points: Vec<PointReport>,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Run update cycles until every view is registered and a cycle adds no
/// map point, or until `max_updates` cycles ran.
fn run_engine(input: &SceneInput, config: EngineConfig, max_updates: usize) -> Report {
    let detector = QueueDetector::new(
        input
            .views
            .iter()
            .map(|v| v.features.iter().map(FeatureRecord::to_feature).collect()),
    );
    let mut engine = SfmEngine::new(config, Box::new(detector));
    for view in &input.views {
        let image = RgbImage::new(view.width, view.height);
        engine.add_view(view.camera, image, view.hint.map(PoseRecord::to_iso));
    }

    let mut converged = false;
    let mut updates = 0;
    let mut last_points = 0;
    while updates < max_updates {
        if !engine.update(1) {
            break;
        }
        updates += 1;
        let points = engine.map_point_count();
        if engine.views().iter().all(|v| v.is_valid()) && points == last_points {
            converged = true;
            break;
        }
        last_points = points;
    }
    info!(
        "{updates} updates, {} map points, converged: {converged}",
        engine.map_point_count()
    );

    Report {
        updates,
        converged,
        views: engine
            .views()
            .iter()
            .map(|v| ViewReport {
                state: v.state,
                pose: (v.state != PoseState::Null).then(|| PoseRecord::from(&v.pose)),
                fixed: v.fixed,
                mpnt_count: v.mpnt_count,
            })
            .collect(),
        map_points: engine
            .map_points()
            .iter()
            .map(|mp| PointReport {
                position: mp.position.coords.into(),
                color: mp.color,
                err: mp.err,
                observations: mp.observations.len(),
            })
            .collect(),
    }
}

fn run_from_files(input_path: &str, config_path: Option<&str>, max_updates: usize) -> Result<String> {
    let input: SceneInput = load_json_file(Path::new(input_path))?;
    let config = match config_path {
        Some(path) => load_json_file::<EngineConfig>(Path::new(path))?,
        None => EngineConfig::default(),
    };
    info!("loaded {} views from {input_path}", input.views.len());
    let report = run_engine(&input, config, max_updates);
    Ok(serde_json::to_string_pretty(&report)?)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let json = run_from_files(&args.input, args.config.as_deref(), args.max_updates)?;
    println!("{json}");
    Ok(())
}
