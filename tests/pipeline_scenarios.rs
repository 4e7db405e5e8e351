use sphere_heat::config::{LayerConfig, PipelineConfig, ReportRange, StageConfig};
use sphere_heat::error::{Error, PersistenceError};
use sphere_heat::integrator::IntegratorOptions;
use sphere_heat::material::Material;
use sphere_heat::pipeline::Pipeline;
use sphere_heat::snapshot::{npy, MemoryStore, NpyStore, SnapshotStore};
use sphere_heat::stage::Stage;

use float_cmp::assert_approx_eq;

fn cooldown() -> StageConfig {
    PipelineConfig::espresso().stages[0].clone()
}

#[test]
fn cooldown_scenario() {
    let config = cooldown();
    assert_eq!(config.point_count(), 6500);
    let stage = Stage::build(&config, None, 1000).unwrap();
    assert_eq!(stage.mesh().breakpoints(), &[0, 1400, 1500, 6500]);
    assert_eq!(stage.mesh().outer_radius(), 0.065);

    let result = stage.run(&IntegratorOptions::default()).unwrap();
    assert_eq!(result.times, vec![0.0, 15.0]);
    assert_eq!(result.final_profile().as_slice()[6499], 293.0);

    // Air just outside the steel shell is pulled toward the chilled core.
    let window = result.final_mean(1500..2290).unwrap();
    assert!(window > 203.0 && window < 293.0, "window mean {window}");
    assert_approx_eq!(f64, window, 245.5, epsilon = 0.5);
    // Closer to the chilled core than to the ambient air.
    assert!(window < 0.5 * (203.0 + 293.0), "window mean {window}");

    // The core itself has taken up heat.
    let core = result.final_mean(0..1500).unwrap();
    assert!(core > 203.0, "core mean {core}");

    let summary = result.summary();
    assert_eq!(summary.means[0].label, "core");
    assert!(summary.means[0].mean.is_some());
}

fn two_stages() -> PipelineConfig {
    let first = StageConfig {
        name: "chill".to_string(),
        layers: vec![
            LayerConfig::new("water", 0.014, 140, Material::water(), Some(203.0)),
            LayerConfig::new("steel", 0.015, 10, Material::steel(), Some(203.0)),
            LayerConfig::new("air", 0.065, 500, Material::air(), None),
        ],
        duration: 3.0,
        output_times: vec![],
        reuse_prefix_length: None,
        seed_snapshot: None,
        ambient_temperature: 293.0,
        persist_prefix_length: Some(150),
        report_ranges: vec![],
    };
    let second = StageConfig {
        name: "soak".to_string(),
        layers: vec![
            LayerConfig::new("water", 0.014, 140, Material::water(), None),
            LayerConfig::new("steel", 0.015, 10, Material::steel(), None),
            LayerConfig::new("coffee", 0.0229, 79, Material::water(), Some(338.0)),
            LayerConfig::new("air", 0.065, 500, Material::air(), None),
        ],
        duration: 2.0,
        output_times: vec![0.0, 0.5, 1.0, 2.0],
        reuse_prefix_length: Some(150),
        seed_snapshot: None,
        ambient_temperature: 293.0,
        persist_prefix_length: Some(229),
        report_ranges: vec![ReportRange {
            label: "coffee".to_string(),
            start: 150,
            end: 229,
        }],
    };
    PipelineConfig {
        stages: vec![first, second],
        integrator: IntegratorOptions::default(),
        chunk_size: 128,
    }
}

#[test]
fn stage_chaining_round_trip() {
    let mut pipeline = Pipeline::new(two_stages(), MemoryStore::new()).unwrap();
    let results = pipeline.run().unwrap();

    let terminal = results[0].final_profile().prefix(150);
    let initial = results[1].profiles[0].as_slice();
    assert_eq!(&initial[..150], terminal);
    assert_eq!(initial.len(), 150 + 79 + 500);
    assert!(initial[150..229].iter().all(|&t| t == 338.0));
    assert!(initial[229..].iter().all(|&t| t == 293.0));

    assert_eq!(pipeline.store().load("soak").unwrap().len(), 229);

    let coffee = results[1].summary().means[0].mean.unwrap();
    assert!(coffee < 338.0 && coffee > 203.0, "coffee mean {coffee}");
}

#[test]
fn missing_snapshot_stops_the_stage() {
    let mut pipeline = Pipeline::new(two_stages(), MemoryStore::new()).unwrap();
    let err = pipeline.run_stage("soak").unwrap_err();
    assert!(err.to_string().contains("chill"), "{err}");
    assert!(matches!(
        err,
        Error::Snapshot {
            source: PersistenceError::Missing(_),
            ..
        }
    ));
    assert!(!pipeline.store().contains("soak"));
}

#[test]
fn short_snapshot_is_not_padded() {
    let mut store = MemoryStore::new();
    store.save("chill", &[250.0; 100]).unwrap();
    let mut pipeline = Pipeline::new(two_stages(), store).unwrap();
    match pipeline.run_stage("soak").unwrap_err() {
        Error::SnapshotTooShort {
            stage,
            snapshot,
            required,
            available,
        } => {
            assert_eq!(stage, "soak");
            assert_eq!(snapshot, "chill");
            assert_eq!((required, available), (150, 100));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn convergence_failure_names_the_stage() {
    let mut config = two_stages();
    config.integrator.max_steps = 3;
    let mut pipeline = Pipeline::new(config, MemoryStore::new()).unwrap();
    match pipeline.run().unwrap_err() {
        Error::Convergence {
            stage, t_reached, ..
        } => {
            assert_eq!(stage, "chill");
            assert!(t_reached < 3.0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!pipeline.store().contains("chill"));
}

#[test]
fn seeds_from_npy_file() {
    let dir = tempfile::tempdir().unwrap();
    let seed: Vec<f64> = (0..150).map(|i| 210.0 + 0.1 * i as f64).collect();
    std::fs::write(dir.path().join("chill.npy"), npy::encode(&seed)).unwrap();

    let mut pipeline = Pipeline::new(two_stages(), NpyStore::new(dir.path())).unwrap();
    let result = pipeline.run_stage("soak").unwrap();
    assert_eq!(&result.profiles[0].as_slice()[..150], seed.as_slice());

    let saved = std::fs::read(dir.path().join("soak.npy")).unwrap();
    assert_eq!(npy::decode(&saved).unwrap(), result.snapshot());
}
