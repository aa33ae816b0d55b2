//! Hillshade and contour generation, alone and through the terrain pipeline.

mod common;

use common::*;
use localmap_dem::{
    ContourParams, DemError, DerivativeProducer, DerivativeSpec, ElevationRequest, HillshadeParams,
    TerrainPipeline, TerrainSettings, CONTOURS_FILE, HILLSHADE_FILE,
};
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn raster_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("dem.tif");
    fs::write(&path, vec![0u8; 4096]).unwrap();
    path
}

#[test]
fn test_invalid_azimuth_never_reaches_toolkit() {
    let dir = tempfile::tempdir().unwrap();
    let raster = raster_file(dir.path());
    let toolkit = Arc::new(MockToolkit::default());
    let producer = DerivativeProducer::new(toolkit.clone());

    let params = HillshadeParams {
        azimuth: 400.0,
        ..HillshadeParams::default()
    };
    let output = dir.path().join("hillshade.tif");
    let err = producer.make_hillshade(&raster, &params, &output).unwrap_err();

    assert!(matches!(
        err,
        DemError::InvalidDerivativeParams {
            product: "hillshade",
            param: "azimuth",
            ..
        }
    ));
    assert_eq!(toolkit.total_calls(), 0);
    assert!(!output.exists());
}

#[test]
fn test_hillshade_and_contours() {
    let dir = tempfile::tempdir().unwrap();
    let raster = raster_file(dir.path());
    let toolkit = Arc::new(MockToolkit::default());
    let producer = DerivativeProducer::new(toolkit.clone());

    let hillshade = producer
        .make_hillshade(&raster, &HillshadeParams::default(), &dir.path().join("out/hillshade.tif"))
        .unwrap();
    assert!(hillshade.path.exists());
    assert_eq!(hillshade.opacity, HillshadeParams::default().opacity);
    assert!(fs::read(&hillshade.path).unwrap().starts_with(b"HILLSHADE az=315 alt=45"));

    let params = ContourParams {
        interval_m: 20.0,
        major_interval_m: 100.0,
    };
    let contours = producer
        .make_contours(&raster, &params, &dir.path().join("out/contours.shp"))
        .unwrap();
    assert_eq!(contours.attribute, "elevation");
    assert_eq!(contours.major_interval_m, 100.0);
    assert_eq!(fs::read_to_string(&contours.path).unwrap(), "CONTOURS elevation every 20");
    assert_eq!(toolkit.hillshades.load(Ordering::SeqCst), 1);
    assert_eq!(toolkit.contours.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_raster_is_generation_error() {
    let dir = tempfile::tempdir().unwrap();
    let toolkit = Arc::new(MockToolkit::default());
    let producer = DerivativeProducer::new(toolkit.clone());

    let err = producer
        .make_contours(&dir.path().join("absent.tif"), &ContourParams::default(), &dir.path().join("c.shp"))
        .unwrap_err();
    assert!(matches!(err, DemError::DerivativeGeneration { product: "contour", .. }));
    assert!(err.is_recoverable());
    assert_eq!(toolkit.total_calls(), 0);
}

#[test]
fn test_tool_failure_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let raster = raster_file(dir.path());
    let toolkit = Arc::new(MockToolkit {
        fail_hillshade: true,
        ..MockToolkit::default()
    });
    let producer = DerivativeProducer::new(toolkit);

    let err = producer
        .make_hillshade(&raster, &HillshadeParams::default(), &dir.path().join("hs.tif"))
        .unwrap_err();
    match &err {
        DemError::DerivativeGeneration { product, reason } => {
            assert_eq!(*product, "hillshade");
            assert!(reason.contains("simulated failure"));
        }
        other => panic!("expected DerivativeGeneration, got {:?}", other),
    }
    assert!(err.is_recoverable());
}

#[test]
fn test_pipeline_produces_every_layer() {
    let cache_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let toolkit = Arc::new(MockToolkit::default());
    let pipeline = TerrainPipeline::new(orchestrator(cache_dir.path(), Arc::new(MockHttp::serving()), toolkit.clone()));

    let settings = TerrainSettings::from_yaml_str(
        "hillshading:\n  enabled: true\ncontours:\n  enabled: true\n  interval: 10\n  major_interval: 50\n",
    )
    .unwrap();
    let request = settings.to_request(&lumsden(), out_dir.path().join("lumsden_dem.tif")).unwrap();
    let outputs = pipeline
        .run(&request, &settings.derivative_spec(), out_dir.path())
        .unwrap();

    assert!(outputs.is_complete());
    assert_eq!(outputs.acquisition.product.source_used.to_string(), "real:srtm");
    let hillshade = outputs.hillshade.unwrap().unwrap();
    assert_eq!(hillshade.path, out_dir.path().join(HILLSHADE_FILE));
    let contours = outputs.contours.unwrap().unwrap();
    assert_eq!(contours.path, out_dir.path().join(CONTOURS_FILE));
}

#[test]
fn test_pipeline_survives_derivative_failure() {
    let cache_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let toolkit = Arc::new(MockToolkit {
        fail_hillshade: true,
        ..MockToolkit::default()
    });
    let pipeline = TerrainPipeline::new(orchestrator(cache_dir.path(), Arc::new(MockHttp::serving()), toolkit));

    let request = ElevationRequest::new(lumsden(), "srtm", out_dir.path().join("dem.tif"));
    let spec = DerivativeSpec {
        hillshade: Some(HillshadeParams::default()),
        contour: Some(ContourParams::default()),
    };
    let outputs = pipeline.run(&request, &spec, out_dir.path()).unwrap();

    assert!(!outputs.is_complete());
    assert!(out_dir.path().join("dem.tif").exists());
    assert!(matches!(outputs.hillshade, Some(Err(ref e)) if e.is_recoverable()));
    assert!(matches!(outputs.contours, Some(Ok(_))));
}

#[test]
fn test_pipeline_rejects_bad_params_before_fetching() {
    let cache_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let http = Arc::new(MockHttp::serving());
    let toolkit = Arc::new(MockToolkit::default());
    let pipeline = TerrainPipeline::new(orchestrator(cache_dir.path(), http.clone(), toolkit.clone()));

    let request = ElevationRequest::new(lumsden(), "srtm", out_dir.path().join("dem.tif"));
    let spec = DerivativeSpec {
        hillshade: Some(HillshadeParams {
            azimuth: 400.0,
            ..HillshadeParams::default()
        }),
        contour: None,
    };
    let err = pipeline.run(&request, &spec, out_dir.path()).unwrap_err();

    assert!(matches!(err, DemError::InvalidDerivativeParams { .. }));
    assert_eq!(http.call_count(), 0);
    assert_eq!(toolkit.total_calls(), 0);
}

fn scratch_dirs(dir: &std::path::Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".localmap-"))
        .count()
}

#[test]
fn test_contours_replace_whole_shapefile() {
    let dir = tempfile::tempdir().unwrap();
    let raster = raster_file(dir.path());
    let producer = DerivativeProducer::new(Arc::new(MockToolkit::default()));

    let output = dir.path().join("contours.shp");
    for extension in ["shp", "shx", "dbf", "prj"] {
        fs::write(output.with_extension(extension), "stale").unwrap();
    }
    producer.make_contours(&raster, &ContourParams::default(), &output).unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap(), "CONTOURS elevation every 10");
    assert_eq!(fs::read_to_string(output.with_extension("shx")).unwrap(), "shx");
    assert_eq!(fs::read_to_string(output.with_extension("dbf")).unwrap(), "dbf");
    assert!(!output.with_extension("prj").exists());
    assert_eq!(scratch_dirs(dir.path()), 0);
}

#[test]
fn test_failed_hillshade_keeps_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let raster = raster_file(dir.path());
    let producer = DerivativeProducer::new(Arc::new(MockToolkit {
        fail_hillshade: true,
        ..MockToolkit::default()
    }));

    let output = dir.path().join("hillshade.tif");
    fs::write(&output, "old").unwrap();
    producer
        .make_hillshade(&raster, &HillshadeParams::default(), &output)
        .unwrap_err();

    assert_eq!(fs::read_to_string(&output).unwrap(), "old");
    assert_eq!(scratch_dirs(dir.path()), 0);
}
