//! Baseline-store flow tests for the local visual backend.

use std::io::Cursor;
use std::sync::Arc;

use image::RgbaImage;
use tempfile::TempDir;

use visreg_harness::{
    BatchInfo, CheckpointOutcome, CheckpointSettings, HarnessError, LocalStoreConfig,
    LocalVisualBackend, SessionSpec, SuiteContext, SessionId, Viewport, VisualBackend,
};

fn encode_png(img: &RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .expect("encode png");
    buf
}

fn solid(rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(64, 64, image::Rgba(rgba))
}

fn backend(dir: &TempDir) -> Arc<LocalVisualBackend> {
    Arc::new(LocalVisualBackend::new(LocalStoreConfig {
        baseline_dir: dir.path().join("baselines"),
        diff_dir: dir.path().join("diffs"),
    }))
}

fn spec(test_name: &str, save_new: bool) -> SessionSpec {
    let ctx = SuiteContext::new(None, true, BatchInfo::new("local backend tests"))
        .with_save_new_baselines(save_new);
    SessionSpec {
        app_name: "Demo App".into(),
        test_name: test_name.into(),
        viewport: Viewport::default(),
        config: ctx.config,
    }
}

async fn run_one(
    backend: &Arc<LocalVisualBackend>,
    spec: SessionSpec,
    shots: Vec<(Vec<u8>, CheckpointSettings)>,
) -> Vec<(String, CheckpointOutcome, f64)> {
    let id = backend.open(spec).await.unwrap();
    for (png, settings) in shots {
        backend.submit(&id, png, settings).await.unwrap();
    }
    backend.close(&id).await.unwrap();
    let results = backend.wait_for_results(&id).await.unwrap();
    results
        .checkpoints
        .into_iter()
        .map(|c| (c.name, c.outcome, c.diff_percent))
        .collect()
}

#[tokio::test]
async fn first_run_stores_a_new_baseline_and_later_runs_match() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);
    let page = encode_png(&solid([220, 220, 220, 255]));

    let first = run_one(
        &backend,
        spec("login", true),
        vec![(page.clone(), CheckpointSettings::new("Login page"))],
    )
    .await;
    assert_eq!(first[0].1, CheckpointOutcome::New);

    let baseline = dir
        .path()
        .join("baselines/Demo-App/login/Login-page.png");
    assert!(baseline.exists());

    let second = run_one(
        &backend,
        spec("login-again", true),
        vec![(page, CheckpointSettings::new("Login page"))],
    )
    .await;
    // Different test, different baseline key.
    assert_eq!(second[0].1, CheckpointOutcome::New);

    let third = run_one(
        &backend,
        spec("login", true),
        vec![(
            encode_png(&solid([220, 220, 220, 255])),
            CheckpointSettings::new("Login page"),
        )],
    )
    .await;
    assert_eq!(third[0].1, CheckpointOutcome::Matched);
    assert_eq!(third[0].2, 0.0);
}

#[tokio::test]
async fn missing_baseline_without_save_new_is_unresolved() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    let results = run_one(
        &backend,
        spec("no-baseline", false),
        vec![(
            encode_png(&solid([10, 10, 10, 255])),
            CheckpointSettings::new("Home"),
        )],
    )
    .await;
    assert_eq!(results[0].1, CheckpointOutcome::Unresolved);
}

#[tokio::test]
async fn changed_region_is_mismatched_with_a_diff_image() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    let baseline_img = solid([255, 255, 255, 255]);
    run_one(
        &backend,
        spec("dashboard", true),
        vec![(encode_png(&baseline_img), CheckpointSettings::new("Main"))],
    )
    .await;

    let mut changed = baseline_img.clone();
    for y in 0..16 {
        for x in 0..16 {
            changed.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
        }
    }

    let id = backend.open(spec("dashboard-rerun", true)).await.unwrap();
    backend
        .submit(&id, encode_png(&changed), CheckpointSettings::new("Main"))
        .await
        .unwrap();
    backend.close(&id).await.unwrap();
    let results = backend.wait_for_results(&id).await.unwrap();

    // dashboard-rerun has its own baseline key, so this resolves New; the
    // mismatch has to be against the *same* test's stored baseline.
    assert_eq!(results.checkpoints[0].outcome, CheckpointOutcome::New);

    let id = backend.open(spec("dashboard", true)).await.unwrap();
    // "dashboard" already opened once above; the backend itself does not
    // police name uniqueness (the factory does).
    backend
        .submit(&id, encode_png(&changed), CheckpointSettings::new("Main"))
        .await
        .unwrap();
    backend.close(&id).await.unwrap();
    let results = backend.wait_for_results(&id).await.unwrap();

    let checkpoint = &results.checkpoints[0];
    assert_eq!(checkpoint.outcome, CheckpointOutcome::Mismatched);
    // 256 of 4096 pixels
    assert!((checkpoint.diff_percent - 6.25).abs() < 1e-9);
    let diff_path = checkpoint.diff_image_path.as_ref().unwrap();
    assert!(diff_path.exists());
}

#[tokio::test]
async fn layout_level_tolerates_content_churn_that_strict_flags() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    let baseline_img = solid([128, 128, 128, 255]);
    run_one(
        &backend,
        spec("article", true),
        vec![
            (
                encode_png(&baseline_img),
                CheckpointSettings::new("Strict view"),
            ),
            (
                encode_png(&baseline_img),
                CheckpointSettings::new("Layout view").layout(),
            ),
        ],
    )
    .await;

    // Scattered single-pixel churn, like re-rendered text.
    let mut churned = baseline_img.clone();
    for y in (0..64).step_by(16) {
        for x in (0..64).step_by(16) {
            churned.put_pixel(x, y, image::Rgba([180, 180, 180, 255]));
        }
    }
    let churned_png = encode_png(&churned);

    let results = run_one(
        &backend,
        spec("article", true),
        vec![
            (churned_png.clone(), CheckpointSettings::new("Strict view")),
            (churned_png, CheckpointSettings::new("Layout view").layout()),
        ],
    )
    .await;

    assert_eq!(results[0].0, "Strict view");
    assert_eq!(results[0].1, CheckpointOutcome::Mismatched);
    assert_eq!(results[1].0, "Layout view");
    assert_eq!(results[1].1, CheckpointOutcome::Matched);
}

#[tokio::test]
async fn submitting_after_close_is_rejected() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    let id = backend.open(spec("closed", true)).await.unwrap();
    backend.close(&id).await.unwrap();

    let err = backend
        .submit(
            &id,
            encode_png(&solid([0, 0, 0, 255])),
            CheckpointSettings::new("late"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::SessionClosed(_)));
}

#[tokio::test]
async fn unknown_sessions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    let err = backend
        .wait_for_results(&SessionId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::UnknownSession(_)));
}

#[tokio::test]
async fn undecodable_screenshot_resolves_unresolved() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    // Store a valid baseline first so the comparison path runs.
    run_one(
        &backend,
        spec("broken-shot", true),
        vec![(
            encode_png(&solid([50, 50, 50, 255])),
            CheckpointSettings::new("Page"),
        )],
    )
    .await;

    let results = run_one(
        &backend,
        spec("broken-shot", true),
        vec![(
            b"definitely not a png".to_vec(),
            CheckpointSettings::new("Page"),
        )],
    )
    .await;
    assert_eq!(results[0].1, CheckpointOutcome::Unresolved);
}
