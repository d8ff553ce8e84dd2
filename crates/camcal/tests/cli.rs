#![cfg(feature = "cli")]

mod common;

use assert_cmd::Command;
use camcal::intrinsics::{CalibrationFlags, SolverOptions};
use camcal::{calibrate_detections, CalibrationFile};
use common::{projected_detections, render_board, SIZE, SQUARE};
use predicates::prelude::*;

fn camcal() -> Command {
    Command::cargo_bin("camcal").expect("camcal binary")
}

#[test]
fn help_lists_subcommands() {
    camcal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibrate"))
        .stdout(predicate::str::contains("undistort"));
}

#[test]
fn rejects_malformed_pattern() {
    camcal()
        .args(["detect", "--images", ".", "--pattern", "seven"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("COLSxROWS"));
}

#[test]
fn calibrate_writes_calibration_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let detections = dir.path().join("detections.json");
    let out = dir.path().join("calibration.json");
    projected_detections(0.1)
        .write_json(&detections)
        .expect("write detections");

    camcal()
        .arg("calibrate")
        .arg("--detections")
        .arg(&detections)
        .args(["--square-size", "0.03", "--max-rms", "0.5"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("rms reprojection error"));

    let calib = CalibrationFile::load_json(&out).expect("load");
    assert_eq!(calib.image_size, SIZE);
    assert_eq!(calib.views.len(), common::poses().len());
    assert!((calib.camera_matrix[0][0] - 600.0).abs() < 6.0);
    assert!(calib.report.is_some());
}

#[test]
fn report_fails_the_quality_gate_with_exit_code_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let set = projected_detections(0.4);
    let calib = calibrate_detections(
        &set,
        SQUARE,
        &CalibrationFlags::default(),
        &SolverOptions::default(),
    )
    .expect("calibrate");
    let path = dir.path().join("calibration.json");
    calib.write_json(&path).expect("write");

    camcal()
        .arg("report")
        .arg("--calibration")
        .arg(&path)
        .args(["--max-rms", "0.01", "--json"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"rms\""))
        .stderr(predicate::str::contains("error:"));

    camcal()
        .arg("report")
        .arg("--calibration")
        .arg(&path)
        .args(["--max-rms", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("assessment: ideal"))
        .stdout(predicate::str::contains("std"));
}

#[test]
fn report_suggests_fixes_for_a_poor_calibration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut set = projected_detections(0.0);
    // Alternating 10px offsets no pose can absorb push the mean error per
    // view above 1px.
    for det in set.detections.iter_mut() {
        for (k, p) in det.corners.iter_mut().enumerate() {
            p.x += if k % 2 == 0 { 10.0 } else { -10.0 };
        }
    }
    let calib = calibrate_detections(
        &projected_detections(0.0),
        SQUARE,
        &CalibrationFlags::default(),
        &SolverOptions::default(),
    )
    .expect("calibrate");
    let calib_path = dir.path().join("calibration.json");
    let detections = dir.path().join("detections.json");
    calib.write_json(&calib_path).expect("write");
    set.write_json(&detections).expect("write");

    camcal()
        .arg("report")
        .arg("--calibration")
        .arg(&calib_path)
        .arg("--detections")
        .arg(&detections)
        .assert()
        .success()
        .stdout(predicate::str::contains("assessment: poor"))
        .stdout(predicate::str::contains("add more images"));
}

#[test]
fn undistort_writes_one_image_per_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let images = dir.path().join("images");
    std::fs::create_dir(&images).expect("mkdir");
    render_board(&common::poses()[0])
        .save(images.join("board.png"))
        .expect("save");

    let calib = calibrate_detections(
        &projected_detections(0.0),
        SQUARE,
        &CalibrationFlags::default(),
        &SolverOptions::default(),
    )
    .expect("calibrate");
    let calib_path = dir.path().join("calibration.json");
    calib.write_json(&calib_path).expect("write");

    let out = dir.path().join("corrected");
    camcal()
        .arg("undistort")
        .arg("--calibration")
        .arg(&calib_path)
        .arg("--images")
        .arg(&images)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success();

    let img = image::open(out.join("board.png")).expect("corrected image");
    assert_eq!((img.width(), img.height()), (SIZE.width, SIZE.height));
}

#[test]
fn undistort_skips_broken_images_and_reports_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let images = dir.path().join("images");
    std::fs::create_dir(&images).expect("mkdir");
    render_board(&common::poses()[0])
        .save(images.join("board.png"))
        .expect("save");
    std::fs::write(images.join("broken.png"), b"not a png").expect("write");

    let calib = calibrate_detections(
        &projected_detections(0.0),
        SQUARE,
        &CalibrationFlags::default(),
        &SolverOptions::default(),
    )
    .expect("calibrate");
    let calib_path = dir.path().join("calibration.json");
    calib.write_json(&calib_path).expect("write");

    let out = dir.path().join("corrected");
    camcal()
        .arg("undistort")
        .arg("--calibration")
        .arg(&calib_path)
        .arg("--images")
        .arg(&images)
        .arg("--output-dir")
        .arg(&out)
        .arg("--compare")
        .assert()
        .success()
        .stdout(predicate::str::contains("corrected 1/2 images (50.0%)"))
        .stdout(predicate::str::contains("failed: 1 (broken.png)"));

    assert!(out.join("board.png").is_file());
    let pair = image::open(out.join("compare_board.png")).expect("comparison");
    assert_eq!((pair.width(), pair.height()), (2 * SIZE.width, SIZE.height));
    assert!(!out.join("broken.png").exists());
}

#[test]
fn pose_prints_camera_positions_and_draws_axes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let images = dir.path().join("images");
    std::fs::create_dir(&images).expect("mkdir");
    common::write_board_images(&images);

    let calib = calibrate_detections(
        &projected_detections(0.0),
        SQUARE,
        &CalibrationFlags::default(),
        &SolverOptions::default(),
    )
    .expect("calibrate");
    let calib_path = dir.path().join("calibration.json");
    calib.write_json(&calib_path).expect("write");
    let out = dir.path().join("poses.json");
    let overlays = dir.path().join("axes");

    camcal()
        .arg("pose")
        .arg("--calibration")
        .arg(&calib_path)
        .arg("--images")
        .arg(&images)
        .arg("--out")
        .arg(&out)
        .arg("--overlay-dir")
        .arg(&overlays)
        .assert()
        .success()
        .stdout(predicate::str::contains("camera position"))
        .stdout(predicate::str::contains("rotation"));

    let poses: Vec<camcal::ImagePose> =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("read")).expect("parse");
    assert!(!poses.is_empty());
    let truth = common::poses();
    for pose in &poses {
        let idx: usize = pose.name["view_".len().."view_".len() + 2]
            .parse()
            .expect("view index");
        let c = truth[idx].camera_position();
        for (a, b) in pose.camera_position.iter().zip(c.iter()) {
            assert!((a - b).abs() < 0.01, "{}: {:?} vs {c:?}", pose.name, pose.camera_position);
        }
        assert!(overlays.join(format!("pose_{}", pose.name)).is_file());
    }
}
