use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use imcatalog::utils::content_id;
use predicates::prelude::*;
use rstest::*;
use serde_json::json;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn face(size: u32, label: &str, posted_at: &str) -> String {
    json!({
        "angle": 0.5,
        "size": size,
        "parts": vec![[100, 200]; 68],
        "meta": {
            "face_id": "1",
            "photo_id": "2",
            "source_url": "https://example.com/status/1",
            "photo_url": "https://example.com/media/1.jpg",
            "posted_at": posted_at,
            "label_id": "3",
            "label_name": label
        }
    })
    .to_string()
}

#[fixture]
fn dataset() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("a/face_small.json").write_str(&face(300, "alice", "2020-01-01 00:00:00")).unwrap();
    dir.child("a/face_mid.json").write_str(&face(600, "alice", "2020-01-02 00:00:00")).unwrap();
    dir.child("b/face_big.json").write_str(&face(1200, "bob", "2020-01-03 00:00:00")).unwrap();
    // 非 json 文件被忽略
    dir.child("b/face_big.png").write_binary(b"\x89PNG").unwrap();
    dir
}

fn ingest(conf_dir: &Path, data: &Path) -> Result<()> {
    cargo_run!("imcatalog", "-c", conf_dir, "ingest", data, "-w", "2")
        .success()
        .stdout(predicate::str::contains("imported 3, skipped 0, failed 0"));
    Ok(())
}

#[rstest]
fn ingest_and_list(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    ingest(conf_dir.path(), dataset.path())?;

    // 重复导入全部跳过
    cargo_run!("imcatalog", "-c", conf_dir.path(), "ingest", dataset.path())
        .success()
        .stdout(predicate::str::contains("imported 0, skipped 3"));

    let big = content_id("face_big");
    cargo_run!("imcatalog", "-c", conf_dir.path(), "images", "--sort", "published_at", "--desc", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains(format!("\"id\": \"{big}\"")))
        .stdout(predicate::str::contains(format!("\"image_url\": \"/images/{big}\"")));

    cargo_run!("imcatalog", "-c", conf_dir.path(), "images", "--name", "bob")
        .success()
        .stdout(predicate::str::contains(&big))
        .stdout(predicate::str::contains(content_id("face_small")).not());

    Ok(())
}

#[rstest]
fn status_stats_and_audit(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    ingest(conf_dir.path(), dataset.path())?;

    let mid = content_id("face_mid");
    cargo_run!("imcatalog", "-c", conf_dir.path(), "status", &mid, "ok")
        .success()
        .stdout(predicate::str::contains("Ready -> OK"));

    cargo_run!("imcatalog", "-c", conf_dir.path(), "stats", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"0512\""))
        .stdout(predicate::str::contains("\"OK\": 1"));

    cargo_run!("imcatalog", "-c", conf_dir.path(), "stats", "--bucket", "1024")
        .success()
        .stdout(predicate::str::is_match(r"1024\t1\t0\t0\t0\t0\t1")?);

    cargo_run!("imcatalog", "-c", conf_dir.path(), "audit")
        .success()
        .stdout(predicate::str::contains("scanned 3"));

    cargo_run!("imcatalog", "-c", conf_dir.path(), "status", "missing", "ok").failure();
    cargo_run!("imcatalog", "-c", conf_dir.path(), "status", &mid, "Done").failure();

    Ok(())
}

#[rstest]
fn clean_and_remove(dataset: assert_fs::TempDir) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    ingest(conf_dir.path(), dataset.path())?;

    let small = content_id("face_small");
    cargo_run!("imcatalog", "-c", conf_dir.path(), "clean", "--below", "512", "--dry-run")
        .success()
        .stdout(predicate::str::contains(&small));
    cargo_run!("imcatalog", "-c", conf_dir.path(), "clean", "--below", "512")
        .success()
        .stdout(predicate::str::contains("deleted 1"));
    cargo_run!("imcatalog", "-c", conf_dir.path(), "clean").failure();

    let big = content_id("face_big");
    cargo_run!("imcatalog", "-c", conf_dir.path(), "remove", &big).success();
    cargo_run!("imcatalog", "-c", conf_dir.path(), "remove", &big).failure();

    cargo_run!("imcatalog", "-c", conf_dir.path(), "stats", "--bucket", "256")
        .success()
        .stdout(predicate::str::is_match(r"0256\t1\t0\t0\t0\t0\t1")?);
    cargo_run!("imcatalog", "-c", conf_dir.path(), "audit").success();

    Ok(())
}

#[rstest]
#[case::zero_page("--page-size=0")]
#[case::huge_page("--page-size=501")]
#[case::bad_sort("--sort=size")]
#[case::bad_bucket("--size=300")]
fn invalid_page_requests(#[case] arg: &str) -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    cargo_run!("imcatalog", "-c", conf_dir.path(), "images", arg).failure();
    Ok(())
}

#[test]
fn metrics_file_is_written() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let metrics = conf_dir.child("metrics.txt");
    let data = assert_fs::TempDir::new()?;
    data.child("one.json").write_str(&face(700, "carol", "2021-05-05 12:00:00"))?;

    cargo_run!("imcatalog", "-c", conf_dir.path(), "--metrics-file", metrics.path(), "ingest", data.path())
        .success();
    metrics.assert(predicate::str::contains("imcatalog_tx_commit"));
    Ok(())
}
