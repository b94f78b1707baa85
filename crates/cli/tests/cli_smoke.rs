use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;

fn seed(root: &Path) {
    fs::create_dir_all(root.join("src/assets")).unwrap();
    fs::create_dir_all(root.join("public")).unwrap();
    fs::write(root.join("src/assets/logo.png"), b"logo").unwrap();
    fs::write(root.join("src/assets/logo-old.png"), b"logo").unwrap();
    fs::write(root.join("public/hero.jpg"), b"hero").unwrap();
    fs::write(
        root.join("src/App.tsx"),
        "import logo from './assets/logo.png'\n",
    )
    .unwrap();
}

fn json_output(root: &Path, args: &[&str]) -> Value {
    let output = Command::cargo_bin("asset-index")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn scan_json_lists_annotated_assets() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    let assets = json_output(tmp.path(), &["scan", "--json"]);
    let assets = assets.as_array().unwrap();
    assert_eq!(assets.len(), 3);

    let logo = assets
        .iter()
        .find(|a| a["path"] == "src/assets/logo.png")
        .unwrap();
    assert_eq!(logo["type"], "image");
    assert_eq!(logo["importersCount"], 1);
    assert_eq!(logo["duplicatesCount"], 1);
    assert_eq!(logo["contentHash"].as_str().unwrap().len(), 64);
}

#[test]
fn importers_and_duplicates_commands() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    let importers = json_output(tmp.path(), &["importers", "src/assets/logo.png"]);
    assert_eq!(importers[0]["filePath"], "src/App.tsx");
    assert_eq!(importers[0]["importType"], "es-import");
    assert_eq!(importers[0]["line"], 1);

    let duplicates = json_output(tmp.path(), &["duplicates"]);
    assert_eq!(duplicates["stats"]["duplicateGroups"], 1);
    assert_eq!(duplicates["stats"]["duplicateFiles"], 2);
    assert_eq!(
        duplicates["groups"][0]["paths"],
        serde_json::json!(["src/assets/logo-old.png", "src/assets/logo.png"])
    );

    let found = json_output(tmp.path(), &["search", "HERO"]);
    assert_eq!(found.as_array().unwrap().len(), 1);
}

#[test]
fn scan_summary_and_missing_root() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    let output = Command::cargo_bin("asset-index")
        .unwrap()
        .arg("--root")
        .arg(tmp.path())
        .arg("scan")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Assets: 3"));
    assert!(stdout.contains("Duplicates: 1 groups, 2 files"));

    Command::cargo_bin("asset-index")
        .unwrap()
        .arg("--root")
        .arg(tmp.path().join("missing"))
        .arg("scan")
        .assert()
        .failure();
}
