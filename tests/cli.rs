use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn bin(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sealbox"));
    cmd.env("SEALBOX_HOME", home)
        .env("SEALBOX_ARGON_MEM", "256")
        .env_remove("SEALBOX_PASSWORD")
        .env_remove("SEALBOX_NEW_PASSWORD")
        .env_remove("SEALBOX_BUNDLE_PASSWORD")
        .env_remove("SEALBOX_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
}

#[test]
fn text_roundtrip() {
    let dir = tempdir().unwrap();

    let container = stdout_of(
        bin(dir.path())
            .env("SEALBOX_PASSWORD", "correct horse")
            .args(["encrypt-text", "hello world", "--tier", "low"]),
    );
    assert_ne!(container, "hello world");

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "correct horse")
        .args(["decrypt-text", &container])
        .assert()
        .success()
        .stdout(predicate::str::diff("hello world\n"));
}

#[test]
fn wrong_password_is_reported_as_authentication_failure() {
    let dir = tempdir().unwrap();

    let container = stdout_of(
        bin(dir.path())
            .env("SEALBOX_PASSWORD", "pw")
            .args(["encrypt-text", "secret", "--tier", "low"]),
    );

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "not pw")
        .args(["decrypt-text", &container])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"));
}

#[test]
fn garbage_text_is_unrecognized() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .args(["decrypt-text", "bm90IGEgY29udGFpbmVy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized format"));
}

#[test]
fn file_roundtrip_with_small_chunks() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.bin");
    let sealed = dir.path().join("plain.bin.sealed");
    let restored = dir.path().join("restored.bin");
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&plain, &data).unwrap();

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .args(["--algorithm", "chacha20-poly1305", "--tier", "low"])
        .args(["--salt", "short", "--chunk-size", "1024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("into 10 frames"));

    bin(dir.path())
        .arg("inspect")
        .arg(&sealed)
        .assert()
        .success()
        .stdout(predicate::str::contains("chacha20-poly1305"))
        .stdout(predicate::str::contains("low"))
        .stdout(predicate::str::contains("12 bytes"));

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("decrypt-file")
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .success();

    assert_eq!(std::fs::read(&restored).unwrap(), data);
}

#[test]
fn failed_decrypt_removes_partial_output() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("plain.sealed");
    let restored = dir.path().join("restored.txt");
    std::fs::write(&plain, b"some file content").unwrap();

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .args(["--tier", "low"])
        .assert()
        .success();

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "wrong")
        .arg("decrypt-file")
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"));

    assert!(!restored.exists());
}

#[test]
fn encrypt_file_does_not_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("existing");
    std::fs::write(&plain, b"data").unwrap();
    std::fs::write(&sealed, b"keep me").unwrap();

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .failure();
    assert_eq!(std::fs::read(&sealed).unwrap(), b"keep me");

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .args(["--tier", "low", "--force"])
        .assert()
        .success();
    assert_ne!(std::fs::read(&sealed).unwrap(), b"keep me");
}

#[test]
fn inspect_rejects_plain_file() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    std::fs::write(&plain, b"just text").unwrap();

    bin(dir.path())
        .arg("inspect")
        .arg(&plain)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized format"));
}

#[test]
fn config_slots_without_master_password() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .args(["config", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no master password"));

    bin(dir.path())
        .args(["config", "set", "3", "api-token"])
        .assert()
        .success();
    bin(dir.path())
        .args(["config", "rename", "3", "github"])
        .assert()
        .success();

    bin(dir.path())
        .args(["config", "get", "3"])
        .assert()
        .success()
        .stdout(predicate::str::diff("api-token\n"));

    bin(dir.path())
        .args(["config", "slots"])
        .assert()
        .success()
        .stdout(predicate::str::contains("github"))
        .stdout(predicate::str::contains("api-token").not());

    bin(dir.path())
        .args(["config", "get", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("slot 42"));
}

#[test]
fn master_password_locks_the_store() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .args(["config", "set", "0", "kept"])
        .assert()
        .success();

    bin(dir.path())
        .env("SEALBOX_NEW_PASSWORD", "master")
        .args(["config", "set-password", "--tier", "low"])
        .assert()
        .success()
        .stdout(predicate::str::contains("master password set"));

    bin(dir.path())
        .args(["config", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("locked"));

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "wrong")
        .args(["config", "get", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"));

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "master")
        .args(["config", "get", "0"])
        .assert()
        .success()
        .stdout(predicate::str::diff("kept\n"));

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "master")
        .args(["config", "remove-password"])
        .assert()
        .success();

    bin(dir.path())
        .args(["config", "get", "0"])
        .assert()
        .success()
        .stdout(predicate::str::diff("kept\n"));
}

#[test]
fn protected_export_moves_settings_between_homes() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let bundle = src.path().join("bundle.json");

    bin(src.path())
        .args(["config", "set", "1", "portable"])
        .assert()
        .success();

    bin(src.path())
        .env("SEALBOX_BUNDLE_PASSWORD", "transfer")
        .arg("config")
        .arg("export")
        .arg(&bundle)
        .arg("--protect")
        .assert()
        .success();

    bin(dst.path())
        .env("SEALBOX_BUNDLE_PASSWORD", "nope")
        .arg("config")
        .arg("import")
        .arg(&bundle)
        .assert()
        .failure();

    bin(dst.path())
        .env("SEALBOX_BUNDLE_PASSWORD", "transfer")
        .arg("config")
        .arg("import")
        .arg(&bundle)
        .assert()
        .success();

    bin(dst.path())
        .args(["config", "get", "1"])
        .assert()
        .success()
        .stdout(predicate::str::diff("portable\n"));
}

#[test]
fn unprotected_export_only_restores_on_same_device() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let bundle = src.path().join("bundle.json");

    bin(src.path())
        .arg("config")
        .arg("export")
        .arg(&bundle)
        .assert()
        .success();

    bin(src.path())
        .arg("config")
        .arg("import")
        .arg(&bundle)
        .assert()
        .success();

    bin(dst.path())
        .arg("config")
        .arg("import")
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("another device"));
}

#[test]
fn saved_options_apply_to_new_encryptions() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.txt");
    let sealed = dir.path().join("plain.sealed");
    std::fs::write(&plain, b"data").unwrap();

    bin(dir.path())
        .args(["config", "options", "--algorithm", "chacha20-poly1305"])
        .args(["--tier", "low"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chacha20-poly1305"));

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .arg("encrypt-file")
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    bin(dir.path())
        .arg("inspect")
        .arg(&sealed)
        .assert()
        .success()
        .stdout(predicate::str::contains("chacha20-poly1305"));
}

#[test]
fn unreadable_settings_fall_back_to_default_options() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .args(["config", "options", "--tier", "low"])
        .assert()
        .success();
    std::fs::remove_file(dir.path().join("device-keys.json")).unwrap();

    let container = stdout_of(
        bin(dir.path())
            .env("SEALBOX_PASSWORD", "pw")
            .args(["encrypt-text", "still works", "--tier", "low"]),
    );

    bin(dir.path())
        .env("SEALBOX_PASSWORD", "pw")
        .args(["decrypt-text", &container])
        .assert()
        .success()
        .stdout(predicate::str::diff("still works\n"));
}

#[test]
fn options_reject_zero_chunk_size() {
    let dir = tempdir().unwrap();

    bin(dir.path())
        .args(["config", "options", "--chunk-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunk size"));

    bin(dir.path())
        .args(["config", "options"])
        .assert()
        .success()
        .stdout(predicate::str::contains("524288 bytes"));
}
