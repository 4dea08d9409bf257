//! Exercises `Loader` against the real `ember-std` cdylib built as part
//! of this workspace's own dev-dependency graph, plus a scratch directory
//! standing in for "a directory of packages" per the registry-totality
//! property.

use ember_kernel::Runtime;
use ember_loader::Loader;
use std::path::PathBuf;

fn ember_std_artifact_path() -> PathBuf {
    let mut dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.pop();
    dir.pop();
    dir.push("target");
    dir.push(if cfg!(debug_assertions) { "debug" } else { "release" });

    #[cfg(target_os = "windows")]
    dir.push("ember_std.dll");
    #[cfg(target_os = "macos")]
    dir.push("libember_std.dylib");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    dir.push("libember_std.so");

    dir
}

#[test]
fn load_package_registers_every_published_definition() {
    let artifact = ember_std_artifact_path();
    let mut loader = Loader::new();
    let mut runtime = Runtime::new();

    loader
        .load_package(&mut runtime, &artifact)
        .expect("ember-std should load and handshake cleanly");

    assert!(runtime.registry().find("std", "String").is_some());
    assert!(runtime.registry().find("std", "List").is_some());
    assert!(runtime.registry().find("std", "Any").is_some());
    assert!(runtime.registry().find("std", "NoSuchType").is_none());
}

#[test]
fn load_from_directory_ignores_non_library_files_and_loads_the_rest() {
    let artifact = ember_std_artifact_path();
    let dir = tempfile::tempdir().expect("tempdir");

    let dest = dir.path().join(artifact.file_name().unwrap());
    std::fs::copy(&artifact, &dest).expect("copy fixture into scratch directory");
    std::fs::write(dir.path().join("README.txt"), b"not a library").unwrap();
    std::fs::create_dir(dir.path().join("a_subdirectory")).unwrap();

    let mut loader = Loader::new();
    let mut runtime = Runtime::new();
    loader
        .load_from_directory(&mut runtime, dir.path())
        .expect("reading the directory itself must succeed");

    assert_eq!(runtime.registry().len(), 3);
}

#[test]
fn a_corrupt_library_is_skipped_without_aborting_the_scan() {
    let artifact = ember_std_artifact_path();
    let dir = tempfile::tempdir().expect("tempdir");

    let good = dir.path().join(artifact.file_name().unwrap());
    std::fs::copy(&artifact, &good).expect("copy fixture into scratch directory");

    let bad_name = format!("zzz_corrupt.{}", artifact.extension().unwrap().to_str().unwrap());
    std::fs::write(dir.path().join(bad_name), b"not actually a shared object").unwrap();

    let mut loader = Loader::new();
    let mut runtime = Runtime::new();
    loader
        .load_from_directory(&mut runtime, dir.path())
        .expect("a bad library is reported, not propagated as an error");

    assert_eq!(runtime.registry().len(), 3);
}
