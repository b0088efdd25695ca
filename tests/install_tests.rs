// End-to-end install runs against an isolated prefix.
//
// Archives are served from file:// URLs and built with real install steps
// (/bin/cp, /bin/sh), so these exercise fetch, verify, unpack, build, link
// and receipt commits together.


use kegforge::ErrorKind;
use kegforge::bottle::Selection;
use kegforge::receipt::Method;
use serde_json::json;
use std::sync::atomic::Ordering;
use test_helpers::{TAG, TestEnvironment, depends};

fn names(list: &[String]) -> Vec<&str> {
    list.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn test_installs_dependency_before_dependent() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));
    env.write_formula(depends(env.buildable("app", "2.0"), json!({"name": "libx"})));

    let installer = env.installer();
    let plan = installer.plan(&["app".to_string()]).unwrap();
    assert_eq!(plan.names(), vec!["libx", "app"]);

    let summary = installer.orchestrator().execute(plan).await;
    assert!(summary.is_success(), "failed: {:?}", summary.failed);
    assert!(summary.is_installed("libx") && summary.is_installed("app"));

    let state = installer.state();
    let app = state.query("app").unwrap().unwrap();
    assert!(app.installed_on_request);
    assert_eq!(app.method, Method::Source);
    assert_eq!(app.runtime_dependencies.len(), 1);
    assert_eq!(app.runtime_dependencies[0].name, "libx");
    assert_eq!(app.runtime_dependencies[0].version, "1.0");
    assert!(app.manifest.contains(&"bin/app".to_string()));

    let libx = state.query("libx").unwrap().unwrap();
    assert!(!libx.installed_on_request);

    assert!(env.keg("app", "2.0").join("bin/app").is_file());
    assert!(env.linked("bin/app"));
    assert!(env.linked("bin/libx"));
    assert!(env.linked("opt/app"));
}

#[tokio::test]
async fn test_checksum_mismatch_fails_only_that_formula() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));

    let mut bad = depends(env.buildable("app", "1.0"), json!({"name": "libx"}));
    bad["sha256"] = json!("0".repeat(64));
    env.write_formula(bad);

    let summary = env.installer().install(&["app".to_string()]).await.unwrap();

    assert!(summary.is_installed("libx"));
    assert_eq!(summary.error_kind("app"), Some(ErrorKind::ChecksumMismatch));
    assert!(!summary.is_success());

    let installer = env.installer();
    assert!(installer.state().query("libx").unwrap().is_some());
    assert!(installer.state().query("app").unwrap().is_none());
    assert!(!env.keg("app", "1.0").exists());
}

#[tokio::test]
async fn test_failure_skips_dependents_but_not_siblings() {
    let env = TestEnvironment::new();

    let mut broken = env.buildable("broken", "1.0");
    broken["install"] = json!([{"run": {"args": ["/bin/sh", "-c", "echo boom >&2; exit 1"]}}]);
    env.write_formula(broken);
    env.write_formula(depends(env.buildable("needs-broken", "1.0"), json!({"name": "broken"})));
    env.write_formula(env.buildable("unrelated", "1.0"));

    let requests = vec!["needs-broken".to_string(), "unrelated".to_string()];
    let summary = env.installer().install(&requests).await.unwrap();

    assert_eq!(summary.error_kind("broken"), Some(ErrorKind::BuildStepFailed));
    assert_eq!(summary.error_kind("needs-broken"), Some(ErrorKind::DependencyFailed));
    assert!(summary.is_installed("unrelated"));
    assert!(!env.keg("broken", "1.0").exists());

    let (_, error) = summary.failed.iter().find(|(n, _)| n == "broken").unwrap();
    let message = error.to_string();
    assert!(message.contains("Build step 1"), "{message}");
    assert!(message.contains("boom"), "{message}");
}

#[tokio::test]
async fn test_pours_bottle_for_matching_tag() {
    let env = TestEnvironment::new();
    let (bottle_url, bottle_sha) = env.bottle("zstd", "1.5.0", &[("bin/zstd", "#!/bin/sh\n")]);
    let mut formula = env.buildable("zstd", "1.5.0");
    formula["bottle"] = json!({
        "files": {TAG: {"sha256": bottle_sha, "url": bottle_url}}
    });
    env.write_formula(formula);

    let installer = env.installer();
    let plan = installer.plan(&["zstd".to_string()]).unwrap();
    assert!(plan.entries[0].selection.is_bottle());

    let summary = installer.orchestrator().execute(plan).await;
    assert!(summary.is_success(), "failed: {:?}", summary.failed);
    assert_eq!(summary.installed[0].method, Method::Bottle);

    let receipt = installer.state().query("zstd").unwrap().unwrap();
    assert_eq!(receipt.bottle_tag.as_deref(), Some(TAG));
    assert!(env.linked("bin/zstd"));
}

#[tokio::test]
async fn test_corrupt_bottle_falls_back_to_source() {
    let env = TestEnvironment::new();
    let (bottle_url, _) = env.bottle("zstd", "1.5.0", &[("bin/zstd", "#!/bin/sh\n")]);
    let mut formula = env.buildable("zstd", "1.5.0");
    formula["bottle"] = json!({
        "files": {TAG: {"sha256": "f".repeat(64), "url": bottle_url}}
    });
    env.write_formula(formula);

    let summary = env.installer().install(&["zstd".to_string()]).await.unwrap();
    assert!(summary.is_success(), "failed: {:?}", summary.failed);
    assert_eq!(summary.installed[0].method, Method::Source);

    let mut config = env.config();
    config.force_reinstall = true;
    config.force_bottle = true;
    let summary = env
        .installer_with(config)
        .install(&["zstd".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.error_kind("zstd"), Some(ErrorKind::ChecksumMismatch));

    // The failed reinstall leaves the previous keg in place
    assert!(env.keg("zstd", "1.5.0").join("bin/zstd").is_file());
    assert!(env.linked("bin/zstd"));
    assert!(env.installer().state().query("zstd").unwrap().is_some());
}

#[tokio::test]
async fn test_force_bottle_without_bottle() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("hello", "1.0"));

    let mut config = env.config();
    config.force_bottle = true;
    let installer = env.installer_with(config);
    let plan = installer.plan(&["hello".to_string()]).unwrap();
    assert_eq!(plan.entries[0].selection, Selection::Source);

    let summary = installer.orchestrator().execute(plan).await;
    assert_eq!(summary.error_kind("hello"), Some(ErrorKind::BottleUnavailable));
    assert!(!env.keg("hello", "1.0").exists());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));
    env.write_formula(depends(env.buildable("app", "1.0"), json!({"name": "libx"})));

    let requests = vec!["app".to_string()];
    let summary = env.installer().install(&requests).await.unwrap();
    assert_eq!(summary.installed.len(), 2);

    let installer = env.installer();
    let plan = installer.plan(&requests).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.satisfied.len(), 2);

    let summary = installer.orchestrator().execute(plan).await;
    assert!(summary.installed.is_empty());
    assert_eq!(names(&summary.satisfied), vec!["libx", "app"]);
}

#[tokio::test]
async fn test_force_reinstalls_only_requested() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));
    env.write_formula(depends(env.buildable("app", "1.0"), json!({"name": "libx"})));
    env.installer().install(&["app".to_string()]).await.unwrap();

    let mut config = env.config();
    config.force_reinstall = true;
    let plan = env.installer_with(config).plan(&["app".to_string()]).unwrap();
    assert_eq!(plan.names(), vec!["app"]);
}

#[tokio::test]
async fn test_upgrade_replaces_old_keg() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("hello", "1.0"));
    env.installer().install(&["hello".to_string()]).await.unwrap();
    assert!(env.keg("hello", "1.0").exists());

    env.write_formula(env.buildable("hello", "1.1"));
    let summary = env.installer().install(&["hello".to_string()]).await.unwrap();
    assert!(summary.is_installed("hello"));

    let receipt = env.installer().state().query("hello").unwrap().unwrap();
    assert_eq!(receipt.version, "1.1");
    assert!(env.keg("hello", "1.1").exists());
    assert!(!env.keg("hello", "1.0").exists());
    assert!(env.linked("bin/hello"));
}

#[tokio::test]
async fn test_post_install_failure_is_a_warning() {
    let env = TestEnvironment::new();
    let mut formula = env.buildable("hello", "1.0");
    formula["post_install"] = json!([{"run": {"args": ["/bin/sh", "-c", "exit 3"]}}]);
    env.write_formula(formula);

    let summary = env.installer().install(&["hello".to_string()]).await.unwrap();
    assert!(summary.is_success());
    assert!(summary.is_installed("hello"));
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(summary.warnings[0].kind(), ErrorKind::PostInstallFailed);
    assert!(env.installer().state().query("hello").unwrap().is_some());
}

#[tokio::test]
async fn test_post_install_runs_against_keg() {
    let env = TestEnvironment::new();
    let mut formula = env.buildable("hello", "1.0");
    formula["post_install"] = json!([
        {"run": {"args": ["/bin/sh", "-c", "hello > {prefix}/greeting"]}}
    ]);
    env.write_formula(formula);

    let summary = env.installer().install(&["hello".to_string()]).await.unwrap();
    assert!(summary.warnings.is_empty(), "{:?}", summary.warnings);
    let greeting = std::fs::read_to_string(env.keg("hello", "1.0").join("greeting")).unwrap();
    assert_eq!(greeting.trim(), "ok");
}

#[tokio::test]
async fn test_keg_only_is_not_linked() {
    let env = TestEnvironment::new();
    let mut formula = env.buildable("openssl", "3.0");
    formula["keg_only"] = json!(true);
    env.write_formula(formula);

    let summary = env.installer().install(&["openssl".to_string()]).await.unwrap();
    assert!(summary.is_installed("openssl"));
    assert!(!env.linked("bin/openssl"));
    assert!(env.linked("opt/openssl"));
    assert!(env.installer().state().query("openssl").unwrap().unwrap().keg_only);
}

#[tokio::test]
async fn test_resources_are_unpacked_for_the_build() {
    let env = TestEnvironment::new();
    let (res_url, res_sha) = env.source("extra", "0.1", &[("data.txt", "payload\n")]);
    let mut formula = env.buildable("hello", "1.0");
    formula["resources"] = json!([{"name": "extra", "url": res_url, "sha256": res_sha}]);
    formula["install"]
        .as_array_mut()
        .unwrap()
        .push(json!({"run": {"args": ["/bin/cp", "{resource:extra}/data.txt", "{prefix}/data.txt"]}}));
    env.write_formula(formula);

    let summary = env.installer().install(&["hello".to_string()]).await.unwrap();
    assert!(summary.is_success(), "failed: {:?}", summary.failed);
    let data = std::fs::read_to_string(env.keg("hello", "1.0").join("data.txt")).unwrap();
    assert_eq!(data, "payload\n");
}

#[tokio::test]
async fn test_cancelled_run_installs_nothing() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));
    env.write_formula(depends(env.buildable("app", "1.0"), json!({"name": "libx"})));

    let installer = env.installer();
    installer.cancel_flag().store(true, Ordering::SeqCst);
    let summary = installer.install(&["app".to_string()]).await.unwrap();

    assert!(summary.installed.is_empty());
    assert_eq!(summary.skipped.len(), 2);
    assert!(summary.skipped.iter().all(|(_, e)| e.kind() == ErrorKind::Cancelled));
    assert!(installer.state().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_parallel_independent_formulae() {
    let env = TestEnvironment::new();
    let mut requests = Vec::new();
    for i in 0..8 {
        let name = format!("pkg{i}");
        env.write_formula(env.buildable(&name, "1.0"));
        requests.push(name);
    }

    let summary = env.installer().install(&requests).await.unwrap();
    assert!(summary.is_success(), "failed: {:?}", summary.failed);
    assert_eq!(summary.installed.len(), 8);
    assert_eq!(env.installer().state().list().unwrap().len(), 8);
}

#[tokio::test]
async fn test_resolution_error_before_any_work() {
    let env = TestEnvironment::new();
    env.write_formula(depends(env.buildable("app", "1.0"), json!({"name": "libmissing"})));

    let err = env.installer().install(&["app".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("required by app"));
    assert!(!env.prefix.join("Cellar").exists());
}

#[tokio::test]
async fn test_uninstall_respects_dependents() {
    let env = TestEnvironment::new();
    env.write_formula(env.buildable("libx", "1.0"));
    env.write_formula(depends(env.buildable("app", "1.0"), json!({"name": "libx"})));
    env.installer().install(&["app".to_string()]).await.unwrap();

    let installer = env.installer();
    let layout = &installer.config().layout;
    let err = kegforge::uninstall::uninstall(layout, installer.state(), "libx", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasDependents);

    kegforge::uninstall::uninstall(layout, installer.state(), "app", false).unwrap();
    kegforge::uninstall::uninstall(layout, installer.state(), "libx", false).unwrap();
    assert!(installer.state().list().unwrap().is_empty());
    assert!(!env.linked("bin/app"));
    assert!(!env.keg("libx", "1.0").exists());
}
