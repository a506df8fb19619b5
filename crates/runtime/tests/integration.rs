//! Integration tests for the in-memory runtime

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sandcheck_errors::AssessmentError;
use sandcheck_runtime::*;

fn spec(name: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.into(),
        image: "node:20".into(),
        working_dir: PathBuf::from("/workspace"),
        env: BTreeMap::new(),
        labels: BTreeMap::new(),
        command: vec!["sleep".into(), "infinity".into()],
        host: HostConstraints {
            memory_bytes: 1 << 29,
            cpu_quota: 50_000,
            cpu_period: 100_000,
            disk_bytes: 1 << 31,
            pids_limit: 128,
            network_mode: NetworkMode::None,
            cap_drop: vec!["ALL".into()],
            cap_add: vec![],
            privileged: false,
            security_opts: vec!["no-new-privileges".into()],
            read_only_rootfs: true,
            tmpfs: vec![],
        },
    }
}

#[tokio::test]
async fn full_container_lifecycle() {
    let runtime = MemoryRuntime::new();
    let handle = runtime.create(&spec("a")).await.unwrap();
    runtime.start(&handle).await.unwrap();
    assert!(runtime.inspect(&handle).await.unwrap().running);

    runtime.stop(&handle, Duration::from_secs(1)).await.unwrap();
    runtime.remove(&handle, false).await.unwrap();
    assert_eq!(runtime.container_count(), 0);

    let err = runtime.inspect(&handle).await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn injected_faults_fire_in_order_then_clear() {
    let runtime = MemoryRuntime::new();
    runtime.fail_times(
        RuntimeOp::Create,
        2,
        &AssessmentError::container_creation("daemon busy"),
    );

    assert!(runtime.create(&spec("a")).await.is_err());
    assert!(runtime.create(&spec("a")).await.is_err());
    assert!(runtime.create(&spec("a")).await.is_ok());
    assert_eq!(runtime.call_count(RuntimeOp::Create), 3);
}

#[tokio::test]
async fn running_container_needs_force_to_remove() {
    let runtime = MemoryRuntime::new();
    let handle = runtime.create(&spec("a")).await.unwrap();
    runtime.start(&handle).await.unwrap();
    assert!(runtime.remove(&handle, false).await.is_err());
    runtime.remove(&handle, true).await.unwrap();
}

#[tokio::test]
async fn exec_uses_handler_and_requires_running_container() {
    let runtime = MemoryRuntime::new();
    let handle = runtime.create(&spec("a")).await.unwrap();
    let argv = vec!["npm".to_string(), "audit".to_string()];
    assert!(runtime.exec(&handle, &argv).await.is_err());

    runtime.start(&handle).await.unwrap();
    runtime.set_exec_handler(|_, argv| Ok(ExecOutput::ok(argv.join(" "))));
    let out = runtime.exec(&handle, &argv).await.unwrap();
    assert_eq!(out.stdout, "npm audit");
}

#[tokio::test]
async fn copy_in_records_pairs_and_rejects_missing_sources() {
    let runtime = MemoryRuntime::new();
    let handle = runtime.create(&spec("a")).await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    runtime
        .copy_in(&handle, dir.path(), Path::new("/workspace/src"))
        .await
        .unwrap();
    assert_eq!(runtime.copies_into(&handle).len(), 1);

    let missing = dir.path().join("nope");
    assert!(runtime
        .copy_in(&handle, &missing, Path::new("/workspace/src"))
        .await
        .is_err());
    assert_eq!(runtime.call_count(RuntimeOp::CopyIn), 2);
}

#[tokio::test]
async fn networks_are_tracked() {
    let runtime = MemoryRuntime::new();
    runtime.create_network("net-a", true).await.unwrap();
    assert_eq!(runtime.network_names(), vec!["net-a"]);
    runtime.remove_network("net-a").await.unwrap();
    assert!(is_not_found(
        &runtime.remove_network("net-a").await.unwrap_err()
    ));
}
