//! Tests for the dns-sd backed discovery registrar
//!
//! A small shell script stands in for the real `dns-sd` binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::core::health::DiscoveryDescriptor;
use crate::error::LauncherError;
use crate::services::dns_sd::DnsSdRegistrar;
use crate::traits::DiscoveryRegistrar;

fn descriptor(healthy: bool) -> DiscoveryDescriptor {
    let mut txt = vec![
        "desc=CL Server".to_string(),
        "auth_url=http://localhost:8010".to_string(),
    ];
    let failing = if healthy {
        Vec::new()
    } else {
        txt.push("status=unhealthy".to_string());
        txt.push("error=compute".to_string());
        vec!["compute".to_string()]
    };
    DiscoveryDescriptor {
        service_name: "CL Server".to_string(),
        service_type: "_http._tcp".to_string(),
        domain: "local".to_string(),
        port: 8011,
        healthy,
        failing,
        txt,
    }
}

fn fake_registrar(dir: &Path) -> PathBuf {
    let script = dir.join("fake-dns-sd");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn pid_exists(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
fn test_registration_args() {
    let args = DnsSdRegistrar::registration_args(&descriptor(false));
    assert_eq!(
        args,
        vec![
            "-R",
            "CL Server",
            "_http._tcp",
            "local",
            "8011",
            "desc=CL Server",
            "auth_url=http://localhost:8010",
            "status=unhealthy",
            "error=compute",
        ]
    );
}

/// Each registration replaces the previous registrar process
#[tokio::test]
async fn test_register_replaces_previous_registration() {
    let dir = tempfile::tempdir().unwrap();
    let registrar = DnsSdRegistrar::with_program(fake_registrar(dir.path()).display().to_string());

    registrar.register(&descriptor(true)).await.unwrap();
    let first = registrar.active_pid().await.expect("registrar running");

    registrar.register(&descriptor(false)).await.unwrap();
    let second = registrar.active_pid().await.expect("registrar running");

    assert_ne!(first, second);
    assert!(!pid_exists(first), "previous registration should be withdrawn");
    assert!(pid_exists(second));

    registrar.unregister().await.unwrap();
    assert_eq!(registrar.active_pid().await, None);
    assert!(!pid_exists(second));
}

#[tokio::test]
async fn test_unregister_without_registration_is_noop() {
    let registrar = DnsSdRegistrar::with_program("unused");
    registrar.unregister().await.unwrap();
}

#[tokio::test]
async fn test_missing_registrar_program_is_error() {
    let registrar = DnsSdRegistrar::with_program("definitely-not-dns-sd-4711");
    let result = registrar.register(&descriptor(true)).await;
    assert!(matches!(result, Err(LauncherError::BroadcastRegistrar { .. })));
    assert_eq!(registrar.active_pid().await, None);
}
