//! Discovery registrar backed by the `dns-sd` command-line tool
//!
//! A registration lives as long as its `dns-sd -R` child process, so the
//! registrar owns at most one child and replaces it on every change.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use shared::{component_debug, component_info, ComponentId};

use crate::core::health::DiscoveryDescriptor;
use crate::error::{LauncherError, LauncherResult};
use crate::traits::DiscoveryRegistrar;

pub struct DnsSdRegistrar {
    program: String,
    child: Mutex<Option<Child>>,
}

impl DnsSdRegistrar {
    pub fn new() -> Self {
        Self::with_program("dns-sd")
    }

    /// Use a different registrar executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: Mutex::new(None),
        }
    }

    /// Arguments passed to the registrar for `descriptor`
    pub fn registration_args(descriptor: &DiscoveryDescriptor) -> Vec<String> {
        let mut args = vec![
            "-R".to_string(),
            descriptor.service_name.clone(),
            descriptor.service_type.clone(),
            descriptor.domain.clone(),
            descriptor.port.to_string(),
        ];
        args.extend(descriptor.txt.iter().cloned());
        args
    }

    /// PID of the active registrar process, if any
    pub async fn active_pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    async fn terminate(child: &mut Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

impl Default for DnsSdRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryRegistrar for DnsSdRegistrar {
    async fn register(&self, descriptor: &DiscoveryDescriptor) -> LauncherResult<()> {
        let mut active = self.child.lock().await;
        if let Some(mut previous) = active.take() {
            Self::terminate(&mut previous).await;
        }

        let args = Self::registration_args(descriptor);
        component_info!(
            ComponentId::Health,
            "📣 Broadcasting status change: {} {}",
            self.program,
            args.join(" ")
        );

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LauncherError::registrar(format!("failed to start {}: {e}", self.program)))?;

        *active = Some(child);
        Ok(())
    }

    async fn unregister(&self) -> LauncherResult<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            component_debug!(ComponentId::Health, "Withdrawing discovery registration");
            Self::terminate(&mut child).await;
        }
        Ok(())
    }
}
