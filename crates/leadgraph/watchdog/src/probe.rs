//! GPU memory probes.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::types::ResourceSample;

/// Source of resource samples.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> WatchdogResult<ResourceSample>;

    fn name(&self) -> &'static str;
}

/// Build the probe named by configuration.
pub fn probe_from_config(config: &ProbeConfig) -> Arc<dyn ResourceProbe> {
    match config {
        ProbeConfig::NvidiaSmi {
            command,
            timeout_secs,
        } => Arc::new(NvidiaSmiProbe::new(
            command.clone(),
            Duration::from_secs(*timeout_secs),
        )),
        ProbeConfig::Static { used_mb, total_mb } => {
            Arc::new(StaticProbe::new(*used_mb, *total_mb))
        }
    }
}

/// Reads used/total memory from `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    command: String,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new("nvidia-smi", Duration::from_secs(5))
    }
}

#[async_trait]
impl ResourceProbe for NvidiaSmiProbe {
    async fn sample(&self) -> WatchdogResult<ResourceSample> {
        let output = Command::new(&self.command)
            .arg("--query-gpu=memory.used,memory.total")
            .arg("--format=csv,noheader,nounits")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| WatchdogError::ProbeTimeout(self.timeout.as_secs()))?
            .map_err(|e| WatchdogError::ProbeUnavailable(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WatchdogError::ProbeUnavailable(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let (used_mb, total_mb) = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))?;
        debug!(used_mb, total_mb, "GPU memory sampled");
        Ok(ResourceSample::new(used_mb, total_mb))
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}

/// Parse `used, total` lines (one per GPU) and sum them.
pub fn parse_nvidia_smi(output: &str) -> WatchdogResult<(u64, u64)> {
    let mut used = 0u64;
    let mut total = 0u64;
    let mut gpus = 0;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split(',').map(str::trim);
        let (Some(u), Some(t), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(WatchdogError::ProbeOutput(line.to_string()));
        };
        let parse = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| WatchdogError::ProbeOutput(line.to_string()))
        };
        used += parse(u)?;
        total += parse(t)?;
        gpus += 1;
    }

    if gpus == 0 {
        return Err(WatchdogError::ProbeOutput("no GPUs reported".to_string()));
    }
    Ok((used, total))
}

/// Reports a fixed usage that can be changed at runtime.
#[derive(Debug, Default)]
pub struct StaticProbe {
    used_mb: AtomicU64,
    total_mb: u64,
}

impl StaticProbe {
    pub fn new(used_mb: u64, total_mb: u64) -> Self {
        Self {
            used_mb: AtomicU64::new(used_mb),
            total_mb,
        }
    }

    pub fn set_used(&self, used_mb: u64) {
        self.used_mb.store(used_mb, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn sample(&self) -> WatchdogResult<ResourceSample> {
        Ok(ResourceSample::new(
            self.used_mb.load(Ordering::SeqCst),
            self.total_mb,
        ))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Replays a fixed sequence of readings; `None` entries fail. The last entry
/// repeats once the script runs out.
#[derive(Debug)]
pub struct ScriptedProbe {
    total_mb: u64,
    script: Mutex<VecDeque<Option<u64>>>,
}

impl ScriptedProbe {
    pub fn new(total_mb: u64, script: impl IntoIterator<Item = Option<u64>>) -> Self {
        Self {
            total_mb,
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ResourceProbe for ScriptedProbe {
    async fn sample(&self) -> WatchdogResult<ResourceSample> {
        let mut script = self.script.lock().await;
        let step = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().copied().flatten()
        };
        match step {
            Some(used_mb) => Ok(ResourceSample::new(used_mb, self.total_mb)),
            None => Err(WatchdogError::ProbeUnavailable("scripted failure".into())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_gpu() {
        assert_eq!(parse_nvidia_smi("5123, 8192\n").unwrap(), (5123, 8192));
    }

    #[test]
    fn sums_multiple_gpus() {
        let out = "1000, 8192\n 2000 , 8192 \n\n";
        assert_eq!(parse_nvidia_smi(out).unwrap(), (3000, 16384));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_nvidia_smi("").is_err());
        assert!(parse_nvidia_smi("[N/A], 8192").is_err());
        assert!(parse_nvidia_smi("1, 2, 3").is_err());
        assert!(parse_nvidia_smi("NVIDIA-SMI has failed").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let probe = NvidiaSmiProbe::new("/nonexistent/nvidia-smi", Duration::from_secs(1));
        assert!(matches!(
            probe.sample().await,
            Err(WatchdogError::ProbeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn static_probe_can_be_moved() {
        let probe = StaticProbe::new(100, 8192);
        assert_eq!(probe.sample().await.unwrap().used_mb, 100);
        probe.set_used(7000);
        assert_eq!(probe.sample().await.unwrap().used_mb, 7000);
    }

    #[tokio::test]
    async fn scripted_probe_replays_then_repeats() {
        let probe = ScriptedProbe::new(8192, [Some(1), None, Some(3)]);
        assert_eq!(probe.sample().await.unwrap().used_mb, 1);
        assert!(probe.sample().await.is_err());
        assert_eq!(probe.sample().await.unwrap().used_mb, 3);
        assert_eq!(probe.sample().await.unwrap().used_mb, 3);
    }
}
