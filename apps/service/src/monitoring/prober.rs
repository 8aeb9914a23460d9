use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use super::types::{CheckMethod, ProbeOutcome};
use super::validation::validate_probe_address;

/// Probe failures that never produced a usable outcome
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Address failed safety validation; no process was spawned.
    #[error("address rejected by safety validation: {0:?}")]
    InvalidAddress(String),

    /// The external process exceeded its hard bound and was killed.
    #[error("probe timed out after {0} ms")]
    Timeout(u64),

    /// The system ping utility is absent or unusable.
    #[error("ping utility unavailable: {0}")]
    ToolMissing(String),

    /// The probe process could not be started.
    #[error("could not spawn probe process: {0}")]
    Spawn(String),
}

/// Echo-request budget per probe: manual checks send a burst, scheduled and
/// bulk checks send a single packet to keep latency down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketBudget {
    Manual,
    Scheduled,
}

impl PacketBudget {
    pub fn count(self) -> u32 {
        match self {
            PacketBudget::Manual => 4,
            PacketBudget::Scheduled => 1,
        }
    }
}

/// A single reachability check against one address.
///
/// Trait so the scheduler and engine can be exercised with scripted probers
/// in tests.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        address: &str,
        method: CheckMethod,
        budget: PacketBudget,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// Probes real hosts: TCP connect for port checks, the platform ping utility
/// for ICMP. Spawns exactly one external process per ICMP probe and enforces
/// the timeout by killing the child, not by checking afterwards.
pub struct SystemProber {
    probe_timeout: Duration,
    tcp_timeout: Duration,
}

impl SystemProber {
    pub fn new(probe_timeout: Duration, tcp_timeout: Duration) -> Self {
        Self { probe_timeout, tcp_timeout }
    }

    async fn probe_tcp(&self, address: &str, port: u16) -> ProbeOutcome {
        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect((address, port));

        match timeout(self.tcp_timeout, connect).await {
            Ok(Ok(_stream)) => ProbeOutcome {
                success: true,
                raw_output: format!("tcp connect to {address}:{port} succeeded"),
                elapsed_ms: start.elapsed().as_millis() as u64,
            },
            Ok(Err(error)) => ProbeOutcome {
                success: false,
                raw_output: error.to_string(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            },
            Err(_) => ProbeOutcome {
                success: false,
                raw_output: format!(
                    "tcp connect to {address}:{port} timed out after {} ms",
                    self.tcp_timeout.as_millis()
                ),
                elapsed_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    async fn probe_icmp(&self, address: &str, budget: PacketBudget) -> Result<ProbeOutcome, ProbeError> {
        let mut command = ping_command(address, budget.count(), self.probe_timeout);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        // If the timeout drops the future, the child is killed with it.
        command.kill_on_drop(true);

        let start = Instant::now();
        let output = match timeout(self.probe_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::ToolMissing("ping not found in PATH".to_string()));
            }
            Ok(Err(error)) => return Err(ProbeError::Spawn(error.to_string())),
            Err(_) => return Err(ProbeError::Timeout(self.probe_timeout.as_millis() as u64)),
        };

        let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        raw_output.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ProbeOutcome {
            success: output.status.success(),
            raw_output,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn probe(
        &self,
        address: &str,
        method: CheckMethod,
        budget: PacketBudget,
    ) -> Result<ProbeOutcome, ProbeError> {
        validate_probe_address(address)?;

        match method {
            CheckMethod::TcpPort(port) => Ok(self.probe_tcp(address, port).await),
            CheckMethod::Icmp => self.probe_icmp(address, budget).await,
        }
    }
}

#[cfg(windows)]
fn ping_command(address: &str, count: u32, probe_timeout: Duration) -> Command {
    let mut command = Command::new("ping");
    command
        .arg("-n")
        .arg(count.to_string())
        .arg("-w")
        .arg(probe_timeout.as_millis().to_string())
        .arg(address);
    command
}

#[cfg(not(windows))]
fn ping_command(address: &str, count: u32, probe_timeout: Duration) -> Command {
    let mut command = Command::new("ping");
    command
        .arg("-c")
        .arg(count.to_string())
        .arg("-W")
        .arg(probe_timeout.as_secs().max(1).to_string())
        .arg(address);
    command
}
