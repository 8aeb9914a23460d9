use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::database::models::Device;
use crate::monitoring::types::HealthState;

/// Alert delivery boundary. The engine only decides *that* a change is
/// notify-worthy; delivery (mail, webhook) lives behind this trait and is
/// fire-and-forget: failures are logged, never propagated back into the
/// scheduler.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        device: &Device,
        previous: HealthState,
        new: HealthState,
        detail: &str,
    ) -> Result<()>;
}

/// Writes alerts to the log. Stands in wherever no mail transport is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        device: &Device,
        previous: HealthState,
        new: HealthState,
        detail: &str,
    ) -> Result<()> {
        warn!(
            device = %device.name,
            %previous,
            %new,
            detail,
            "device status alert"
        );
        Ok(())
    }
}
