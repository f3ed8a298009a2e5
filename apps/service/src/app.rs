use std::sync::Arc;

use tracing::info;
use watchpost_engine::{Scheduler, probes_for};

use crate::config::{Config, Error};

/// Resolve targets, open sockets and wire the probers to the notifier
pub async fn build_scheduler(config: &Config) -> Result<Scheduler, Error> {
    let interval = config.interval()?;
    let icmp = config.icmp_config()?;
    let sockets = Arc::new(config.socket_factory()?);
    let notifier = config.notifier()?;

    let registry = config.build_registry().await?;
    if registry.is_empty() {
        info!("no ping hosts or ssh servers configured");
    }
    info!(
        hosts = registry.ping_targets().len(),
        servers = registry.sessions().len(),
        ?interval,
        "targets loaded"
    );

    let probes = probes_for(registry, icmp, sockets)?;
    Ok(Scheduler::new(probes, notifier, interval)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_config_builds() {
        let scheduler = build_scheduler(&Config::default()).await.unwrap();
        assert_eq!(scheduler.interval(), std::time::Duration::from_secs(300));

        let summary = scheduler.sweep().await;
        assert_eq!(summary.events, 0);
    }

    #[tokio::test]
    async fn test_invalid_interval_fails_before_probing() {
        let config = Config { interval: "soon".into(), ..Config::default() };
        assert!(matches!(
            build_scheduler(&config).await,
            Err(Error::InvalidDuration { field: "interval", .. })
        ));
    }
}
