use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::time::sleep;

use crate::config::{normalize, PrometheusConfig};
use crate::errors::Error;
use crate::gateways::PrometheusApi;

/// Bounded retry schedule. Injectable so tests can run with a zero delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        RetryPolicy { attempts, delay }
    }

    pub async fn wait(&self) {
        sleep(self.delay).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(5, Duration::from_secs(5))
    }
}

/// Signal the running workload to reload its configuration file, then poll
/// its effective configuration until it matches `expected` or the retry
/// bound runs out. Returns whether propagation was confirmed; never fails
/// hard, the caller decides what an unconfirmed reload means.
pub async fn reload_configuration(
    api: &dyn PrometheusApi,
    expected: &PrometheusConfig,
    retry: &RetryPolicy,
) -> bool {
    if let Err(err) = api.trigger_reload().await {
        error!("Failed to trigger configuration reload: {}", err);
        return false;
    }

    let mut want = expected.to_value();
    normalize(&mut want);

    for attempt in 1..=retry.attempts {
        match current_config_value(api).await {
            Ok(mut got) => {
                normalize(&mut got);
                if got == want {
                    info!("Configuration reload confirmed on attempt {}", attempt);
                    return true;
                }
                debug!("Live configuration does not match yet (attempt {})", attempt);
            }
            Err(err) => warn!("Could not read live configuration (attempt {}): {}", attempt, err),
        }

        if attempt < retry.attempts {
            retry.wait().await;
        }
    }

    warn!(
        "Configuration reload not confirmed after {} attempts",
        retry.attempts
    );
    false
}

async fn current_config_value(api: &dyn PrometheusApi) -> Result<Value, Error> {
    let document = api.current_config().await?;
    let parsed: Value = serde_yaml::from_str(&document)?;
    Ok(parsed)
}
