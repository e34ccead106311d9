use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::messages::PresenceEvent;
use crate::registry::PresenceRegistry;

/// Evicts silent devices and reports the target beacon leaving.
#[derive(Clone, Debug)]
pub struct Sweeper {
    grace_period: Duration,
    target_name: String,
}

impl Sweeper {
    pub fn new(grace_period: Duration, target_name: impl Into<String>) -> Self {
        Sweeper {
            grace_period,
            target_name: target_name.into(),
        }
    }

    /// Half the grace period, so a departure is noticed at most
    /// `1.5 * grace_period` after the last sighting.
    pub fn period(&self) -> Duration {
        self.grace_period / 2
    }

    pub fn sweep(&self, registry: &mut PresenceRegistry, now: Instant) -> Vec<PresenceEvent> {
        if registry.is_empty() {
            return Vec::new();
        }

        let exits: Vec<_> = registry
            .evict_expired(now, self.grace_period)
            .filter_map(|device| {
                debug!(
                    "Evicted {} ({:?}, last RSSI {})",
                    device.id, device.name, device.rssi
                );
                device
                    .is_named(&self.target_name)
                    .then(|| PresenceEvent::Exited {
                        id: device.id,
                        name: self.target_name.clone(),
                    })
            })
            .collect();
        debug!("{} devices in range", registry.len());
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceId;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_period_is_half_grace() {
        let sweeper = Sweeper::new(ms(2000), "TurnoutNow");
        assert_eq!(sweeper.period(), ms(1000));
    }

    #[test]
    fn test_exit_reported_once_for_target_only() {
        let sweeper = Sweeper::new(ms(2000), "TurnoutNow");
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();
        let target = DeviceId("a".to_string());

        registry.observe(&target, Some("TurnoutNow"), -60, t0);
        registry.observe(&DeviceId("b".to_string()), Some("Other"), -60, t0);
        registry.observe(&DeviceId("c".to_string()), None, -60, t0);

        assert!(sweeper.sweep(&mut registry, t0 + ms(1000)).is_empty());
        assert_eq!(registry.len(), 3);

        let events = sweeper.sweep(&mut registry, t0 + ms(2500));
        assert_eq!(
            events,
            vec![PresenceEvent::Exited {
                id: target,
                name: "TurnoutNow".to_string(),
            }]
        );
        assert!(registry.is_empty());

        assert!(sweeper.sweep(&mut registry, t0 + ms(3500)).is_empty());
    }

    #[test]
    fn test_refreshed_device_survives_sweep() {
        let sweeper = Sweeper::new(ms(2000), "TurnoutNow");
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();
        let id = DeviceId("a".to_string());

        registry.observe(&id, Some("TurnoutNow"), -60, t0);
        registry.observe(&id, Some("TurnoutNow"), -62, t0 + ms(1800));

        assert!(sweeper.sweep(&mut registry, t0 + ms(3000)).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
