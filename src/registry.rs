use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Identifier reported by the radio for a peripheral. Stable for one scanning
/// session, opaque otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ObservedDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub last_seen: Instant,
}

impl ObservedDevice {
    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnterResult {
    pub is_new_entry: bool,
}

/// Devices currently considered in range, keyed by id.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    devices: HashMap<DeviceId, ObservedDevice>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting. Signal strength is not checked here.
    pub fn observe(
        &mut self,
        id: &DeviceId,
        name: Option<&str>,
        rssi: i16,
        now: Instant,
    ) -> EnterResult {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.rssi = rssi;
                device.last_seen = now;
                // A later advertisement may carry the name an earlier one lacked.
                if device.name.is_none() {
                    device.name = name.map(str::to_string);
                }
                EnterResult {
                    is_new_entry: false,
                }
            }
            None => {
                self.devices.insert(
                    id.clone(),
                    ObservedDevice {
                        id: id.clone(),
                        name: name.map(str::to_string),
                        rssi,
                        last_seen: now,
                    },
                );
                EnterResult { is_new_entry: true }
            }
        }
    }

    /// Removes every device silent for longer than `grace_period`.
    ///
    /// The expired ids are chosen up front; each record is removed as the
    /// returned iterator reaches it. Records the caller does not consume stay
    /// in the registry and are picked up by the next sweep.
    pub fn evict_expired(
        &mut self,
        now: Instant,
        grace_period: Duration,
    ) -> impl Iterator<Item = ObservedDevice> + '_ {
        let expired: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|device| now.saturating_duration_since(device.last_seen) > grace_period)
            .map(|device| device.id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(move |id| self.devices.remove(&id))
    }

    #[cfg(test)]
    pub fn get(&self, id: &DeviceId) -> Option<&ObservedDevice> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceId {
        DeviceId(s.to_string())
    }

    #[test]
    fn test_first_sighting_is_new_entry() {
        let mut registry = PresenceRegistry::new();
        let now = Instant::now();

        let result = registry.observe(&id("a"), Some("TurnoutNow"), -60, now);

        assert!(result.is_new_entry);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_repeat_sightings_keep_one_record_with_latest_values() {
        let mut registry = PresenceRegistry::new();
        let start = Instant::now();

        for step in 0..10u64 {
            let now = start + Duration::from_millis(step * 150);
            let rssi = -60 - step as i16;
            let result = registry.observe(&id("a"), Some("TurnoutNow"), rssi, now);
            assert_eq!(result.is_new_entry, step == 0);
            assert_eq!(registry.len(), 1);

            let device = registry.get(&id("a")).unwrap();
            assert_eq!(device.last_seen, now);
            assert_eq!(device.rssi, rssi);
        }
    }

    #[test]
    fn test_late_name_fills_in_missing_name() {
        let mut registry = PresenceRegistry::new();
        let now = Instant::now();

        registry.observe(&id("a"), None, -70, now);
        registry.observe(&id("a"), Some("TurnoutNow"), -70, now);

        assert!(registry.get(&id("a")).unwrap().is_named("TurnoutNow"));
    }

    #[test]
    fn test_evict_expired_only_removes_silent_devices() {
        let mut registry = PresenceRegistry::new();
        let start = Instant::now();
        let grace = Duration::from_millis(2000);

        registry.observe(&id("old"), Some("TurnoutNow"), -60, start);
        registry.observe(&id("fresh"), Some("Other"), -60, start + Duration::from_millis(1500));

        let evicted: Vec<_> = registry
            .evict_expired(start + Duration::from_millis(2500), grace)
            .collect();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, id("old"));
        assert!(registry.get(&id("old")).is_none());
        assert!(registry.get(&id("fresh")).is_some());
    }

    #[test]
    fn test_silence_equal_to_grace_is_not_expired() {
        let mut registry = PresenceRegistry::new();
        let start = Instant::now();
        let grace = Duration::from_millis(2000);

        registry.observe(&id("a"), None, -60, start);

        assert_eq!(registry.evict_expired(start + grace, grace).count(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evicted_device_is_reported_once() {
        let mut registry = PresenceRegistry::new();
        let start = Instant::now();
        let grace = Duration::from_millis(2000);

        registry.observe(&id("a"), None, -60, start);

        let later = start + Duration::from_millis(3000);
        assert_eq!(registry.evict_expired(later, grace).count(), 1);
        assert_eq!(registry.evict_expired(later, grace).count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unconsumed_evictions_stay_registered() {
        let mut registry = PresenceRegistry::new();
        let start = Instant::now();
        let grace = Duration::from_millis(2000);

        registry.observe(&id("a"), None, -60, start);
        registry.observe(&id("b"), None, -60, start);

        let later = start + Duration::from_millis(3000);
        assert_eq!(registry.evict_expired(later, grace).take(1).count(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.evict_expired(later, grace).count(), 1);
        assert!(registry.is_empty());
    }
}
