use log::{debug, info};

use crate::actuator::{ActuatorError, OutputPin};
use crate::gate::{Activation, GateController};
use crate::messages::PresenceEvent;
use crate::radio::Discovery;
use crate::registry::PresenceRegistry;

#[derive(Debug)]
pub enum FilterOutcome {
    /// Below the RSSI threshold, treated as noise.
    Ignored,
    Tracked { is_new_entry: bool },
    /// The target beacon just came into range.
    Entered {
        event: PresenceEvent,
        activation: Result<Activation, ActuatorError>,
    },
}

#[derive(Clone, Debug)]
pub struct DiscoveryFilter {
    rssi_threshold: i16,
    target_name: String,
}

impl DiscoveryFilter {
    pub fn new(rssi_threshold: i16, target_name: impl Into<String>) -> Self {
        DiscoveryFilter {
            rssi_threshold,
            target_name: target_name.into(),
        }
    }

    pub fn handle<P: OutputPin>(
        &self,
        registry: &mut PresenceRegistry,
        gate: &mut GateController<P>,
        discovery: &Discovery,
    ) -> FilterOutcome {
        if discovery.rssi < self.rssi_threshold {
            debug!("Ignoring {} with RSSI {}", discovery.id, discovery.rssi);
            return FilterOutcome::Ignored;
        }

        let result = registry.observe(
            &discovery.id,
            discovery.name.as_deref(),
            discovery.rssi,
            discovery.seen_at,
        );

        if result.is_new_entry && discovery.name.as_deref() == Some(self.target_name.as_str()) {
            info!(
                "\"{}\" entered (RSSI {})",
                self.target_name, discovery.rssi
            );
            return FilterOutcome::Entered {
                event: PresenceEvent::Entered {
                    id: discovery.id.clone(),
                    name: self.target_name.clone(),
                    rssi: discovery.rssi,
                },
                activation: gate.activate(discovery.seen_at),
            };
        }

        FilterOutcome::Tracked {
            is_new_entry: result.is_new_entry,
        }
    }
}
