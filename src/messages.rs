use crate::registry::DeviceId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Entered {
        id: DeviceId,
        name: String,
        rssi: i16,
    },
    Exited {
        id: DeviceId,
        name: String,
    },
    GateMoving,
    GateStopped,
}

impl std::fmt::Display for PresenceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceEvent::Entered { name, rssi, .. } => {
                write!(f, "\"{}\" entered (RSSI {})", name, rssi)
            }
            PresenceEvent::Exited { name, .. } => write!(f, "\"{}\" exited", name),
            PresenceEvent::GateMoving => f.write_str("Gate moving"),
            PresenceEvent::GateStopped => f.write_str("Gate stopped"),
        }
    }
}
