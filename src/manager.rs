use std::future::Future;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, sleep_until};

use crate::actuator::OutputPin;
use crate::config::AppConfig;
use crate::filter::{DiscoveryFilter, FilterOutcome};
use crate::gate::{Activation, GateController, GateTransition};
use crate::messages::PresenceEvent;
use crate::radio::{RadioEvent, RadioSource, RadioState};
use crate::registry::PresenceRegistry;
use crate::sweep::Sweeper;

/// Owns all presence and gate state and drives it from a single task.
///
/// Radio events, sweeps and gate timers are handled one at a time, each to
/// completion, so eviction and observation never interleave and gate state
/// changes need no locking.
pub struct Manager<R, P> {
    radio: R,
    events: mpsc::Receiver<RadioEvent>,
    filter: DiscoveryFilter,
    sweeper: Sweeper,
    registry: PresenceRegistry,
    gate: GateController<P>,
    led: Option<P>,
    blink_interval: Duration,
    notifier: broadcast::Sender<PresenceEvent>,
    scanning: bool,
}

impl<R: RadioSource, P: OutputPin> Manager<R, P> {
    pub fn new(
        radio: R,
        events: mpsc::Receiver<RadioEvent>,
        config: &AppConfig,
        relay: P,
        led: Option<P>,
        notifier: broadcast::Sender<PresenceEvent>,
    ) -> Self {
        let target_name = config.beacon.target_name.clone();
        Manager {
            radio,
            events,
            filter: DiscoveryFilter::new(config.beacon.rssi_threshold(), target_name.clone()),
            sweeper: Sweeper::new(config.beacon.grace_period(), target_name),
            registry: PresenceRegistry::new(),
            gate: GateController::new(relay, config.gate.timing()),
            led,
            blink_interval: config.gpio.blink_interval(),
            notifier,
            scanning: false,
        }
    }

    pub async fn run_loop(&mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let period = self.sweeper.period();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut blink = interval(self.blink_interval);
        blink.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        let result = loop {
            let gate_deadline = self.gate.next_deadline();

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Err(err) = self.handle_radio_event(event).await {
                            break Err(err);
                        }
                    }
                    None => {
                        info!("Radio event stream closed");
                        break Ok(());
                    }
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
                _ = sleep_until(gate_deadline.unwrap_or_else(Instant::now)), if gate_deadline.is_some() => {
                    self.poll_gate(Instant::now());
                }
                _ = blink.tick(), if self.led.is_some() => self.blink(),
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break Ok(());
                }
            }
        };

        if self.scanning {
            self.stop_scanning().await;
        }
        info!("Exiting manager event loop");
        result
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) -> anyhow::Result<()> {
        match event {
            RadioEvent::StateChanged(RadioState::PoweredOn) => {
                if !self.scanning {
                    match self.radio.start_scanning().await {
                        Ok(()) => {
                            info!("Radio powered on, scanning");
                            self.scanning = true;
                        }
                        Err(err) => error!("Failed to start scanning: {:?}", err),
                    }
                }
            }
            RadioEvent::StateChanged(state) => {
                info!("Radio state {:?}", state);
                if self.scanning {
                    self.stop_scanning().await;
                }
            }
            RadioEvent::Discovered(discovery) => {
                if let FilterOutcome::Entered { event, activation } =
                    self.filter
                        .handle(&mut self.registry, &mut self.gate, &discovery)
                {
                    self.notify(event);
                    match activation {
                        Ok(Activation::Started) => self.notify(PresenceEvent::GateMoving),
                        Ok(Activation::Dropped) => {
                            debug!("Gate {:?}, activation dropped", self.gate.state());
                        }
                        Err(err) if err.is_fatal() => return Err(err.into()),
                        Err(err) => {
                            error!("Gate relay write failed: {}", err);
                            self.notify(PresenceEvent::GateMoving);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop_scanning(&mut self) {
        if let Err(err) = self.radio.stop_scanning().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
        self.scanning = false;
        if let Some(led) = self.led.as_mut() {
            if let Err(err) = led.write(false) {
                warn!("Failed to switch off status LED: {}", err);
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        for event in self.sweeper.sweep(&mut self.registry, now) {
            self.notify(event);
        }
    }

    fn poll_gate(&mut self, now: Instant) {
        for transition in self.gate.poll_timers(now) {
            if transition == GateTransition::Stopped {
                self.notify(PresenceEvent::GateStopped);
            }
        }
    }

    fn blink(&mut self) {
        if !self.scanning {
            return;
        }
        if let Some(led) = self.led.as_mut() {
            if let Err(err) = led.toggle() {
                warn!("Failed to toggle status LED: {}", err);
            }
        }
    }

    fn notify(&self, event: PresenceEvent) {
        info!("{}", event);
        if self.notifier.send(event).is_err() {
            debug!("No presence subscribers");
        }
    }
}
