use std::collections::VecDeque;
use std::time::Duration;

use crate::brain::{BatteryInfo, Brain, BrakeMode, PORT_RANGE};
use crate::controller::ControllerState;
use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, Default)]
struct SimPort {
    rpm: f64,
    brake: BrakeMode,
    position: f64,
    disconnected: bool,
    faulted: bool,
    jammed: bool,
}

#[derive(Debug)]
pub struct SimBrain {
    ports: [SimPort; 22],
    step: Duration,
    controller: ControllerState,
    script: VecDeque<ControllerState>,
    controller_connected: bool,
    battery: BatteryInfo,
    failing_updates: u32,
    updates: u64,
}

impl Default for SimBrain {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl SimBrain {
    /// `step` is the simulated time that passes on every `update`.
    pub fn new(step: Duration) -> Self {
        Self {
            ports: [SimPort::default(); 22],
            step,
            controller: ControllerState::default(),
            script: VecDeque::new(),
            controller_connected: true,
            battery: BatteryInfo {
                voltage: 12.6,
                capacity: 100.0,
                temperature: 30.0,
            },
            failing_updates: 0,
            updates: 0,
        }
    }

    fn check(&self, port: u8) -> Result<(), HardwareError> {
        match self.ports.get(port as usize) {
            Some(p) if !PORT_RANGE.contains(&port) || p.disconnected => {
                Err(HardwareError::Disconnected { port })
            }
            Some(p) if p.faulted => Err(HardwareError::Faulted { port }),
            Some(_) => Ok(()),
            None => Err(HardwareError::Disconnected { port }),
        }
    }
    fn port(&self, port: u8) -> Result<&SimPort, HardwareError> {
        self.check(port)?;
        Ok(&self.ports[port as usize])
    }
    fn port_mut(&mut self, port: u8) -> Result<&mut SimPort, HardwareError> {
        self.check(port)?;
        Ok(&mut self.ports[port as usize])
    }

    pub fn commanded_velocity(&self, port: u8) -> f64 {
        self.ports.get(port as usize).map_or(0.0, |p| p.rpm)
    }
    pub fn brake_mode(&self, port: u8) -> BrakeMode {
        self.ports.get(port as usize).map_or_else(BrakeMode::default, |p| p.brake)
    }
    pub fn set_position(&mut self, port: u8, degrees: f64) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            p.position = degrees;
        }
    }
    pub fn disconnect(&mut self, port: u8) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            p.disconnected = true;
        }
    }
    /// The device stays on the bus but rejects every command.
    pub fn fault(&mut self, port: u8) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            p.faulted = true;
        }
    }
    /// A jammed motor accepts commands but its encoder never moves.
    pub fn jam(&mut self, port: u8) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            p.jammed = true;
        }
    }
    /// Holds the controller in `state` until changed or a script runs.
    pub fn set_controller(&mut self, state: ControllerState) {
        self.script.clear();
        self.controller = state;
    }
    /// Queues controller samples, one consumed per `update`. The last sample
    /// stays in effect once the script runs out.
    pub fn script_controller<I: IntoIterator<Item = ControllerState>>(&mut self, states: I) {
        self.script.extend(states);
    }
    pub fn set_controller_connected(&mut self, connected: bool) {
        self.controller_connected = connected;
    }
    pub fn set_battery(&mut self, battery: BatteryInfo) {
        self.battery = battery;
    }
    /// Makes the next `n` updates fail as if the link dropped packets.
    pub fn fail_updates(&mut self, n: u32) {
        self.failing_updates = n;
    }
    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

impl Brain for SimBrain {
    fn update(&mut self) -> Result<(), HardwareError> {
        if self.failing_updates > 0 {
            self.failing_updates -= 1;
            return Err(HardwareError::Link("simulated packet loss".into()));
        }
        self.updates += 1;
        let dt = self.step.as_secs_f64();
        for p in self.ports.iter_mut().filter(|p| !p.disconnected && !p.jammed) {
            // rpm -> degrees per second
            p.position += p.rpm * 6.0 * dt;
        }
        if let Some(next) = self.script.pop_front() {
            self.controller = next;
        }
        Ok(())
    }

    fn set_velocity(&mut self, port: u8, rpm: f64) -> Result<(), HardwareError> {
        self.port_mut(port)?.rpm = rpm;
        Ok(())
    }

    fn set_brake_mode(&mut self, port: u8, mode: BrakeMode) -> Result<(), HardwareError> {
        self.port_mut(port)?.brake = mode;
        Ok(())
    }

    fn position(&mut self, port: u8) -> Result<f64, HardwareError> {
        Ok(self.port(port)?.position)
    }

    fn controller(&mut self) -> Result<ControllerState, HardwareError> {
        if !self.controller_connected {
            return Err(HardwareError::ControllerDisconnected);
        }
        Ok(self.controller)
    }

    fn battery(&mut self) -> Result<BatteryInfo, HardwareError> {
        Ok(self.battery)
    }
}
