// Deploy/stow state machine and filter-wheel control sitting on top of
// the digital I/O and linear-actuator backends. Bit layout carried
// through verbatim from mkd.h's PIO_OUT_*/PIO_INP_* masks; operation
// semantics grounded on mkd_srv.cpp's ctrl_slit/ctrl_grism/ctrl_mirror/
// ctrl_lamp/ctrl_arc/ctrl_filter/ctrl_filters family (not all of which
// survives in this shorter form — see DESIGN.md for what was dropped).

use std::time::Duration;

use mookodi_elements::error::invariant_violation;
use mookodi_elements::mechanism_trait::{DigitalIoBackend, LinearActuatorBackend};
use canonical_error::CanonicalError;

pub const OUT_GRISM_DEPLOY: u8 = 0b0000_1000;
pub const OUT_SLIT_DEPLOY: u8 = 0b0001_0000;
pub const OUT_MIRROR_DEPLOY: u8 = 0b0010_0000;
pub const OUT_ARC_ON: u8 = 0b0100_0000;
pub const OUT_LAMP_ON: u8 = 0b1000_0000;

pub const INP_GRISM_DEPLOY: u8 = 0b0000_0100;
pub const INP_GRISM_STOW: u8 = 0b0000_1000;
pub const INP_SLIT_DEPLOY: u8 = 0b0001_0000;
pub const INP_SLIT_STOW: u8 = 0b0010_0000;
pub const INP_MIRROR_DEPLOY: u8 = 0b0100_0000;
pub const INP_MIRROR_STOW: u8 = 0b1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployRequest {
    Get,
    Deploy,
    Stow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Enabled,
    Disabled,
    Unknown,
    Invalid,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRequest {
    Get,
    Position(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Unknown,
    Pos(u8),
    Bad,
    Invalid,
    Error,
}

struct Mechanism {
    output_bit: u8,
    deploy_input_bit: u8,
    stow_input_bit: u8,
}

const SLIT: Mechanism = Mechanism {
    output_bit: OUT_SLIT_DEPLOY, deploy_input_bit: INP_SLIT_DEPLOY, stow_input_bit: INP_SLIT_STOW,
};
const GRISM: Mechanism = Mechanism {
    output_bit: OUT_GRISM_DEPLOY, deploy_input_bit: INP_GRISM_DEPLOY, stow_input_bit: INP_GRISM_STOW,
};
const MIRROR: Mechanism = Mechanism {
    output_bit: OUT_MIRROR_DEPLOY, deploy_input_bit: INP_MIRROR_DEPLOY, stow_input_bit: INP_MIRROR_STOW,
};

/// A mechanism is deployed iff its output bit is set AND its
/// deploy-limit bit is set AND its stow-limit bit is clear; stowed iff
/// the symmetric opposite holds. Any other combination is transient
/// ("moving") from the caller's point of view.
fn decide(mechanism: &Mechanism, output_mask: u8, input_mask: u8) -> DeployState {
    let output_set = output_mask & mechanism.output_bit != 0;
    let deployed = input_mask & mechanism.deploy_input_bit != 0;
    let stowed = input_mask & mechanism.stow_input_bit != 0;
    if output_set && deployed && !stowed {
        DeployState::Enabled
    } else if !output_set && stowed && !deployed {
        DeployState::Disabled
    } else {
        DeployState::Unknown
    }
}

pub struct MechanismLogic<I: DigitalIoBackend, A: LinearActuatorBackend> {
    io: I,
    actuators: [A; 2],
    filter_positions: [[i32; 5]; 2],
    accuracy: i32,
    poll_interval: Duration,
}

impl<I: DigitalIoBackend, A: LinearActuatorBackend> MechanismLogic<I, A> {
    pub fn new(io: I, actuators: [A; 2], filter_positions: [[i32; 5]; 2], accuracy: i32) -> Self {
        MechanismLogic { io, actuators, filter_positions, accuracy, poll_interval: Duration::from_millis(50) }
    }

    async fn ctrl_deploy(
        &self, mechanism: &Mechanism, request: DeployRequest, timeout_ms: u32,
    ) -> Result<DeployState, CanonicalError> {
        let mut output_mask = match self.io.get_output_mask().await {
            Ok(mask) => mask,
            Err(_) => return Ok(DeployState::Error),
        };

        match request {
            DeployRequest::Get => {}
            DeployRequest::Deploy => output_mask |= mechanism.output_bit,
            DeployRequest::Stow => output_mask &= !mechanism.output_bit,
        }

        if request != DeployRequest::Get {
            if self.io.set_output_mask(output_mask).await.is_err() {
                return Ok(DeployState::Error);
            }
        }

        if timeout_ms == 0 {
            let input_mask = match self.io.get_input_mask().await {
                Ok(mask) => mask,
                Err(_) => return Ok(DeployState::Error),
            };
            return Ok(decide(mechanism, output_mask, input_mask));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            let input_mask = match self.io.get_input_mask().await {
                Ok(mask) => mask,
                Err(_) => return Ok(DeployState::Error),
            };
            let state = decide(mechanism, output_mask, input_mask);
            if state != DeployState::Unknown || tokio::time::Instant::now() >= deadline {
                return Ok(state);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn ctrl_slit(&self, request: DeployRequest, timeout_ms: u32) -> Result<DeployState, CanonicalError> {
        self.ctrl_deploy(&SLIT, request, timeout_ms).await
    }

    pub async fn ctrl_grism(&self, request: DeployRequest, timeout_ms: u32) -> Result<DeployState, CanonicalError> {
        self.ctrl_deploy(&GRISM, request, timeout_ms).await
    }

    pub async fn ctrl_mirror(&self, request: DeployRequest, timeout_ms: u32) -> Result<DeployState, CanonicalError> {
        self.ctrl_deploy(&MIRROR, request, timeout_ms).await
    }

    async fn ctrl_toggle(&self, output_bit: u8, state: ToggleState) -> Result<ToggleState, CanonicalError> {
        let mut mask = self.io.get_output_mask().await?;
        match state {
            ToggleState::On => mask |= output_bit,
            ToggleState::Off => mask &= !output_bit,
        }
        self.io.set_output_mask(mask).await?;
        let readback = self.io.get_output_mask().await?;
        Ok(if readback & output_bit != 0 { ToggleState::On } else { ToggleState::Off })
    }

    pub async fn ctrl_lamp(&self, state: ToggleState) -> Result<ToggleState, CanonicalError> {
        self.ctrl_toggle(OUT_LAMP_ON, state).await
    }

    pub async fn ctrl_arc(&self, state: ToggleState) -> Result<ToggleState, CanonicalError> {
        self.ctrl_toggle(OUT_ARC_ON, state).await
    }

    fn identify_slot(&self, which: usize, feedback: i32) -> FilterState {
        self.filter_positions[which].iter()
            .position(|&target| (feedback - target).abs() <= self.accuracy)
            .map(|slot| FilterState::Pos(slot as u8))
            .unwrap_or(FilterState::Bad)
    }

    pub async fn ctrl_filter(
        &self, which: usize, request: FilterRequest, timeout_ms: u32,
    ) -> Result<FilterState, CanonicalError> {
        if which >= 2 {
            return Err(invariant_violation("filter index must be 0 or 1"));
        }
        match request {
            FilterRequest::Get => {
                let feedback = self.actuators[which].get_position().await?;
                Ok(self.identify_slot(which, feedback))
            }
            FilterRequest::Position(slot) => {
                let slot = slot as usize;
                if slot >= 5 {
                    return Ok(FilterState::Invalid);
                }
                let target = self.filter_positions[which][slot];
                self.actuators[which].set_position(target).await?;
                self.poll_filter_settled(which, target, timeout_ms).await
            }
        }
    }

    /// Commands both actuators before waiting on either, so the two
    /// moves run concurrently rather than sequentially.
    pub async fn ctrl_filters(
        &self, request0: FilterRequest, request1: FilterRequest, timeout_ms: u32,
    ) -> Result<(FilterState, FilterState), CanonicalError> {
        let target0 = match request0 {
            FilterRequest::Get => None,
            FilterRequest::Position(slot) if (slot as usize) < 5 => Some(self.filter_positions[0][slot as usize]),
            FilterRequest::Position(_) => return Ok((FilterState::Invalid, FilterState::Invalid)),
        };
        let target1 = match request1 {
            FilterRequest::Get => None,
            FilterRequest::Position(slot) if (slot as usize) < 5 => Some(self.filter_positions[1][slot as usize]),
            FilterRequest::Position(_) => return Ok((FilterState::Invalid, FilterState::Invalid)),
        };

        if let Some(t) = target0 {
            self.actuators[0].set_position(t).await?;
        }
        if let Some(t) = target1 {
            self.actuators[1].set_position(t).await?;
        }

        let state0 = match target0 {
            Some(t) => self.poll_filter_settled(0, t, timeout_ms).await?,
            None => {
                let feedback = self.actuators[0].get_position().await?;
                self.identify_slot(0, feedback)
            }
        };
        let state1 = match target1 {
            Some(t) => self.poll_filter_settled(1, t, timeout_ms).await?,
            None => {
                let feedback = self.actuators[1].get_position().await?;
                self.identify_slot(1, feedback)
            }
        };
        Ok((state0, state1))
    }

    async fn poll_filter_settled(
        &self, which: usize, target: i32, timeout_ms: u32,
    ) -> Result<FilterState, CanonicalError> {
        if timeout_ms == 0 {
            let feedback = self.actuators[which].get_position().await?;
            return Ok(self.identify_slot(which, feedback));
        }
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            let feedback = self.actuators[which].get_position().await?;
            if (feedback - target).abs() <= self.accuracy {
                return Ok(self.identify_slot(which, feedback));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(FilterState::Unknown);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn output_mask(&self) -> Result<u8, CanonicalError> {
        self.io.get_output_mask().await
    }

    pub async fn input_mask(&self) -> Result<u8, CanonicalError> {
        self.io.get_input_mask().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{EmulatedDigitalIo, EmulatedLinearActuator};

    fn logic() -> MechanismLogic<EmulatedDigitalIo, EmulatedLinearActuator> {
        MechanismLogic::new(
            EmulatedDigitalIo::default(),
            [EmulatedLinearActuator::default(), EmulatedLinearActuator::default()],
            [[0, 200, 400, 600, 800], [0, 200, 400, 600, 800]],
            10,
        )
    }

    #[tokio::test]
    async fn grism_deploy_then_get_then_stow() {
        let m = logic();
        assert_eq!(m.ctrl_grism(DeployRequest::Deploy, 1000).await.unwrap(), DeployState::Enabled);
        assert_eq!(m.ctrl_grism(DeployRequest::Get, 0).await.unwrap(), DeployState::Enabled);
        assert_eq!(m.ctrl_grism(DeployRequest::Stow, 1000).await.unwrap(), DeployState::Disabled);
    }

    #[tokio::test]
    async fn lamp_toggles_independent_of_limit_sensors() {
        let m = logic();
        assert_eq!(m.ctrl_lamp(ToggleState::On).await.unwrap(), ToggleState::On);
        assert_eq!(m.ctrl_lamp(ToggleState::Off).await.unwrap(), ToggleState::Off);
    }

    #[tokio::test]
    async fn ctrl_filters_moves_both_before_waiting_on_either() {
        let m = logic();
        let (s0, s1) = m.ctrl_filters(
            FilterRequest::Position(2), FilterRequest::Position(3), 1000).await.unwrap();
        assert_eq!(s0, FilterState::Pos(2));
        assert_eq!(s1, FilterState::Pos(3));
    }

    #[tokio::test]
    async fn ctrl_filter_get_identifies_nearest_slot() {
        let m = logic();
        m.ctrl_filter(0, FilterRequest::Position(4), 1000).await.unwrap();
        assert_eq!(m.ctrl_filter(0, FilterRequest::Get, 0).await.unwrap(), FilterState::Pos(4));
    }

    #[tokio::test]
    async fn ctrl_filter_rejects_out_of_range_index() {
        let m = logic();
        assert!(m.ctrl_filter(2, FilterRequest::Get, 0).await.is_err());
    }
}
