// The Instrument gRPC surface: wraps `MechanismLogic` with the
// wire-level request/response types, the same translate-then-delegate
// shape `camera_rpc.rs` uses for the camera side.

use mookodi_elements::error::invariant_violation;
use mookodi_elements::mechanism_trait::{DigitalIoBackend, LinearActuatorBackend};
use mookodi_elements::error::to_tonic_status;
use mookodi_elements::mookodi_common::{
    DeployRequest as ProtoDeployRequest, DeployState as ProtoDeployState, Empty,
    FilterId, FilterState as ProtoFilterState, ToggleState as ProtoToggleState,
};
use mookodi_elements::mookodi_instrument::instrument_service_server::InstrumentService;
use mookodi_elements::mookodi_instrument::{
    DeployRequest, DeployResponse, FilterRequest, FilterResponse, FiltersRequest,
    FiltersResponse, InstrumentState, ToggleRequest, ToggleResponse,
};
use tonic::{Request, Response, Status};

use crate::mechanism_logic::{
    DeployRequest as LogicDeployRequest, DeployState as LogicDeployState,
    FilterRequest as LogicFilterRequest, FilterState as LogicFilterState, MechanismLogic,
    ToggleState as LogicToggleState,
};

pub struct InstrumentRpc<I: DigitalIoBackend + 'static, A: LinearActuatorBackend + 'static> {
    logic: MechanismLogic<I, A>,
}

impl<I: DigitalIoBackend + 'static, A: LinearActuatorBackend + 'static> InstrumentRpc<I, A> {
    pub fn new(logic: MechanismLogic<I, A>) -> Self {
        InstrumentRpc { logic }
    }
}

fn proto_deploy_request(req: ProtoDeployRequest) -> LogicDeployRequest {
    match req {
        ProtoDeployRequest::Deploy => LogicDeployRequest::Deploy,
        ProtoDeployRequest::Stow => LogicDeployRequest::Stow,
        ProtoDeployRequest::Get | ProtoDeployRequest::Unspecified => LogicDeployRequest::Get,
    }
}

fn deploy_state_to_proto(state: LogicDeployState) -> ProtoDeployState {
    match state {
        LogicDeployState::Enabled => ProtoDeployState::Enabled,
        LogicDeployState::Disabled => ProtoDeployState::Disabled,
        LogicDeployState::Unknown => ProtoDeployState::DeployUnknown,
        LogicDeployState::Invalid => ProtoDeployState::DeployInvalid,
        LogicDeployState::Error => ProtoDeployState::DeployError,
    }
}

fn proto_toggle_request(req: ProtoToggleState) -> Result<LogicToggleState, Status> {
    match req {
        ProtoToggleState::ToggleOn => Ok(LogicToggleState::On),
        ProtoToggleState::ToggleOff => Ok(LogicToggleState::Off),
        ProtoToggleState::Unspecified => {
            Err(to_tonic_status(invariant_violation("toggle request must specify on or off")))
        }
    }
}

fn toggle_state_to_proto(state: LogicToggleState) -> ProtoToggleState {
    match state {
        LogicToggleState::On => ProtoToggleState::ToggleOn,
        LogicToggleState::Off => ProtoToggleState::ToggleOff,
    }
}

fn proto_filter_request(target: ProtoFilterState) -> Result<LogicFilterRequest, Status> {
    match target {
        ProtoFilterState::FilterGet => Ok(LogicFilterRequest::Get),
        ProtoFilterState::Pos0 => Ok(LogicFilterRequest::Position(0)),
        ProtoFilterState::Pos1 => Ok(LogicFilterRequest::Position(1)),
        ProtoFilterState::Pos2 => Ok(LogicFilterRequest::Position(2)),
        ProtoFilterState::Pos3 => Ok(LogicFilterRequest::Position(3)),
        ProtoFilterState::Pos4 => Ok(LogicFilterRequest::Position(4)),
        _ => Err(to_tonic_status(invariant_violation(
            "filter target must be FILTER_GET or one of POS0..POS4"))),
    }
}

fn filter_state_to_proto(state: LogicFilterState) -> ProtoFilterState {
    match state {
        LogicFilterState::Unknown => ProtoFilterState::Unspecified,
        LogicFilterState::Pos(0) => ProtoFilterState::Pos0,
        LogicFilterState::Pos(1) => ProtoFilterState::Pos1,
        LogicFilterState::Pos(2) => ProtoFilterState::Pos2,
        LogicFilterState::Pos(3) => ProtoFilterState::Pos3,
        LogicFilterState::Pos(_) => ProtoFilterState::Pos4,
        LogicFilterState::Bad => ProtoFilterState::FilterBad,
        LogicFilterState::Invalid => ProtoFilterState::FilterInvalid,
        LogicFilterState::Error => ProtoFilterState::FilterError,
    }
}

fn filter_position_of(state: LogicFilterState) -> i32 {
    match state {
        LogicFilterState::Pos(p) => p as i32,
        _ => -1,
    }
}

#[tonic::async_trait]
impl<I: DigitalIoBackend + 'static, A: LinearActuatorBackend + 'static> InstrumentService
    for InstrumentRpc<I, A>
{
    async fn ctrl_slit(&self, request: Request<DeployRequest>) -> Result<Response<DeployResponse>, Status> {
        let req = request.into_inner();
        let state = self.logic.ctrl_slit(proto_deploy_request(req.state()), req.timeout_ms as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(DeployResponse { state: deploy_state_to_proto(state) as i32, message: None }))
    }

    async fn ctrl_grism(&self, request: Request<DeployRequest>) -> Result<Response<DeployResponse>, Status> {
        let req = request.into_inner();
        let state = self.logic.ctrl_grism(proto_deploy_request(req.state()), req.timeout_ms as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(DeployResponse { state: deploy_state_to_proto(state) as i32, message: None }))
    }

    async fn ctrl_mirror(&self, request: Request<DeployRequest>) -> Result<Response<DeployResponse>, Status> {
        let req = request.into_inner();
        let state = self.logic.ctrl_mirror(proto_deploy_request(req.state()), req.timeout_ms as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(DeployResponse { state: deploy_state_to_proto(state) as i32, message: None }))
    }

    async fn ctrl_lamp(&self, request: Request<ToggleRequest>) -> Result<Response<ToggleResponse>, Status> {
        let requested = proto_toggle_request(request.into_inner().state())?;
        let state = self.logic.ctrl_lamp(requested).await.map_err(to_tonic_status)?;
        Ok(Response::new(ToggleResponse { state: toggle_state_to_proto(state) as i32 }))
    }

    async fn ctrl_arc(&self, request: Request<ToggleRequest>) -> Result<Response<ToggleResponse>, Status> {
        let requested = proto_toggle_request(request.into_inner().state())?;
        let state = self.logic.ctrl_arc(requested).await.map_err(to_tonic_status)?;
        Ok(Response::new(ToggleResponse { state: toggle_state_to_proto(state) as i32 }))
    }

    async fn ctrl_filter(&self, request: Request<FilterRequest>) -> Result<Response<FilterResponse>, Status> {
        let req = request.into_inner();
        let which = match req.which() {
            FilterId::Filter0 => 0,
            FilterId::Filter1 => 1,
            FilterId::Unspecified => {
                return Err(to_tonic_status(invariant_violation("filter id must be FILTER0 or FILTER1")));
            }
        };
        let logic_request = proto_filter_request(req.target())?;
        let state = self.logic.ctrl_filter(which, logic_request, req.timeout_ms as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(FilterResponse {
            state: filter_state_to_proto(state) as i32,
            feedback_position: filter_position_of(state),
            message: None,
        }))
    }

    async fn ctrl_filters(&self, request: Request<FiltersRequest>) -> Result<Response<FiltersResponse>, Status> {
        let req = request.into_inner();
        let request0 = proto_filter_request(req.target0())?;
        let request1 = proto_filter_request(req.target1())?;
        let (state0, state1) = self.logic.ctrl_filters(request0, request1, req.timeout_ms as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(FiltersResponse {
            state0: filter_state_to_proto(state0) as i32,
            state1: filter_state_to_proto(state1) as i32,
            feedback_position0: filter_position_of(state0),
            feedback_position1: filter_position_of(state1),
            message: None,
        }))
    }

    async fn get_state(&self, _request: Request<Empty>) -> Result<Response<InstrumentState>, Status> {
        let output_mask = self.logic.output_mask().await.map_err(to_tonic_status)?;
        let input_mask = self.logic.input_mask().await.map_err(to_tonic_status)?;
        let filter0 = self.logic.ctrl_filter(0, LogicFilterRequest::Get, 0)
            .await.map_err(to_tonic_status)?;
        let filter1 = self.logic.ctrl_filter(1, LogicFilterRequest::Get, 0)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(InstrumentState {
            output_mask: output_mask as u32,
            input_mask: input_mask as u32,
            filter_position0: filter_position_of(filter0),
            filter_position1: filter_position_of(filter1),
            filter_state0: filter_state_to_proto(filter0) as i32,
            filter_state1: filter_state_to_proto(filter1) as i32,
        }))
    }
}
