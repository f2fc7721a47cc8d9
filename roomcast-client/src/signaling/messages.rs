//! Request catalog and payload shapes of the signaling protocol

use serde::{Deserialize, Serialize};

use crate::types::{
    ConsumerParams, Direction, DtlsParameters, MediaKind, ParticipantId, ProducerId,
    RtpParameters, TransportOptions,
};

/// Requests understood by the session server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    GetRtpCapabilities,
    CreateSendTransport,
    CreateRecvTransport,
    ConnectTransport,
    Produce,
    GetProducers,
    Consume,
}

impl Request {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetRtpCapabilities => "get-rtp-capabilities",
            Self::CreateSendTransport => "create-send-transport",
            Self::CreateRecvTransport => "create-recv-transport",
            Self::ConnectTransport => "connect-transport",
            Self::Produce => "produce",
            Self::GetProducers => "get-producers",
            Self::Consume => "consume",
        }
    }

    /// Transport-creation request for the given direction
    #[must_use]
    pub const fn create_transport(direction: Direction) -> Self {
        match direction {
            Direction::Send => Self::CreateSendTransport,
            Direction::Recv => Self::CreateRecvTransport,
        }
    }
}

/// Pushed when a participant starts producing
pub const NEW_PRODUCER_EVENT: &str = "new-producer";

/// Payload-less request body
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportParamsResponse {
    pub params: TransportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub dtls_parameters: DtlsParameters,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub id: ProducerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub producer_socket_id: ParticipantId,
}

/// Answer to a consume request. Errors are reported in-band: the round-trip
/// succeeds but the body only carries `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsumeResponse {
    Rejected { error: String },
    Accepted(ConsumerParams),
}

impl ConsumeResponse {
    pub fn into_result(self) -> Result<ConsumerParams, String> {
        match self {
            Self::Accepted(params) => Ok(params),
            Self::Rejected { error } => Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducerEvent {
    pub producer_socket_id: ParticipantId,
}
