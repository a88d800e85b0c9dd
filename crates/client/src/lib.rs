#![deny(unsafe_code)]

//! HTTP side of the RAG chat client: settings, endpoint resolution, the
//! transport seam and the session orchestrator that ties them to
//! [`ragchat_core::SessionState`].
use std::sync::Arc;

pub mod analysis;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod http;
pub mod session;
pub mod settings;
pub mod transport;
pub mod upload;

pub use analysis::{Analysis, UseCase, analyze};
pub use endpoint::{
    DeploymentContext, EndpointResolver, ResolvedEndpoints, ResolvedService, ServiceKind,
};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use health::{ServiceHealth, check_services};
pub use http::{HTTP_TRANSPORT_ID, HttpTransport};
pub use session::{ChatSession, EventOutcome, Exchange};
pub use settings::{ClientSettings, SettingsStore};
pub use transport::{
    ChatTransport, ExchangeRequest, TransportEvent, TransportEventStream, TransportFailure,
    TransportHandle, TransportPayload,
};
pub use upload::{UploadReceipt, upload_document};

pub fn create_transport(transport_id: &str) -> ClientResult<Arc<dyn ChatTransport>> {
    match transport_id.trim() {
        "" | HTTP_TRANSPORT_ID => Ok(Arc::new(HttpTransport::new()?)),
        other => error::UnknownTransportSnafu {
            stage: "create-transport",
            transport_id: other.to_string(),
        }
        .fail(),
    }
}
