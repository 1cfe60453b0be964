//! Front-end debug adapter protocol: framing, envelope, correlation, handles

pub mod codec;
pub mod endpoint;
pub mod handles;
pub mod protocol;
pub mod types;

pub use codec::{CodecError, FrameCodec, encode_frame};
pub use endpoint::{DIAGNOSTIC_EVENT, Endpoint, EndpointError, PendingResponse};
pub use handles::{HANDLE_BASE, HandleTable};
pub use protocol::{ErrorDestination, ErrorMessage, Event, ProtocolMessage, Request, Response, format_pii};
