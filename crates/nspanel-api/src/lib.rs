//! Directive endpoint of the NS Panel bridge.
//!
//! The panel pushes directives to `POST /do-directive`. The [`router`]
//! turns every request into an event envelope, delegating to a
//! [`DirectiveHandler`], and the [`DirectiveServer`] binds it to the
//! connector's port.

pub mod error;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod server;

pub use error::{DirectiveError, ServerError};
pub use handler::{DeviceDirectiveHandler, DirectiveContext, DirectiveHandler};
pub use protocol::{DirectiveEnvelope, ErrorType, EventEnvelope, ProtocolHeader};
pub use router::{router, ConnectorIdentity, RouterState};
pub use server::DirectiveServer;
