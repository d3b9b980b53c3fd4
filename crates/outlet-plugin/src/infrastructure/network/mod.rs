//! Network infrastructure: the session with the host controller.
//!
//! - **`rpc_channel`** – A framed TCP channel to the host, plus the
//!   `HostChannel`/`ChannelConnector` traits the session is written against.
//! - **`session`** – The `SessionManager` state machine: connect handshake,
//!   liveness watching, shutdown, and the host logging surface.
//! - **`shutdown`** – The fire-once signal that ends a session.

pub mod rpc_channel;
pub mod session;
pub mod shutdown;

pub use rpc_channel::{
    ChannelConnector, ChannelError, ChannelOptions, HostChannel, TcpChannelConnector,
};
pub use session::{ConnectStep, ConnectionError, SessionManager, SessionState};
pub use shutdown::ShutdownSignal;
