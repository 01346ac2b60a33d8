pub mod connection;
pub mod connector;

pub use connection::{Transport, TransportConfig};
pub use connector::{Connector, GatewaySocket, MemoryConnector, SocketEvent, SocketHandle, WsConnector};
