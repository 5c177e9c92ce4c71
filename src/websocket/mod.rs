pub mod handler;
pub mod outbound;
pub mod protocol;
pub mod push;
pub mod session;

pub use handler::{SessionSettings, WebSocketHandler};
