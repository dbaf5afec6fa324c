//! Network Layer
//!
//! Framed TCP server for real-time maze race communication.
//! This layer is **non-deterministic** - maze generation and match state
//! live in `game/`.

pub mod framing;
pub mod protocol;
pub mod registry;
pub mod server;

pub use framing::{read_frame, write_frame, FramingError, MAX_FRAME_LEN};
pub use protocol::{
    ChatLine, ClientMessage, LoginSnapshot, MatchHandout, PresenceUpdate, ServerMessage,
};
pub use registry::{ConnId, Registry};
pub use server::{GameServer, GameServerError, ServerConfig};
