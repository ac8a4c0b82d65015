//! Room-based multicast for intercepted connections.
//!
//! Clients create and join rooms, optionally restricted by an allow-list,
//! and exchange chat messages that the server side fans out to the other
//! members through each recipient's own full pipeline. Every operation is
//! acknowledged with an explicit success or error envelope on the requesting
//! connection, and per-recipient delivery failures never abort a fan-out.
//! Rooms expire on a TTL set at creation, independent of their owner.

pub mod factory;
pub mod messages;
pub mod room;
pub mod rooms;

pub use factory::RoomFactory;
pub use messages::{RoomMessage, RoomPayload, PROTOCOL_ROOM, SERVER_SENDER};
pub use room::{Participant, Room, RoomError};
pub use rooms::RoomInterceptor;
