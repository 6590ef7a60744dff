//! airlink networking core.
//! No I/O: the host owns sockets, the radio and timers; this crate owns the
//! data model, state transitions and the Beast codec.

pub mod beast;
pub mod client;
pub mod feed;
pub mod link;
pub mod message;
pub mod packet;
pub mod register;
pub mod settings;

pub use beast::{encode_with_receiver_id, BeastError, BEAST_FRAME_MAX_LEN, BEAST_MESSAGE_BUF_LEN};
pub use client::{ClientRecord, ClientRegistry, MacAddr, MacAddrParseError, RegistryFull, MAX_CLIENTS};
pub use feed::{
    FeedConfig, FeedHost, FeedStats, FeedTable, Protocol, ReceiverId, ReceiverIdParseError,
    MAX_FEEDS, RECEIVER_ID_LEN,
};
pub use link::{
    ConnectionState, RadioEvent, RadioMode, RetryDecision, StationRetry,
    STATION_MAX_RECONNECT_ATTEMPTS,
};
pub use message::{MessageTooLong, NetworkMessage, MAX_NETWORK_MESSAGE_LEN};
pub use packet::{DecodedPacket, PacketError};
pub use register::{Address, LoopbackTransport, RegisterError, RegisterTransport};
pub use settings::{redact_password, AccessPointSettings, Settings, SettingsError, StationSettings};
