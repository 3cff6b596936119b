//! Transport boundary between the supervisor and a chat network.
//!
//! A [`Connector`] opens one [`Connection`] per bot; the connection is a
//! duplex channel yielding inbound events and accepting replies. The wire
//! protocol lives entirely behind these traits.

pub mod error;
pub mod transport;

pub use {
    error::{Error, Result, TransportError},
    transport::{ButtonClick, Connection, Connector, CredentialProbe, InboundEvent, InboundMessage},
};
