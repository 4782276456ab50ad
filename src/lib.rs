//! Control WebControl shading gateways via their binary telegram protocol.
//!
//! # Overview
//!
//! The `webcontrol` crate implements the telegram protocol spoken by
//! WebControl gateways, which drive roller shutters, blinds and lights.
//! It offers an asynchronous, transport-agnostic API for talking to a gateway.
//!
//! Depending on your needs, you can:
//!
//! - Use [`Gateway::initialize`] to discover the installation and obtain
//!   classified cover and light channels.
//! - Use the command methods (e.g. [`Gateway::open`]) and [`Gateway::poll`]
//!   to control channels and track their state.
//! - Work directly with raw telegrams using [`Gateway::send`].
//!
//! # Getting started
//!
//! The gateway accepts telegrams via plain HTTP. If you enable the `http`
//! feature (enabled by default), you can connect to it using [`http::connect`]:
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> webcontrol::Result<(), webcontrol::http::HttpError> {
//! let config = webcontrol::http::HttpConfig::new("http://192.168.1.50");
//! let gateway = webcontrol::http::connect(&config)?;
//! let inst = gateway.initialize(&webcontrol::ScanOptions::default()).await?;
//!
//! for cover in &inst.covers {
//!     println!("{}: {:?}", cover.name, gateway.poll_channel(cover).await?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol details
//!
//! Every request is a single telegram, sent hex-encoded as a query parameter
//! of `GET /protocol.xml`. A telegram consists of the command prefix `0x90`,
//! a sequence counter, the payload length and up to 46 payload bytes.
//! The first payload byte selects the command.
//!
//! The gateway answers with an XML document containing a response identifier,
//! the echoed sequence counter and command-specific elements.
//! It only handles one request at a time and answers with a busy
//! response identifier while occupied. Requests are therefore serialized
//! and repeated if the gateway is busy or answers with a stale counter.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod command;
pub mod frame;
mod gateway;
pub mod response;
mod setup;
pub mod topology;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;

pub use gateway::{CauseRecord, ExchangeOptions, Gateway, Language, SessionInfo, StateSnapshot};
pub use setup::{Installation, ScanOptions};

use strum::{Display, FromRepr};

/// A specialized [`Result`] type for [`Gateway`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include transport-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Gateway`] operations.
///
/// The generic parameter `E` allows the error type to carry a transport-specific error.
///
/// Busy responses and stale sequence counters are retried internally and never
/// surface as errors. Responses with an unexpected response identifier are
/// reported as missing data by the respective methods.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(thiserror::Error, PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The telegram payload is empty or too long.
    #[error("invalid payload length: {0}")]
    InvalidPayload(usize),
    /// The channel has no room and slot coordinate.
    #[error("channel {0} is not assigned to a room")]
    UnresolvedChannel(u8),
    /// The gateway returned a document that is not well-formed XML.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// A transport-specific error.
    #[error("transport error: {0}")]
    Transport(E),
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Transport(err)
    }
}

/// Transport carrying telegrams to the gateway.
///
/// Receives a hex-encoded telegram and returns the raw response document.
/// Implementations must not retry on their own, retries are handled by [`Gateway`].
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Transport-specific error type.
    type Error: core::error::Error + Send;

    /// Sends a hex-encoded telegram and returns the response body.
    async fn request(&mut self, frame: &str) -> core::result::Result<String, Self::Error>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    async fn request(&mut self, frame: &str) -> core::result::Result<String, Self::Error> {
        (**self).request(frame).await
    }
}

/// Telegram command code, the first payload byte.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub(crate) enum Command {
    QueryRoom = 3,
    ChannelOperation = 29,
    SetAutomatic = 37,
    Poll = 39,
    QueryLanguage = 51,
    QueryChannels = 59,
    CheckClimaData = 61,
    SetAbsent = 63,
    QuerySeasonalFlag = 71,
    QueryCause = 73,
}

impl Command {
    /// Returns the response identifier of a successful reply.
    pub(crate) const fn response(self) -> ResponseId {
        match self {
            Self::QueryRoom => ResponseId::Room,
            // Polling is answered like a channel operation
            Self::ChannelOperation | Self::Poll => ResponseId::ChannelOperation,
            Self::SetAutomatic => ResponseId::Automatic,
            Self::QueryLanguage => ResponseId::Language,
            Self::QueryChannels => ResponseId::Channels,
            Self::CheckClimaData => ResponseId::ClimaData,
            Self::SetAbsent => ResponseId::Absent,
            Self::QuerySeasonalFlag => ResponseId::SeasonalFlag,
            Self::QueryCause => ResponseId::Cause,
        }
    }
}

/// Response identifier reported by the gateway.
#[non_exhaustive]
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ResponseId {
    /// Room table.
    Room = 4,
    /// Channel operation acknowledgement or polled channel state.
    ChannelOperation = 30,
    /// Automatic mode acknowledgement.
    Automatic = 38,
    /// Configured language.
    Language = 52,
    /// Channel list block.
    Channels = 60,
    /// Climate data check result.
    ClimaData = 62,
    /// Absence mode acknowledgement.
    Absent = 64,
    /// Seasonal (winter) mode flag.
    SeasonalFlag = 72,
    /// Cause of the last movement.
    Cause = 74,
    /// The gateway is occupied, the request should be repeated.
    Busy = 255,
}
