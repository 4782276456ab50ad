//! Telegram framing.
//!
//! Every request to the gateway is a single telegram: a three byte header
//! followed by a command payload. The header carries a fixed command prefix,
//! the current [`SequenceCounter`] value and the payload length.
//! Telegrams are hex-encoded before being placed in the request URL.

use crate::Error;
use log::trace;

/// Command prefix present in every telegram header.
pub const COMMAND_PREFIX: u8 = 0x90;

/// Maximum payload length accepted by the gateway.
pub const MAX_PAYLOAD_LEN: usize = 46;

/// Highest sequence value before the counter wraps around.
pub const MAX_SEQUENCE: u8 = 254;

/// Rolling sequence counter used to correlate requests with responses.
///
/// The gateway echoes the counter of the telegram it answers, which allows
/// stale or misattributed replies to be detected.
#[derive(PartialEq, Eq, Default, Debug)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    /// Constructs a counter starting at the given value.
    ///
    /// Values above [`MAX_SEQUENCE`] are clamped to it.
    #[must_use]
    pub fn new(start: u8) -> Self {
        Self(start.min(MAX_SEQUENCE))
    }

    /// Returns the value the next call to [`SequenceCounter::next`] will yield.
    #[must_use]
    pub fn peek(&self) -> u8 {
        self.0
    }

    /// Returns the current value and advances the counter.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u8 {
        let val = self.0;

        self.0 = if val >= MAX_SEQUENCE { 0 } else { val + 1 };

        val
    }
}

/// A single request telegram.
#[derive(PartialEq, Eq, Debug)]
pub struct Telegram<'a> {
    sequence: u8,
    payload: &'a [u8],
}

impl<'a> Telegram<'a> {
    /// Constructs a telegram with the given sequence value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPayload`] if the payload is empty or longer than [`MAX_PAYLOAD_LEN`].
    pub fn new<E>(sequence: u8, payload: &'a [u8]) -> Result<Self, Error<E>> {
        check_payload(payload)?;

        Ok(Self { sequence, payload })
    }

    /// Returns the sequence value carried in the header.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Returns the command payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Serializes header and payload into raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.payload.len());

        // Length always fits, checked on construction
        #[allow(clippy::cast_possible_truncation)]
        buf.extend_from_slice(&[COMMAND_PREFIX, self.sequence, self.payload.len() as u8]);
        buf.extend_from_slice(self.payload);

        buf
    }

    /// Serializes the telegram as lowercase hex without separators.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Builds a telegram for `payload`, consuming one value from `counter`.
///
/// Returns the consumed sequence value together with the hex-encoded frame.
/// The payload is validated first, so an invalid payload leaves the counter untouched.
///
/// # Errors
///
/// - [`Error::InvalidPayload`] if the payload is empty or longer than [`MAX_PAYLOAD_LEN`].
pub fn encode<E>(counter: &mut SequenceCounter, payload: &[u8]) -> Result<(u8, String), Error<E>> {
    check_payload(payload)?;

    let tel = Telegram::new(counter.next(), payload)?;
    let hex = tel.to_hex();

    trace!("Encoded telegram: {hex}");

    Ok((tel.sequence(), hex))
}

fn check_payload<E>(payload: &[u8]) -> Result<(), Error<E>> {
    if (1..=MAX_PAYLOAD_LEN).contains(&payload.len()) {
        Ok(())
    } else {
        Err(Error::InvalidPayload(payload.len()))
    }
}
