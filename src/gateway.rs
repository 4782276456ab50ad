//! Serialized gateway access.
//!
//! A [`Gateway`] owns the transport, the sequence counter and all state
//! derived from responses. Every exchange runs while holding a single lock,
//! so concurrent callers are served strictly one after another.

use crate::{
    Command, Error, ResponseId, Result, Transport,
    command::{ChannelCommand, Intent},
    frame::{self, SequenceCounter},
    response::{ResponseRecord, Tag},
    topology::{BLOCK_SIZE, ChannelRecord, RoomScan, ScanEnd, TopologyMatrix, channels_from_block},
};
use log::{debug, trace, warn};
use std::{collections::BTreeMap, time::Duration};
use strum::{Display, FromRepr};
use tokio::{sync::Mutex, time};

/// Retry behavior of a single exchange.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ExchangeOptions {
    /// Total number of attempts before giving up on a busy or stale response.
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(150),
        }
    }
}

/// User interface language configured on the gateway.
#[non_exhaustive]
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Language {
    /// German.
    German,
    /// English.
    English,
    /// French.
    French,
    /// Italian.
    Italian,
    /// Spanish.
    Spanish,
}

/// Gateway-wide settings reported during the session.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct SessionInfo {
    /// Raw language code, see [`Language`].
    pub language: Option<u8>,
    /// Winter mode flag (1 if active).
    pub winter_active: Option<u8>,
    /// Result of the climate data check.
    pub clima_check: Option<u8>,
    /// Last acknowledged absence mode.
    pub absent: Option<bool>,
    /// Last acknowledged automatic mode.
    pub automatic: Option<bool>,
}

impl SessionInfo {
    /// Returns the configured language, if known.
    #[must_use]
    pub fn language(&self) -> Option<Language> {
        Language::from_repr(self.language?)
    }
}

/// Most recently polled state of a channel.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct StateSnapshot {
    /// Room index.
    pub room: u8,
    /// Slot index within the room.
    pub channel: u8,
    /// Position on the 0..200 scale.
    pub last_position: Option<u8>,
    /// Slat angle.
    pub last_angle: Option<i32>,
}

/// Cause of the most recent movement of a channel.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct CauseRecord {
    /// Room index.
    pub room: u8,
    /// Slot index within the room.
    pub channel: u8,
    /// Index in the gateway's channel list.
    pub channel_index: u8,
    /// Raw cause code.
    pub cause_code: Option<i64>,
}

/// Outcome of evaluating a single response.
enum Verdict {
    Accept,
    Busy,
    Stale,
}

/// State guarded by the gateway lock.
#[derive(Debug)]
struct Session<T> {
    transport: T,
    counter: SequenceCounter,
    info: SessionInfo,
    states: BTreeMap<(u8, u8), StateSnapshot>,
    causes: BTreeMap<u8, CauseRecord>,
}

impl<T: Transport> Session<T> {
    /// Performs a single request/response cycle.
    ///
    /// Each attempt encodes the payload with a fresh sequence value, transmits it,
    /// decodes the reply and evaluates it. Busy and stale replies are repeated
    /// until `opts.max_retries` attempts have been made, after which the last
    /// reply is returned as-is.
    async fn exchange(
        &mut self,
        payload: &[u8],
        opts: &ExchangeOptions,
    ) -> Result<ResponseRecord, T::Error> {
        let attempts = opts.max_retries.max(1);
        let mut attempt = 1;

        loop {
            let (seq, hex) = frame::encode(&mut self.counter, payload)?;
            let body = self.transport.request(&hex).await?;

            trace!("Response body: {body}");

            let resp = ResponseRecord::parse(&body)
                .map_err(|err| Error::MalformedResponse(err.to_string()))?;

            let verdict = if resp.is(ResponseId::Busy) {
                Verdict::Busy
            } else if resp.sequence() == Some(seq) {
                Verdict::Accept
            } else {
                Verdict::Stale
            };

            match verdict {
                Verdict::Accept => return Ok(resp),
                _ if attempt >= attempts => {
                    warn!("Giving up after {attempts} attempts, returning last response");

                    return Ok(resp);
                }
                Verdict::Busy => debug!("Gateway busy (attempt {attempt}/{attempts})"),
                Verdict::Stale => debug!(
                    "Sequence mismatch: sent {seq}, received {:?} (attempt {attempt}/{attempts})",
                    resp.sequence()
                ),
            }

            time::sleep(opts.backoff).await;
            attempt += 1;
        }
    }

    async fn command(
        &mut self,
        cmd: Command,
        args: &[u8],
        opts: &ExchangeOptions,
    ) -> Result<ResponseRecord, T::Error> {
        let mut payload = Vec::with_capacity(1 + args.len());

        payload.push(cmd as u8);
        payload.extend_from_slice(args);

        trace!("Sending {cmd} command: {args:02x?}");

        self.exchange(&payload, opts).await
    }
}

/// Asynchronous gateway client.
///
/// Requires a [`Transport`] for communication, usually an
/// [`HttpTransport`](crate::http::HttpTransport).
///
/// All methods take `&self` and may be called concurrently,
/// e.g. through an [`Arc`](std::sync::Arc). Exchanges are serialized internally:
/// the lock is held for a complete exchange, including retries and their delays.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> webcontrol::Result<(), webcontrol::http::HttpError> {
/// let config = webcontrol::http::HttpConfig::new("http://192.168.1.50");
/// let gateway = webcontrol::http::connect(&config)?;
///
/// if let Some(state) = gateway.poll(0, 1).await? {
///     println!("Position: {:?}", state.last_position);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Gateway<T> {
    session: Mutex<Session<T>>,
    options: ExchangeOptions,
}

impl<T: Transport> Gateway<T> {
    /// Constructs a new gateway client using default retry options.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ExchangeOptions::default())
    }

    /// Constructs a new gateway client.
    pub fn with_options(transport: T, options: ExchangeOptions) -> Self {
        Self {
            session: Mutex::new(Session {
                transport,
                counter: SequenceCounter::default(),
                info: SessionInfo::default(),
                states: BTreeMap::new(),
                causes: BTreeMap::new(),
            }),
            options,
        }
    }

    /// Consumes the client, returning the underlying transport.
    pub fn into_transport(self) -> T {
        self.session.into_inner().transport
    }

    /// Sends a raw payload and returns the gateway's response.
    ///
    /// Busy and stale responses are retried according to the configured
    /// [`ExchangeOptions`]. Once all attempts are used up, the last response is
    /// returned without an error, so callers must not assume success.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPayload`] if the payload is empty or longer than 46 bytes.
    /// - [`Error::MalformedResponse`] if the gateway returns malformed XML.
    /// - [`Error::Transport`] for transport failures, which are never retried.
    pub async fn send(&self, payload: &[u8]) -> Result<ResponseRecord, T::Error> {
        self.send_with(payload, &self.options).await
    }

    /// Sends a raw payload using specific retry options.
    ///
    /// See [`Gateway::send`] for details.
    pub async fn send_with(
        &self,
        payload: &[u8],
        options: &ExchangeOptions,
    ) -> Result<ResponseRecord, T::Error> {
        self.session.lock().await.exchange(payload, options).await
    }

    /// Queries the configured user interface language.
    ///
    /// Returns the raw language code, or `None` if the gateway didn't report it.
    pub async fn query_language(&self) -> Result<Option<u8>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::QueryLanguage, &[0xff], &self.options)
            .await?;

        if !resp.is(Command::QueryLanguage.response()) {
            return Ok(None);
        }

        sess.info.language = to_u8(resp.number(Tag::Language));

        Ok(sess.info.language)
    }

    /// Queries whether winter mode is active.
    pub async fn query_seasonal_flag(&self) -> Result<Option<u8>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::QuerySeasonalFlag, &[], &self.options)
            .await?;

        if !resp.is(Command::QuerySeasonalFlag.response()) {
            return Ok(None);
        }

        sess.info.winter_active = to_u8(resp.number(Tag::WinterActive));

        Ok(sess.info.winter_active)
    }

    /// Triggers the gateway's climate data check and returns its result.
    pub async fn check_clima_data(&self) -> Result<Option<u8>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::CheckClimaData, &[], &self.options)
            .await?;

        if !resp.is(Command::CheckClimaData.response()) {
            return Ok(None);
        }

        sess.info.clima_check = to_u8(resp.number(Tag::Success));

        Ok(sess.info.clima_check)
    }

    /// Enables or disables absence mode.
    ///
    /// Returns the new state if the gateway acknowledged it.
    pub async fn set_absent(&self, enabled: bool) -> Result<Option<bool>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::SetAbsent, &[u8::from(enabled)], &self.options)
            .await?;

        if !resp.is(Command::SetAbsent.response()) {
            return Ok(None);
        }

        sess.info.absent = Some(enabled);

        Ok(sess.info.absent)
    }

    /// Enables or disables automatic mode.
    ///
    /// Returns the new state if the gateway acknowledged it.
    pub async fn set_automatic(&self, enabled: bool) -> Result<Option<bool>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::SetAutomatic, &[u8::from(enabled)], &self.options)
            .await?;

        if !resp.is(Command::SetAutomatic.response()) {
            return Ok(None);
        }

        sess.info.automatic = Some(enabled);

        Ok(sess.info.automatic)
    }

    /// Queries one block of the channel list, starting at `start`.
    ///
    /// Returns an empty list if the gateway answers with an unexpected response.
    pub async fn query_channel_block(&self, start: u8) -> Result<Vec<ChannelRecord>, T::Error> {
        let resp = self.fetch_channel_block(start).await?;

        if resp.is(Command::QueryChannels.response()) {
            Ok(channels_from_block(start, &resp))
        } else {
            Ok(Vec::new())
        }
    }

    async fn fetch_channel_block(&self, start: u8) -> Result<ResponseRecord, T::Error> {
        self.session
            .lock()
            .await
            .command(Command::QueryChannels, &[start], &self.options)
            .await
    }

    /// Reads the channel list block by block.
    ///
    /// Stops at the first block without channel names,
    /// at an unexpected response or once `max_elements` channels have been requested.
    pub async fn load_channels(&self, max_elements: u8) -> Result<Vec<ChannelRecord>, T::Error> {
        let mut channels = Vec::new();

        for start in (0..max_elements).step_by(BLOCK_SIZE.into()) {
            let resp = self.fetch_channel_block(start).await?;

            if !resp.is(Command::QueryChannels.response()) {
                debug!(
                    "Channel scan stopped at {start}: unexpected response {:?}",
                    resp.response_id()
                );
                break;
            }

            if resp.get(Tag::ChannelName).is_none() {
                debug!("Channel scan stopped at {start}: no more channels");
                break;
            }

            channels.extend(channels_from_block(start, &resp));
        }

        debug!("Found {} channel list entries", channels.len());

        Ok(channels)
    }

    /// Scans the room table and builds the topology matrix.
    ///
    /// The scan stops at the first room without a name, at an unexpected
    /// response or after `max_rooms` rooms; [`RoomScan::end`] reports which.
    pub async fn load_room_matrix(&self, max_rooms: u8) -> Result<RoomScan, T::Error> {
        let mut matrix = TopologyMatrix::default();

        for room in 0..max_rooms {
            let resp = self
                .session
                .lock()
                .await
                .command(Command::QueryRoom, &[room], &self.options)
                .await?;

            if !resp.is(Command::QueryRoom.response()) {
                debug!(
                    "Room scan stopped at {room}: unexpected response {:?}",
                    resp.response_id()
                );

                return Ok(RoomScan {
                    matrix,
                    end: ScanEnd::UnexpectedResponse,
                });
            }

            let name = resp.text(Tag::RoomName).unwrap_or_default();

            if name.is_empty() {
                debug!("Room scan stopped at {room}: no more rooms");

                return Ok(RoomScan {
                    matrix,
                    end: ScanEnd::EmptyRoom,
                });
            }

            matrix.add_room(room, &name, &resp.numbers(Tag::SlotChannelIndex));
        }

        Ok(RoomScan {
            matrix,
            end: ScanEnd::Limit,
        })
    }

    /// Polls the state of the channel at a room and slot.
    ///
    /// On success, the state is stored in the state cache and returned.
    /// Returns `None` and leaves the cache untouched if the gateway has no data.
    pub async fn poll(&self, room: u8, channel: u8) -> Result<Option<StateSnapshot>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::Poll, &[room, channel], &self.options)
            .await?;

        if !resp.is(Command::Poll.response()) {
            return Ok(None);
        }

        let state = StateSnapshot {
            room,
            channel,
            last_position: to_u8(
                resp.number(Tag::Position)
                    .or_else(|| resp.number(Tag::LastPosition)),
            ),
            last_angle: resp
                .number(Tag::Angle)
                .or_else(|| resp.number(Tag::LastAngle))
                .and_then(|angle| i32::try_from(angle).ok()),
        };

        sess.states.insert((room, channel), state);

        Ok(Some(state))
    }

    /// Polls the state of a resolved channel.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvedChannel`] if the channel has no room and slot coordinate.
    pub async fn poll_channel(&self, ch: &ChannelRecord) -> Result<Option<StateSnapshot>, T::Error> {
        let (room, channel) = coordinate(ch)?;

        self.poll(room, channel).await
    }

    /// Reads the cause of the most recent movement of a channel.
    ///
    /// On success, the cause is stored in the cause cache under `channel_index`.
    pub async fn read_cause(
        &self,
        room: u8,
        channel: u8,
        channel_index: u8,
    ) -> Result<Option<CauseRecord>, T::Error> {
        let mut sess = self.session.lock().await;
        let resp = sess
            .command(Command::QueryCause, &[room, channel], &self.options)
            .await?;

        if !resp.is(Command::QueryCause.response()) {
            return Ok(None);
        }

        let cause = CauseRecord {
            room,
            channel,
            channel_index,
            cause_code: resp.number(Tag::Cause),
        };

        sess.causes.insert(channel_index, cause);

        Ok(Some(cause))
    }

    /// Sends a channel operation to a room and slot.
    pub async fn channel_command(
        &self,
        room: u8,
        channel: u8,
        cmd: ChannelCommand,
    ) -> Result<ResponseRecord, T::Error> {
        let mut args = [room, channel, 0, 0, 0, 0];

        args[2..].copy_from_slice(&cmd.to_bytes());

        self.session
            .lock()
            .await
            .command(Command::ChannelOperation, &args, &self.options)
            .await
    }

    /// Executes an intent on a resolved channel.
    ///
    /// Movement intents first refresh the channel's cause record.
    /// This is a separate exchange, a failure is logged and does not prevent the command.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvedChannel`] if the channel has no room and slot coordinate.
    pub async fn execute(
        &self,
        ch: &ChannelRecord,
        intent: Intent,
    ) -> Result<ResponseRecord, T::Error> {
        let (room, channel) = coordinate(ch)?;

        if !matches!(intent, Intent::LightOn | Intent::LightOff) {
            if let Err(err) = self.read_cause(room, channel, ch.channel_index).await {
                warn!("Failed to read cause of channel {}: {err}", ch.channel_index);
            }
        }

        self.channel_command(room, channel, intent.into()).await
    }

    /// Opens a cover.
    pub async fn open(&self, ch: &ChannelRecord) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::Raise).await
    }

    /// Closes a cover.
    pub async fn close(&self, ch: &ChannelRecord) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::Lower).await
    }

    /// Stops a moving cover.
    pub async fn stop(&self, ch: &ChannelRecord) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::Stop).await
    }

    /// Moves a cover to a raw position (0 = open, 200 = closed).
    pub async fn set_position(
        &self,
        ch: &ChannelRecord,
        position: u8,
    ) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::SetPosition(position)).await
    }

    /// Switches a light on.
    pub async fn light_on(&self, ch: &ChannelRecord) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::LightOn).await
    }

    /// Switches a light off.
    pub async fn light_off(&self, ch: &ChannelRecord) -> Result<ResponseRecord, T::Error> {
        self.execute(ch, Intent::LightOff).await
    }

    /// Returns the cached state of a room and slot.
    pub async fn state(&self, room: u8, channel: u8) -> Option<StateSnapshot> {
        self.session.lock().await.states.get(&(room, channel)).copied()
    }

    /// Returns a copy of the state cache.
    pub async fn states(&self) -> BTreeMap<(u8, u8), StateSnapshot> {
        self.session.lock().await.states.clone()
    }

    /// Returns the cached cause record of a channel.
    pub async fn cause(&self, channel_index: u8) -> Option<CauseRecord> {
        self.session.lock().await.causes.get(&channel_index).copied()
    }

    /// Returns a copy of the cause cache.
    pub async fn causes(&self) -> BTreeMap<u8, CauseRecord> {
        self.session.lock().await.causes.clone()
    }

    /// Returns the gateway-wide settings reported so far.
    pub async fn session_info(&self) -> SessionInfo {
        self.session.lock().await.info
    }
}

fn coordinate<E>(ch: &ChannelRecord) -> Result<(u8, u8), E> {
    ch.coordinate()
        .ok_or(Error::UnresolvedChannel(ch.channel_index))
}

fn to_u8(val: Option<i64>) -> Option<u8> {
    u8::try_from(val?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{ANGLE_NOT_APPLICABLE, FunctionCode},
        tests::{MockError, MockTransport, init_logger, reply},
        topology::TYPE_INVALID,
    };
    use std::sync::Arc;

    const NO_DELAY: ExchangeOptions = ExchangeOptions {
        max_retries: 3,
        backoff: Duration::ZERO,
    };

    fn shutter(room: Option<u8>, channel: Option<u8>) -> ChannelRecord {
        ChannelRecord {
            channel_index: 5,
            name: "Kitchen".to_string(),
            type_code: 3,
            last_position: None,
            last_angle: None,
            max_angle: None,
            min_angle: None,
            wind_active: None,
            room,
            channel,
        }
    }

    #[tokio::test]
    async fn send_frame() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(52, "<sprache>0</sprache>")]);
        let resp = Gateway::new(&mut mock).send(&[0x33, 0xff]).await?;

        assert!(resp.is_ok(), "response should be ok");
        assert_eq!(resp.sequence(), Some(0), "sequence should be echoed");
        assert_eq!(mock.frames, ["90000233ff"], "frames should be correct");

        Ok(())
    }

    #[tokio::test]
    async fn send_retries_busy() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(255, ""), reply(255, ""), reply(255, "")]);
        let resp = Gateway::with_options(&mut mock, NO_DELAY)
            .send(&[0x47])
            .await?;

        assert!(resp.is(ResponseId::Busy), "busy response should be returned");
        assert_eq!(mock.frames.len(), 3, "request should be sent three times");
        assert_eq!(mock.sequences(), [0, 1, 2], "each attempt should use a new counter");

        Ok(())
    }

    #[tokio::test]
    async fn send_retries_stale_counter() -> Result<(), MockError> {
        init_logger();

        let stale = reply(72, "<winterakt>0</winterakt>").replace("{seq}", "99");
        let mut mock = MockTransport::new([stale, reply(72, "<winterakt>1</winterakt>")]);
        let resp = Gateway::with_options(&mut mock, NO_DELAY)
            .send(&[0x47])
            .await?;

        assert_eq!(resp.sequence(), Some(1), "fresh response should be returned");
        assert_eq!(resp.number(Tag::WinterActive), Some(1), "fresh value should be returned");
        assert_eq!(mock.frames.len(), 2, "request should be sent twice");

        Ok(())
    }

    #[tokio::test]
    async fn send_retries_missing_counter() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([
            "<response><responseID>62</responseID></response>".to_string(),
            reply(62, "<erfolg>1</erfolg>"),
        ]);
        let resp = Gateway::with_options(&mut mock, NO_DELAY)
            .send(&[0x3d])
            .await?;

        assert!(resp.is_ok(), "second response should be returned");
        assert_eq!(mock.frames.len(), 2, "request should be sent twice");

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn send_backoff() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(255, ""), reply(255, ""), reply(52, "")]);
        let gateway = Gateway::new(&mut mock);
        let start = time::Instant::now();
        let resp = gateway.send(&[0x33, 0xff]).await?;

        assert!(resp.is(ResponseId::Language), "third response should be returned");
        assert!(
            start.elapsed() >= Duration::from_millis(300),
            "two backoff delays should have passed"
        );
        assert!(
            start.elapsed() < Duration::from_millis(450),
            "no delay should follow the final attempt"
        );

        Ok(())
    }

    #[tokio::test]
    async fn error_transport_not_retried() {
        init_logger();

        let mut mock = MockTransport::default();

        mock.push_failure();
        mock.push_reply(reply(52, ""));

        let res = Gateway::with_options(&mut mock, NO_DELAY)
            .send(&[0x33, 0xff])
            .await;

        assert_eq!(
            res.unwrap_err(),
            Error::Transport(MockError),
            "result should be transport error"
        );
        assert_eq!(mock.frames.len(), 1, "request should not be repeated");
    }

    #[tokio::test]
    async fn error_malformed_response() {
        init_logger();

        let mut mock = MockTransport::new(["<response><responseID>52".to_string()]);
        let res = Gateway::new(&mut mock).send(&[0x33, 0xff]).await;

        assert!(
            matches!(res, Err(Error::MalformedResponse(_))),
            "result should be malformed response error"
        );
        assert_eq!(mock.frames.len(), 1, "request should not be repeated");
    }

    #[tokio::test]
    async fn error_invalid_payload() {
        init_logger();

        let mut mock = MockTransport::default();
        let gateway = Gateway::new(&mut mock);

        assert_eq!(
            gateway.send(&[]).await.unwrap_err(),
            Error::InvalidPayload(0),
            "result should be invalid payload error"
        );
        assert_eq!(
            gateway.send(&[0x00; 47]).await.unwrap_err(),
            Error::InvalidPayload(47),
            "result should be invalid payload error"
        );

        drop(gateway);

        assert!(mock.frames.is_empty(), "nothing should be sent");
    }

    #[tokio::test]
    async fn session_queries() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([
            reply(52, "<sprache>1</sprache>"),
            reply(72, "<winterakt>1</winterakt>"),
            reply(62, "<erfolg>0</erfolg>"),
            reply(64, ""),
            reply(4, ""),
        ]);

        {
            let gateway = Gateway::new(&mut mock);

            assert_eq!(gateway.query_language().await?, Some(1), "language should be correct");
            assert_eq!(gateway.query_seasonal_flag().await?, Some(1), "flag should be correct");
            assert_eq!(gateway.check_clima_data().await?, Some(0), "check should be correct");
            assert_eq!(gateway.set_absent(true).await?, Some(true), "absence should be set");
            assert_eq!(
                gateway.set_automatic(false).await?,
                None,
                "unacknowledged mode should be absent"
            );

            let info = gateway.session_info().await;

            assert_eq!(info.language(), Some(Language::English), "language should be stored");
            assert_eq!(info.winter_active, Some(1), "flag should be stored");
            assert_eq!(info.absent, Some(true), "absence should be stored");
            assert_eq!(info.automatic, None, "automatic mode should be unknown");
        }

        assert_eq!(
            mock.payloads(),
            [vec![51, 255], vec![71], vec![61], vec![63, 1], vec![37, 0]],
            "payloads should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn load_channels_until_empty_block() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([
            reply(
                60,
                "<kanalname>a</kanalname><kanalname>b</kanalname><kanalname>c</kanalname>\
                 <kanalname>d</kanalname><produkttyp>3</produkttyp><produkttyp>3</produkttyp>\
                 <produkttyp>12</produkttyp><produkttyp>255</produkttyp>",
            ),
            reply(60, "<kanalname>e</kanalname><produkttyp>3</produkttyp>"),
            reply(60, "<produkttyp>255</produkttyp>"),
        ]);
        let channels = Gateway::new(&mut mock).load_channels(144).await?;

        assert_eq!(channels.len(), 5, "five channels should be found");
        assert_eq!(channels[4].channel_index, 4, "channel index should be correct");
        assert_eq!(channels[3].type_code, TYPE_INVALID, "type should be invalid");
        assert_eq!(
            mock.payloads(),
            [vec![59, 0], vec![59, 4], vec![59, 8]],
            "blocks should be requested in steps of four"
        );

        Ok(())
    }

    #[tokio::test]
    async fn load_channels_limit() -> Result<(), MockError> {
        init_logger();

        let block = reply(60, "<kanalname>a</kanalname><produkttyp>3</produkttyp>");
        let mut mock = MockTransport::new([block.clone(), block]);
        let channels = Gateway::new(&mut mock).load_channels(8).await?;

        assert_eq!(channels.len(), 2, "scan should stop at the element limit");
        assert_eq!(mock.frames.len(), 2, "two blocks should be requested");

        Ok(())
    }

    #[tokio::test]
    async fn load_room_matrix() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([
            reply(
                4,
                "<raumname>Living</raumname><clikanalindex>3</clikanalindex>\
                 <clikanalindex>255</clikanalindex><clikanalindex>0</clikanalindex>",
            ),
            reply(4, "<raumname>Bath</raumname><clikanalindex>255</clikanalindex>"),
            reply(4, "<raumname></raumname><clikanalindex>7</clikanalindex>"),
        ]);
        let scan = Gateway::new(&mut mock).load_room_matrix(64).await?;

        assert_eq!(scan.end, ScanEnd::EmptyRoom, "scan should stop at empty room");
        assert_eq!(scan.matrix.get(3), Some((0, 0)), "coordinate should be correct");
        assert_eq!(scan.matrix.get(0), Some((0, 2)), "coordinate should be correct");
        assert_eq!(scan.matrix.get(7), None, "empty room should be ignored");
        assert_eq!(scan.matrix.len(), 2, "unassigned slots should be skipped");
        assert_eq!(scan.matrix.room_count(), 2, "two rooms should be found");
        assert_eq!(mock.frames.len(), 3, "three rooms should be requested");

        Ok(())
    }

    #[tokio::test]
    async fn load_room_matrix_stops() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(4, "<raumname>A</raumname>"), reply(30, "")]);
        let scan = Gateway::new(&mut mock).load_room_matrix(64).await?;

        assert_eq!(
            scan.end,
            ScanEnd::UnexpectedResponse,
            "scan should stop at unexpected response"
        );

        let mut mock = MockTransport::new([
            reply(4, "<raumname>A</raumname>"),
            reply(4, "<raumname>B</raumname>"),
        ]);
        let scan = Gateway::new(&mut mock).load_room_matrix(2).await?;

        assert_eq!(scan.end, ScanEnd::Limit, "scan should stop at room limit");
        assert_eq!(scan.matrix.room_count(), 2, "two rooms should be found");

        Ok(())
    }

    #[tokio::test]
    async fn poll_updates_state_cache() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([
            reply(30, "<position>120</position><winkel>-10</winkel>"),
            reply(4, ""),
        ]);
        let gateway = Gateway::new(&mut mock);
        let state = gateway.poll(1, 2).await?;
        let expected = StateSnapshot {
            room: 1,
            channel: 2,
            last_position: Some(120),
            last_angle: Some(-10),
        };

        assert_eq!(state, Some(expected), "state should be correct");
        assert_eq!(gateway.state(1, 2).await, Some(expected), "state should be cached");
        assert_eq!(gateway.poll(1, 2).await?, None, "unexpected response should yield no data");
        assert_eq!(
            gateway.states().await.get(&(1, 2)),
            Some(&expected),
            "cache should be untouched"
        );

        drop(gateway);

        assert_eq!(mock.payloads()[0], [39, 1, 2], "payload should be correct");

        Ok(())
    }

    #[tokio::test]
    async fn poll_falls_back_to_last_values() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(30, "<lastp>80</lastp><lastw>12</lastw>")]);
        let state = Gateway::new(&mut mock).poll(0, 3).await?;

        assert_eq!(
            state,
            Some(StateSnapshot {
                room: 0,
                channel: 3,
                last_position: Some(80),
                last_angle: Some(12),
            }),
            "last position and angle should be used"
        );

        Ok(())
    }

    #[tokio::test]
    async fn open_reads_cause_first() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(74, "<cliausl>6</cliausl>"), reply(30, "")]);
        let gateway = Gateway::new(&mut mock);
        let ch = shutter(Some(1), Some(4));

        gateway.open(&ch).await?;

        assert_eq!(
            gateway.cause(5).await,
            Some(CauseRecord {
                room: 1,
                channel: 4,
                channel_index: 5,
                cause_code: Some(6),
            }),
            "cause should be cached"
        );
        assert_eq!(gateway.causes().await.len(), 1, "one cause should be cached");

        drop(gateway);

        assert_eq!(
            mock.payloads(),
            [vec![73, 1, 4], vec![29, 1, 4, 8, 0, 0, 0]],
            "payloads should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn command_despite_cause_failure() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::default();

        mock.push_failure();
        mock.push_reply(reply(30, ""));

        let gateway = Gateway::new(&mut mock);
        let resp = gateway.set_position(&shutter(Some(0), Some(0)), 150).await?;

        assert!(resp.is(ResponseId::ChannelOperation), "command should be acknowledged");
        assert_eq!(gateway.cause(5).await, None, "no cause should be cached");

        drop(gateway);

        let (hi, lo) = crate::command::encode_angle(ANGLE_NOT_APPLICABLE);

        assert_eq!(
            mock.payloads()[1],
            [29, 0, 0, FunctionCode::SetState as u8, 150, hi, lo],
            "command payload should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn light_skips_cause() -> Result<(), MockError> {
        init_logger();

        let mut mock = MockTransport::new([reply(30, ""), reply(30, "")]);
        let gateway = Gateway::new(&mut mock);
        let ch = shutter(Some(2), Some(1));

        gateway.light_on(&ch).await?;
        gateway.light_off(&ch).await?;

        drop(gateway);

        assert_eq!(
            mock.payloads(),
            [vec![29, 2, 1, 3, 100, 0x7f, 0xff], vec![29, 2, 1, 1, 0, 0x7f, 0xff]],
            "payloads should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn error_unresolved_channel() {
        init_logger();

        let mut mock = MockTransport::default();
        let gateway = Gateway::new(&mut mock);

        assert_eq!(
            gateway.close(&shutter(Some(1), None)).await.unwrap_err(),
            Error::UnresolvedChannel(5),
            "result should be unresolved channel error"
        );
        assert_eq!(
            gateway.poll_channel(&shutter(None, None)).await.unwrap_err(),
            Error::UnresolvedChannel(5),
            "result should be unresolved channel error"
        );

        drop(gateway);

        assert!(mock.frames.is_empty(), "nothing should be sent");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exchanges_are_serialized() {
        init_logger();

        let mock = MockTransport::new((0..16).map(|_| reply(52, "<sprache>2</sprache>")));
        let gateway = Arc::new(Gateway::with_options(mock, NO_DELAY));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gateway = Arc::clone(&gateway);

                tokio::spawn(async move { gateway.query_language().await })
            })
            .collect();

        for task in tasks {
            assert_eq!(
                task.await.expect("task should not panic"),
                Ok(Some(2)),
                "every exchange should succeed"
            );
        }

        let mock = Arc::try_unwrap(gateway)
            .expect("gateway should not be shared")
            .into_transport();
        let mut seqs = mock.sequences();

        seqs.sort_unstable();

        assert_eq!(seqs, (0..16).collect::<Vec<u8>>(), "counters should be unique");
    }
}
