//! Gateway response decoding.
//!
//! The gateway answers every telegram with a small XML document.
//! Only a fixed set of element names is meaningful; these are represented by [`Tag`].
//! Some tags repeat within a document (e.g. one `kanalname` element per channel),
//! their values are collected in document order.

use crate::ResponseId;
use log::{debug, trace};
use quick_xml::{Reader, events::Event};
use std::{borrow::Cow, collections::BTreeMap};
use strum::{Display, EnumString, IntoStaticStr};

/// Error type for strict response parsing.
///
/// Only returned by [`ResponseRecord::parse`], the tolerant [`decode`]
/// function maps any of these to a record that is not [`ResponseRecord::is_ok`].
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The XML reader rejected the document.
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Element text could not be unescaped or is not valid UTF-8.
    #[error("invalid element text: {0}")]
    Text(String),
    /// The document ended with unclosed elements.
    #[error("unexpected end of document")]
    UnexpectedEof,
    /// The document does not contain a root element.
    #[error("missing root element")]
    MissingRoot,
}

/// Known response element.
#[derive(
    EnumString, IntoStaticStr, Display, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug,
)]
pub enum Tag {
    /// Response identifier, see [`ResponseId`].
    #[strum(serialize = "responseID")]
    ResponseId,
    /// Echoed sequence counter.
    #[strum(serialize = "befehlszaehler")]
    Sequence,
    /// Configured user interface language.
    #[strum(serialize = "sprache")]
    Language,
    /// Channel name (repeats per channel).
    #[strum(serialize = "kanalname")]
    ChannelName,
    /// Product type code (repeats per channel).
    #[strum(serialize = "produkttyp")]
    ProductType,
    /// Last known position (repeats per channel).
    #[strum(serialize = "lastp")]
    LastPosition,
    /// Last known slat angle (repeats per channel).
    #[strum(serialize = "lastw")]
    LastAngle,
    /// Maximum slat angle (repeats per channel).
    #[strum(serialize = "maxw")]
    MaxAngle,
    /// Minimum slat angle (repeats per channel).
    #[strum(serialize = "minw")]
    MinAngle,
    /// Wind alarm state (repeats per channel).
    #[strum(serialize = "winakt")]
    WindActive,
    /// Winter mode flag.
    #[strum(serialize = "winterakt")]
    WinterActive,
    /// Climate data check result.
    #[strum(serialize = "erfolg")]
    Success,
    /// Room name.
    #[strum(serialize = "raumname")]
    RoomName,
    /// Channel list index assigned to a room slot (repeats per slot).
    #[strum(serialize = "clikanalindex")]
    SlotChannelIndex,
    /// Polled position.
    #[strum(serialize = "position")]
    Position,
    /// Polled slat angle.
    #[strum(serialize = "winkel")]
    Angle,
    /// Cause of the most recent movement.
    #[strum(serialize = "cliausl")]
    Cause,
    /// Absence mode flag.
    #[strum(serialize = "abwesend")]
    Absent,
    /// Automatic mode flag.
    #[strum(serialize = "automatik")]
    Automatic,
}

impl Tag {
    /// Returns `true` if the element may occur multiple times in one response.
    #[must_use]
    pub const fn is_repeated(self) -> bool {
        matches!(
            self,
            Self::ChannelName
                | Self::ProductType
                | Self::LastPosition
                | Self::LastAngle
                | Self::MaxAngle
                | Self::MinAngle
                | Self::WindActive
                | Self::SlotChannelIndex
        )
    }

    /// Returns `true` if the element holds a name that is never read as a number.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::ChannelName | Self::RoomName)
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        std::str::from_utf8(name).ok()?.parse().ok()
    }
}

/// The value of a single response element.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum FieldValue {
    /// Integer value.
    Number(i64),
    /// Trimmed text.
    Text(String),
}

impl FieldValue {
    fn parse(text: &str) -> Self {
        let text = text.trim();

        text.parse()
            .map_or_else(|_| Self::Text(text.to_string()), Self::Number)
    }

    /// Returns the value as an integer, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(num) => Some(*num),
            Self::Text(_) => None,
        }
    }

    /// Returns the value as text, rendering numbers in decimal.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Number(num) => Cow::Owned(num.to_string()),
            Self::Text(text) => Cow::Borrowed(text),
        }
    }
}

/// A decoded response element: either a single value or a repeated sequence.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Field {
    /// Single value of a non-repeating tag.
    Scalar(FieldValue),
    /// Values of a repeating tag in document order.
    Sequence(Vec<FieldValue>),
}

/// Decoded gateway response.
///
/// Created once per exchange and never modified afterwards.
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct ResponseRecord {
    fields: BTreeMap<Tag, Field>,
    ok: bool,
}

impl ResponseRecord {
    /// Parses a response document.
    ///
    /// Missing elements are not an error, only a malformed document is.
    ///
    /// # Errors
    ///
    /// - [`DecodeError`] if the document is not well-formed.
    pub fn parse(xml: &str) -> Result<Self, DecodeError> {
        let mut reader = Reader::from_str(xml);
        let mut rec = Self::default();
        let mut depth = 0usize;
        let mut has_root = false;
        // Known element currently being read, with its depth and text
        let mut current: Option<(Tag, usize, String)> = None;

        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event()? {
                Event::Start(elem) => {
                    depth += 1;
                    has_root = true;

                    if current.is_none() {
                        current = Tag::from_name(elem.name().as_ref())
                            .map(|tag| (tag, depth, String::new()));
                    }
                }
                Event::Empty(elem) => {
                    has_root = true;

                    if current.is_none() {
                        if let Some(tag) = Tag::from_name(elem.name().as_ref()) {
                            rec.insert(tag, "");
                        }
                    }
                }
                Event::Text(text) => {
                    if let Some((_, _, buf)) = &mut current {
                        let text = text
                            .unescape()
                            .map_err(|err| DecodeError::Text(err.to_string()))?;

                        buf.push_str(&text);
                    } else if depth == 0 {
                        // Character data outside of the root element
                        return Err(DecodeError::MissingRoot);
                    }
                }
                Event::CData(data) => {
                    if let Some((_, _, buf)) = &mut current {
                        let text = std::str::from_utf8(&data)
                            .map_err(|err| DecodeError::Text(err.to_string()))?;

                        buf.push_str(text);
                    }
                }
                Event::End(_) => {
                    if let Some((tag, _, buf)) = current.take_if(|(_, d, _)| *d == depth) {
                        rec.insert(tag, &buf);
                    }

                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth > 0 {
            return Err(DecodeError::UnexpectedEof);
        }

        if !has_root {
            return Err(DecodeError::MissingRoot);
        }

        rec.ok = rec.response_id().is_some() && rec.sequence().is_some();

        trace!("Decoded response: {rec:?}");

        Ok(rec)
    }

    fn insert(&mut self, tag: Tag, text: &str) {
        let val = if tag.is_text() {
            FieldValue::Text(text.trim().to_string())
        } else {
            FieldValue::parse(text)
        };

        if tag.is_repeated() {
            match self
                .fields
                .entry(tag)
                .or_insert_with(|| Field::Sequence(Vec::new()))
            {
                Field::Sequence(vals) => vals.push(val),
                Field::Scalar(_) => {}
            }
        } else {
            // First occurrence wins for single-valued elements
            self.fields.entry(tag).or_insert(Field::Scalar(val));
        }
    }

    /// Returns `true` if both response identifier and echoed counter are present.
    ///
    /// This does not imply that the response belongs to the request that caused it,
    /// compare [`ResponseRecord::sequence`] for that.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Returns the raw response identifier.
    #[must_use]
    pub fn response_id(&self) -> Option<u8> {
        self.number(Tag::ResponseId)
            .and_then(|id| u8::try_from(id).ok())
    }

    /// Returns `true` if the response identifier equals `id`.
    #[must_use]
    pub fn is(&self, id: ResponseId) -> bool {
        self.response_id() == Some(id as u8)
    }

    /// Returns the echoed sequence counter.
    #[must_use]
    pub fn sequence(&self) -> Option<u8> {
        self.number(Tag::Sequence)
            .and_then(|seq| u8::try_from(seq).ok())
    }

    /// Returns the decoded element for `tag`, if present.
    #[must_use]
    pub fn get(&self, tag: Tag) -> Option<&Field> {
        self.fields.get(&tag)
    }

    /// Returns the integer value of a single-valued element.
    #[must_use]
    pub fn number(&self, tag: Tag) -> Option<i64> {
        match self.fields.get(&tag)? {
            Field::Scalar(val) => val.as_number(),
            Field::Sequence(_) => None,
        }
    }

    /// Returns the text of a single-valued element.
    #[must_use]
    pub fn text(&self, tag: Tag) -> Option<Cow<'_, str>> {
        match self.fields.get(&tag)? {
            Field::Scalar(val) => Some(val.as_text()),
            Field::Sequence(_) => None,
        }
    }

    /// Returns the values of a repeated element as integers.
    ///
    /// Values that are not numeric are returned as `None`,
    /// an absent element yields an empty sequence.
    #[must_use]
    pub fn numbers(&self, tag: Tag) -> Vec<Option<i64>> {
        self.sequence_of(tag).iter().map(FieldValue::as_number).collect()
    }

    /// Returns the values of a repeated element as text.
    #[must_use]
    pub fn texts(&self, tag: Tag) -> Vec<String> {
        self.sequence_of(tag)
            .iter()
            .map(|val| val.as_text().into_owned())
            .collect()
    }

    fn sequence_of(&self, tag: Tag) -> &[FieldValue] {
        match self.fields.get(&tag) {
            Some(Field::Sequence(vals)) => vals,
            Some(Field::Scalar(val)) => core::slice::from_ref(val),
            None => &[],
        }
    }
}

/// Decodes a response document tolerantly.
///
/// A malformed document yields an empty record that is not [`ResponseRecord::is_ok`].
#[must_use]
pub fn decode(xml: &str) -> ResponseRecord {
    ResponseRecord::parse(xml).unwrap_or_else(|err| {
        debug!("Failed to decode response: {err}");

        ResponseRecord::default()
    })
}
