//! Installation topology.
//!
//! The gateway knows two independent views of an installation:
//!
//! - A flat channel list, queried in blocks of [`BLOCK_SIZE`], which describes
//!   each actuator (name, product type, last position...).
//! - A room table, where every room holds up to [`MAX_SLOTS`] slots that refer
//!   to entries of the channel list.
//!
//! Movement and polling telegrams address actuators by room and slot,
//! so both views have to be merged before a channel can be controlled.

use crate::response::{ResponseRecord, Tag};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, FromRepr};

/// Number of channels returned per channel list query.
pub const BLOCK_SIZE: u8 = 4;

/// Number of channel slots per room.
pub const MAX_SLOTS: usize = 10;

/// Product type code of an unused channel list entry.
pub const TYPE_INVALID: u8 = 255;

/// Slot value of a room slot without an assigned channel.
pub const SLOT_UNASSIGNED: u8 = 255;

/// Known product types.
#[non_exhaustive]
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ProductType {
    /// Roller shutter.
    Shutter = 3,
    /// Light.
    Light = 12,
    /// Unused channel.
    Invalid = 255,
}

/// A channel list entry.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ChannelRecord {
    /// Index in the gateway's channel list.
    pub channel_index: u8,
    /// User-assigned name, empty if unknown.
    pub name: String,
    /// Product type code, see [`ProductType`].
    pub type_code: u8,
    /// Last position on the 0..200 scale.
    pub last_position: Option<u8>,
    /// Last slat angle.
    pub last_angle: Option<i32>,
    /// Maximum slat angle.
    pub max_angle: Option<i32>,
    /// Minimum slat angle.
    pub min_angle: Option<i32>,
    /// Wind alarm state.
    pub wind_active: Option<u8>,
    /// Room index, once resolved.
    pub room: Option<u8>,
    /// Slot index within the room, once resolved.
    pub channel: Option<u8>,
}

impl ChannelRecord {
    /// Returns `false` if the entry is unused.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.type_code != TYPE_INVALID
    }

    /// Returns the room and slot coordinate if the channel has been resolved.
    #[must_use]
    pub fn coordinate(&self) -> Option<(u8, u8)> {
        Some((self.room?, self.channel?))
    }

    /// Returns the product type, if known.
    #[must_use]
    pub fn product_type(&self) -> Option<ProductType> {
        ProductType::from_repr(self.type_code)
    }
}

/// Builds channel records from a channel list response.
///
/// The response contains parallel sequences (names, types, positions...)
/// that may differ in length. At most [`BLOCK_SIZE`] records are produced,
/// as many as the longest sequence has values.
/// Sequences that are too short yield default values for the remaining records.
#[must_use]
pub fn channels_from_block(start: u8, resp: &ResponseRecord) -> Vec<ChannelRecord> {
    let names = resp.texts(Tag::ChannelName);
    let types = resp.numbers(Tag::ProductType);
    let last_positions = resp.numbers(Tag::LastPosition);
    let last_angles = resp.numbers(Tag::LastAngle);
    let max_angles = resp.numbers(Tag::MaxAngle);
    let min_angles = resp.numbers(Tag::MinAngle);
    let wind = resp.numbers(Tag::WindActive);

    let len = [
        names.len(),
        types.len(),
        last_positions.len(),
        last_angles.len(),
        max_angles.len(),
        min_angles.len(),
        wind.len(),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
    .min(BLOCK_SIZE as usize);

    (0..len)
        .zip(0u8..)
        .map(|(i, offset)| ChannelRecord {
            channel_index: start.saturating_add(offset),
            name: names.get(i).cloned().unwrap_or_default(),
            type_code: nth(&types, i).unwrap_or(TYPE_INVALID),
            last_position: nth(&last_positions, i),
            last_angle: nth(&last_angles, i),
            max_angle: nth(&max_angles, i),
            min_angle: nth(&min_angles, i),
            wind_active: nth(&wind, i),
            room: None,
            channel: None,
        })
        .collect()
}

fn nth<T: TryFrom<i64>>(vals: &[Option<i64>], i: usize) -> Option<T> {
    vals.get(i).copied().flatten()?.try_into().ok()
}

/// Mapping from channel list index to room and slot coordinate.
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct TopologyMatrix {
    coordinates: BTreeMap<u8, (u8, u8)>,
    rooms: BTreeMap<u8, String>,
}

impl TopologyMatrix {
    /// Records a room and the channels assigned to its slots.
    ///
    /// Only the first [`MAX_SLOTS`] slots are considered.
    /// Unassigned and non-numeric slots are skipped.
    pub fn add_room(&mut self, room: u8, name: &str, slots: &[Option<i64>]) {
        self.rooms.insert(room, name.to_string());

        for (slot, pos) in slots.iter().take(MAX_SLOTS).zip(0u8..) {
            let Some(idx) = slot.and_then(|s| u8::try_from(s).ok()) else {
                continue;
            };

            if idx != SLOT_UNASSIGNED {
                self.coordinates.insert(idx, (room, pos));
            }
        }
    }

    /// Returns the room and slot of a channel list index.
    #[must_use]
    pub fn get(&self, channel_index: u8) -> Option<(u8, u8)> {
        self.coordinates.get(&channel_index).copied()
    }

    /// Returns all resolved coordinates, ordered by channel list index.
    pub fn iter(&self) -> impl Iterator<Item = (u8, (u8, u8))> + '_ {
        self.coordinates.iter().map(|(&idx, &coord)| (idx, coord))
    }

    /// Returns the number of resolved channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    /// Returns `true` if no channel has been resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Returns the name of a discovered room.
    #[must_use]
    pub fn room_name(&self, room: u8) -> Option<&str> {
        self.rooms.get(&room).map(String::as_str)
    }

    /// Returns the number of discovered rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// Reason a room scan stopped.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ScanEnd {
    /// A room without a name was found, no more rooms are configured.
    EmptyRoom,
    /// The gateway answered with an unexpected response identifier.
    UnexpectedResponse,
    /// The configured room limit was reached.
    Limit,
}

/// Result of a room scan.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RoomScan {
    /// Discovered coordinates.
    pub matrix: TopologyMatrix,
    /// Why the scan stopped.
    pub end: ScanEnd,
}

/// Assigns room and slot coordinates to all valid channels.
///
/// Unused channels are dropped. Channels without an entry in the matrix
/// are kept, but remain unresolved.
#[must_use]
pub fn resolve(channels: &[ChannelRecord], matrix: &TopologyMatrix) -> Vec<ChannelRecord> {
    channels
        .iter()
        .filter(|ch| ch.is_valid())
        .cloned()
        .map(|mut ch| {
            if let Some((room, channel)) = matrix.get(ch.channel_index) {
                ch.room = Some(room);
                ch.channel = Some(channel);
            }

            ch
        })
        .collect()
}

/// Actuator capability class.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum Capability {
    /// Shutters, blinds and similar.
    Cover,
    /// Lights.
    Light,
}

/// Assigns product type codes to capability classes.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Classifier {
    /// Type codes controlled as covers.
    pub cover_types: BTreeSet<u8>,
    /// Type codes controlled as lights.
    pub light_types: BTreeSet<u8>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            cover_types: BTreeSet::from([ProductType::Shutter as u8]),
            light_types: BTreeSet::from([ProductType::Light as u8]),
        }
    }
}

/// Channels partitioned by capability.
#[derive(PartialEq, Eq, Default, Clone, Debug)]
pub struct Classification {
    /// Resolved cover channels.
    pub covers: Vec<ChannelRecord>,
    /// Resolved light channels.
    pub lights: Vec<ChannelRecord>,
}

impl Classifier {
    /// Returns the capability of a product type code.
    #[must_use]
    pub fn capability(&self, type_code: u8) -> Option<Capability> {
        if self.cover_types.contains(&type_code) {
            Some(Capability::Cover)
        } else if self.light_types.contains(&type_code) {
            Some(Capability::Light)
        } else {
            None
        }
    }

    /// Partitions channels by capability.
    ///
    /// Only valid channels with a resolved coordinate are actionable and classified.
    #[must_use]
    pub fn classify(&self, channels: &[ChannelRecord]) -> Classification {
        let mut res = Classification::default();

        for ch in channels
            .iter()
            .filter(|ch| ch.is_valid() && ch.coordinate().is_some())
        {
            match self.capability(ch.type_code) {
                Some(Capability::Cover) => res.covers.push(ch.clone()),
                Some(Capability::Light) => res.lights.push(ch.clone()),
                None => {}
            }
        }

        res
    }
}
