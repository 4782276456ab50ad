//! One-shot discovery of a gateway installation.

use crate::{
    Gateway, Result, Transport,
    topology::{ChannelRecord, Classifier, ScanEnd, TopologyMatrix, resolve},
};
use log::{debug, info, warn};

/// Limits and classification rules used during discovery.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ScanOptions {
    /// Upper bound of channel list indices to request.
    pub max_elements: u8,
    /// Upper bound of room indices to request.
    pub max_rooms: u8,
    /// Product type to capability mapping.
    pub classifier: Classifier,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_elements: 144,
            max_rooms: 64,
            classifier: Classifier::default(),
        }
    }
}

/// Discovered installation.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Installation {
    /// Raw language code.
    pub language: Option<u8>,
    /// Winter mode flag, if the query succeeded.
    pub winter_active: Option<u8>,
    /// Climate data check result, if the check succeeded.
    pub clima_check: Option<u8>,
    /// Complete channel list, including unused entries.
    pub channels: Vec<ChannelRecord>,
    /// Valid channels, with coordinates where the room table provides them.
    pub valid: Vec<ChannelRecord>,
    /// Resolved cover channels.
    pub covers: Vec<ChannelRecord>,
    /// Resolved light channels.
    pub lights: Vec<ChannelRecord>,
    /// Room and slot coordinates by channel list index.
    pub matrix: TopologyMatrix,
    /// Why the room scan stopped.
    pub scan_end: ScanEnd,
}

impl<T: Transport> Gateway<T> {
    /// Discovers the installation behind the gateway.
    ///
    /// Queries the language and the channel list, reads the seasonal flag,
    /// runs the climate data check and scans the room table, in that order.
    /// The channel list is then merged with the room table and classified.
    ///
    /// Failing seasonal flag and climate data queries are logged and don't
    /// abort the discovery.
    pub async fn initialize(&self, opts: &ScanOptions) -> Result<Installation, T::Error> {
        let language = self.query_language().await?;

        debug!("Language: {language:?}");

        let channels = self.load_channels(opts.max_elements).await?;

        let winter_active = self.query_seasonal_flag().await.unwrap_or_else(|err| {
            warn!("Failed to query seasonal flag: {err}");
            None
        });
        let clima_check = self.check_clima_data().await.unwrap_or_else(|err| {
            warn!("Failed to check climate data: {err}");
            None
        });

        let scan = self.load_room_matrix(opts.max_rooms).await?;
        let valid = resolve(&channels, &scan.matrix);
        let class = opts.classifier.classify(&valid);

        info!(
            "Discovered {} rooms, {} covers and {} lights",
            scan.matrix.room_count(),
            class.covers.len(),
            class.lights.len()
        );

        for ch in valid.iter().filter(|ch| ch.coordinate().is_none()) {
            debug!("Channel {} ({}) has no room assignment", ch.channel_index, ch.name);
        }

        Ok(Installation {
            language,
            winter_active,
            clima_check,
            channels,
            valid,
            covers: class.covers,
            lights: class.lights,
            matrix: scan.matrix,
            scan_end: scan.end,
        })
    }
}
