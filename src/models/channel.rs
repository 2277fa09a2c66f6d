use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ChannelEntry, ChannelsConfig};

/// A channel as exposed to DVR clients
///
/// `number` is the stable key used in every output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub number: String,
    pub name: String,
    pub country_code: String,
    pub xmltv_id: String,
    pub call_sign: String,
}

impl Channel {
    pub fn new(number: &str, name: &str, country_code: &str, xmltv_id: &str, call_sign: &str) -> Self {
        Self {
            number: number.to_string(),
            name: name.to_string(),
            country_code: country_code.to_string(),
            xmltv_id: xmltv_id.to_string(),
            call_sign: call_sign.to_string(),
        }
    }

    /// Rewritten HLS playlist served by this proxy
    pub fn playlist_path(&self) -> String {
        format!("/channel/{}/playlist.m3u8", self.number)
    }

    /// Multiplexed MPEG-TS stream served by the tuner pool
    pub fn proxy_path(&self) -> String {
        format!("/channel/{}", self.number)
    }
}

impl From<&ChannelEntry> for Channel {
    fn from(entry: &ChannelEntry) -> Self {
        Self {
            number: entry.number.clone(),
            name: entry.name.clone(),
            country_code: entry.country_code.to_lowercase(),
            xmltv_id: entry.xmltv_id.clone(),
            call_sign: entry.call_sign.clone(),
        }
    }
}

/// Built-in channel list used when the configuration does not provide one
fn builtin_channels() -> Vec<Channel> {
    vec![
        Channel::new("31", "TNT Sports 1 UK", "uk", "TNTSport1.uk", ""),
        Channel::new("32", "TNT Sports 2 UK", "uk", "TNTSport2.uk", ""),
        Channel::new("33", "TNT Sports 3 UK", "uk", "TNTSport3.uk", ""),
        Channel::new("34", "TNT Sports 4 UK", "uk", "TNTSport4.uk", ""),
        Channel::new("35", "Sky Sports Football UK", "uk", "SkySportsFootball.uk", ""),
        Channel::new("36", "Sky Sports Arena UK", "uk", "SkySportsArena.uk", ""),
        Channel::new("37", "Sky Sports Action UK", "uk", "SkySportsAction.uk", ""),
        Channel::new("38", "Sky Sports Main Event", "uk", "SkySportsMainEvent.uk", ""),
        Channel::new("39", "Fox Sports 1 USA", "us", "FoxSports1.us", ""),
        Channel::new("40", "Tennis Channel", "us", "TennisChannel.us", "TENNIS"),
        Channel::new("41", "EuroSport 1 UK", "uk", "Eurosport1.uk", ""),
        Channel::new("42", "EuroSport 2 UK", "uk", "Eurosport2.uk", ""),
        Channel::new("43", "DAZN LaLiga 2", "es", "DaznLaLiga2.es", ""),
        Channel::new("44", "ESPN USA", "us", "ESPN.us", "ESPN"),
        Channel::new("45", "ESPN2 USA", "us", "ESPN2.us", "ESPN2"),
        Channel::new("46", "beIN Sports MENA English 3", "qa", "", ""),
        Channel::new("47", "Polsat Sport Poland", "pl", "PolsatSport.pl", ""),
        Channel::new("48", "Canal+ Sport Poland", "pl", "CanalPlusSport.pl", ""),
        Channel::new("49", "Sport TV1 Portugal", "pt", "SportTV1.pt", ""),
        Channel::new("50", "Polsat Sport Extra Poland", "pl", "PolsatSportExtra.pl", ""),
    ]
}

/// Immutable number -> channel lookup built once at startup
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<Arc<Channel>>,
    by_number: HashMap<String, usize>,
}

impl ChannelRegistry {
    /// Build the registry from explicit channels, keeping the first entry for
    /// a duplicated number.
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut list = Vec::new();
        let mut by_number = HashMap::new();
        for channel in channels {
            if by_number.contains_key(&channel.number) {
                continue;
            }
            by_number.insert(channel.number.clone(), list.len());
            list.push(Arc::new(channel));
        }
        Self {
            channels: list,
            by_number,
        }
    }

    /// Build the registry from configuration, applying the allow and exclude
    /// lists for channel numbers and country codes.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let source: Vec<Channel> = if config.entries.is_empty() {
            builtin_channels()
        } else {
            config.entries.iter().map(Channel::from).collect()
        };

        let contains = |list: &Option<Vec<String>>, value: &str| {
            list.as_ref()
                .map(|items| items.iter().any(|item| item.eq_ignore_ascii_case(value)))
        };

        Self::new(source.into_iter().filter(|channel| {
            if contains(&config.allow, &channel.number) == Some(false) {
                return false;
            }
            if contains(&config.exclude, &channel.number) == Some(true) {
                return false;
            }
            if contains(&config.country_allow, &channel.country_code) == Some(false) {
                return false;
            }
            contains(&config.country_exclude, &channel.country_code) != Some(true)
        }))
    }

    pub fn get(&self, number: &str) -> Option<Arc<Channel>> {
        self.by_number
            .get(number)
            .map(|&index| Arc::clone(&self.channels[index]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
