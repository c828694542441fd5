use std::collections::BTreeSet;
use crate::error::EngineError;
use crate::session::Session;
use crate::types::EngineEvent;
/// Ordered set of channel indices taking part in the power computation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelSet {
    members: BTreeSet<usize>,
}
impl ChannelSet {
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            members: indices.into_iter().collect(),
        }
    }
    /// Builds a set after checking every index against `channel_count`.
    pub fn validated(indices: &[usize], channel_count: usize) -> Result<Self, EngineError> {
        if indices.len() > channel_count || indices.iter().any(|i| *i >= channel_count) {
            return Err(EngineError::InvalidChannelRange {
                requested: indices.to_vec(),
                channel_count,
            });
        }
        Ok(Self::from_indices(indices.iter().copied()))
    }
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
    pub fn len(&self) -> usize {
        self.members.len()
    }
    pub fn contains(&self, channel: usize) -> bool {
        self.members.contains(&channel)
    }
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
    /// Drops members `>= channel_count`; returns whether anything was removed.
    pub fn retain_below(&mut self, channel_count: usize) -> bool {
        let before = self.members.len();
        self.members.retain(|c| *c < channel_count);
        self.members.len() != before
    }
}
impl Session {
    pub fn active_channels(&self) -> &ChannelSet {
        &self.channels
    }
    /// Replaces the active set. Returns `false` when it was already current.
    pub fn set_active_channels(&mut self, channels: &[usize]) -> Result<bool, EngineError> {
        let next = ChannelSet::validated(channels, self.channel_count())?;
        if next == self.channels {
            return Ok(false);
        }
        log::info!("active channels: {:?}", next.to_vec());
        self.channels = next;
        self.recalibrate();
        self.events
            .publish(EngineEvent::ChannelsChanged(self.channels.to_vec()));
        Ok(true)
    }
    pub fn activate(&mut self, channel: usize) -> Result<bool, EngineError> {
        self.check_channel(channel)?;
        let mut next = self.channels.to_vec();
        next.push(channel);
        next.sort_unstable();
        next.dedup();
        self.set_active_channels(&next)
    }
    pub fn deactivate(&mut self, channel: usize) -> Result<bool, EngineError> {
        self.check_channel(channel)?;
        let next: Vec<usize> = self.channels.iter().filter(|c| *c != channel).collect();
        self.set_active_channels(&next)
    }
    fn check_channel(&self, channel: usize) -> Result<(), EngineError> {
        let channel_count = self.channel_count();
        if channel >= channel_count {
            return Err(EngineError::InvalidChannelRange {
                requested: vec![channel],
                channel_count,
            });
        }
        Ok(())
    }
}
