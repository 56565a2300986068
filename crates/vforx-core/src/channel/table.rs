use super::{Channel, ChannelError};

/// Ordered channels with a selected entry and dense bus ports.
pub struct ChannelTable {
    channels: Vec<Channel>,
    current: usize,
    capacity: usize,
}

impl ChannelTable {
    pub fn new(capacity: usize, first: Channel) -> Self {
        Self {
            channels: vec![first],
            current: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.channels.len() >= self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        debug_assert!(index < self.channels.len());
        self.current = index;
    }

    pub fn active_count(&self) -> usize {
        self.channels.iter().filter(|c| c.port.is_some()).count()
    }

    /// Appends `channel`, assigning it the next index.
    pub fn push(&mut self, mut channel: Channel) -> Result<usize, ChannelError> {
        if self.is_full() {
            return Err(ChannelError::CapacityExhausted(self.capacity));
        }
        let index = self.channels.len();
        channel.index = index;
        self.channels.push(channel);
        Ok(index)
    }

    /// Port the next activated channel receives.
    pub fn next_port(&self) -> usize {
        self.active_count()
    }

    /// Closes the gap left by `freed`: the channel on the highest port moves into it.
    ///
    /// Returns `(channel index, previous port)` of the moved channel, if any.
    pub fn compact_ports(&mut self, freed: usize) -> Option<(usize, usize)> {
        let (pos, highest) = self
            .channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.port.map(|p| (i, p)))
            .max_by_key(|(_, p)| *p)?;
        if highest <= freed {
            return None;
        }
        self.channels[pos].port = Some(freed);
        Some((pos, highest))
    }

    /// Removes `index`; the last entry takes its slot and index.
    ///
    /// Returns the removed channel and the old index of the moved entry, if any.
    pub fn swap_remove(&mut self, index: usize) -> (Channel, Option<usize>) {
        let last = self.channels.len() - 1;
        let removed = self.channels.swap_remove(index);
        if index == last {
            return (removed, None);
        }
        self.channels[index].index = index;
        (removed, Some(last))
    }

    /// Every active channel holds a distinct port in `0..active_count`.
    pub fn ports_are_dense(&self) -> bool {
        let mut ports: Vec<usize> = self.channels.iter().filter_map(|c| c.port).collect();
        ports.sort_unstable();
        ports.iter().enumerate().all(|(i, p)| i == *p)
    }
}
