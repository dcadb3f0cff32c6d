use crate::model::{ChannelFilter, ReleaseChannel};

/// Folds command-line channel flags into a show/hide filter.
///
/// Flags are applied left to right and the last flag for a channel wins:
/// showing a channel removes it from the hidden set and vice versa, so
/// `--nightlies --no-nightlies` leaves nightly hidden. Channels never
/// mentioned stay out of both sets, and each set keeps the order channels
/// were finally placed.
#[derive(Debug, Default)]
pub struct ChannelFilterBuilder {
    filter: ChannelFilter,
}

impl ChannelFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one flag event: show (`true`) or hide (`false`) a channel.
    pub fn flag(mut self, channel: ReleaseChannel, show: bool) -> Self {
        self.filter.show_channels.retain(|c| *c != channel);
        self.filter.hide_channels.retain(|c| *c != channel);
        if show {
            self.filter.show_channels.push(channel);
        } else {
            self.filter.hide_channels.push(channel);
        }
        self
    }

    pub fn build(self) -> ChannelFilter {
        self.filter
    }
}
