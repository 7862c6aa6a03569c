/// Grouping and promotion limits for the write path.
#[derive(Debug, Clone)]
pub struct WriteGroupConfig {
    /// Hard cap on the combined byte size of one batch group.
    pub max_group_bytes: usize,
    /// Leaders at or under this size cap their group at `leader + slack`,
    /// so a small write is not stalled behind a giant group.
    pub small_group_slack_bytes: usize,
    /// Whether group leaders may promote their group to a parallel
    /// execution phase.
    pub parallel_enabled: bool,
    /// Smallest group worth promoting; below this the leader executes the
    /// whole group itself.
    pub parallel_min_writers: usize,
}

impl Default for WriteGroupConfig {
    fn default() -> Self {
        Self {
            max_group_bytes: 1 << 20,
            small_group_slack_bytes: 128 << 10,
            parallel_enabled: true,
            parallel_min_writers: 3,
        }
    }
}

impl WriteGroupConfig {
    /// Profile with the parallel phase disabled; every group is executed
    /// by its leader alone.
    pub fn serial_only() -> Self {
        Self {
            parallel_enabled: false,
            ..Self::default()
        }
    }

    /// Byte cap for a group led by a batch of `leader_bytes`.
    pub fn group_cap(&self, leader_bytes: usize) -> usize {
        if leader_bytes <= self.small_group_slack_bytes {
            leader_bytes + self.small_group_slack_bytes
        } else {
            self.max_group_bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WriteGroupConfig;

    #[test]
    fn small_leaders_get_bounded_slack() {
        let config = WriteGroupConfig::default();
        assert_eq!(config.group_cap(2048), 2048 + (128 << 10));
        assert_eq!(config.group_cap(128 << 10), (128 << 10) * 2);
    }

    #[test]
    fn large_leaders_get_the_hard_cap() {
        let config = WriteGroupConfig::default();
        assert_eq!(config.group_cap((128 << 10) + 1), 1 << 20);
        assert_eq!(config.group_cap(4 << 20), 1 << 20);
    }
}
