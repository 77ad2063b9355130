//! Port definitions as seen by the client.

use vdec_common::{PortConfig, PortIndex, PortRequirements, MAX_BUFFERS_PER_PORT};

/// Who supplies a port's backing memory. A port never mixes the two.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BufferMode {
    #[default]
    None,
    /// Buffers created by `allocate_buffer`.
    Allocated,
    /// Client memory handed over through `use_buffer`.
    UseClient,
}

/// Snapshot of one port's settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub port: PortIndex,
    pub enabled: bool,
    /// Every slot below `actual_count` is populated.
    pub populated: bool,
    pub min_count: usize,
    pub actual_count: usize,
    pub buffer_size: usize,
    pub alignment: usize,
    pub mode: BufferMode,
}

impl PortDefinition {
    /// Build from configuration, raised to whatever the device requires.
    pub fn new(port: PortIndex, config: &PortConfig, device: Option<PortRequirements>) -> Self {
        let (min_count, size) = match device {
            Some(req) => (req.min_count.clamp(1, MAX_BUFFERS_PER_PORT), req.buffer_size),
            None => (1, 0),
        };
        Self {
            port,
            enabled: true,
            populated: false,
            min_count,
            actual_count: config.buffer_count.clamp(min_count, MAX_BUFFERS_PER_PORT),
            buffer_size: align_up(config.buffer_size.max(size), config.alignment),
            alignment: config.alignment,
            mode: BufferMode::None,
        }
    }

    /// Apply new device requirements after a settings change.
    pub fn apply_requirements(&mut self, req: PortRequirements) {
        self.min_count = req.min_count.clamp(1, MAX_BUFFERS_PER_PORT);
        self.actual_count = self.actual_count.max(self.min_count);
        self.buffer_size = align_up(req.buffer_size.max(1), self.alignment);
    }
}

fn align_up(size: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_aligned() {
        assert_eq!(align_up(1000, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn device_requirements_raise_config() {
        let cfg = PortConfig {
            buffer_count: 2,
            buffer_size: 1000,
            alignment: 16,
        };
        let def = PortDefinition::new(
            PortIndex::Output,
            &cfg,
            Some(PortRequirements {
                min_count: 5,
                buffer_size: 2000,
            }),
        );
        assert_eq!(def.min_count, 5);
        assert_eq!(def.actual_count, 5);
        assert_eq!(def.buffer_size, 2000);
        assert!(def.enabled);
        assert_eq!(def.mode, BufferMode::None);
    }

    #[test]
    fn settings_change_grows_port() {
        let mut def = PortDefinition::new(PortIndex::Output, &PortConfig::new(4, 64), None);
        def.apply_requirements(PortRequirements {
            min_count: 6,
            buffer_size: 100,
        });
        assert_eq!(def.actual_count, 6);
        assert_eq!(def.buffer_size, 100);
    }
}
