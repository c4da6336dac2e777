//! Identity types for the pipeline system.
//!
//! Stage and pipe IDs are newtypes over `u32` that serve as direct array
//! indices into the arenas owned by a [`Configuration`](super::Configuration).
//! Ports are addressed by a packed [`PortId`] so that a port reference never
//! needs a pointer back into its owning stage.

use crate::pipeline::error::PipelineError;
use std::fmt;

/// Index into the stage arena of a configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    pub const INVALID: StageId = StageId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StageId(INVALID)")
        } else {
            write!(f, "StageId({})", self.0)
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether a port receives or emits elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Compact port identifier.
///
/// High 19 bits = stage index, 1 bit = direction, low 12 bits = port index.
/// Supports ~500k stages with 4096 ports per direction each. The index of a
/// removed port goes back to its stage and is handed out again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl PortId {
    const PORT_BITS: u32 = 12;
    const PORT_MASK: u32 = (1 << Self::PORT_BITS) - 1;
    const DIRECTION_BIT: u32 = 1 << Self::PORT_BITS;
    const STAGE_SHIFT: u32 = Self::PORT_BITS + 1;

    pub const MAX_PORTS: u16 = 1 << Self::PORT_BITS;
    pub const MAX_STAGES: u32 = 1 << (32 - Self::STAGE_SHIFT);

    /// Packs a port id.
    ///
    /// # Panics
    ///
    /// If `stage` or `port_index` exceed [`Self::MAX_STAGES`] or
    /// [`Self::MAX_PORTS`]. Use [`PortId::try_new`] for indices handed out
    /// while an execution runs.
    pub fn new(stage: StageId, direction: PortDirection, port_index: u16) -> Self {
        match Self::try_new(stage, direction, port_index) {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_new(
        stage: StageId,
        direction: PortDirection,
        port_index: u16,
    ) -> Result<Self, PipelineError> {
        if port_index >= Self::MAX_PORTS || stage.0 >= Self::MAX_STAGES {
            return Err(PipelineError::PortIdOutOfRange {
                stage,
                index: port_index,
            });
        }
        let dir = match direction {
            PortDirection::Input => 0,
            PortDirection::Output => Self::DIRECTION_BIT,
        };
        Ok(Self((stage.0 << Self::STAGE_SHIFT) | dir | port_index as u32))
    }

    #[inline]
    pub fn stage(self) -> StageId {
        StageId(self.0 >> Self::STAGE_SHIFT)
    }

    #[inline]
    pub fn direction(self) -> PortDirection {
        if self.0 & Self::DIRECTION_BIT == 0 {
            PortDirection::Input
        } else {
            PortDirection::Output
        }
    }

    #[inline]
    pub fn port_index(self) -> u16 {
        (self.0 & Self::PORT_MASK) as u16
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction() {
            PortDirection::Input => "in",
            PortDirection::Output => "out",
        };
        write!(
            f,
            "PortId(stage={}, {}={})",
            self.stage().0,
            dir,
            self.port_index()
        )
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into the pipe (connection) arena of a configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u32);

impl PipeId {
    pub const INVALID: PipeId = PipeId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PipeId(INVALID)")
        } else {
            write!(f, "PipeId({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id() {
        let id = StageId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!StageId::INVALID.is_valid());
    }

    #[test]
    fn test_port_id_round_trip() {
        let stage = StageId(100);
        let port = PortId::new(stage, PortDirection::Output, 7);
        assert_eq!(port.stage(), stage);
        assert_eq!(port.direction(), PortDirection::Output);
        assert_eq!(port.port_index(), 7);
    }

    #[test]
    fn test_port_id_directions_do_not_collide() {
        let stage = StageId(3);
        let input = PortId::new(stage, PortDirection::Input, 0);
        let output = PortId::new(stage, PortDirection::Output, 0);
        assert_ne!(input, output);
        assert_eq!(input.stage(), output.stage());
    }

    #[test]
    fn test_port_id_limits() {
        let stage = StageId((1 << 19) - 1);
        let port = PortId::new(stage, PortDirection::Input, 4095);
        assert_eq!(port.stage(), stage);
        assert_eq!(port.direction(), PortDirection::Input);
        assert_eq!(port.port_index(), 4095);
    }

    #[test]
    fn test_port_id_out_of_range_is_an_error() {
        assert!(matches!(
            PortId::try_new(StageId(0), PortDirection::Output, PortId::MAX_PORTS),
            Err(PipelineError::PortIdOutOfRange { index: 4096, .. })
        ));
        assert!(PortId::try_new(StageId(PortId::MAX_STAGES), PortDirection::Input, 0).is_err());
    }

    #[test]
    fn test_pipe_id() {
        let id = PipeId(5);
        assert!(id.is_valid());
        assert!(!PipeId::INVALID.is_valid());
    }
}
