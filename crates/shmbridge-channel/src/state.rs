use shmbridge_region::SharedMemory;

use crate::error::Result;

/// Size of the control-state cell in bytes.
pub const STATE_CELL_SIZE: usize = 4;

/// Browser UI state published for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    /// Push-to-talk is held; the agent should capture audio.
    Listening,
    Other(i32),
}

impl ControlState {
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            0 => ControlState::Idle,
            1 => ControlState::Listening,
            other => ControlState::Other(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ControlState::Idle => 0,
            ControlState::Listening => 1,
            ControlState::Other(raw) => raw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlState::Idle => "idle",
            ControlState::Listening => "listening",
            ControlState::Other(_) => "other",
        }
    }
}

/// A 4-byte little-endian `i32` cell at offset 0 of a region.
///
/// A single aligned word, so reads are never torn in practice and no
/// revalidation is done.
#[derive(Debug)]
pub struct StateCell<M> {
    mem: M,
}

impl<M: SharedMemory> StateCell<M> {
    pub fn new(mem: M) -> Self {
        Self { mem }
    }

    pub fn read(&self) -> Result<ControlState> {
        let mut raw = [0u8; STATE_CELL_SIZE];
        self.mem.read_at(0, &mut raw)?;
        Ok(ControlState::from_wire(i32::from_le_bytes(raw)))
    }

    pub fn write(&self, state: ControlState) -> Result<()> {
        self.mem.write_at(0, &state.to_wire().to_le_bytes())?;
        Ok(())
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }
}

#[cfg(test)]
mod tests {
    use shmbridge_region::HeapRegion;

    use super::*;
    use crate::error::ChannelError;

    #[test]
    fn fresh_cell_reads_idle() {
        let cell = StateCell::new(HeapRegion::new(STATE_CELL_SIZE));
        assert_eq!(cell.read().unwrap(), ControlState::Idle);
    }

    #[test]
    fn write_is_visible_to_other_attachment() {
        let region = HeapRegion::new(STATE_CELL_SIZE);
        let ui = StateCell::new(region.clone());
        let agent = StateCell::new(region.clone());

        ui.write(ControlState::Listening).unwrap();
        assert_eq!(agent.read().unwrap(), ControlState::Listening);
        assert_eq!(region.snapshot(), 1i32.to_le_bytes().to_vec());

        ui.write(ControlState::Other(-3)).unwrap();
        assert_eq!(agent.read().unwrap(), ControlState::Other(-3));
    }

    #[test]
    fn undersized_region_is_an_error() {
        let cell = StateCell::new(HeapRegion::new(2));
        assert!(matches!(cell.read(), Err(ChannelError::Region(_))));
    }
}
