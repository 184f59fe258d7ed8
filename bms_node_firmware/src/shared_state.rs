//! src/shared_state.rs

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::PubSubChannel;
use ltc6804_chain::{AdcMode, CELLS_PER_CHIP};

use crate::config::CHAIN_LENGTH;

/// Snapshot of the whole stack broadcast by the AFE task after every poll.
/// It must be `Copy` to be used in a PubSubChannel.
#[derive(Clone, Copy, defmt::Format)]
pub struct ChainReadings {
    pub cell_mv: [[u16; CELLS_PER_CHIP]; CHAIN_LENGTH],
    pub gpio_mv: [[u16; 5]; CHAIN_LENGTH],
    pub sum_of_cells_mv: [u32; CHAIN_LENGTH],
    pub die_temp_c: [f32; CHAIN_LENGTH],
    /// Per-chip PEC result of this poll, false if any group failed.
    pub pec_ok: [bool; CHAIN_LENGTH],
    pub min_cell_mv: u16,
    pub max_cell_mv: u16,
    /// Running totals since boot.
    pub pec_errors: u32,
    pub transfers_ok: u32,
    pub transfers_failed: u32,
}

impl Default for ChainReadings {
    fn default() -> Self {
        Self {
            cell_mv: [[0; CELLS_PER_CHIP]; CHAIN_LENGTH],
            gpio_mv: [[0; 5]; CHAIN_LENGTH],
            sum_of_cells_mv: [0; CHAIN_LENGTH],
            die_temp_c: [0.0; CHAIN_LENGTH],
            pec_ok: [false; CHAIN_LENGTH],
            min_cell_mv: 0,
            max_cell_mv: 0,
            pec_errors: 0,
            transfers_ok: 0,
            transfers_failed: 0,
        }
    }
}

/// The PubSubChannel for broadcasting chain readings.
///
/// This channel has a buffer for 2 messages, can support up to 3 subscribers,
/// and only ever expects 1 publisher.
pub static CHAIN_CHANNEL: PubSubChannel<CriticalSectionRawMutex, ChainReadings, 2, 3, 1> = PubSubChannel::new();

/// The commands that can be sent to the AFE task.
#[derive(Clone, Copy, defmt::Format)]
pub enum AfeCommand {
    /// Discharge switch mask for one chip, applied with the next configuration write.
    SetDischarge { chip: u8, cells: u16 },
    SetAdcMode(AdcMode),
    RunSelfTest,
}

/// The PubSubChannel for sending commands to the AFE task.
pub static AFE_COMMAND_CHANNEL: PubSubChannel<CriticalSectionRawMutex, AfeCommand, 2, 1, 3> = PubSubChannel::new();
