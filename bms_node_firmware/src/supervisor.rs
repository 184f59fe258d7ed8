//! Reacts to chain readings: passive balancing and self-test reruns on PEC trouble.

use ltc6804_chain::CELLS_PER_CHIP;

use crate::config::{self, CHAIN_LENGTH};
use crate::shared_state::{AfeCommand, AFE_COMMAND_CHANNEL, CHAIN_CHANNEL};

/// Cells to discharge: above the floor and more than the threshold above `min_mv`.
fn balance_mask(cells: &[u16; CELLS_PER_CHIP], min_mv: u16) -> u16 {
    let mut mask = 0;
    for (i, mv) in cells.iter().enumerate() {
        if *mv >= config::BALANCE_FLOOR_MV && mv.saturating_sub(min_mv) > config::BALANCE_THRESHOLD_MV {
            mask |= 1 << i;
        }
    }
    mask
}

#[embassy_executor::task]
pub async fn supervisor_task() {
    let mut readings = CHAIN_CHANNEL.subscriber().unwrap();
    let commands = AFE_COMMAND_CHANNEL.publisher().unwrap();
    let mut pec_errors_seen = 0u32;
    let mut discharge = [0u16; CHAIN_LENGTH];

    loop {
        let r = readings.next_message_pure().await;

        if r.pec_errors.saturating_sub(pec_errors_seen) >= config::PEC_ERRORS_BEFORE_SELF_TEST {
            defmt::warn!("PEC errors {=u32} -> {=u32}, rerunning self-test", pec_errors_seen, r.pec_errors);
            commands.publish(AfeCommand::RunSelfTest).await;
        }
        pec_errors_seen = r.pec_errors;

        if !config::ENABLE_BALANCING {
            continue;
        }
        for chip in 0..CHAIN_LENGTH {
            // stale data must not switch a discharge on
            let mask = if r.pec_ok[chip] { balance_mask(&r.cell_mv[chip], r.min_cell_mv) } else { 0 };
            if mask != discharge[chip] {
                discharge[chip] = mask;
                commands.publish(AfeCommand::SetDischarge { chip: chip as u8, cells: mask }).await;
            }
        }
    }
}
