//! LTC6804 chain ownership: bus health counters, the readout task and command handling.

use core::convert::Infallible;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Async;
use embassy_stm32::spi::Spi;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::Subscriber;
use embassy_time::{Delay, Duration, Instant, Timer};
use ltc6804_chain::transport::TransferFault;
use ltc6804_chain::{
    AuxChannel, CellChannel, ChainConfig, ChainSession, Error, PecStatus, PortError, SelfTestReport, SpiPort,
    StatusChannel, TransferEvents,
};

use crate::config::{self, CHAIN_LENGTH};
use crate::shared_state::{AfeCommand, ChainReadings, AFE_COMMAND_CHANNEL, CHAIN_CHANNEL};

pub type ChainPort = SpiPort<Spi<'static, Async>, Output<'static>>;
pub type Session = ChainSession<'static, ChainPort, Delay, CHAIN_LENGTH>;
type ChainError = Error<PortError<embassy_stm32::spi::Error, Infallible>>;

/// Transfer counters fed by the session's bus event hooks.
pub struct BusHealth {
    completed: AtomicU32,
    failed: AtomicU32,
    not_ready: AtomicU32,
}

impl BusHealth {
    pub const fn new() -> Self {
        Self {
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            not_ready: AtomicU32::new(0),
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Bus errors and ready timeouts.
    pub fn failed(&self) -> u32 {
        self.failed.load(Ordering::Relaxed) + self.not_ready.load(Ordering::Relaxed)
    }
}

impl TransferEvents for BusHealth {
    fn on_transfer_complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&self, fault: TransferFault) {
        match fault {
            TransferFault::Bus => self.failed.fetch_add(1, Ordering::Relaxed),
            TransferFault::NotReady => self.not_ready.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub static BUS_HEALTH: BusHealth = BusHealth::new();

/// Configuration written to every chip at boot.
pub fn chain_config() -> ChainConfig {
    let mut cfg = ChainConfig::default();
    cfg.set_refon(true)
        .set_gpio_pulldown_off(config::GPIO_PULLDOWN_OFF)
        .set_undervoltage_mv(config::UNDERVOLTAGE_MV)
        .set_overvoltage_mv(config::OVERVOLTAGE_MV);
    cfg
}

pub fn log_report(report: &SelfTestReport) {
    if report.passed() {
        defmt::info!("LTC6804 self-test passed on {=usize} chips", CHAIN_LENGTH);
        return;
    }
    defmt::warn!(
        "LTC6804 self-test failed: code={=u16} pec_errors={=u32}",
        report.code(),
        report.pec_errors()
    );
    for fault in report.faults() {
        defmt::warn!("  chip {=usize}: {} (code {=u16})", fault.chip(), fault, fault.code());
    }
}

async fn handle_command(session: &mut Session, command: AfeCommand) -> Result<(), ChainError> {
    match command {
        AfeCommand::SetDischarge { chip, cells } => {
            session.set_discharge(chip as usize, cells)?;
            session.write_config().await?;
            defmt::info!("Discharge chip {=u8}: 0x{=u16:03x}", chip, cells);
        }
        AfeCommand::SetAdcMode(mode) => {
            session.set_conversion_parameters(mode, false, CellChannel::All, AuxChannel::All);
            defmt::info!("ADC mode -> {}", mode);
        }
        AfeCommand::RunSelfTest => {
            let report = session.initialize().await?;
            log_report(&report);
        }
    }
    Ok(())
}

async fn convert_and_wait(session: &mut Session, start: Conversion) -> Result<(), ChainError> {
    match start {
        Conversion::Cells => session.start_cell_conversion().await?,
        Conversion::Aux => session.start_aux_conversion().await?,
        Conversion::Status => session.start_status_conversion(StatusChannel::All).await?,
    }
    session.wait_conversion().await
}

enum Conversion {
    Cells,
    Aux,
    Status,
}

async fn poll_chain(session: &mut Session) -> Result<ChainReadings, ChainError> {
    convert_and_wait(session, Conversion::Cells).await?;
    let mut pec = session.read_cell_voltages().await?;
    convert_and_wait(session, Conversion::Aux).await?;
    pec.merge(&session.read_aux_voltages().await?);
    convert_and_wait(session, Conversion::Status).await?;
    pec.merge(&session.read_status().await?);

    Ok(readings(session, &pec))
}

fn readings(session: &Session, pec: &PecStatus<CHAIN_LENGTH>) -> ChainReadings {
    let mut r = ChainReadings {
        pec_ok: *pec.as_array(),
        pec_errors: session.pec_error_count(),
        transfers_ok: BUS_HEALTH.completed(),
        transfers_failed: BUS_HEALTH.failed(),
        min_cell_mv: u16::MAX,
        ..Default::default()
    };
    for (chip, board) in session.boards().iter().enumerate() {
        for (i, code) in board.cell_voltage.iter().enumerate() {
            let mv = ltc6804_chain::code_to_mv(*code);
            r.cell_mv[chip][i] = mv;
            if pec.is_valid(chip) {
                r.min_cell_mv = r.min_cell_mv.min(mv);
                r.max_cell_mv = r.max_cell_mv.max(mv);
            }
        }
        for gpio in 0..5 {
            r.gpio_mv[chip][gpio] = board.gpio_mv(gpio + 1).unwrap_or(0);
        }
        r.sum_of_cells_mv[chip] = board.sum_of_cells_mv();
        r.die_temp_c[chip] = board.die_temp_c();
    }
    if r.min_cell_mv == u16::MAX {
        r.min_cell_mv = 0;
    }
    r
}

#[embassy_executor::task]
pub async fn afe_task(mut session: Session) {
    let publisher = CHAIN_CHANNEL.publisher().unwrap();
    let mut command_subscriber: Subscriber<'static, CriticalSectionRawMutex, AfeCommand, 2, 1, 3> =
        AFE_COMMAND_CHANNEL.subscriber().unwrap();
    let mut last_log = Instant::now();

    loop {
        // Handle incoming commands
        while let Some(command) = command_subscriber.try_next_message_pure() {
            if let Err(e) = handle_command(&mut session, command).await {
                defmt::warn!("AFE command {} failed: {}", command, e);
            }
        }

        match poll_chain(&mut session).await {
            Ok(readings) => {
                if last_log.elapsed() >= Duration::from_millis(config::CHAIN_LOG_PERIOD_MS) {
                    last_log = Instant::now();
                    defmt::info!(
                        "Stack: min={=u16}mV max={=u16}mV pec_errors={=u32} bus ok/failed={=u32}/{=u32}",
                        readings.min_cell_mv,
                        readings.max_cell_mv,
                        readings.pec_errors,
                        readings.transfers_ok,
                        readings.transfers_failed
                    );
                    for chip in 0..CHAIN_LENGTH {
                        defmt::info!(
                            "Chip {=usize}: cells={} sum={=u32}mV die={=f32}C",
                            chip,
                            readings.cell_mv[chip],
                            readings.sum_of_cells_mv[chip],
                            readings.die_temp_c[chip]
                        );
                    }
                }
                if let Err(_e) = publisher.try_publish(readings) {
                    defmt::debug!("Chain readings dropped (no subscriber)");
                }
            }
            Err(e) => {
                defmt::warn!("Chain poll failed: {}", e);
                session.mark_asleep();
            }
        }

        Timer::after(config::POLL_PERIOD).await;
    }
}
