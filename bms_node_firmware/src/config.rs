//! Compile-time knobs for the BMS node firmware.
//! Edit these constants and rebuild.
use embassy_time::Duration;
use ltc6804_chain::AdcMode;

/// Number of LTC6804-1 boards stacked on the daisy chain.
pub const CHAIN_LENGTH: usize = 2;

/// SPI clock towards the isoSPI transceiver (LTC6804 max 1 MHz).
pub const SPI_FREQUENCY_HZ: u32 = 1_000_000;

/// Blocking-mode wait for the SPI peripheral, in ms.
pub const BUS_TIMEOUT_MS: u32 = 10;

/// Run the full self-test sequence at boot. If false, only the configuration is written.
pub const RUN_SELF_TEST_AT_BOOT: bool = true;

/// ADC mode for the boot self-tests and for the periodic readout.
pub const SELF_TEST_ADC_MODE: AdcMode = AdcMode::Normal;
pub const POLL_ADC_MODE: AdcMode = AdcMode::Filtered;

pub const POLL_PERIOD: Duration = Duration::from_millis(500);

/// Cell thresholds written to VUV / VOV.
pub const UNDERVOLTAGE_MV: u16 = 3_000;
pub const OVERVOLTAGE_MV: u16 = 4_200;

/// GPIO1..5 pull-downs off (bit set = off); the GPIOs carry thermistor dividers.
pub const GPIO_PULLDOWN_OFF: u8 = 0x1F;

/// Passive balancing: discharge any cell more than the threshold above the
/// lowest cell of the stack, as long as it sits above the floor.
pub const ENABLE_BALANCING: bool = true;
pub const BALANCE_THRESHOLD_MV: u16 = 20;
pub const BALANCE_FLOOR_MV: u16 = 3_900;

/// New PEC errors between two readings that trigger a self-test rerun.
pub const PEC_ERRORS_BEFORE_SELF_TEST: u32 = 8;

pub const CHAIN_LOG_PERIOD_MS: u64 = 5_000; // log frequency of the chain readings in ms
