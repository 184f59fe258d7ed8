#![no_std]
#![no_main]

mod afe;
mod config;
mod shared_state;
mod supervisor;

use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_time::Delay;
use ltc6804_chain::frame::frame_len;
use ltc6804_chain::{ChainSession, SessionOptions, SpiPort};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::config::CHAIN_LENGTH;

const FRAME_LEN: usize = frame_len(CHAIN_LENGTH);

static TX_BUF: StaticCell<[u8; FRAME_LEN]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; FRAME_LEN]> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    use embassy_stm32::rcc::{
        ADCPrescaler, AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPreDiv, PllSource,
        Sysclk,
    };

    let mut config = embassy_stm32::Config::default();
    config.rcc.hse = Some(Hse { freq: Hertz::mhz(8), mode: HseMode::Oscillator });
    config.rcc.pll = Some(Pll { src: PllSource::HSE, prediv: PllPreDiv::DIV1, mul: PllMul::MUL9 });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre  = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV2;
    config.rcc.apb2_pre = APBPrescaler::DIV1;
    config.rcc.adc_pre  = ADCPrescaler::DIV6;

    let p = embassy_stm32::init(config);
    defmt::info!("Embassy is up.");

    // isoSPI master: LTC6804 samples on the rising edge with SCK idle high
    let mut spi_cfg = spi::Config::default();
    spi_cfg.frequency = Hertz(crate::config::SPI_FREQUENCY_HZ);
    spi_cfg.mode = spi::MODE_3;
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, p.DMA1_CH3, p.DMA1_CH2, spi_cfg);
    let cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);
    let port = SpiPort::new(spi, cs).unwrap();

    let options = SessionOptions {
        timeout_ms: crate::config::BUS_TIMEOUT_MS,
        mode: crate::config::SELF_TEST_ADC_MODE,
        ..Default::default()
    };
    let mut session: afe::Session = ChainSession::new(
        port,
        Delay,
        TX_BUF.init([0; FRAME_LEN]),
        RX_BUF.init([0; FRAME_LEN]),
        options,
        &afe::BUS_HEALTH,
    )
    .unwrap();

    session.configure(&afe::chain_config());
    if crate::config::RUN_SELF_TEST_AT_BOOT {
        match session.initialize_blocking() {
            Ok(report) => afe::log_report(&report),
            Err(e) => defmt::error!("LTC6804 self-test aborted: {}", e),
        }
    } else if let Err(e) = session.write_config_blocking() {
        defmt::error!("LTC6804 configuration write failed: {}", e);
    }

    spawner.spawn(afe::afe_task(session)).unwrap();
    spawner.spawn(supervisor::supervisor_task()).unwrap();

    // Switch the readout to its own ADC mode once the boot self-test is done
    let afe_command_publisher = shared_state::AFE_COMMAND_CHANNEL.publisher().unwrap();
    afe_command_publisher.publish(shared_state::AfeCommand::SetAdcMode(crate::config::POLL_ADC_MODE)).await;
}
