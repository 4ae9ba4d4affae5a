use anyhow::{anyhow, Context};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, InputOutput, PinDriver, Pull},
};
use log::{info, warn};

use wifi_clock_common::{DigitSegments, DisplayHardwareConfig, SegmentDisplay};

const CMD_DATA_AUTO_INCREMENT: u8 = 0x40;
const CMD_ADDRESS_DIGIT_0: u8 = 0xC0;
const CMD_DISPLAY_ON: u8 = 0x88;
const BIT_DELAY_US: u32 = 5;

type OpenDrainPin = PinDriver<'static, AnyIOPin, InputOutput>;

enum Tm1637Backend {
    Gpio { clk: OpenDrainPin, dio: OpenDrainPin },
    Disabled,
}

/// Bit-banged TM1637 4-digit LED driver (two-wire, LSB first, ACK per byte).
pub struct Tm1637 {
    backend: Tm1637Backend,
    brightness: u8,
    failed_writes: u64,
}

impl Tm1637 {
    pub fn new(hw: &DisplayHardwareConfig) -> anyhow::Result<Self> {
        if hw.clk_pin < 0 || hw.dio_pin < 0 {
            return Err(anyhow!(
                "invalid display pins clk={} dio={}",
                hw.clk_pin,
                hw.dio_pin
            ));
        }

        let clk = open_drain(hw.clk_pin).context("failed to init TM1637 CLK pin")?;
        let dio = open_drain(hw.dio_pin).context("failed to init TM1637 DIO pin")?;

        Ok(Self {
            backend: Tm1637Backend::Gpio { clk, dio },
            brightness: hw.brightness.min(DisplayHardwareConfig::MAX_BRIGHTNESS),
            failed_writes: 0,
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: Tm1637Backend::Disabled,
            brightness: 0,
            failed_writes: 0,
        }
    }

    fn write_frame(&mut self, segments: &DigitSegments) -> anyhow::Result<()> {
        let brightness = self.brightness;
        let Tm1637Backend::Gpio { clk, dio } = &mut self.backend else {
            return Ok(());
        };

        transfer(clk, dio, &[CMD_DATA_AUTO_INCREMENT])?;

        let mut frame = [0_u8; 5];
        frame[0] = CMD_ADDRESS_DIGIT_0;
        frame[1..].copy_from_slice(segments);
        transfer(clk, dio, &frame)?;

        transfer(clk, dio, &[CMD_DISPLAY_ON | brightness])
    }
}

impl SegmentDisplay for Tm1637 {
    fn set_brightness(&mut self, level: u8) {
        self.brightness = level.min(DisplayHardwareConfig::MAX_BRIGHTNESS);
        let brightness = self.brightness;
        if let Tm1637Backend::Gpio { clk, dio } = &mut self.backend {
            match transfer(clk, dio, &[CMD_DISPLAY_ON | brightness]) {
                Ok(()) => info!("display brightness set to {brightness}"),
                Err(err) => warn!("failed to set display brightness: {err:#}"),
            }
        }
    }

    fn write_segments(&mut self, segments: &DigitSegments) {
        if let Err(err) = self.write_frame(segments) {
            self.failed_writes = self.failed_writes.saturating_add(1);
            // Log the first failure and every 60th after it.
            if self.failed_writes % 60 == 1 {
                warn!(
                    "display write failed ({} total): {err:#}",
                    self.failed_writes
                );
            }
        }
    }
}

fn open_drain(pin: i32) -> anyhow::Result<OpenDrainPin> {
    let mut driver = PinDriver::input_output_od(unsafe { AnyIOPin::new(pin) })?;
    driver.set_pull(Pull::Up)?;
    driver.set_high()?;
    Ok(driver)
}

/// One start/stop framed transfer.
fn transfer(clk: &mut OpenDrainPin, dio: &mut OpenDrainPin, bytes: &[u8]) -> anyhow::Result<()> {
    start(clk, dio)?;
    for byte in bytes {
        write_byte(clk, dio, *byte)?;
    }
    stop(clk, dio)
}

fn start(clk: &mut OpenDrainPin, dio: &mut OpenDrainPin) -> anyhow::Result<()> {
    clk.set_high()?;
    dio.set_high()?;
    Ets::delay_us(BIT_DELAY_US);
    dio.set_low()?;
    Ets::delay_us(BIT_DELAY_US);
    Ok(())
}

fn stop(clk: &mut OpenDrainPin, dio: &mut OpenDrainPin) -> anyhow::Result<()> {
    clk.set_low()?;
    dio.set_low()?;
    Ets::delay_us(BIT_DELAY_US);
    clk.set_high()?;
    Ets::delay_us(BIT_DELAY_US);
    dio.set_high()?;
    Ets::delay_us(BIT_DELAY_US);
    Ok(())
}

fn write_byte(clk: &mut OpenDrainPin, dio: &mut OpenDrainPin, byte: u8) -> anyhow::Result<()> {
    for bit in 0..8 {
        clk.set_low()?;
        if byte & (1 << bit) != 0 {
            dio.set_high()?;
        } else {
            dio.set_low()?;
        }
        Ets::delay_us(BIT_DELAY_US);
        clk.set_high()?;
        Ets::delay_us(BIT_DELAY_US);
    }

    // Ninth clock: release DIO and let the chip pull it low as ACK.
    clk.set_low()?;
    dio.set_high()?;
    Ets::delay_us(BIT_DELAY_US);
    clk.set_high()?;
    Ets::delay_us(BIT_DELAY_US);
    let acked = dio.is_low();
    clk.set_low()?;
    Ets::delay_us(BIT_DELAY_US);

    if acked {
        Ok(())
    } else {
        Err(anyhow!("TM1637 did not acknowledge byte {byte:#04x}"))
    }
}
