//! Raspberry Pi GPIO backend using `rppal` software PWM.
//!
//! Servo lines on the jib are ordinary header pins, not the two hardware PWM
//! channels, so the signal is generated by `rppal`'s software PWM thread. The
//! servos only need it while settling, which is why a channel stops the output
//! after every move.
//!
//! # Example
//!
//! ```no_run
//! use jib::hardware::rpi::RppalBus;
//! use jib::hardware::{LineId, PinNumbering, PwmBus};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut bus = RppalBus::new(PinNumbering::Board)?;
//!     let _pan = bus.claim(LineId(8))?; // BCM 14
//!     Ok(())
//! }
//! ```

use rppal::gpio::{Error as GpioError, Gpio, OutputPin};
use tracing::{debug, info};

use crate::error::{JibError, JibResult};
use crate::hardware::{DutyCycle, LineId, PinNumbering, PwmBus, PwmLine};

/// GPIO bus on a Raspberry Pi.
///
/// Opening the bus is the one-time hardware initialisation; the numbering scheme
/// is fixed for its lifetime.
pub struct RppalBus {
    gpio: Gpio,
    numbering: PinNumbering,
}

impl RppalBus {
    /// Open the GPIO peripheral.
    ///
    /// # Errors
    /// Returns `GpioUnavailable` if `/dev/gpiomem` cannot be opened.
    pub fn new(numbering: PinNumbering) -> JibResult<Self> {
        let gpio = Gpio::new().map_err(|e| JibError::GpioUnavailable(e.to_string()))?;
        info!(?numbering, "GPIO bus opened");
        Ok(Self { gpio, numbering })
    }

    /// Numbering scheme used to interpret line ids.
    pub fn numbering(&self) -> PinNumbering {
        self.numbering
    }
}

impl PwmBus for RppalBus {
    type Line = RppalLine;

    fn claim(&mut self, line: LineId) -> JibResult<RppalLine> {
        let bcm = self
            .numbering
            .to_bcm(line)
            .ok_or_else(|| JibError::hardware(line, "not a GPIO pin in this numbering"))?;

        let pin = match self.gpio.get(bcm) {
            Ok(pin) => pin,
            Err(GpioError::PinUsed(_)) => return Err(JibError::LineBusy(line)),
            Err(e) => return Err(JibError::hardware(line, e)),
        };

        debug!(%line, bcm, "GPIO line claimed for PWM");
        Ok(RppalLine {
            id: line,
            pin: pin.into_output_low(),
        })
    }
}

/// A header pin driven with software PWM. The pin is reset when dropped.
pub struct RppalLine {
    id: LineId,
    pin: OutputPin,
}

impl PwmLine for RppalLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn start(&mut self, frequency_hz: f64, duty: DutyCycle) -> JibResult<()> {
        self.pin
            .set_pwm_frequency(frequency_hz, duty.fraction())
            .map_err(|e| JibError::hardware(self.id, e))
    }

    fn stop(&mut self) -> JibResult<()> {
        self.pin
            .clear_pwm()
            .map_err(|e| JibError::hardware(self.id, e))?;
        self.pin.set_low();
        Ok(())
    }
}
