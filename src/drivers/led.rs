//! Blink driver for the command-channel output.
//!
//! One pulse is: drive high, wait, drive low, wait.  The whole sequence
//! blocks the caller.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::warn;

pub struct Blinker<P, D> {
    pin: P,
    delay: D,
    pulses: u8,
    delay_ms: u32,
}

impl<P: OutputPin, D: DelayNs> Blinker<P, D> {
    pub fn new(pin: P, delay: D, pulses: u8, delay_ms: u32) -> Self {
        Self {
            pin,
            delay,
            pulses,
            delay_ms,
        }
    }

    /// Emit the configured pulse train.  Returns the number of complete
    /// pulses; a pin error aborts the train.
    pub fn blink(&mut self) -> u8 {
        for done in 0..self.pulses {
            if let Err(e) = self.pulse() {
                warn!("LED: pin error after {} pulses: {:?}", done, e);
                // Best effort to leave the output off.
                let _ = self.pin.set_low();
                return done;
            }
        }
        self.pulses
    }

    fn pulse(&mut self) -> Result<(), P::Error> {
        self.pin.set_high()?;
        self.delay.delay_ms(self.delay_ms);
        self.pin.set_low()?;
        self.delay.delay_ms(self.delay_ms);
        Ok(())
    }

    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}
