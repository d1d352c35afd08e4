use log::warn;

use crate::tracker::ContactBatch;

/// Register-addressed access to the controller. Addresses are the 16-bit
/// object-table addresses; the transport sends them little endian.
pub trait BusOps {
    type Error;

    fn read(&mut self, address: u16, buffer: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Level of the controller's message-pending (CHG) line.
pub trait PendingSignal {
    fn is_pending(&mut self) -> bool;
}

pub trait DelayOps {
    fn delay_ms(&mut self, millis: u32);
}

/// Receiver of coalesced contact batches and key transitions.
pub trait EventSink {
    fn report(&mut self, batch: &ContactBatch);

    fn report_key(&mut self, key: u8, pressed: bool) {
        let _ = (key, pressed);
    }
}

/// Retries every transfer up to `attempts` times before surfacing the last
/// bus error.
pub struct RetryBus<B> {
    inner: B,
    attempts: u8,
}

impl<B> RetryBus<B> {
    pub fn new(inner: B, attempts: u8) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: BusOps> BusOps for RetryBus<B> {
    type Error = B::Error;

    fn read(&mut self, address: u16, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let mut attempt = 1;
        loop {
            match self.inner.read(address, buffer) {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.attempts => return Err(err),
                Err(_) => {
                    warn!(
                        "mxt: read {:#06x} failed, retry {}/{}",
                        address, attempt, self.attempts
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut attempt = 1;
        loop {
            match self.inner.write(address, bytes) {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.attempts => return Err(err),
                Err(_) => {
                    warn!(
                        "mxt: write {:#06x} len={} failed, retry {}/{}",
                        address,
                        bytes.len(),
                        attempt,
                        self.attempts
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(feature = "hal")]
pub use hal::{ChangeLine, HalBus, HalDelay};

#[cfg(feature = "hal")]
mod hal {
    use embedded_hal::{
        delay::DelayNs,
        digital::InputPin,
        i2c::{I2c, Operation},
    };

    use super::{BusOps, DelayOps, PendingSignal};

    pub struct HalBus<I2C> {
        bus: I2C,
        address: u8,
    }

    impl<I2C> HalBus<I2C> {
        pub fn new(bus: I2C, address: u8) -> Self {
            Self { bus, address }
        }

        pub fn release(self) -> I2C {
            self.bus
        }
    }

    impl<I2C: I2c> BusOps for HalBus<I2C> {
        type Error = I2C::Error;

        fn read(&mut self, address: u16, buffer: &mut [u8]) -> Result<(), Self::Error> {
            self.bus
                .write_read(self.address, &address.to_le_bytes(), buffer)
        }

        fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error> {
            // Adjacent writes are merged into one transfer without a restart.
            let register = address.to_le_bytes();
            self.bus.transaction(
                self.address,
                &mut [Operation::Write(&register), Operation::Write(bytes)],
            )
        }
    }

    /// Active-low CHG line.
    pub struct ChangeLine<P> {
        pin: P,
    }

    impl<P> ChangeLine<P> {
        pub fn new(pin: P) -> Self {
            Self { pin }
        }
    }

    impl<P: InputPin> PendingSignal for ChangeLine<P> {
        fn is_pending(&mut self) -> bool {
            self.pin.is_low().unwrap_or(false)
        }
    }

    pub struct HalDelay<D> {
        delay: D,
    }

    impl<D> HalDelay<D> {
        pub fn new(delay: D) -> Self {
            Self { delay }
        }
    }

    impl<D: DelayNs> DelayOps for HalDelay<D> {
        fn delay_ms(&mut self, millis: u32) {
            self.delay.delay_ms(millis);
        }
    }
}
