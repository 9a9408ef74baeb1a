/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! `embedded-hal` backend: drive the relays through any two output pins.
//!
//! This is library API for boards that have an `embedded-hal` GPIO
//! implementation.  The daemon binary only builds the simulated and sysfs
//! backends; an embedding program wires the pins in itself:
//!
//! ```ignore
//! let pins = PinPair::new(relay1_pin, relay2_pin);
//! let actuator = PulseActuator::start(Arc::new(pins));
//! ```

use std::sync::{Mutex, PoisonError};

use embedded_hal::digital::{Error as _, OutputPin};

use crate::error::ActuationFault;
use crate::output::{Channel, OutputDriver};

/// Two HAL output pins, one per channel.
pub struct PinPair<S, E> {
    start: Mutex<S>,
    end: Mutex<E>,
}

impl<S, E> PinPair<S, E>
where
    S: OutputPin + Send,
    E: OutputPin + Send,
{
    pub fn new(start: S, end: E) -> Self {
        Self {
            start: Mutex::new(start),
            end: Mutex::new(end),
        }
    }
}

fn drive<P: OutputPin>(pin: &Mutex<P>, channel: Channel, asserted: bool) -> Result<(), ActuationFault> {
    let mut pin = pin.lock().unwrap_or_else(PoisonError::into_inner);
    let result = if asserted {
        pin.set_high()
    } else {
        pin.set_low()
    };
    result.map_err(|e| ActuationFault::Pin {
        channel,
        detail: format!("{:?}", e.kind()),
    })
}

impl<S, E> OutputDriver for PinPair<S, E>
where
    S: OutputPin + Send,
    E: OutputPin + Send,
{
    fn set(&self, channel: Channel, asserted: bool) -> Result<(), ActuationFault> {
        match channel {
            Channel::Start => drive(&self.start, channel, asserted),
            Channel::End => drive(&self.end, channel, asserted),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::actuator::{PulseActuator, PulseRequest, PulseSource};

    #[derive(Debug)]
    struct Broken;

    impl embedded_hal::digital::Error for Broken {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Pin that mirrors its level into a shared flag.
    struct FlagPin(Arc<AtomicBool>);

    impl ErrorType for FlagPin {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for FlagPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = Broken;
    }

    impl OutputPin for BrokenPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err(Broken)
        }
        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(Broken)
        }
    }

    #[test]
    fn routes_each_channel_to_its_pin() {
        let start = Arc::new(AtomicBool::new(false));
        let end = Arc::new(AtomicBool::new(false));
        let pair = PinPair::new(FlagPin(start.clone()), FlagPin(end.clone()));

        pair.set(Channel::End, true).unwrap();
        assert!(!start.load(Ordering::SeqCst));
        assert!(end.load(Ordering::SeqCst));

        pair.set(Channel::Start, true).unwrap();
        pair.set(Channel::End, false).unwrap();
        assert!(start.load(Ordering::SeqCst));
        assert!(!end.load(Ordering::SeqCst));
    }

    #[test]
    fn pin_errors_become_actuation_faults() {
        let pair = PinPair::new(FlagPin(Arc::new(AtomicBool::new(false))), BrokenPin);
        let err = pair.set(Channel::End, true).unwrap_err();
        assert!(matches!(err, ActuationFault::Pin { channel: Channel::End, .. }));
        assert!(pair.set(Channel::Start, true).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn actuator_pulses_a_pin_pair() {
        let start = Arc::new(AtomicBool::new(true));
        let end = Arc::new(AtomicBool::new(true));
        let pair = PinPair::new(FlagPin(start.clone()), FlagPin(end.clone()));

        let actuator = PulseActuator::start(Arc::new(pair));
        // Both pins are driven low at startup.
        assert!(!start.load(Ordering::SeqCst));
        assert!(!end.load(Ordering::SeqCst));

        let handle = actuator
            .fire(PulseRequest::immediate(
                Channel::End,
                Duration::from_millis(300),
                PulseSource::ManualTest,
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(end.load(Ordering::SeqCst));
        assert!(!start.load(Ordering::SeqCst));

        let report = handle.completion().await.unwrap();
        assert!(report.fault.is_none());
        assert!(!end.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_pin_is_reported_through_the_actuator() {
        let pair = PinPair::new(FlagPin(Arc::new(AtomicBool::new(false))), BrokenPin);
        let actuator = PulseActuator::start(Arc::new(pair));

        let report = actuator
            .fire(PulseRequest::immediate(
                Channel::End,
                Duration::from_millis(200),
                PulseSource::ManualTest,
            ))
            .unwrap()
            .completion()
            .await
            .unwrap();
        assert!(matches!(report.fault, Some(ActuationFault::Pin { channel: Channel::End, .. })));
        assert_eq!(actuator.levels(), [false, false]);
    }
}
