//! Continuous measurement stream.
//!
//! [`Sds011::into_stream`] moves the session into a [`Poller`] that reads
//! measurements in a loop and fans them out to every subscriber. Subscribing
//! and stopping go through a [`StreamHandle`], so the poller stays the only
//! owner of the serial line. Stopping hands the session back.

use core::pin::Pin;
use core::task::{Context, Poll};

use embedded_io_async::{Read, Write};
use futures::channel::mpsc::{unbounded, TryRecvError, UnboundedReceiver, UnboundedSender};
use futures::future::{select, Either};
use futures::{pin_mut, Stream, StreamExt};
use log::{debug, warn};

use crate::{Measurement, Sds011};

#[derive(Debug)]
enum Control {
    Subscribe(UnboundedSender<Measurement>),
    Stop,
}

/// Controls a running [`Poller`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    control: UnboundedSender<Control>,
}

impl StreamHandle {
    /// Registers a new subscriber that receives every measurement read from
    /// now on.
    ///
    /// If the poller has already stopped the returned stream ends right away.
    pub fn subscribe(&self) -> Measurements {
        let (tx, rx) = unbounded();
        if self.control.unbounded_send(Control::Subscribe(tx)).is_err() {
            debug!("Subscribing to a stopped measurement stream");
        }
        Measurements { rx }
    }

    /// Asks the poller to stop, even if it is waiting on the serial line.
    pub fn stop(&self) {
        if self.control.unbounded_send(Control::Stop).is_err() {
            debug!("Measurement stream already stopped");
        }
    }
}

/// Unbounded stream of measurements for one subscriber.
///
/// Ends once the poller stops. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Measurements {
    rx: UnboundedReceiver<Measurement>,
}

impl Stream for Measurements {
    type Item = Measurement;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

/// Background task reading measurements from the sensor.
///
/// Run it with [`Poller::run`] on the executor of your choice. It stops when:
/// - [`StreamHandle::stop`] is called,
/// - every subscriber and every handle has been dropped,
/// - the serial line reaches end of stream.
pub struct Poller<S> {
    session: Sds011<S>,
    control: UnboundedReceiver<Control>,
    control_open: bool,
    subscribers: Vec<UnboundedSender<Measurement>>,
}

impl<S> Sds011<S>
where
    S: Read + Write,
{
    /// Turns the session into a measurement poller and its control handle.
    ///
    /// Meant for Active mode. The session comes back from [`Poller::run`]
    /// once the poller stops.
    pub fn into_stream(self) -> (Poller<S>, StreamHandle) {
        let (control_tx, control_rx) = unbounded();
        let poller = Poller {
            session: self,
            control: control_rx,
            control_open: true,
            subscribers: Vec::new(),
        };
        (
            poller,
            StreamHandle {
                control: control_tx,
            },
        )
    }
}

impl<S> Poller<S>
where
    S: Read + Write,
{
    /// Polls the sensor until stopped and returns the session.
    pub async fn run(mut self) -> Sds011<S> {
        loop {
            if !self.drain_control() {
                debug!("Measurement stream stopped");
                break;
            }
            self.subscribers.retain(|tx| !tx.is_closed());
            if !self.control_open && self.subscribers.is_empty() {
                debug!("Measurement stream has no subscribers left");
                break;
            }

            let next = {
                let poll = self.session.poll();
                pin_mut!(poll);
                loop {
                    if !self.control_open {
                        break Some(poll.await);
                    }
                    match select(poll.as_mut(), self.control.next()).await {
                        Either::Left((result, _)) => break Some(result),
                        Either::Right((Some(Control::Subscribe(tx)), _)) => {
                            self.subscribers.push(tx)
                        }
                        Either::Right((Some(Control::Stop), _)) => break None,
                        Either::Right((None, _)) => {
                            self.control_open = false;
                            if self.subscribers.is_empty() {
                                break None;
                            }
                        }
                    }
                }
            };

            match next {
                None => {
                    debug!("Measurement stream stopped while waiting for data");
                    break;
                }
                Some(Err(e)) => {
                    warn!("Measurement stream ended: {}", e);
                    break;
                }
                Some(Ok(measurement)) => {
                    self.subscribers
                        .retain(|tx| tx.unbounded_send(measurement).is_ok());
                }
            }
        }
        self.session
    }

    // Applies queued control messages. Returns false once a stop was requested.
    fn drain_control(&mut self) -> bool {
        while self.control_open {
            match self.control.try_recv() {
                Ok(Control::Subscribe(tx)) => self.subscribers.push(tx),
                Ok(Control::Stop) => return false,
                Err(TryRecvError::Closed) => self.control_open = false,
                Err(TryRecvError::Empty) => break,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{measurement_frame, yield_now, MockSerial, SharedLine};
    use crate::{Config, Error, Freshness};
    use futures::executor::block_on;
    use futures::future::join;

    fn streaming_session(frames: usize) -> Sds011<MockSerial> {
        let mut serial = MockSerial::default();
        for i in 0..frames {
            serial.push(&measurement_frame(10 * (i as u16 + 1), 100, 0x1234));
        }
        Sds011::new(serial, Config::default())
    }

    #[test]
    fn every_subscriber_gets_every_measurement() {
        let (poller, handle) = streaming_session(3).into_stream();
        let first = handle.subscribe();
        let second = handle.subscribe();

        let session = block_on(poller.run());
        assert_eq!(session.state().id.0, 0x1234);

        let first: Vec<f32> = block_on(first.map(|m| m.pm2_5).collect());
        let second: Vec<f32> = block_on(second.map(|m| m.pm2_5).collect());
        assert_eq!(first, vec![1.0, 2.0, 3.0]);
        assert_eq!(second, first);
    }

    #[test]
    fn stop_returns_the_session_without_reading() {
        let (poller, handle) = streaming_session(2).into_stream();
        let measurements = handle.subscribe();
        handle.stop();

        let mut session = block_on(poller.run());
        assert_eq!(block_on(measurements.collect::<Vec<_>>()), vec![]);
        assert_eq!(session.serial.reads, 0);

        // The session is usable again once the poller is gone.
        let measurement = block_on(session.poll()).unwrap();
        assert_eq!(measurement.pm2_5, 1.0);
    }

    #[test]
    fn stops_when_nobody_can_listen() {
        let (poller, handle) = streaming_session(2).into_stream();
        drop(handle.subscribe());
        drop(handle);

        let session = block_on(poller.run());
        assert_eq!(session.serial.reads, 0);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let (poller, handle) = streaming_session(2).into_stream();
        let kept = handle.subscribe();
        drop(handle.subscribe());
        drop(handle);

        let session = block_on(poller.run());
        assert_eq!(block_on(kept.collect::<Vec<_>>()).len(), 2);
        // Both frames were consumed before the line ran dry.
        assert_eq!(
            block_on(Sds011::new(session.release(), Config::default()).poll()),
            Err(Error::Disconnected)
        );
    }

    #[test]
    fn subscribing_after_stop_yields_empty_stream() {
        let (poller, handle) = streaming_session(1).into_stream();
        handle.stop();
        let mut session = block_on(poller.run());
        assert_eq!(session.state().mode, None);
        assert!(block_on(session.get_mode(Freshness::Cached)).is_err());

        let late = handle.subscribe();
        assert_eq!(block_on(late.collect::<Vec<_>>()), vec![]);
    }

    fn idle_session(line: &SharedLine) -> Sds011<crate::mock::BlockingSerial> {
        Sds011::new(line.serial(), Config::default())
    }

    #[test]
    fn stop_interrupts_pending_read() {
        let line = SharedLine::default();
        let (poller, handle) = idle_session(&line).into_stream();
        let measurements = handle.subscribe();

        let (session, ()) = block_on(join(poller.run(), async {
            yield_now().await;
            handle.stop();
        }));
        assert_eq!(line.reads(), 1);
        assert_eq!(block_on(measurements.collect::<Vec<_>>()), vec![]);

        // The stopped poller left the line untouched.
        let mut session = session;
        let measurement = block_on(join(session.poll(), async {
            line.push(&measurement_frame(25, 100, 0x1234));
        }))
        .0
        .unwrap();
        assert_eq!(measurement.pm2_5, 2.5);
    }

    #[test]
    fn subscriber_added_during_read_gets_next_measurement() {
        let line = SharedLine::default();
        let (poller, handle) = idle_session(&line).into_stream();

        let (session, measurement) = block_on(join(poller.run(), async {
            yield_now().await;
            let mut late = handle.subscribe();
            yield_now().await;
            line.push(&measurement_frame(25, 100, 0x1234));
            let measurement = late.next().await;
            handle.stop();
            measurement
        }));
        let measurement = measurement.expect("measurement for late subscriber");
        assert_eq!(measurement.pm2_5, 2.5);
        assert_eq!(measurement.pm10, 10.0);
        assert_eq!(session.state().id.0, 0x1234);
    }

    #[test]
    fn closing_handle_during_read_stops_idle_poller() {
        let line = SharedLine::default();
        let (poller, handle) = idle_session(&line).into_stream();

        block_on(join(poller.run(), async move {
            yield_now().await;
            drop(handle);
        }));
        assert_eq!(line.reads(), 1);
    }
}
