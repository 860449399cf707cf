//! Stateful tracers over a decoded packet stream.
//!
//! A tracer is a small state machine: one handler is active at a time, it sees one packet
//! per call and says where to go next. A tracer that stops is replaced with a fresh one from
//! its factory before the next packet, so each tracer keeps watching the whole stream.
//!
//! ```
//! use bacnet_analysis::tracer::{factory, StateMachine, Transition};
//! use bacnet_analysis::DecodedPacket;
//!
//! #[derive(Default)]
//! struct CountApdus {
//!     seen: usize,
//! }
//!
//! fn start(ctx: &mut CountApdus, pkt: &DecodedPacket) -> Transition<CountApdus> {
//!     if pkt.application().is_some() {
//!         ctx.seen += 1;
//!     }
//!     Transition::Stay
//! }
//!
//! let make = factory(|| StateMachine::new(CountApdus::default(), start));
//! let _tracer = make();
//! ```

use crate::pipeline::DecodedPacket;
use std::fmt;

/// A state: handles one packet and picks the next state.
pub type Handler<T> = fn(&mut T, &DecodedPacket) -> Transition<T>;

pub enum Transition<T> {
    /// Keep the current handler.
    Stay,
    Next(Handler<T>),
    /// Enter the terminal state; the tracer is restarted before the next packet.
    Stop,
}

impl<T> Clone for Transition<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Transition<T> {}

impl<T> fmt::Debug for Transition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Stay => f.write_str("Stay"),
            Transition::Next(_) => f.write_str("Next(..)"),
            Transition::Stop => f.write_str("Stop"),
        }
    }
}

/// Object-safe view of a running tracer.
pub trait Tracer {
    fn feed(&mut self, packet: &DecodedPacket);

    /// True once the tracer has reached its terminal state.
    fn is_finished(&self) -> bool;
}

/// Tracer state: a private context value plus the active handler.
pub struct StateMachine<T> {
    context: T,
    current: Option<Handler<T>>,
}

impl<T> StateMachine<T> {
    pub fn new(context: T, start: Handler<T>) -> Self {
        StateMachine {
            context,
            current: Some(start),
        }
    }

    pub fn context(&self) -> &T {
        &self.context
    }

    pub fn into_context(self) -> T {
        self.context
    }
}

impl<T> Tracer for StateMachine<T> {
    fn feed(&mut self, packet: &DecodedPacket) {
        let Some(handler) = self.current else {
            return;
        };
        match handler(&mut self.context, packet) {
            Transition::Stay => {}
            Transition::Next(next) => self.current = Some(next),
            Transition::Stop => self.current = None,
        }
    }

    fn is_finished(&self) -> bool {
        self.current.is_none()
    }
}

pub type TracerFactory = Box<dyn Fn() -> Box<dyn Tracer>>;

/// Box a state-machine constructor as a [`TracerFactory`].
pub fn factory<T, F>(make: F) -> TracerFactory
where
    T: 'static,
    F: Fn() -> StateMachine<T> + 'static,
{
    Box::new(move || Box::new(make()) as Box<dyn Tracer>)
}

/// Drives tracers over a packet stream; yields each packet after every tracer has seen it.
pub struct Trace<I> {
    packets: I,
    factories: Vec<TracerFactory>,
    tracers: Vec<Box<dyn Tracer>>,
    restarts: u64,
}

impl<I> Trace<I> {
    pub fn tracers(&self) -> &[Box<dyn Tracer>] {
        &self.tracers
    }

    /// How many times a finished tracer has been replaced.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}

impl<I> Trace<I>
where
    I: Iterator<Item = DecodedPacket>,
{
    /// Feed the whole stream; returns the number of packets traced.
    pub fn run(&mut self) -> u64 {
        let mut n = 0;
        while self.next().is_some() {
            n += 1;
        }
        n
    }
}

impl<I> Iterator for Trace<I>
where
    I: Iterator<Item = DecodedPacket>,
{
    type Item = DecodedPacket;

    fn next(&mut self) -> Option<DecodedPacket> {
        let packet = self.packets.next()?;
        for (tracer, make) in self.tracers.iter_mut().zip(&self.factories) {
            tracer.feed(&packet);
            if tracer.is_finished() {
                log::trace!("tracer finished at packet {}, restarting", packet.number());
                *tracer = make();
                self.restarts += 1;
            }
        }
        Some(packet)
    }
}

/// Start one tracer per factory over `packets`.
pub fn trace<I>(packets: I, factories: Vec<TracerFactory>) -> Trace<I::IntoIter>
where
    I: IntoIterator<Item = DecodedPacket>,
{
    let tracers = factories.iter().map(|make| make()).collect();
    Trace {
        packets: packets.into_iter(),
        factories,
        tracers,
        restarts: 0,
    }
}
