// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Background event pump for the stick's byte stream
//!
//! The pump thread reads raw bytes, reassembles frames (resynchronizing on
//! the sync byte after corruption) and fans typed messages out to
//! subscribers. Two built-in subscribers feed the bounded ack and message
//! queues behind the blocking waits.

use crate::drivers::{Driver, DriverError, Transport};
use crate::messages::channel::{ChannelEvent, ChannelResponse, MessageCode};
use crate::messages::{
    encode, process_buffer, AntMessage, FromRxMessage, MessageError, RxMessage,
    TransmitableMessage,
};

use log::{error, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Bound on the ack and message queues; overflow drops the oldest entry
pub const MAX_QUEUE_SIZE: usize = 25;

/// Bytes requested from the transport per pump iteration
const READ_CHUNK_SIZE: usize = 20;

const PUMP_INTERVAL: Duration = Duration::from_millis(2);

/// Receives every decoded message, in wire order
///
/// A failure return is logged and swallowed so one misbehaving subscriber
/// cannot take down the pump or starve its peers.
pub trait EventCallback: Send + Sync {
    fn process(&self, msg: &AntMessage) -> Result<(), EventError>;
}

#[derive(Debug)]
pub enum EventError {
    Driver(DriverError),
    Message(MessageError),
    /// The machine stopped while a wait was outstanding
    Cancelled,
    Timeout,
}

impl From<DriverError> for EventError {
    fn from(err: DriverError) -> Self {
        EventError::Driver(err)
    }
}

impl From<MessageError> for EventError {
    fn from(err: MessageError) -> Self {
        EventError::Message(err)
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::Driver(err) => write!(f, "driver: {err}"),
            EventError::Message(err) => write!(f, "message: {err}"),
            EventError::Cancelled => write!(f, "event machine stopped"),
            EventError::Timeout => write!(f, "timed out waiting for message"),
        }
    }
}

impl std::error::Error for EventError {}

struct QueueState<M> {
    items: VecDeque<M>,
    open: bool,
}

/// Bounded FIFO with condvar-signaled blocking removal
struct WaitQueue<M> {
    state: Mutex<QueueState<M>>,
    cond: Condvar,
}

impl<M> WaitQueue<M> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                open: true,
            }),
            cond: Condvar::new(),
        }
    }

    fn push(&self, item: M) {
        let mut state = self.state.lock().unwrap();
        state.items.push_back(item);
        while state.items.len() > MAX_QUEUE_SIZE {
            state.items.pop_front();
        }
        self.cond.notify_all();
    }

    /// Remove and return the first entry `matcher` accepts, blocking until
    /// one arrives, the deadline passes or the queue is closed
    fn take_map<R>(
        &self,
        timeout: Option<Duration>,
        matcher: impl Fn(&M) -> Option<R>,
    ) -> Result<R, EventError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(pos) = state.items.iter().position(|item| matcher(item).is_some()) {
                let item = state.items.remove(pos).expect("position is in bounds");
                return Ok(matcher(&item).expect("matcher accepted this entry"));
            }
            if !state.open {
                return Err(EventError::Cancelled);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EventError::Timeout);
                    }
                    self.cond.wait_timeout(state, deadline - now).unwrap().0
                }
                None => self.cond.wait(state).unwrap(),
            };
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        self.cond.notify_all();
    }

    fn reopen(&self) {
        self.state.lock().unwrap().open = true;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }
}

/// Built-in subscriber feeding command acknowledgments to [EventMachine::wait_for_ack]
struct AckCollector {
    queue: Arc<WaitQueue<ChannelResponse>>,
}

impl EventCallback for AckCollector {
    fn process(&self, msg: &AntMessage) -> Result<(), EventError> {
        if let RxMessage::ChannelResponse(response) = &msg.message {
            self.queue.push(*response);
        }
        Ok(())
    }
}

/// Built-in subscriber feeding every message to [EventMachine::wait_for_message]
struct MsgCollector {
    queue: Arc<WaitQueue<AntMessage>>,
}

impl EventCallback for MsgCollector {
    fn process(&self, msg: &AntMessage) -> Result<(), EventError> {
        self.queue.push(msg.clone());
        Ok(())
    }
}

/// Owns the read side of the driver and the pump thread
///
/// All state is per-instance; independent machines never share locks.
pub struct EventMachine<T: Transport + 'static> {
    weak_self: Weak<Self>,
    driver: Driver<T>,
    callbacks: Mutex<Vec<Weak<dyn EventCallback>>>,
    running: Mutex<bool>,
    pump_live: Mutex<bool>,
    ack_queue: Arc<WaitQueue<ChannelResponse>>,
    msg_queue: Arc<WaitQueue<AntMessage>>,
    // Strong handles so the weakly registered built-in collectors live as
    // long as the machine
    _ack_collector: Arc<AckCollector>,
    _msg_collector: Arc<MsgCollector>,
}

impl<T: Transport + 'static> EventMachine<T> {
    pub fn new(driver: Driver<T>) -> Arc<Self> {
        let ack_queue = Arc::new(WaitQueue::new());
        let msg_queue = Arc::new(WaitQueue::new());
        let ack_collector = Arc::new(AckCollector {
            queue: Arc::clone(&ack_queue),
        });
        let msg_collector = Arc::new(MsgCollector {
            queue: Arc::clone(&msg_queue),
        });
        let callbacks: Vec<Weak<dyn EventCallback>> = vec![
            Arc::downgrade(&(Arc::clone(&ack_collector) as Arc<dyn EventCallback>)),
            Arc::downgrade(&(Arc::clone(&msg_collector) as Arc<dyn EventCallback>)),
        ];
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            driver,
            callbacks: Mutex::new(callbacks),
            running: Mutex::new(false),
            pump_live: Mutex::new(false),
            ack_queue,
            msg_queue,
            _ack_collector: ack_collector,
            _msg_collector: msg_collector,
        })
    }

    pub fn driver(&self) -> &Driver<T> {
        &self.driver
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    /// Spawn the pump thread; returns once it is live. Calling on a running
    /// machine is a no-op.
    pub fn start(&self) -> Result<(), EventError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Ok(());
            }
            *running = true;
        }
        self.ack_queue.reopen();
        self.msg_queue.reopen();

        // Cannot fail: the machine is only ever handed out inside an Arc
        let machine = match self.weak_self.upgrade() {
            Some(machine) => machine,
            None => return Err(EventError::Cancelled),
        };
        let spawned = thread::Builder::new()
            .name("ant-event-pump".into())
            .spawn(move || machine.pump());
        if let Err(err) = spawned {
            *self.running.lock().unwrap() = false;
            return Err(EventError::Driver(DriverError::Io(err)));
        }

        // Handshake: hold until the pump reports in. A pump that dies during
        // startup clears the running flag, so this cannot hang.
        loop {
            if *self.pump_live.lock().unwrap() {
                break;
            }
            if !self.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Signal shutdown and block until the pump has exited
    ///
    /// Outstanding [EventMachine::wait_for_ack] / [EventMachine::wait_for_message]
    /// calls return [EventError::Cancelled].
    pub fn stop(&self) {
        {
            let mut running = self.running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
        }
        loop {
            if !*self.pump_live.lock().unwrap() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Subscribe `callback` to the message fan-out
    ///
    /// Subscribers are a set: registering one twice keeps a single entry.
    /// Only a weak handle is held, so registration does not extend the
    /// subscriber's lifetime.
    pub fn register_callback(&self, callback: &Arc<dyn EventCallback>) {
        let mut callbacks = self.callbacks.lock().unwrap();
        let present = callbacks
            .iter()
            .any(|existing| std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(callback)));
        if !present {
            callbacks.push(Arc::downgrade(callback));
        }
    }

    /// Unsubscribe `callback`; unknown subscribers are a no-op
    pub fn remove_callback(&self, callback: &Arc<dyn EventCallback>) {
        self.callbacks
            .lock()
            .unwrap()
            .retain(|existing| !std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(callback)));
    }

    /// Encode and send a message, returning `self` so a matching wait can
    /// be chained onto the send
    pub fn write_message(&self, msg: &dyn TransmitableMessage) -> Result<&Self, EventError> {
        let frame = encode(msg)?;
        self.driver.write(&frame)?;
        Ok(self)
    }

    /// Block until the stick acknowledges `msg`, returning the response code
    ///
    /// Acks are matched by the acknowledged command's type byte, first in
    /// FIFO order, and removed from the queue.
    pub fn wait_for_ack(
        &self,
        msg: &dyn TransmitableMessage,
        timeout: Option<Duration>,
    ) -> Result<MessageCode, EventError> {
        let id = msg.get_tx_msg_id() as u8;
        self.ack_queue.take_map(timeout, |response| {
            (response.message_id == id).then_some(response.message_code)
        })
    }

    /// Block until a message of type `M` has been received, removing and
    /// returning the first match in FIFO order
    pub fn wait_for_message<M: FromRxMessage>(
        &self,
        timeout: Option<Duration>,
    ) -> Result<M, EventError> {
        self.msg_queue
            .take_map(timeout, |msg| M::from_rx(&msg.message))
    }

    /// Block until the given channel reports the given RF event code
    ///
    /// Unlike [EventMachine::wait_for_message] this leaves non-matching
    /// channel events queued for other waiters.
    pub fn wait_for_channel_event(
        &self,
        channel: u8,
        code: MessageCode,
        timeout: Option<Duration>,
    ) -> Result<ChannelEvent, EventError> {
        self.msg_queue.take_map(timeout, |msg| match &msg.message {
            RxMessage::ChannelEvent(event)
                if event.channel_number == channel && event.message_code == code =>
            {
                Some(*event)
            }
            _ => None,
        })
    }

    fn subscriber_snapshot(&self) -> Vec<Arc<dyn EventCallback>> {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.retain(|callback| callback.strong_count() > 0);
        callbacks.iter().filter_map(Weak::upgrade).collect()
    }

    fn pump(&self) {
        *self.pump_live.lock().unwrap() = true;

        let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE * 2);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if !self.is_running() {
                break;
            }
            let count = match self.driver.read(&mut chunk) {
                Ok(count) => count,
                Err(err) => {
                    // Unrecoverable; waiters are woken with Cancelled below
                    error!("event pump stopping on transport failure: {}", err);
                    *self.running.lock().unwrap() = false;
                    break;
                }
            };
            buffer.extend_from_slice(&chunk[..count]);
            if count == 0 {
                continue;
            }

            let messages = process_buffer(&mut buffer);
            if !messages.is_empty() {
                let subscribers = self.subscriber_snapshot();
                for msg in &messages {
                    for subscriber in &subscribers {
                        if let Err(err) = subscriber.process(msg) {
                            warn!("subscriber failed to process message: {}", err);
                        }
                    }
                }
            }
            thread::sleep(PUMP_INTERVAL);
        }

        self.ack_queue.close();
        self.msg_queue.close();
        *self.pump_live.lock().unwrap() = false;
    }
}
