// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Node and channel lifecycle management
//!
//! The node owns the event machine and the stick's channel and network
//! tables, sized from the capabilities it negotiates at startup. Every
//! channel mutator follows the same protocol: send the command, block for
//! the matching acknowledgment, and only commit local state on success.

use crate::drivers::{Driver, Transport};
use crate::evm::{EventCallback, EventError, EventMachine};
use crate::messages::channel::MessageCode;
use crate::messages::config::{
    AssignChannel, ChannelId, ChannelPeriod, ChannelRfFrequency, ChannelType, DeviceType,
    SearchTimeout, SetChannelTransmitPower, SetNetworkKey, TransmissionType,
};
use crate::messages::control::{
    CloseChannel, OpenChannel, RequestMessage, RequestableMessageId, ResetSystem,
};
use crate::messages::notifications::StartUpMessage;
use crate::messages::requested_response::Capabilities;
use crate::messages::{AntMessage, TransmitableMessage};

use const_utils::u64::min;
use derive_new::new;
use log::warn;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// How long command paths wait for the stick to acknowledge before giving up
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Helper to convert durations to search timeouts.
/// Anything greater than or equal to 637.5s will default to infinite timeout
/// per ANT spec.
pub const fn duration_to_search_timeout(t: Duration) -> u8 {
    // Scale up by 10 to avoid floating point math as ratio is 2.5s to 1 count
    min((t.as_secs() * 10) / 25, 255) as u8
}

/// A network key and the slot it was installed into
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    pub key: [u8; SetNetworkKey::NETWORK_KEY_SIZE],
    pub name: Option<String>,
    number: u8,
}

impl Network {
    pub fn new(key: [u8; SetNetworkKey::NETWORK_KEY_SIZE]) -> Self {
        Self {
            key,
            name: None,
            number: 0,
        }
    }

    pub fn named(key: [u8; SetNetworkKey::NETWORK_KEY_SIZE], name: &str) -> Self {
        Self {
            key,
            name: Some(name.to_owned()),
            number: 0,
        }
    }

    /// Slot number, assigned when the key is installed via
    /// [Node::set_network_key]
    pub fn number(&self) -> u8 {
        self.number
    }
}

/// Identity of a paired device on a channel
#[derive(new, Clone, Copy, Debug, PartialEq)]
pub struct Device {
    pub number: u16,
    pub device_type: DeviceType,
    pub transmission_type: TransmissionType,
}

#[derive(Debug)]
pub enum ChannelError {
    /// The stick rejected the command with the given code
    Command {
        operation: &'static str,
        code: MessageCode,
    },
    Event(EventError),
    /// The owning node and its event machine are gone
    Detached,
}

impl From<EventError> for ChannelError {
    fn from(err: EventError) -> Self {
        ChannelError::Event(err)
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Command { operation, code } => {
                write!(f, "could not {operation}: stick responded {code:?}")
            }
            ChannelError::Event(err) => write!(f, "{err}"),
            ChannelError::Detached => write!(f, "channel is detached from its node"),
        }
    }
}

impl std::error::Error for ChannelError {}

#[derive(Debug)]
pub enum NodeError {
    AlreadyStarted,
    NotStarted,
    NoFreeChannel,
    NetworkOutOfRange(u8),
    CommandFailed(MessageCode),
    Event(EventError),
}

impl From<EventError> for NodeError {
    fn from(err: EventError) -> Self {
        NodeError::Event(err)
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::AlreadyStarted => write!(f, "node already started"),
            NodeError::NotStarted => write!(f, "node not started"),
            NodeError::NoFreeChannel => write!(f, "no free channel available"),
            NodeError::NetworkOutOfRange(number) => {
                write!(f, "network slot {number} out of range")
            }
            NodeError::CommandFailed(code) => write!(f, "stick responded {code:?}"),
            NodeError::Event(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for NodeError {}

struct ChannelConfig {
    channel_type: ChannelType,
    network: Option<u8>,
    device: Option<Device>,
    search_timeout: Option<u8>,
    period: Option<u16>,
    rf_frequency: Option<u8>,
    transmit_power: Option<u8>,
}

/// One channel slot on the stick
///
/// Configuration state mirrors the stick and is only updated once the
/// corresponding command has been acknowledged with no error; a failed
/// command leaves the local state untouched.
pub struct Channel<T: Transport + 'static> {
    weak_self: Weak<Self>,
    evm: Weak<EventMachine<T>>,
    number: u8,
    ack_timeout: Duration,
    config: Mutex<ChannelConfig>,
    subscribers: Mutex<Vec<Arc<dyn EventCallback>>>,
}

impl<T: Transport + 'static> Channel<T> {
    fn new(evm: Weak<EventMachine<T>>, number: u8, ack_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            evm,
            number,
            ack_timeout,
            config: Mutex::new(ChannelConfig {
                channel_type: ChannelType::BidirectionalSlave,
                network: None,
                device: None,
                search_timeout: None,
                period: None,
                rf_frequency: None,
                transmit_power: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn channel_type(&self) -> ChannelType {
        self.config.lock().unwrap().channel_type
    }

    /// Network slot this channel is bound to, [None] while unassigned
    pub fn network(&self) -> Option<u8> {
        self.config.lock().unwrap().network
    }

    pub fn device(&self) -> Option<Device> {
        self.config.lock().unwrap().device
    }

    pub fn search_timeout(&self) -> Option<u8> {
        self.config.lock().unwrap().search_timeout
    }

    pub fn period(&self) -> Option<u16> {
        self.config.lock().unwrap().period
    }

    pub fn rf_frequency(&self) -> Option<u8> {
        self.config.lock().unwrap().rf_frequency
    }

    pub fn transmit_power(&self) -> Option<u8> {
        self.config.lock().unwrap().transmit_power
    }

    fn machine(&self) -> Result<Arc<EventMachine<T>>, ChannelError> {
        self.evm.upgrade().ok_or(ChannelError::Detached)
    }

    fn as_callback(&self) -> Result<Arc<dyn EventCallback>, ChannelError> {
        match self.weak_self.upgrade() {
            Some(this) => Ok(this),
            None => Err(ChannelError::Detached),
        }
    }

    /// Send `msg` and block for its acknowledgment; any code other than
    /// no-error fails the operation
    fn command(
        &self,
        operation: &'static str,
        msg: &dyn TransmitableMessage,
    ) -> Result<(), ChannelError> {
        let machine = self.machine()?;
        let code = machine
            .write_message(msg)?
            .wait_for_ack(msg, Some(self.ack_timeout))?;
        if code != MessageCode::ResponseNoError {
            return Err(ChannelError::Command { operation, code });
        }
        Ok(())
    }

    /// Bind the channel to a network slot with the given type
    pub fn assign(
        &self,
        network: &Network,
        channel_type: ChannelType,
    ) -> Result<(), ChannelError> {
        let msg = AssignChannel::new(self.number, channel_type, network.number(), None);
        self.command("assign", &msg)?;
        let mut config = self.config.lock().unwrap();
        config.channel_type = channel_type;
        config.network = Some(network.number());
        Ok(())
    }

    /// Release the channel back to the free pool
    pub fn unassign(&self) -> Result<(), ChannelError> {
        let msg = crate::messages::config::UnAssignChannel::new(self.number);
        self.command("unassign", &msg)?;
        self.config.lock().unwrap().network = None;
        Ok(())
    }

    /// Pair the channel with a device identity; wildcard fields match any
    /// transmitter
    pub fn set_id(&self, device: Device) -> Result<(), ChannelError> {
        let msg = ChannelId::new(
            self.number,
            device.number,
            device.device_type,
            device.transmission_type,
        );
        self.command("set id", &msg)?;
        self.config.lock().unwrap().device = Some(device);
        Ok(())
    }

    pub fn set_search_timeout(&self, timeout: u8) -> Result<(), ChannelError> {
        let msg = SearchTimeout::new(self.number, timeout);
        self.command("set search timeout", &msg)?;
        self.config.lock().unwrap().search_timeout = Some(timeout);
        Ok(())
    }

    pub fn set_period(&self, period: u16) -> Result<(), ChannelError> {
        let msg = ChannelPeriod::new(self.number, period);
        self.command("set period", &msg)?;
        self.config.lock().unwrap().period = Some(period);
        Ok(())
    }

    pub fn set_rf_frequency(&self, frequency: u8) -> Result<(), ChannelError> {
        let msg = ChannelRfFrequency::new(self.number, frequency);
        self.command("set rf frequency", &msg)?;
        self.config.lock().unwrap().rf_frequency = Some(frequency);
        Ok(())
    }

    pub fn set_transmit_power(&self, power: u8) -> Result<(), ChannelError> {
        let msg = SetChannelTransmitPower::new(self.number, power);
        self.command("set transmit power", &msg)?;
        self.config.lock().unwrap().transmit_power = Some(power);
        Ok(())
    }

    /// Open the channel and subscribe it to the event machine so data
    /// messages reach the channel's subscribers
    pub fn open(&self) -> Result<(), ChannelError> {
        let msg = OpenChannel::new(self.number);
        self.command("open", &msg)?;
        let machine = self.machine()?;
        machine.register_callback(&self.as_callback()?);
        Ok(())
    }

    /// Close the channel
    ///
    /// The stick keeps emitting events until it confirms closure, so after
    /// the acknowledgment this blocks for the channel-closed event before
    /// unsubscribing from the event machine.
    pub fn close(&self) -> Result<(), ChannelError> {
        let msg = CloseChannel::new(self.number);
        self.command("close", &msg)?;
        let machine = self.machine()?;
        machine.wait_for_channel_event(
            self.number,
            MessageCode::EventChannelClosed,
            Some(self.ack_timeout),
        )?;
        machine.remove_callback(&self.as_callback()?);
        Ok(())
    }

    /// Subscribe to messages scoped to this channel; duplicates collapse to
    /// a single registration
    pub fn subscribe(&self, callback: &Arc<dyn EventCallback>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        let present = subscribers
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(callback)));
        if !present {
            subscribers.push(Arc::clone(callback));
        }
    }

    pub fn unsubscribe(&self, callback: &Arc<dyn EventCallback>) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|existing| !std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(callback)));
    }
}

impl<T: Transport + 'static> EventCallback for Channel<T> {
    fn process(&self, msg: &AntMessage) -> Result<(), EventError> {
        if msg.channel_number() != Some(self.number) {
            return Ok(());
        }
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            if let Err(err) = subscriber.process(msg) {
                warn!("channel {} subscriber failed: {}", self.number, err);
            }
        }
        Ok(())
    }
}

/// The host's view of an attached ANT stick
pub struct Node<T: Transport + 'static> {
    evm: Arc<EventMachine<T>>,
    channels: Vec<Arc<Channel<T>>>,
    networks: Vec<Option<Network>>,
    capabilities: Option<Capabilities>,
    command_timeout: Duration,
}

impl<T: Transport + 'static> Node<T> {
    pub fn new(driver: Driver<T>) -> Self {
        Self {
            evm: EventMachine::new(driver),
            channels: Vec::new(),
            networks: Vec::new(),
            capabilities: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.evm.is_running()
    }

    /// Start the event machine and negotiate with the stick: reset it, then
    /// size the channel and network tables from its capabilities
    ///
    /// On any failure the machine is stopped again and the node stays
    /// not-started.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.is_running() {
            return Err(NodeError::AlreadyStarted);
        }
        self.evm.start()?;

        let capabilities = match self.negotiate() {
            Ok(capabilities) => capabilities,
            Err(err) => {
                self.evm.stop();
                return Err(err);
            }
        };

        self.channels = (0..capabilities.max_channels())
            .map(|number| Channel::new(Arc::downgrade(&self.evm), number, self.command_timeout))
            .collect();
        self.networks = (0..capabilities.max_networks()).map(|_| None).collect();
        self.capabilities = Some(capabilities);
        Ok(())
    }

    fn negotiate(&self) -> Result<Capabilities, NodeError> {
        self.reset(true)?;
        let capabilities = self
            .evm
            .write_message(&RequestMessage::new(0, RequestableMessageId::Capabilities))?
            .wait_for_message::<Capabilities>(Some(self.command_timeout))?;
        Ok(capabilities)
    }

    /// Reset the stick, optionally blocking for its startup notification
    pub fn reset(&self, wait: bool) -> Result<(), NodeError> {
        self.evm.write_message(&ResetSystem::new())?;
        if wait {
            self.evm
                .wait_for_message::<StartUpMessage>(Some(self.command_timeout))?;
        }
        Ok(())
    }

    /// Reset the stick and shut the event machine down
    pub fn stop(&mut self) -> Result<(), NodeError> {
        if !self.is_running() {
            return Err(NodeError::NotStarted);
        }
        let reset_result = self.reset(false);
        self.evm.stop();
        reset_result
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn channels(&self) -> &[Arc<Channel<T>>] {
        &self.channels
    }

    pub fn channel(&self, number: u8) -> Option<&Arc<Channel<T>>> {
        self.channels.get(number as usize)
    }

    /// First channel not bound to a network
    pub fn free_channel(&self) -> Result<&Arc<Channel<T>>, NodeError> {
        self.channels
            .iter()
            .find(|channel| channel.network().is_none())
            .ok_or(NodeError::NoFreeChannel)
    }

    /// Install `network`'s key into the given slot
    pub fn set_network_key(&mut self, number: u8, mut network: Network) -> Result<(), NodeError> {
        if number as usize >= self.networks.len() {
            return Err(NodeError::NetworkOutOfRange(number));
        }
        let msg = SetNetworkKey::new(number, network.key);
        let code = self
            .evm
            .write_message(&msg)?
            .wait_for_ack(&msg, Some(self.command_timeout))?;
        if code != MessageCode::ResponseNoError {
            return Err(NodeError::CommandFailed(code));
        }
        network.number = number;
        self.networks[number as usize] = Some(network);
        Ok(())
    }

    pub fn network(&self, number: u8) -> Option<&Network> {
        self.networks.get(number as usize)?.as_ref()
    }

    /// Subscribe to every message the stick emits, not just one channel's
    pub fn register_event_listener(&self, callback: &Arc<dyn EventCallback>) {
        self.evm.register_callback(callback);
    }

    pub fn remove_event_listener(&self, callback: &Arc<dyn EventCallback>) {
        self.evm.remove_callback(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockTransport;
    use crate::messages::calculate_checksum;
    use crate::messages::encode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn frame(msg_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xA4, payload.len() as u8, msg_id];
        bytes.extend_from_slice(payload);
        bytes.push(calculate_checksum(&bytes));
        bytes
    }

    fn ack(channel: u8, msg_id: u8, code: u8) -> Vec<u8> {
        frame(0x40, &[channel, msg_id, code])
    }

    /// Transport scripted for a clean startup negotiation
    fn negotiating_transport(max_channels: u8, max_networks: u8) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.reply_to(
            &encode(&ResetSystem::new()).unwrap(),
            &frame(0x6F, &[0x20]),
        );
        transport.reply_to(
            &encode(&RequestMessage::new(0, RequestableMessageId::Capabilities)).unwrap(),
            &frame(0x54, &[max_channels, max_networks, 0, 0]),
        );
        transport
    }

    fn started_node(transport: MockTransport) -> Node<MockTransport> {
        let driver = Driver::new(transport);
        driver.open().unwrap();
        let mut node = Node::new(driver).with_command_timeout(TIMEOUT);
        node.start().unwrap();
        node
    }

    #[test]
    fn startup_allocates_from_capabilities() {
        let node = started_node(negotiating_transport(8, 3));
        assert_eq!(node.channels().len(), 8);
        assert_eq!(node.capabilities().unwrap().max_networks(), 3);
        assert!(node.is_running());
        assert_eq!(node.channel(7).unwrap().number(), 7);
        assert!(node.channel(8).is_none());
    }

    #[test]
    fn startup_failure_leaves_node_stopped() {
        // The stick never responds
        let driver = Driver::new(MockTransport::new());
        driver.open().unwrap();
        let mut node = Node::new(driver).with_command_timeout(TIMEOUT);
        assert!(matches!(
            node.start(),
            Err(NodeError::Event(EventError::Timeout))
        ));
        assert!(!node.is_running());
        assert!(node.channels().is_empty());
    }

    #[test]
    fn double_start_and_stop_are_errors() {
        let mut node = started_node(negotiating_transport(1, 1));
        assert!(matches!(node.start(), Err(NodeError::AlreadyStarted)));
        node.stop().unwrap();
        assert!(matches!(node.stop(), Err(NodeError::NotStarted)));
    }

    #[test]
    fn set_network_key_installs_slot() {
        let mut transport = negotiating_transport(2, 2);
        let key = [1, 2, 3, 4, 5, 6, 7, 8];
        transport.reply_to(
            &encode(&SetNetworkKey::new(1, key)).unwrap(),
            &ack(0, 0x46, 0x00),
        );
        let mut node = started_node(transport);

        node.set_network_key(1, Network::named(key, "public")).unwrap();
        let network = node.network(1).unwrap();
        assert_eq!(network.number(), 1);
        assert_eq!(network.key, key);
        assert!(node.network(0).is_none());
    }

    #[test]
    fn set_network_key_failure_leaves_slot_empty() {
        let mut transport = negotiating_transport(2, 2);
        let key = [0; 8];
        transport.reply_to(
            &encode(&SetNetworkKey::new(1, key)).unwrap(),
            &ack(0, 0x46, 0x29),
        );
        let mut node = started_node(transport);

        assert!(matches!(
            node.set_network_key(1, Network::new(key)),
            Err(NodeError::CommandFailed(MessageCode::InvalidNetworkNumber))
        ));
        assert!(node.network(1).is_none());
    }

    #[test]
    fn network_slot_bounds_are_checked() {
        let mut node = started_node(negotiating_transport(2, 2));
        assert!(matches!(
            node.set_network_key(5, Network::new([0; 8])),
            Err(NodeError::NetworkOutOfRange(5))
        ));
    }

    #[test]
    fn assign_updates_state_on_ack() {
        let mut transport = negotiating_transport(2, 1);
        transport.reply_to(
            &encode(&AssignChannel::new(0, ChannelType::BidirectionalSlave, 0, None)).unwrap(),
            &ack(0, 0x42, 0x00),
        );
        let node = started_node(transport);

        let channel = node.free_channel().unwrap();
        channel
            .assign(&Network::new([0; 8]), ChannelType::BidirectionalSlave)
            .unwrap();
        assert_eq!(channel.network(), Some(0));
        // Channel zero is bound now, so the free pool moves on
        assert_eq!(node.free_channel().unwrap().number(), 1);
    }

    #[test]
    fn failed_commands_roll_back_nothing() {
        let mut transport = negotiating_transport(1, 1);
        transport.reply_to(
            &encode(&AssignChannel::new(0, ChannelType::BidirectionalMaster, 0, None)).unwrap(),
            &ack(0, 0x42, 0x15),
        );
        transport.reply_to(
            &encode(&ChannelPeriod::new(0, 0x2000)).unwrap(),
            &ack(0, 0x43, 0x15),
        );
        let node = started_node(transport);
        let channel = node.channel(0).unwrap();

        assert!(matches!(
            channel.assign(&Network::new([0; 8]), ChannelType::BidirectionalMaster),
            Err(ChannelError::Command {
                code: MessageCode::ChannelInWrongState,
                ..
            })
        ));
        assert_eq!(channel.network(), None);
        assert_eq!(channel.channel_type(), ChannelType::BidirectionalSlave);

        assert!(channel.set_period(0x2000).is_err());
        assert_eq!(channel.period(), None);
    }

    #[test]
    fn configure_and_open_lifecycle() {
        let mut transport = negotiating_transport(1, 1);
        transport.reply_to(
            &encode(&AssignChannel::new(0, ChannelType::BidirectionalSlave, 0, None)).unwrap(),
            &ack(0, 0x42, 0x00),
        );
        transport.reply_to(&encode(&SearchTimeout::new(0, 12)).unwrap(), &ack(0, 0x44, 0x00));
        transport.reply_to(
            &encode(&ChannelPeriod::new(0, 8070)).unwrap(),
            &ack(0, 0x43, 0x00),
        );
        transport.reply_to(
            &encode(&ChannelRfFrequency::new(0, 57)).unwrap(),
            &ack(0, 0x45, 0x00),
        );
        transport.reply_to(&encode(&OpenChannel::new(0)).unwrap(), &ack(0, 0x4B, 0x00));
        let node = started_node(transport);
        let channel = node.channel(0).unwrap();

        channel
            .assign(&Network::new([0; 8]), ChannelType::BidirectionalSlave)
            .unwrap();
        channel.set_search_timeout(12).unwrap();
        channel.set_period(8070).unwrap();
        channel.set_rf_frequency(57).unwrap();
        channel.open().unwrap();

        assert_eq!(channel.search_timeout(), Some(12));
        assert_eq!(channel.period(), Some(8070));
        assert_eq!(channel.rf_frequency(), Some(57));
    }

    struct Recorder {
        channels: StdMutex<Vec<u8>>,
    }

    impl EventCallback for Recorder {
        fn process(&self, msg: &AntMessage) -> Result<(), EventError> {
            if let Some(channel) = msg.channel_number() {
                self.channels.lock().unwrap().push(channel);
            }
            Ok(())
        }
    }

    #[test]
    fn channel_forwards_only_its_own_messages() {
        let channel: Arc<Channel<MockTransport>> = Channel::new(Weak::new(), 0, TIMEOUT);
        let recorder = Arc::new(Recorder {
            channels: StdMutex::new(Vec::new()),
        });
        let callback: Arc<dyn EventCallback> = recorder.clone();
        channel.subscribe(&callback);
        // Duplicate registration keeps a single entry
        channel.subscribe(&callback);

        let for_us = crate::messages::decode(&frame(0x4E, &[0, 1, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap()
            .0;
        let for_other = crate::messages::decode(&frame(0x4E, &[1, 1, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap()
            .0;
        let unscoped = crate::messages::decode(&frame(0x6F, &[0x20])).unwrap().0;
        channel.process(&for_us).unwrap();
        channel.process(&for_other).unwrap();
        channel.process(&unscoped).unwrap();

        assert_eq!(recorder.channels.lock().unwrap().as_slice(), [0]);

        channel.unsubscribe(&callback);
        channel.process(&for_us).unwrap();
        assert_eq!(recorder.channels.lock().unwrap().len(), 1);
    }

    struct CountingCallback {
        count: AtomicUsize,
    }

    impl EventCallback for CountingCallback {
        fn process(&self, _msg: &AntMessage) -> Result<(), EventError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn open_subscribes_channel_to_the_machine() {
        let mut transport = negotiating_transport(1, 1);
        transport.reply_to(&encode(&OpenChannel::new(0)).unwrap(), &ack(0, 0x4B, 0x00));
        // Poking the device after open makes it broadcast back to us
        let poke = crate::messages::data::AcknowledgedData::new(0, [9; 8]);
        transport.reply_to(
            &encode(&poke).unwrap(),
            &frame(0x4E, &[0, 1, 2, 3, 4, 5, 6, 7, 8]),
        );
        let node = started_node(transport);
        let channel = node.channel(0).unwrap();

        let counter = Arc::new(CountingCallback {
            count: AtomicUsize::new(0),
        });
        let callback: Arc<dyn EventCallback> = counter.clone();
        channel.subscribe(&callback);
        channel.open().unwrap();

        // Broadcast data addressed to the open channel reaches subscribers
        // via the pump
        node.evm.write_message(&poke).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_waits_for_the_closed_event() {
        let mut transport = negotiating_transport(1, 1);
        transport.reply_to(
            &encode(&AssignChannel::new(0, ChannelType::BidirectionalSlave, 0, None)).unwrap(),
            &ack(0, 0x42, 0x00),
        );
        transport.reply_to(&encode(&OpenChannel::new(0)).unwrap(), &ack(0, 0x4B, 0x00));
        // The close ack arrives bundled with an unrelated RF event before the
        // closed event itself
        let mut close_reply = ack(0, 0x4C, 0x00);
        close_reply.extend_from_slice(&frame(0x40, &[0, 0x01, 0x03]));
        close_reply.extend_from_slice(&frame(0x40, &[0, 0x01, 0x07]));
        transport.reply_to(&encode(&CloseChannel::new(0)).unwrap(), &close_reply);
        let node = started_node(transport);
        let channel = node.channel(0).unwrap();

        channel
            .assign(&Network::new([0; 8]), ChannelType::BidirectionalSlave)
            .unwrap();
        channel.open().unwrap();
        channel.close().unwrap();

        // The rendezvous consumed only the closed event; the EVENT_TX stayed
        // queued for other consumers
        let event = node
            .evm
            .wait_for_channel_event(0, MessageCode::EventTx, Some(TIMEOUT))
            .unwrap();
        assert_eq!(event.channel_number, 0);
    }

    #[test]
    fn unassign_frees_the_channel() {
        let mut transport = negotiating_transport(1, 1);
        transport.reply_to(
            &encode(&AssignChannel::new(0, ChannelType::BidirectionalSlave, 0, None)).unwrap(),
            &ack(0, 0x42, 0x00),
        );
        transport.reply_to(
            &encode(&crate::messages::config::UnAssignChannel::new(0)).unwrap(),
            &ack(0, 0x41, 0x00),
        );
        let node = started_node(transport);
        let channel = node.channel(0).unwrap();

        channel
            .assign(&Network::new([0; 8]), ChannelType::BidirectionalSlave)
            .unwrap();
        assert!(node.free_channel().is_err());
        channel.unassign().unwrap();
        assert_eq!(node.free_channel().unwrap().number(), 0);
    }

    #[test]
    fn search_timeout_conversion() {
        assert_eq!(duration_to_search_timeout(Duration::from_secs(30)), 12);
        assert_eq!(duration_to_search_timeout(Duration::from_secs(1000)), 255);
        assert_eq!(duration_to_search_timeout(Duration::ZERO), 0);
    }
}
