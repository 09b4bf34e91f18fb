//! Helpers shared by the engine integration tests.
//!
//! Two engines are wired back to back through [`QueueTransport`]s; [`Pair::pump`]
//! moves queued SysEx from each engine's transport into the other engine's
//! `process_input` until both queues are empty.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use midi_ci_core::{decode_message, Message, Muid};
use midi_ci_device::{CiEvent, DeviceConfig, MidiCiDevice, QueueTransport};

pub const INITIATOR: u32 = 0x10;
pub const RESPONDER: u32 = 0x20;

pub fn muid(value: u32) -> Muid {
    Muid::new(value).unwrap()
}

/// Installs a test-writer subscriber so engine logs show up in failing
/// test output.  Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Responder identity used by the scenarios: manufacturer bytes 1, 2, 3.
pub fn responder_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.identity.manufacturer_id = 0x03_0201;
    config.identity.family_id = 0x0004;
    config.identity.model_id = 0x0005;
    config.identity.version_id = 0x0000_0001;
    config.identity.manufacturer = "ACME".to_string();
    config.identity.family = "Synths".to_string();
    config.identity.model = "S-1".to_string();
    config.identity.version = "1.0.1".to_string();
    config.identity.product_instance_id = "S1-0042".to_string();
    config
}

/// A config with every discovery follow-up turned off.
pub fn quiet_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.auto_query.endpoint_inquiry = false;
    config.auto_query.profile_inquiry = false;
    config.auto_query.property_capabilities = false;
    config.auto_query.process_inquiry = false;
    config.auto_query.resource_list = false;
    config.auto_query.device_info = false;
    config
}

/// Records every event an engine publishes.
pub fn record_events(device: &mut MidiCiDevice) -> Rc<RefCell<Vec<CiEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    device.subscribe_events(move |e| sink.borrow_mut().push(e.clone()));
    events
}

/// Decodes everything queued on `transport`.
pub fn drain_messages(transport: &QueueTransport) -> Vec<Message> {
    transport
        .drain()
        .into_iter()
        .map(|(group, bytes)| decode_message(group, &bytes).unwrap())
        .collect()
}

pub struct Pair {
    pub initiator: MidiCiDevice,
    pub responder: MidiCiDevice,
    pub initiator_out: QueueTransport,
    pub responder_out: QueueTransport,
}

impl Pair {
    pub fn new(initiator_config: DeviceConfig, responder_config: DeviceConfig) -> Self {
        init_tracing();
        let initiator_out = QueueTransport::new();
        let responder_out = QueueTransport::new();
        let initiator =
            MidiCiDevice::new(INITIATOR, initiator_config, Box::new(initiator_out.clone())).unwrap();
        let responder =
            MidiCiDevice::new(RESPONDER, responder_config, Box::new(responder_out.clone())).unwrap();
        Self {
            initiator,
            responder,
            initiator_out,
            responder_out,
        }
    }

    /// Delivers queued traffic both ways until nothing is left.  Returns the
    /// number of messages delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..64 {
            let to_responder = self.initiator_out.drain();
            let to_initiator = self.responder_out.drain();
            if to_responder.is_empty() && to_initiator.is_empty() {
                return delivered;
            }
            for (group, bytes) in to_responder {
                self.responder.process_input(group, &bytes);
                delivered += 1;
            }
            for (group, bytes) in to_initiator {
                self.initiator.process_input(group, &bytes);
                delivered += 1;
            }
        }
        panic!("traffic did not settle");
    }

    /// Runs discovery from the initiator and settles all follow-ups.
    pub fn discover(&mut self) {
        self.initiator.send_discovery().unwrap();
        self.pump();
    }
}
