//! Per-address OSC endpoint handles
//!
//! One handle per address, exposing the generic endpoint contracts for each
//! base kind. The address doubles as the bind pattern, so a handle built from
//! a literal address observes exactly that address.

use super::pattern::AddressPattern;
use super::{coerce, OscDispatcher};
use crate::endpoint::{Bindable, Callback, Cancel, Endpoint, EndpointId, Settable};
use crate::error::Result;
use rosc::{OscMessage, OscType};
use std::sync::Arc;

/// One OSC address exposed through the generic endpoint contracts
pub struct OscEndpoint {
    dispatcher: OscDispatcher,
    pattern: AddressPattern,
}

impl OscEndpoint {
    /// Validates `address` as a pattern up front so binds cannot fail later.
    pub fn new(dispatcher: &OscDispatcher, address: &str) -> Result<Self> {
        Ok(Self {
            dispatcher: dispatcher.clone(),
            pattern: AddressPattern::parse(address)?,
        })
    }

    pub fn address(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Endpoint for OscEndpoint {
    fn id(&self) -> EndpointId {
        EndpointId::Osc(self.pattern.as_str().to_string())
    }
}

impl Bindable<i64> for OscEndpoint {
    fn bind(&self, callback: Callback<i64>) -> Cancel {
        self.dispatcher.register(
            self.pattern.clone(),
            Arc::new(move |message: &OscMessage| callback(coerce::int_arg(message)?)),
        )
    }
}

impl Bindable<f64> for OscEndpoint {
    fn bind(&self, callback: Callback<f64>) -> Cancel {
        self.dispatcher.register(
            self.pattern.clone(),
            Arc::new(move |message: &OscMessage| callback(coerce::float_arg(message)?)),
        )
    }
}

impl Bindable<String> for OscEndpoint {
    fn bind(&self, callback: Callback<String>) -> Cancel {
        self.dispatcher.register(
            self.pattern.clone(),
            Arc::new(move |message: &OscMessage| callback(coerce::str_arg(message)?)),
        )
    }
}

impl Bindable<bool> for OscEndpoint {
    fn bind(&self, callback: Callback<bool>) -> Cancel {
        self.dispatcher.register(
            self.pattern.clone(),
            Arc::new(move |message: &OscMessage| callback(coerce::bool_arg(message)?)),
        )
    }
}

impl Settable<i64> for OscEndpoint {
    fn set(&self, value: i64) -> Result<()> {
        self.dispatcher
            .send(self.pattern.as_str(), vec![OscType::Int(value as i32)])
    }
}

impl Settable<f64> for OscEndpoint {
    fn set(&self, value: f64) -> Result<()> {
        self.dispatcher
            .send(self.pattern.as_str(), vec![OscType::Float(value as f32)])
    }
}

impl Settable<String> for OscEndpoint {
    fn set(&self, value: String) -> Result<()> {
        self.dispatcher
            .send(self.pattern.as_str(), vec![OscType::String(value)])
    }
}

impl Settable<bool> for OscEndpoint {
    fn set(&self, value: bool) -> Result<()> {
        self.dispatcher
            .send(self.pattern.as_str(), vec![OscType::Bool(value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rosc::OscMessage;

    #[test]
    fn endpoint_observes_its_own_address() {
        let dispatcher = OscDispatcher::new();
        let fader = dispatcher.endpoint("/mix/chan/3/fader").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _bind = Bindable::<f64>::bind(
            &fader,
            Box::new(move |value| {
                sink.lock().push(value);
                Ok(())
            }),
        );

        dispatcher
            .dispatch_message(&OscMessage {
                addr: "/mix/chan/3/fader".to_string(),
                args: vec![OscType::Float(0.5)],
            })
            .unwrap();
        dispatcher
            .dispatch_message(&OscMessage {
                addr: "/mix/chan/4/fader".to_string(),
                args: vec![OscType::Float(0.9)],
            })
            .unwrap();
        assert_eq!(*seen.lock(), vec![0.5]);
    }

    #[test]
    fn identity_is_the_address() {
        let dispatcher = OscDispatcher::new();
        let endpoint = dispatcher.endpoint("/mix/main/mute").unwrap();
        assert_eq!(
            endpoint.id(),
            EndpointId::Osc("/mix/main/mute".to_string())
        );
    }

    #[test]
    fn bad_address_is_rejected_at_construction() {
        let dispatcher = OscDispatcher::new();
        assert!(dispatcher.endpoint("no-slash").is_err());
    }
}
