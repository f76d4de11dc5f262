use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::event::{Event, Value};
use crate::sink::Sink;

/// Sink that keeps every event it receives.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink(Arc<Mutex<Vec<Event>>>);

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl Sink for RecordingSink {
    fn write(&self, event: &Event) -> Result<(), Error> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub(crate) fn str_field<'a>(event: &'a Event, key: &str) -> Option<&'a str> {
    match event.get(key) {
        Some(Value::Str(v)) => Some(v),
        _ => None,
    }
}
