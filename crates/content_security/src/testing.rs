//! Test doubles shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::channel::Channel;
use crate::error::{SecurityError, SecurityResult};
use crate::listener::{ListenerError, ResponseHead, StreamListener};
use crate::load_info::LoadInfo;

pub struct TestChannel {
    pub load_info: Option<Arc<LoadInfo>>,
    pub uri: Mutex<Option<Url>>,
    pub headers: Mutex<Vec<(String, String)>>,
}

impl TestChannel {
    pub fn new(uri: &str, load_info: LoadInfo) -> Self {
        Self {
            load_info: Some(Arc::new(load_info)),
            uri: Mutex::new(Some(Url::parse(uri).unwrap())),
            headers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_uri(&self, uri: &str) {
        *self.uri.lock() = Some(Url::parse(uri).unwrap());
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

impl Channel for TestChannel {
    fn load_info(&self) -> Option<Arc<LoadInfo>> {
        self.load_info.clone()
    }

    fn final_uri(&self) -> SecurityResult<Url> {
        self.uri
            .lock()
            .clone()
            .ok_or_else(|| SecurityError::TargetUnresolved("no uri".to_string()))
    }

    fn set_request_header(&self, name: &str, value: &str) {
        self.headers.lock().push((name.to_string(), value.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl StreamListener for RecordingListener {
    fn on_start_request(&self, response: &ResponseHead) -> Result<(), ListenerError> {
        self.events.lock().push(format!("start {}", response.status));
        Ok(())
    }

    fn on_data_available(&self, data: &[u8]) -> Result<(), ListenerError> {
        self.events.lock().push(format!("data {}", data.len()));
        Ok(())
    }

    fn on_stop_request(&self, status: Result<(), ListenerError>) {
        let event = match status {
            Ok(()) => "stop ok".to_string(),
            Err(err) => format!("stop err: {}", err),
        };
        self.events.lock().push(event);
    }

    fn on_redirect(&self, _channel: &dyn Channel, new_url: &Url) -> Result<(), ListenerError> {
        self.events.lock().push(format!("redirect {}", new_url));
        Ok(())
    }
}
