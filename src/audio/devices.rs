//! Input device enumeration
//!
//! Device names are transient across reboots but descriptions are stable, so
//! user settings store descriptions and we map them back to names here.

use crate::audio::server::AudioServer;
use crate::error::DeviceQueryError;
use crate::models::SourceInfo;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Description -> driver-level source name
pub type InputDevices = BTreeMap<String, String>;

pub struct DeviceResolver {
    server: Arc<dyn AudioServer>,
    /// Our own virtual microphone, never offered for selection
    virtual_source: String,
    snapshot: Mutex<Option<InputDevices>>,
}

impl DeviceResolver {
    pub fn new(server: Arc<dyn AudioServer>, virtual_source: impl Into<String>) -> Self {
        Self {
            server,
            virtual_source: virtual_source.into(),
            snapshot: Mutex::new(None),
        }
    }

    /// Re-query the server and replace the cached enumeration
    pub fn refresh(&self) -> Result<InputDevices, DeviceQueryError> {
        let sources = self.server.list_sources()?;

        let devices: InputDevices = sources
            .into_iter()
            .filter(|s| !s.is_monitor() && s.name != self.virtual_source)
            .filter(SourceInfo::is_capture_device)
            .map(|s| (s.description, s.name))
            .collect();

        debug!("Found {} input devices", devices.len());
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(devices.clone());
        Ok(devices)
    }

    /// Latest enumeration, querying the server if none was taken yet
    pub fn try_list_input_devices(&self) -> Result<InputDevices, DeviceQueryError> {
        if let Some(devices) = self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(devices.clone());
        }
        self.refresh()
    }

    /// Like [`try_list_input_devices`](Self::try_list_input_devices) but an
    /// unreachable server yields an empty mapping.
    pub fn list_input_devices(&self) -> InputDevices {
        self.try_list_input_devices().unwrap_or_else(|e| {
            warn!("{}", e);
            InputDevices::new()
        })
    }

    /// Map a description to a source name. Refreshes once on a miss so
    /// devices plugged in after the last enumeration are found.
    pub fn resolve(&self, description: &str) -> Result<String, DeviceQueryError> {
        if let Some(name) = self.try_list_input_devices()?.get(description) {
            return Ok(name.clone());
        }
        self.refresh()?
            .get(description)
            .cloned()
            .ok_or_else(|| DeviceQueryError::NotFound(description.to_string()))
    }

    /// First source (monitors included) matching `predicate`
    pub fn find_source<P>(&self, predicate: P) -> Result<Option<SourceInfo>, DeviceQueryError>
    where
        P: Fn(&SourceInfo) -> bool,
    {
        Ok(self
            .server
            .list_sources()?
            .into_iter()
            .find(|s| predicate(s)))
    }
}
