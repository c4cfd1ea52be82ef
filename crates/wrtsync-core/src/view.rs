//! Read-model views
//!
//! Host adapters bind computed values to their own entity objects through
//! [`EntityView`]. Views borrow engine state and are rendered on demand; they
//! never hold state of their own.

use crate::accumulator::PeriodAccumulator;
use crate::devices::Device;
use crate::presence::{Presence, PresenceTracker, evaluate_presence};
use crate::wan::WanSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Fixed capability set exposed to host adapters
pub trait EntityView {
    /// Primary state value
    fn current_value(&self) -> Value;

    /// Secondary attributes
    fn attributes(&self) -> Map<String, Value>;
}

/// A rendered view, ready to hand to a host or write out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub unique_id: String,
    pub state: Value,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn render(unique_id: impl Into<String>, view: &dyn EntityView) -> Self {
        Self {
            unique_id: unique_id.into(),
            state: view.current_value(),
            attributes: view.attributes(),
        }
    }
}

/// Presence entity of one device
#[derive(Debug, Clone)]
pub struct DeviceTrackerView<'a> {
    device: &'a Device,
    presence: Presence,
}

impl<'a> DeviceTrackerView<'a> {
    pub fn new(device: &'a Device, tracker: &PresenceTracker, now: DateTime<Utc>) -> Self {
        Self {
            device,
            presence: tracker.presence(device, now),
        }
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }
}

impl EntityView for DeviceTrackerView<'_> {
    fn current_value(&self) -> Value {
        Value::from(self.presence.as_str())
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("mac".into(), json!(self.device.mac));
        attrs.insert("hostname".into(), json!(self.device.hostname));
        if let Some(ip) = &self.device.ip {
            attrs.insert("ip".into(), json!(ip));
        }
        if let Some(seen) = self.device.last_seen {
            attrs.insert("last_seen".into(), json!(seen.to_rfc3339()));
        }
        attrs.insert("source_type".into(), json!("router"));
        attrs
    }
}

/// Device counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounts {
    pub total: usize,
    /// In the neighbor table right now
    pub active: usize,
    /// Active, or seen within the grace period
    pub recently_seen: usize,
    pub offline: usize,
}

impl DeviceCounts {
    pub fn tally(devices: &[Device], grace: Duration, now: DateTime<Utc>) -> Self {
        let mut counts = Self {
            total: devices.len(),
            ..Self::default()
        };
        for device in devices {
            if device.is_connected {
                counts.active += 1;
                counts.recently_seen += 1;
                continue;
            }
            match evaluate_presence(false, device.last_seen, grace, now) {
                Presence::Home => counts.recently_seen += 1,
                Presence::Away => counts.offline += 1,
            }
        }
        counts
    }
}

/// Router-level summary; the value is the number of devices at home
#[derive(Debug, Clone)]
pub struct RouterSummaryView<'a> {
    pub host: &'a str,
    pub counts: DeviceCounts,
    pub update_interval: std::time::Duration,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_success: bool,
}

impl EntityView for RouterSummaryView<'_> {
    fn current_value(&self) -> Value {
        json!(self.counts.recently_seen)
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        let status = if self.last_update_success {
            "Connected"
        } else {
            "Disconnected"
        };
        attrs.insert("router_status".into(), json!(status));
        attrs.insert("host".into(), json!(self.host));
        attrs.insert(
            "update_interval_seconds".into(),
            json!(self.update_interval.as_secs_f64()),
        );
        attrs.insert(
            "last_update".into(),
            self.last_update
                .map_or(Value::Null, |ts| json!(ts.to_rfc3339())),
        );
        attrs.insert("total_devices".into(), json!(self.counts.total));
        attrs.insert("active_devices".into(), json!(self.counts.active));
        attrs.insert(
            "recently_seen_devices".into(),
            json!(self.counts.recently_seen),
        );
        attrs.insert("offline_devices".into(), json!(self.counts.offline));
        attrs
    }
}

/// Which WAN value a sensor shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WanSensorKind {
    TotalDownload,
    TotalUpload,
    DownloadSpeed,
    UploadSpeed,
}

impl WanSensorKind {
    pub const ALL: [WanSensorKind; 4] = [
        WanSensorKind::TotalDownload,
        WanSensorKind::TotalUpload,
        WanSensorKind::DownloadSpeed,
        WanSensorKind::UploadSpeed,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            WanSensorKind::TotalDownload => "wan_total_download",
            WanSensorKind::TotalUpload => "wan_total_upload",
            WanSensorKind::DownloadSpeed => "wan_download_speed",
            WanSensorKind::UploadSpeed => "wan_upload_speed",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            WanSensorKind::TotalDownload | WanSensorKind::TotalUpload => "GB",
            WanSensorKind::DownloadSpeed | WanSensorKind::UploadSpeed => "Mbit/s",
        }
    }
}

/// One WAN sensor over the latest snapshot; `null` until data is available
#[derive(Debug, Clone, Copy)]
pub struct WanSensorView<'a> {
    pub kind: WanSensorKind,
    pub snapshot: Option<&'a WanSnapshot>,
}

impl EntityView for WanSensorView<'_> {
    fn current_value(&self) -> Value {
        let Some(wan) = self.snapshot else {
            return Value::Null;
        };
        let value = match self.kind {
            WanSensorKind::TotalDownload => Some(wan.total_download_gb),
            WanSensorKind::TotalUpload => Some(wan.total_upload_gb),
            WanSensorKind::DownloadSpeed => wan.download_mbps,
            WanSensorKind::UploadSpeed => wan.upload_mbps,
        };
        value.map_or(Value::Null, Value::from)
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("unit_of_measurement".into(), json!(self.kind.unit()));
        if let Some(wan) = self.snapshot {
            let delta = match self.kind {
                WanSensorKind::TotalDownload | WanSensorKind::DownloadSpeed => wan.rx_delta_bytes,
                WanSensorKind::TotalUpload | WanSensorKind::UploadSpeed => wan.tx_delta_bytes,
            };
            attrs.insert("last_delta_bytes".into(), json!(delta));
        }
        attrs
    }
}

impl EntityView for PeriodAccumulator {
    fn current_value(&self) -> Value {
        Value::from(self.value_gb())
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("unit_of_measurement".into(), json!("GB"));
        attrs.insert("period".into(), json!(self.period().as_str()));
        attrs.insert("direction".into(), json!(self.direction().as_str()));
        attrs.insert("period_marker".into(), json!(self.period_marker()));
        attrs
    }
}
