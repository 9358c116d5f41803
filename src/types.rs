use serde::{Deserialize, Serialize};

/// Ports a simulated scan can report.
pub const SCAN_PORTS: [u16; 6] = [80, 443, 8080, 3128, 9050, 1080];

/// Reachability of a simulated endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Open,
    Closed,
    Filtered,
}

impl EndpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Open => "open",
            EndpointState::Closed => "closed",
            EndpointState::Filtered => "filtered",
        }
    }
}

/// Service label attached to a discovered endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceLabel {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    Proxy,
    Tor,
    #[serde(rename = "SOCKS")]
    Socks,
}

impl ServiceLabel {
    pub const ALL: [ServiceLabel; 5] = [
        ServiceLabel::Http,
        ServiceLabel::Https,
        ServiceLabel::Proxy,
        ServiceLabel::Tor,
        ServiceLabel::Socks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceLabel::Http => "HTTP",
            ServiceLabel::Https => "HTTPS",
            ServiceLabel::Proxy => "Proxy",
            ServiceLabel::Tor => "Tor",
            ServiceLabel::Socks => "SOCKS",
        }
    }
}

/// One simulated endpoint found during a scan. Never mutated after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub address: String,
    pub port: u16,
    pub state: EndpointState,
    pub latency_ms: u32,
    pub service: Option<ServiceLabel>,
}

impl EndpointRecord {
    pub fn is_open(&self) -> bool {
        self.state == EndpointState::Open
    }
}

/// Point-in-time view of the scan engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScanState {
    pub progress_percent: f64,
    pub is_active: bool,
    /// Oldest first.
    pub discovered: Vec<EndpointRecord>,
    pub selected_endpoint: Option<EndpointRecord>,
}

impl ScanState {
    /// Number of open records currently held in `discovered`.
    pub fn open_count(&self) -> usize {
        self.discovered.iter().filter(|r| r.is_open()).count()
    }

    pub fn is_connected(&self) -> bool {
        self.selected_endpoint.is_some()
    }
}

/// Routing status of a tracked application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Active,
    Routed,
    Blocked,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Active => "ACTIVE",
            AppStatus::Routed => "ROUTED",
            AppStatus::Blocked => "BLOCKED",
        }
    }
}

/// Running traffic counters for one catalog application.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppTrafficEntry {
    pub name: String,
    pub icon: String,
    pub upload_bytes: f64,
    pub download_bytes: f64,
    pub status: AppStatus,
}

/// Point-in-time view of the traffic engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TrafficState {
    pub total_upload_bytes: f64,
    pub total_download_bytes: f64,
    /// Catalog order; membership is fixed at construction.
    pub entries: Vec<AppTrafficEntry>,
}

impl TrafficState {
    pub fn entry(&self, name: &str) -> Option<&AppTrafficEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn routed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == AppStatus::Routed)
            .count()
    }
}
