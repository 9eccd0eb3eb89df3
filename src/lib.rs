/// BLE 信标区域定位
///
/// 多个固定位置的蓝牙代理上报信标 RSSI，经平滑、测距、三角定位后
/// 得到信标的二维位置，并判断其所在的多边形区域。

pub mod algorithms;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod observation;
pub mod scanner;
pub mod tracker;
pub mod zones;

pub use algorithms::{PositionEstimate, ProxyReference, ProxySet, SignalModel, Triangulator};
pub use config::{BeaconCategory, BeaconConfig, BeaconParameters, TrackingConfig};
pub use discovery::{BeaconType, DiscoveredBeacon, DiscoveryFilter, DiscoveryFilters};
pub use engine::{BeaconUpdate, DeviceStatusEvent, IngestOutcome, TrackingEngine};
pub use error::{ConfigError, ObservationError, TrackingError, ZoneError};
pub use ingestion::{Clock, Command, EngineEvent, IngestionLoop, SystemClock};
pub use observation::{AdvertisementMetadata, MacAddress, Observation, Telemetry};
pub use tracker::{BeaconPosition, BeaconTracker, ProxyDistance, ZoneChange};
pub use zones::{Zone, ZoneIndex, ZoneType};
