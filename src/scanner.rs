/// 本地蓝牙扫描代理
///
/// 用本机蓝牙适配器充当一个代理：周期性读取外围设备的广播属性，
/// 转换为 [`Observation`] 后以 [`Command::Observe`] 发送给摄入循环。
/// 广播到观测的转换不依赖 btleplug，始终可用；扫描器本身需要 `bluetooth` 特性。

use std::collections::HashMap;

use regex::Regex;

use crate::error::ObservationError;
use crate::observation::{APPLE_COMPANY_ID, AdvertisementMetadata, MacAddress, Observation};

/// 一次广播的属性快照
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub tx_power: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_uuids: Vec<String>,
}

impl Advertisement {
    /// 转换为观测；没有 RSSI 的广播返回 None
    pub fn to_observation(&self, proxy_id: &str, now: f64) -> Result<Option<Observation>, ObservationError> {
        let Some(rssi) = self.rssi else {
            return Ok(None);
        };
        let beacon_id = MacAddress::parse(&self.address)?;

        let mut metadata = self.metadata();
        metadata.local_name = self.local_name.clone();
        metadata.service_uuids = self.service_uuids.clone();
        if metadata.tx_power.is_none() {
            metadata.tx_power = self.tx_power;
        }

        Ok(Some(Observation::new(beacon_id, proxy_id, rssi, now).with_metadata(metadata)))
    }

    /// 厂商数据优先取可解码的 iBeacon 帧，否则取公司 ID 最小的一项
    fn metadata(&self) -> AdvertisementMetadata {
        if let Some(data) = self.manufacturer_data.get(&APPLE_COMPANY_ID) {
            let decoded = AdvertisementMetadata::from_manufacturer_data(APPLE_COMPANY_ID, data);
            if decoded.uuid.is_some() {
                return decoded;
            }
        }

        self.manufacturer_data
            .iter()
            .min_by_key(|(id, _)| **id)
            .map(|(id, data)| AdvertisementMetadata::from_manufacturer_data(*id, data))
            .unwrap_or_default()
    }
}

/// 设备名称过滤
#[derive(Clone, Debug)]
pub struct NameFilter(Regex);

impl NameFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(NameFilter(Regex::new(pattern)?))
    }

    /// 没有名称的设备不匹配
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        advertisement
            .local_name
            .as_deref()
            .is_some_and(|name| self.0.is_match(name))
    }
}

#[cfg(feature = "bluetooth")]
pub use local::LocalScanner;

#[cfg(feature = "bluetooth")]
mod local {
    use std::time::Duration;

    use btleplug::api::{Central, Manager, Peripheral, ScanFilter};
    use btleplug::platform::Manager as PlatformManager;
    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use tracing::{debug, info, warn};

    use super::{Advertisement, NameFilter};
    use crate::error::ScanError;
    use crate::ingestion::{Clock, Command, SystemClock};

    /// 本地扫描器
    pub struct LocalScanner {
        proxy_id: String,
        name_filter: Option<NameFilter>,
        poll_interval: Duration,
    }

    impl LocalScanner {
        pub fn new(proxy_id: impl Into<String>) -> Self {
            LocalScanner {
                proxy_id: proxy_id.into(),
                name_filter: None,
                poll_interval: Duration::from_secs(1),
            }
        }

        /// 只上报名称匹配该正则的设备
        pub fn with_name_filter(mut self, pattern: &str) -> Result<Self, ScanError> {
            self.name_filter = Some(NameFilter::new(pattern)?);
            Ok(self)
        }

        pub fn with_poll_interval(mut self, interval: Duration) -> Self {
            self.poll_interval = interval;
            self
        }

        /// 扫描直到命令通道关闭
        pub async fn run(self, commands: mpsc::Sender<Command>) -> Result<(), ScanError> {
            let manager = PlatformManager::new().await?;
            let adapter = manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or(ScanError::NoAdapter)?;

            adapter.start_scan(ScanFilter::default()).await?;
            info!(proxy_id = %self.proxy_id, "本地蓝牙扫描已启动");

            let clock = SystemClock;
            'scan: loop {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = commands.closed() => break 'scan,
                }

                for peripheral in adapter.peripherals().await? {
                    // 单次查询 properties
                    let props = match peripheral.properties().await {
                        Ok(Some(props)) => props,
                        Ok(None) => continue,
                        Err(err) => {
                            debug!(error = %err, "读取设备属性失败");
                            continue;
                        }
                    };

                    let advertisement = Advertisement {
                        address: props.address.to_string(),
                        local_name: props.local_name,
                        rssi: props.rssi,
                        tx_power: props.tx_power_level,
                        manufacturer_data: props.manufacturer_data,
                        service_uuids: props.services.iter().map(|u| u.to_string()).collect(),
                    };

                    if let Some(filter) = &self.name_filter {
                        if !filter.matches(&advertisement) {
                            continue;
                        }
                    }

                    let observation = match advertisement.to_observation(&self.proxy_id, clock.now()) {
                        Ok(Some(observation)) => observation,
                        Ok(None) => continue,
                        Err(err) => {
                            warn!(address = %advertisement.address, error = %err, "广播地址无法解析");
                            continue;
                        }
                    };

                    if commands.send(Command::Observe(observation)).await.is_err() {
                        break 'scan;
                    }
                }
            }

            info!(proxy_id = %self.proxy_id, "命令通道关闭，停止扫描");
            adapter.stop_scan().await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ibeacon_frame() -> Vec<u8> {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xc5]);
        data
    }

    #[test]
    fn test_advertisement_to_observation() {
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(0x0499, vec![0x05]);
        manufacturer_data.insert(APPLE_COMPANY_ID, ibeacon_frame());

        let advertisement = Advertisement {
            address: "20:a7:16:5e:c5:d6".to_string(),
            local_name: Some("RFstar_C5D6".to_string()),
            rssi: Some(-63),
            tx_power: Some(-40),
            manufacturer_data,
            service_uuids: Vec::new(),
        };

        let observation = advertisement.to_observation("desk", 10.0).unwrap().unwrap();
        assert_eq!(observation.beacon_id.to_string(), "20:A7:16:5E:C5:D6");
        assert_eq!(observation.proxy_id, "desk");
        assert_eq!(observation.rssi, -63);
        assert_eq!(observation.timestamp, 10.0);
        assert_eq!(observation.metadata.major, Some(1));
        assert_eq!(observation.metadata.minor, Some(2));
        // 帧内功率优先于广播的 tx_power_level
        assert_eq!(observation.metadata.tx_power, Some(-59));
        assert_eq!(observation.metadata.local_name.as_deref(), Some("RFstar_C5D6"));
    }

    #[test]
    fn test_advertisement_without_rssi() {
        let advertisement = Advertisement {
            address: "20:A7:16:5E:C5:D6".to_string(),
            ..Default::default()
        };
        assert_eq!(advertisement.to_observation("desk", 0.0).unwrap(), None);
    }

    #[test]
    fn test_advertisement_bad_address() {
        let advertisement = Advertisement {
            address: "not-a-mac".to_string(),
            rssi: Some(-50),
            ..Default::default()
        };
        assert!(advertisement.to_observation("desk", 0.0).is_err());
    }

    #[test]
    fn test_manufacturer_fallback_and_name_filter() {
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(0x0499, vec![0x05]);
        manufacturer_data.insert(0x0118, vec![0xbe, 0xac]);

        let advertisement = Advertisement {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            local_name: Some("RFstar_0CF1".to_string()),
            rssi: Some(-70),
            tx_power: Some(-40),
            manufacturer_data,
            service_uuids: Vec::new(),
        };
        let observation = advertisement.to_observation("desk", 0.0).unwrap().unwrap();
        assert_eq!(observation.metadata.manufacturer_id, Some(0x0118));
        assert_eq!(observation.metadata.tx_power, Some(-40));

        let filter = NameFilter::new("^RFstar_").unwrap();
        assert!(filter.matches(&advertisement));
        assert!(!filter.matches(&Advertisement::default()));
    }
}
