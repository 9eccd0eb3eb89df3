/// 实时摄入循环
///
/// 单个 tokio 任务按到达顺序处理命令，保证同一信标的观测串行生效；
/// 维护任务（过期清理、发现会话到期、设备状态检查）由定时器驱动。
/// 输入通道关闭后循环退出并交还引擎。

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::algorithms::ProxyReference;
use crate::config::BeaconConfig;
use crate::engine::{BeaconUpdate, DeviceStatusEvent, IngestOutcome, TrackingEngine};
use crate::observation::{MacAddress, Observation};
use crate::tracker::ZoneChange;
use crate::zones::Zone;

/// 时间来源（秒）
pub trait Clock: Send + 'static {
    fn now(&self) -> f64;
}

/// 系统时钟（Unix 纪元秒）
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// 输入命令
#[derive(Clone, Debug)]
pub enum Command {
    Observe(Observation),
    SetProxy(ProxyReference),
    RemoveProxy(String),
    AddZone(Zone),
    RemoveZone(String),
    ConfigureBeacon { beacon_id: MacAddress, config: BeaconConfig },
    OnboardBeacon { beacon_id: MacAddress, config: BeaconConfig },
    StartDiscovery { duration_secs: u64 },
    StopDiscovery,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Observe(_) => "observe",
            Command::SetProxy(_) => "set_proxy",
            Command::RemoveProxy(_) => "remove_proxy",
            Command::AddZone(_) => "add_zone",
            Command::RemoveZone(_) => "remove_zone",
            Command::ConfigureBeacon { .. } => "configure_beacon",
            Command::OnboardBeacon { .. } => "onboard_beacon",
            Command::StartDiscovery { .. } => "start_discovery",
            Command::StopDiscovery => "stop_discovery",
        }
    }
}

/// 输出事件
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    BeaconUpdated(BeaconUpdate),
    ZoneChanged { beacon_id: MacAddress, change: ZoneChange },
    DeviceStatus(DeviceStatusEvent),
    DiscoveryEnded,
    CommandRejected { command: String, reason: String },
}

/// 摄入循环
pub struct IngestionLoop<C: Clock = SystemClock> {
    engine: TrackingEngine,
    clock: C,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<EngineEvent>,
    maintenance_interval: Duration,
}

impl IngestionLoop<SystemClock> {
    pub fn new(
        engine: TrackingEngine,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self::with_clock(engine, SystemClock, commands, events)
    }

    /// 创建通道并在后台任务中运行
    ///
    /// 返回命令发送端、事件接收端和任务句柄（任务结束时交还引擎）。
    pub fn spawn(
        engine: TrackingEngine,
        buffer: usize,
    ) -> (mpsc::Sender<Command>, mpsc::Receiver<EngineEvent>, JoinHandle<TrackingEngine>) {
        let (command_tx, command_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(Self::new(engine, command_rx, event_tx).run());
        (command_tx, event_rx, handle)
    }
}

impl<C: Clock> IngestionLoop<C> {
    pub fn with_clock(
        engine: TrackingEngine,
        clock: C,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let maintenance_interval = Duration::from_secs(engine.config().maintenance_interval_secs);
        IngestionLoop {
            engine,
            clock,
            commands,
            events,
            maintenance_interval,
        }
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn engine(&self) -> &TrackingEngine {
        &self.engine
    }

    /// 运行直到命令通道关闭
    pub async fn run(mut self) -> TrackingEngine {
        let mut ticker = tokio::time::interval(self.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的第一次 tick 立即完成
        ticker.tick().await;

        info!(interval_secs = self.maintenance_interval.as_secs_f64(), "摄入循环启动");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let events = self.handle_command(command);
                        publish(&self.events, events).await;
                    }
                    None => {
                        info!("命令通道关闭，摄入循环退出");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let events = self.run_maintenance();
                    publish(&self.events, events).await;
                }
            }
        }

        self.engine
    }

    /// 处理单条命令，返回需要发布的事件
    pub fn handle_command(&mut self, command: Command) -> Vec<EngineEvent> {
        let name = command.name();
        let result = match command {
            Command::Observe(observation) => {
                return match self.engine.ingest_observation(&observation) {
                    IngestOutcome::Tracked(update) => {
                        let mut events = Vec::with_capacity(2);
                        if let Some(change) = update.zone_change.clone() {
                            events.push(EngineEvent::ZoneChanged {
                                beacon_id: update.beacon_id,
                                change,
                            });
                        }
                        events.insert(0, EngineEvent::BeaconUpdated(update));
                        events
                    }
                    IngestOutcome::Buffered | IngestOutcome::Dropped => Vec::new(),
                };
            }
            Command::SetProxy(proxy) => self.engine.set_proxy_reference(proxy).map(|_| ()),
            Command::RemoveProxy(proxy_id) => {
                self.engine.remove_proxy(&proxy_id);
                Ok(())
            }
            Command::AddZone(zone) => self.engine.add_zone(zone).map(|_| ()),
            Command::RemoveZone(zone_id) => {
                self.engine.remove_zone(&zone_id);
                Ok(())
            }
            Command::ConfigureBeacon { beacon_id, config } => self.engine.configure_beacon(beacon_id, config),
            Command::OnboardBeacon { beacon_id, config } => self.engine.onboard_beacon(beacon_id, config),
            Command::StartDiscovery { duration_secs } => {
                let now = self.clock.now();
                self.engine.start_discovery(now, duration_secs).map_err(Into::into)
            }
            Command::StopDiscovery => {
                self.engine.stop_discovery();
                Ok(())
            }
        };

        match result {
            Ok(()) => Vec::new(),
            Err(err) => {
                warn!(command = name, error = %err, "命令被拒绝");
                vec![EngineEvent::CommandRejected {
                    command: name.to_string(),
                    reason: err.to_string(),
                }]
            }
        }
    }

    /// 维护任务：清理过期读数、检查发现会话到期、检查设备状态
    pub fn run_maintenance(&mut self) -> Vec<EngineEvent> {
        let now = self.clock.now();
        self.engine.clean_old_readings(now);

        let mut events = Vec::new();
        if self.engine.expire_discovery(now) {
            events.push(EngineEvent::DiscoveryEnded);
        }
        events.extend(
            self.engine
                .check_device_status(now)
                .into_iter()
                .map(EngineEvent::DeviceStatus),
        );
        events
    }
}

async fn publish(sender: &mpsc::Sender<EngineEvent>, events: Vec<EngineEvent>) {
    for event in events {
        if sender.send(event).await.is_err() {
            debug!("事件接收端已关闭，丢弃事件");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::config::TrackingConfig;
    use crate::zones::ZoneType;

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn set(&self, secs: f64) {
            self.0.store(secs.to_bits(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::SeqCst))
        }
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn test_loop() -> (IngestionLoop<ManualClock>, ManualClock) {
        let engine = TrackingEngine::new(TrackingConfig::default()).unwrap();
        let (_command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let clock = ManualClock::default();
        (IngestionLoop::with_clock(engine, clock.clone(), command_rx, event_tx), clock)
    }

    #[test]
    fn test_rejected_command_reported() {
        let (mut ingestion, _) = test_loop();
        let zone = Zone {
            zone_id: "bad".to_string(),
            name: "Bad".to_string(),
            zone_type: ZoneType::Room,
            polygon: vec![(0.0, 0.0)],
            icon: None,
        };

        let events = ingestion.handle_command(Command::AddZone(zone));
        assert!(matches!(
            &events[..],
            [EngineEvent::CommandRejected { command, .. }] if command == "add_zone"
        ));

        let events = ingestion.handle_command(Command::StartDiscovery { duration_secs: 0 });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_observe_emits_update_and_zone_change() {
        let (mut ingestion, _) = test_loop();
        let beacon = mac("AA:BB:CC:DD:EE:01");

        for (id, lat, lon) in [("p1", 0.0, 0.0), ("p2", 0.0, 0.001)] {
            assert!(ingestion.handle_command(Command::SetProxy(ProxyReference::new(id, lat, lon))).is_empty());
        }
        let zone = Zone::new("yard", "Yard", ZoneType::Custom, vec![(-1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (1.0, -1.0)])
            .unwrap();
        ingestion.handle_command(Command::AddZone(zone));
        ingestion.handle_command(Command::OnboardBeacon {
            beacon_id: beacon,
            config: BeaconConfig::default(),
        });

        let events = ingestion.handle_command(Command::Observe(Observation::new(beacon, "p1", -65, 0.0)));
        assert!(matches!(&events[..], [EngineEvent::BeaconUpdated(update)] if !update.triangulated));

        let events = ingestion.handle_command(Command::Observe(Observation::new(beacon, "p2", -70, 1.0)));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], EngineEvent::BeaconUpdated(update) if update.triangulated));
        assert!(matches!(&events[1], EngineEvent::ZoneChanged { change, .. } if change.current.as_deref() == Some("yard")));
    }

    #[test]
    fn test_maintenance_ends_discovery_and_reports_status() {
        let (mut ingestion, clock) = test_loop();
        ingestion.handle_command(Command::SetProxy(ProxyReference::new("p1", 0.0, 0.0)));

        clock.set(100.0);
        assert!(ingestion.handle_command(Command::StartDiscovery { duration_secs: 30 }).is_empty());

        clock.set(131.0);
        let events = ingestion.run_maintenance();
        assert_eq!(events[0], EngineEvent::DiscoveryEnded);
        assert!(matches!(
            &events[1],
            EngineEvent::DeviceStatus(DeviceStatusEvent::ProxyOffline { proxy_id, last_seen: None }) if proxy_id == "p1"
        ));

        assert!(ingestion.run_maintenance().is_empty());
    }

    #[test]
    fn test_run_returns_engine_when_channel_closes() {
        tokio_test::block_on(async {
            let engine = TrackingEngine::new(TrackingConfig::default()).unwrap();
            let (command_tx, command_rx) = mpsc::channel(8);
            let (event_tx, _event_rx) = mpsc::channel(8);
            let ingestion = IngestionLoop::new(engine, command_rx, event_tx);

            tokio_test::assert_ok!(
                command_tx
                    .send(Command::SetProxy(ProxyReference::new("p1", 0.0, 0.0)))
                    .await
            );
            drop(command_tx);

            let engine = ingestion.run().await;
            assert!(engine.proxies().contains("p1"));
        });
    }

    #[test]
    fn test_system_clock_is_epoch_seconds() {
        // 2020-01-01 之后
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}
