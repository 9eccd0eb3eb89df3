/// 🎯 实时定位链路测试
///
/// 功能：
/// - 模拟信号源持续发送代理观测
/// - 摄入循环在独立任务中实时计算信标坐标
/// - 事件通道输出位置与区域变化
///
/// 代理配置（约 111 米间隔的直角三角形）：
/// - living_room: (0, 0)
/// - kitchen:     (0, 0.001)
/// - garage:      (0.001, 0)

use std::time::Duration;

use blezone::algorithms::ProxyReference;
use blezone::config::{BeaconConfig, TrackingConfig};
use blezone::engine::{DeviceStatusEvent, TrackingEngine};
use blezone::ingestion::{Command, EngineEvent, IngestionLoop};
use blezone::observation::{MacAddress, Observation};
use blezone::zones::{Zone, ZoneType};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const BEACON: &str = "20:A7:16:5E:C5:D6";

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn format_signal_level(rssi: i16) -> &'static str {
    match rssi {
        r if r > -50 => "▓▓▓▓▓ 极强",
        r if r > -60 => "▓▓▓▓░ 强",
        r if r > -70 => "▓▓▓░░ 中",
        r if r > -80 => "▓▓░░░ 弱",
        _ => "▓░░░░ 极弱",
    }
}

fn setup_commands() -> Vec<Command> {
    let beacon: MacAddress = BEACON.parse().unwrap();
    vec![
        Command::SetProxy(ProxyReference::new("living_room", 0.0, 0.0)),
        Command::SetProxy(ProxyReference::new("kitchen", 0.0, 0.001)),
        Command::SetProxy(ProxyReference::new("garage", 0.001, 0.0)),
        Command::AddZone(
            Zone::new(
                "house",
                "House",
                ZoneType::Home,
                vec![(-0.0005, -0.0005), (-0.0005, 0.0015), (0.0015, 0.0015), (0.0015, -0.0005)],
            )
            .unwrap(),
        ),
        Command::OnboardBeacon {
            beacon_id: beacon,
            config: BeaconConfig {
                name: Some("RFstar_C5D6".to_string()),
                ..Default::default()
            },
        },
    ]
}

async fn simulated_signal_source(tx: mpsc::Sender<Command>) {
    println!("📡 [信号任务] 启动模拟信号源...");

    let beacon: MacAddress = BEACON.parse().unwrap();
    let signal_sequences: Vec<Vec<(&str, i16)>> = vec![
        vec![("living_room", -52), ("kitchen", -77), ("garage", -86)],
        vec![("living_room", -48), ("kitchen", -70), ("garage", -80)],
        vec![("living_room", -65), ("kitchen", -68), ("garage", -50)],
    ];

    for command in setup_commands() {
        if tx.send(command).await.is_err() {
            return;
        }
    }

    for _ in 0..3 {
        for signals in &signal_sequences {
            for &(proxy_id, rssi) in signals {
                println!("│  {} → {} dBm {}", proxy_id, rssi, format_signal_level(rssi));
                let observation = Observation::new(beacon, proxy_id, rssi, now_secs());
                if tx.send(Command::Observe(observation)).await.is_err() {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
        }
    }

    println!("📡 [信号任务] 信号序列发送完成");
}

#[tokio::test]
async fn test_realtime_positioning() {
    let engine = TrackingEngine::new(TrackingConfig::default()).unwrap();
    let (command_tx, mut event_rx, handle) = IngestionLoop::spawn(engine, 100);

    let signal_task = tokio::spawn(simulated_signal_source(command_tx));

    let mut updates = 0;
    let mut triangulated = 0;
    let mut zone_changes = Vec::new();

    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::BeaconUpdated(update) => {
                updates += 1;
                if update.triangulated {
                    triangulated += 1;
                }
                if let Some(position) = update.position {
                    println!(
                        "📍 #{:<3} ({:.7}, {:.7}) ±{:.2} m via {:?}",
                        updates, position.latitude, position.longitude, position.accuracy, update.source_proxies
                    );
                }
            }
            EngineEvent::ZoneChanged { change, .. } => zone_changes.push(change),
            EngineEvent::CommandRejected { command, reason } => panic!("{} 被拒绝: {}", command, reason),
            _ => {}
        }
    }

    signal_task.await.unwrap();
    let engine = handle.await.unwrap();

    // 3 轮 × 3 组 × 3 个代理
    assert_eq!(updates, 27);
    // 第一条观测只有一个代理
    assert_eq!(triangulated, 26);

    assert_eq!(zone_changes.len(), 1);
    assert_eq!(zone_changes[0].current.as_deref(), Some("house"));

    let beacon: MacAddress = BEACON.parse().unwrap();
    let position = engine.get_position(&beacon).unwrap();
    assert!(position.latitude >= 0.0 && position.longitude >= 0.0);
    assert!(position.latitude + position.longitude <= 0.001);
    assert_eq!(engine.get_zone(&beacon), Some("house"));

    println!("✓ 实时定位测试完成");
}

#[tokio::test]
async fn test_maintenance_reports_offline_proxy() {
    let engine = TrackingEngine::new(TrackingConfig::default()).unwrap();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(8);

    let ingestion =
        IngestionLoop::new(engine, command_rx, event_tx).with_maintenance_interval(Duration::from_millis(20));
    let handle = tokio::spawn(ingestion.run());

    command_tx
        .send(Command::SetProxy(ProxyReference::new("attic", 0.0, 0.0)))
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("维护任务应在超时前运行")
        .unwrap();
    assert_eq!(
        event,
        EngineEvent::DeviceStatus(DeviceStatusEvent::ProxyOffline {
            proxy_id: "attic".to_string(),
            last_seen: None,
        })
    );

    drop(command_tx);
    let engine = handle.await.unwrap();
    assert!(engine.proxies().contains("attic"));
}
