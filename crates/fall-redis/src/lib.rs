//! # Fall Redis
//!
//! This crate defines the fall alert record stored in Redis and the functions
//! that write and read it. An external notifier consumes `fall:queue`; actual
//! delivery (push, SMS) happens there, not here.
use std::time::Duration;

use anyhow::Result;
use fall_core::{Outcome, Phase};
use fall_registry::FallNotifier;
use log::{debug, warn};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Commands, Connection};
use serde::{Deserialize, Serialize};

/// How long [`RedisNotifier`] waits for a connection before giving up on an alert.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// --- Data Structures ---

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FallAlert {
    pub device_id: String,
    /// Detection time (ms since the epoch).
    pub at: f64,
    pub state: Phase,
    pub pitch_now: Option<f64>,
    pub baseline_pitch: Option<f64>,
    pub pitch_delta_from_baseline: f64,
}

impl FallAlert {
    pub fn from_outcome(device_id: &str, outcome: &Outcome) -> Self {
        Self {
            device_id: device_id.to_string(),
            at: outcome.at,
            state: outcome.state,
            pitch_now: outcome.debug.pitch_now,
            baseline_pitch: outcome.debug.baseline_pitch,
            pitch_delta_from_baseline: outcome.debug.pitch_delta_from_baseline,
        }
    }
}

// --- Key Builders ---

pub fn fall_alert_key(device_id: &str, at_ms: f64) -> String {
    format!("fall:alert:{}:{}", device_id, at_ms.round() as i64)
}

pub fn last_fall_key(device_id: &str) -> String {
    format!("fall:last:{}", device_id)
}

pub fn fall_queue_key() -> &'static str {
    "fall:queue"
}

// --- Generic I/O Helpers ---

fn write_struct<T: Serialize>(con: &mut Connection, key: &str, value: &T) -> Result<()> {
    let json_string = serde_json::to_string(value)?;
    con.set::<_, _, ()>(key, json_string)?;
    Ok(())
}

fn read_struct<T: for<'de> Deserialize<'de>>(con: &mut Connection, key: &str) -> Result<T> {
    let json_string: String = con.get(key)?;
    let value: T = serde_json::from_str(&json_string)?;
    Ok(value)
}

// --- Read/Write Functions ---

/// Store `alert` under its own key and under `fall:last:<device>`, both
/// expiring after `ttl_seconds`.
pub fn write_fall_alert(con: &mut Connection, alert: &FallAlert, ttl_seconds: usize) -> Result<()> {
    let key = fall_alert_key(&alert.device_id, alert.at);
    let last_key = last_fall_key(&alert.device_id);
    write_struct(con, &key, alert)?;
    con.expire::<_, ()>(&key, ttl_seconds as i64)?;
    write_struct(con, &last_key, alert)?;
    con.expire::<_, ()>(&last_key, ttl_seconds as i64)?;
    Ok(())
}

pub fn read_fall_alert(con: &mut Connection, device_id: &str, at_ms: f64) -> Result<FallAlert> {
    read_struct(con, &fall_alert_key(device_id, at_ms))
}

pub fn read_last_fall(con: &mut Connection, device_id: &str) -> Result<FallAlert> {
    read_struct(con, &last_fall_key(device_id))
}

/// Append `alert` to the queue an external notifier drains.
pub fn enqueue_fall_alert(con: &mut Connection, alert: &FallAlert) -> Result<()> {
    let json_string = serde_json::to_string(alert)?;
    con.rpush::<_, _, ()>(fall_queue_key(), json_string)?;
    Ok(())
}

/// Atomically take every queued alert, oldest first.
pub fn drain_fall_queue(con: &mut Connection) -> Result<Vec<FallAlert>> {
    let (items,): (Vec<String>,) = redis::pipe()
        .atomic()
        .lrange(fall_queue_key(), 0, -1)
        .del(fall_queue_key())
        .ignore()
        .query(con)?;
    items
        .iter()
        .map(|item| serde_json::from_str::<FallAlert>(item).map_err(anyhow::Error::from))
        .collect()
}

pub fn get_all_fall_alerts(con: &mut Connection) -> Result<Vec<FallAlert>> {
    let mut alerts = Vec::new();
    let keys: Vec<String> = con.keys("fall:alert:*")?;
    if keys.is_empty() {
        return Ok(alerts);
    }
    let values: Vec<String> = con.get(keys)?;
    for val in values {
        let alert: FallAlert = serde_json::from_str(&val)?;
        alerts.push(alert);
    }
    alerts.sort_by(|a, b| a.at.total_cmp(&b.at));
    Ok(alerts)
}

/// Async variant of [`write_fall_alert`] + [`enqueue_fall_alert`] for tokio services.
pub async fn publish_fall_alert_async(
    con: &mut MultiplexedConnection,
    alert: &FallAlert,
    ttl_seconds: usize,
) -> Result<()> {
    let key = fall_alert_key(&alert.device_id, alert.at);
    let last_key = last_fall_key(&alert.device_id);
    let json_string = serde_json::to_string(alert)?;
    con.set::<_, _, ()>(&key, &json_string).await?;
    con.expire::<_, ()>(&key, ttl_seconds as i64).await?;
    con.set::<_, _, ()>(&last_key, &json_string).await?;
    con.expire::<_, ()>(&last_key, ttl_seconds as i64).await?;
    con.rpush::<_, _, ()>(fall_queue_key(), &json_string).await?;
    Ok(())
}

// --- Notifier ---

/// Stores and enqueues every detected fall.
///
/// Holds one connection and reopens it after a failed write. Every call blocks
/// on Redis, so wrap it in a `fall_registry::BackgroundNotifier` when it sits
/// on an ingest path.
pub struct RedisNotifier {
    client: Client,
    ttl_seconds: usize,
    connect_timeout: Duration,
    con: Mutex<Option<Connection>>,
}

impl RedisNotifier {
    pub fn open(redis_url: &str, ttl_seconds: usize) -> Result<Self> {
        Ok(Self {
            client: Client::open(redis_url)?,
            ttl_seconds,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            con: Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn publish(&self, con: &mut Connection, alert: &FallAlert) -> Result<()> {
        write_fall_alert(con, alert, self.ttl_seconds)?;
        enqueue_fall_alert(con, alert)
    }
}

impl FallNotifier for RedisNotifier {
    fn name(&self) -> &str {
        "redis"
    }

    fn notify(&self, device_id: &str, outcome: &Outcome) -> Result<()> {
        let alert = FallAlert::from_outcome(device_id, outcome);
        let mut slot = self.con.lock();
        let mut con = match slot.take() {
            Some(con) => con,
            None => self.client.get_connection_with_timeout(self.connect_timeout)?,
        };
        match self.publish(&mut con, &alert) {
            Ok(()) => {
                *slot = Some(con);
                debug!("queued fall alert {}", fall_alert_key(device_id, alert.at));
                Ok(())
            }
            Err(e) => {
                warn!("dropping redis connection after failed write: {e:#}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fall_core::{DebugInfo, FallEvent};

    // NOTE: I/O tests require a running Redis server on the default port (6379).
    // Run them with `cargo test -- --ignored`.

    fn get_redis_connection() -> Connection {
        let client = Client::open("redis://127.0.0.1/").unwrap();
        client.get_connection().unwrap()
    }

    fn flush_db() {
        let mut con = get_redis_connection();
        redis::cmd("FLUSHDB").execute(&mut con);
    }

    fn alert(device_id: &str, at: f64) -> FallAlert {
        FallAlert {
            device_id: device_id.to_string(),
            at,
            state: Phase::Confirm,
            pitch_now: Some(-72.5),
            baseline_pitch: Some(1.5),
            pitch_delta_from_baseline: 74.0,
        }
    }

    fn fall_outcome(at: f64) -> Outcome {
        Outcome {
            state: Phase::Confirm,
            event: Some(FallEvent::FallDetected),
            fall: true,
            at,
            debug: DebugInfo {
                pitch_now: Some(-72.5),
                baseline_pitch: Some(1.5),
                pitch_delta_from_baseline: 74.0,
                baseline_at_downward: Some(1.5),
                flipped180: None,
            },
        }
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(fall_alert_key("wrist-1", 1_700_000_000_123.4), "fall:alert:wrist-1:1700000000123");
        assert_eq!(last_fall_key("wrist-1"), "fall:last:wrist-1");
        assert_eq!(fall_queue_key(), "fall:queue");
    }

    #[test]
    fn test_alert_from_outcome() {
        assert_eq!(FallAlert::from_outcome("wrist-1", &fall_outcome(5000.0)), alert("wrist-1", 5000.0));
    }

    #[test]
    fn test_alert_json_shape() {
        let json = serde_json::to_value(alert("wrist-1", 5000.0)).unwrap();
        assert_eq!(json["deviceId"], "wrist-1");
        assert_eq!(json["state"], "confirm");
        assert_eq!(json["pitchDeltaFromBaseline"], 74.0);
    }

    #[test]
    #[ignore]
    fn test_fall_alert_io() {
        flush_db();
        let mut con = get_redis_connection();
        let a = alert("wrist-1", 9876.0);

        assert!(write_fall_alert(&mut con, &a, 10).is_ok());
        assert_eq!(read_fall_alert(&mut con, "wrist-1", 9876.0).unwrap(), a);
        assert_eq!(read_last_fall(&mut con, "wrist-1").unwrap(), a);

        let all = get_all_fall_alerts(&mut con).unwrap();
        assert_eq!(all, vec![a.clone()]);

        for key in [fall_alert_key("wrist-1", 9876.0), last_fall_key("wrist-1")] {
            let ttl: isize = con.ttl(&key).unwrap();
            assert!(ttl > 0 && ttl <= 10, "{key} ttl {ttl}");
        }
    }

    #[test]
    #[ignore]
    fn test_queue_drains_in_order() {
        flush_db();
        let mut con = get_redis_connection();
        enqueue_fall_alert(&mut con, &alert("a", 1.0)).unwrap();
        enqueue_fall_alert(&mut con, &alert("b", 2.0)).unwrap();

        let drained = drain_fall_queue(&mut con).unwrap();
        assert_eq!(drained, vec![alert("a", 1.0), alert("b", 2.0)]);
        assert!(drain_fall_queue(&mut con).unwrap().is_empty());
    }

    #[test]
    #[ignore]
    fn test_redis_notifier_writes_and_enqueues() {
        flush_db();
        let notifier = RedisNotifier::open("redis://127.0.0.1/", 30).unwrap();
        notifier.notify("cane-3", &fall_outcome(4321.0)).unwrap();
        notifier.notify("cane-3", &fall_outcome(9999.0)).unwrap();

        let mut con = get_redis_connection();
        assert_eq!(read_last_fall(&mut con, "cane-3").unwrap(), alert("cane-3", 9999.0));
        assert_eq!(drain_fall_queue(&mut con).unwrap().len(), 2);
    }

    #[test]
    fn test_unreachable_redis_fails_within_timeout() {
        // Nothing listens on port 1.
        let notifier = RedisNotifier::open("redis://127.0.0.1:1/", 30)
            .unwrap()
            .with_connect_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(notifier.notify("cane-3", &fall_outcome(1.0)).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(notifier.con.lock().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_publish_async() {
        flush_db();
        let client = Client::open("redis://127.0.0.1/").unwrap();
        let mut con = client.get_multiplexed_async_connection().await.unwrap();
        publish_fall_alert_async(&mut con, &alert("wrist-9", 77.0), 10).await.unwrap();

        let mut sync_con = get_redis_connection();
        assert_eq!(read_fall_alert(&mut sync_con, "wrist-9", 77.0).unwrap(), alert("wrist-9", 77.0));
        let ttl: isize = sync_con.ttl(last_fall_key("wrist-9")).unwrap();
        assert!(ttl > 0 && ttl <= 10);
        assert_eq!(drain_fall_queue(&mut sync_con).unwrap(), vec![alert("wrist-9", 77.0)]);
    }
}
