use crate::cache::Snapshot;
use crate::fleet::merge::{UnifiedDeviceView, merge_devices};
use crate::models::dispenser::{AnalyticsRecord, DeviceId, DeviceRecord, RealtimeStatusRecord};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Devices,
    Analytics,
    Realtime,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Devices => "devices",
            SourceKind::Analytics => "analytics",
            SourceKind::Realtime => "realtime status",
        };
        f.write_str(name)
    }
}

/// Latest successfully fetched record set per source; `None` until the first success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sources {
    pub devices: Option<Vec<DeviceRecord>>,
    pub analytics: Option<Vec<AnalyticsRecord>>,
    pub realtime: Option<Vec<RealtimeStatusRecord>>,
}

impl Sources {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Sources {
            devices: snapshot.devices,
            analytics: snapshot.analytics,
            realtime: snapshot.realtime,
        }
    }

    pub fn to_snapshot(&self, saved_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            saved_at,
            devices: self.devices.clone(),
            analytics: self.analytics.clone(),
            realtime: self.realtime.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_none() && self.analytics.is_none() && self.realtime.is_none()
    }

    /// Missing sources merge as empty lists.
    pub fn merged(&self) -> Vec<UnifiedDeviceView> {
        merge_devices(
            self.devices.as_deref().unwrap_or(&[]),
            self.analytics.as_deref().unwrap_or(&[]),
            self.realtime.as_deref().unwrap_or(&[]),
        )
    }

    /// Ids the realtime feed reports but the registry does not know. Empty while the registry
    /// has never been fetched, since nothing can be concluded then.
    pub fn unregistered_ids(&self) -> BTreeSet<DeviceId> {
        let (Some(devices), Some(realtime)) = (&self.devices, &self.realtime) else {
            return BTreeSet::new();
        };
        let registered: BTreeSet<DeviceId> = devices.iter().filter_map(|d| d.id).collect();
        realtime
            .iter()
            .filter_map(|r| r.device_id)
            .filter(|id| !registered.contains(id))
            .collect()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    /// Periodic cadence; refreshes realtime status only.
    Tick,
    Manual,
    /// Backend state changed underneath us; re-fetch everything.
    DataChanged,
    Stop,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    Full,
    RealtimeOnly,
}

impl Trigger {
    pub fn scope(&self) -> Option<RefreshScope> {
        match self {
            Trigger::Tick => Some(RefreshScope::RealtimeOnly),
            Trigger::Initial | Trigger::Manual | Trigger::DataChanged => Some(RefreshScope::Full),
            Trigger::Stop => None,
        }
    }
}

/// Source of the three record sets. Shared across the fetch threads of one refresh.
pub trait SourceFetcher: Sync {
    fn fetch_devices(&self) -> Result<Vec<DeviceRecord>, String>;
    fn fetch_analytics(&self) -> Result<Vec<AnalyticsRecord>, String>;
    fn fetch_realtime(&self) -> Result<Vec<RealtimeStatusRecord>, String>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOutcome {
    pub updated: Vec<SourceKind>,
    pub failed: Vec<(SourceKind, String)>,
}

impl RefreshOutcome {
    pub fn any_updated(&self) -> bool {
        !self.updated.is_empty()
    }
}

/// Fetch the sources in `scope` concurrently and store whatever succeeded.
///
/// A failed source keeps its previous records; failures never affect the other sources.
pub fn refresh<F: SourceFetcher>(fetcher: &F, sources: &mut Sources, scope: RefreshScope) -> RefreshOutcome {
    let mut outcome = RefreshOutcome::default();
    match scope {
        RefreshScope::Full => {
            let (devices, analytics, realtime) = thread::scope(|s| {
                let devices = s.spawn(|| fetcher.fetch_devices());
                let analytics = s.spawn(|| fetcher.fetch_analytics());
                let realtime = fetcher.fetch_realtime();
                (joined(devices.join()), joined(analytics.join()), realtime)
            });
            store(SourceKind::Devices, &mut sources.devices, devices, &mut outcome);
            store(SourceKind::Analytics, &mut sources.analytics, analytics, &mut outcome);
            store(SourceKind::Realtime, &mut sources.realtime, realtime, &mut outcome);
        }
        RefreshScope::RealtimeOnly => {
            let realtime = fetcher.fetch_realtime();
            store(SourceKind::Realtime, &mut sources.realtime, realtime, &mut outcome);
        }
    }
    outcome
}

fn joined<T>(result: thread::Result<Result<T, String>>) -> Result<T, String> {
    result.unwrap_or_else(|_| Err("fetch thread panicked".to_string()))
}

fn store<T>(kind: SourceKind, slot: &mut Option<Vec<T>>, result: Result<Vec<T>, String>, outcome: &mut RefreshOutcome) {
    match result {
        Ok(records) => {
            debug!("Fetched {} {} record(s)", records.len(), kind);
            *slot = Some(records);
            outcome.updated.push(kind);
        }
        Err(e) => {
            match slot {
                Some(stale) => warn!("Fetching {} failed; keeping {} previous record(s): {}", kind, stale.len(), e),
                None => warn!("Fetching {} failed; no previous data: {}", kind, e),
            }
            outcome.failed.push((kind, e));
        }
    }
}

/// Refresh on a steady cadence until a `Stop` trigger arrives.
///
/// Starts with a full refresh. Between refreshes it waits for the remainder of `interval`
/// or for the next trigger on `triggers`, whichever comes first. When a realtime-only refresh
/// reports a device the registry does not know yet, a full refresh follows immediately,
/// once per newly seen id. Refreshes never overlap.
pub fn run_loop<F, C>(
    fetcher: &F,
    sources: &mut Sources,
    triggers: &Receiver<Trigger>,
    interval: Duration,
    mut on_refresh: C,
) -> Result<(), String>
where
    F: SourceFetcher,
    C: FnMut(&Sources, &RefreshOutcome, Trigger),
{
    let mut next = Trigger::Initial;
    let mut flagged: BTreeSet<DeviceId> = BTreeSet::new();
    let mut commands_open = true;

    loop {
        let tick_start = Instant::now();
        let Some(scope) = next.scope() else {
            info!("Stop requested; leaving refresh loop");
            return Ok(());
        };

        let outcome = refresh(fetcher, sources, scope);
        on_refresh(&*sources, &outcome, next);

        let unregistered = sources.unregistered_ids();
        let newly_seen = unregistered.difference(&flagged).count();
        flagged = unregistered;
        if newly_seen > 0 && scope == RefreshScope::RealtimeOnly {
            info!(
                "Realtime reports {} device(s) missing from the registry; refetching all sources",
                newly_seen
            );
            next = Trigger::DataChanged;
            continue;
        }

        // Maintain steady cadence
        let remaining = interval.saturating_sub(tick_start.elapsed());
        next = if commands_open {
            match triggers.recv_timeout(remaining) {
                Ok(trigger) => trigger,
                Err(RecvTimeoutError::Timeout) => Trigger::Tick,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command channel closed; continuing on the timer only");
                    commands_open = false;
                    thread::sleep(interval.saturating_sub(tick_start.elapsed()));
                    Trigger::Tick
                }
            }
        } else {
            thread::sleep(remaining);
            Trigger::Tick
        };
    }
}

/// Interactive command from a line of input: empty, `r` or `refresh` for a manual refresh,
/// `q` or `quit` to stop.
pub fn parse_command(line: &str) -> Option<Trigger> {
    match line.trim().to_lowercase().as_str() {
        "" | "r" | "refresh" => Some(Trigger::Manual),
        "q" | "quit" | "exit" => Some(Trigger::Stop),
        _ => None,
    }
}

/// Forward commands read from `input` until it ends or the loop goes away.
pub fn forward_commands<R: BufRead>(input: R, tx: Sender<Trigger>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Reading commands failed: {}", e);
                return;
            }
        };
        match parse_command(&line) {
            Some(trigger) => {
                if tx.send(trigger).is_err() {
                    return;
                }
            }
            None => warn!("Unknown command {:?}; use `r` to refresh or `q` to quit", line.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct FakeFetcher {
        fail_devices: bool,
        fail_realtime: bool,
        realtime_ids: Mutex<Vec<i64>>,
        device_calls: AtomicUsize,
        analytics_calls: AtomicUsize,
        realtime_calls: AtomicUsize,
    }

    impl SourceFetcher for FakeFetcher {
        fn fetch_devices(&self) -> Result<Vec<DeviceRecord>, String> {
            self.device_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_devices {
                return Err("http 502: bad gateway".into());
            }
            Ok(vec![DeviceRecord {
                id: Some(DeviceId(1)),
                name: Some("Lobby".into()),
                ..Default::default()
            }])
        }

        fn fetch_analytics(&self) -> Result<Vec<AnalyticsRecord>, String> {
            self.analytics_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![AnalyticsRecord {
                device_id: Some(DeviceId(1)),
                low_alert_count: 2,
                ..Default::default()
            }])
        }

        fn fetch_realtime(&self) -> Result<Vec<RealtimeStatusRecord>, String> {
            self.realtime_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_realtime {
                return Err("transport error: connection refused".into());
            }
            let ids = self.realtime_ids.lock().unwrap().clone();
            Ok(ids
                .into_iter()
                .map(|id| RealtimeStatusRecord {
                    device_id: Some(DeviceId(id)),
                    current_status: Some("normal".into()),
                    ..Default::default()
                })
                .collect())
        }
    }

    fn fetcher_with_realtime(ids: &[i64]) -> FakeFetcher {
        FakeFetcher {
            realtime_ids: Mutex::new(ids.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn full_refresh_fetches_every_source() {
        let fetcher = fetcher_with_realtime(&[1]);
        let mut sources = Sources::default();
        let outcome = refresh(&fetcher, &mut sources, RefreshScope::Full);
        assert_eq!(outcome.updated.len(), 3);
        assert!(outcome.failed.is_empty());
        let views = sources.merged();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "Lobby");
        assert_eq!(views[0].low_alert_count, 2);
        assert_eq!(views[0].current_status, "normal");
    }

    #[test]
    fn failed_source_keeps_previous_records() {
        let mut sources = Sources::default();
        refresh(&fetcher_with_realtime(&[1]), &mut sources, RefreshScope::Full);
        let before = sources.clone();

        let failing = FakeFetcher {
            fail_devices: true,
            fail_realtime: true,
            ..Default::default()
        };
        let outcome = refresh(&failing, &mut sources, RefreshScope::Full);
        assert_eq!(outcome.updated, vec![SourceKind::Analytics]);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(sources.devices, before.devices);
        assert_eq!(sources.realtime, before.realtime);
    }

    #[test]
    fn never_fetched_source_merges_as_empty() {
        let failing = FakeFetcher {
            fail_devices: true,
            ..Default::default()
        };
        let mut sources = Sources::default();
        refresh(&failing, &mut sources, RefreshScope::Full);
        assert!(sources.devices.is_none());
        // analytics still yields a view, named from the id
        let views = sources.merged();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "Device 1");
        assert!(!views[0].registered);
    }

    #[test]
    fn tick_refreshes_realtime_only() {
        let fetcher = fetcher_with_realtime(&[1]);
        let mut sources = Sources::default();
        let outcome = refresh(&fetcher, &mut sources, RefreshScope::RealtimeOnly);
        assert_eq!(outcome.updated, vec![SourceKind::Realtime]);
        assert_eq!(fetcher.device_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.analytics_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.realtime_calls.load(Ordering::SeqCst), 1);
        assert_eq!(Trigger::Tick.scope(), Some(RefreshScope::RealtimeOnly));
        assert_eq!(Trigger::Manual.scope(), Some(RefreshScope::Full));
        assert_eq!(Trigger::Stop.scope(), None);
    }

    #[test]
    fn unregistered_devices_are_detected() {
        let mut sources = Sources::default();
        refresh(&fetcher_with_realtime(&[1, 7, 9]), &mut sources, RefreshScope::Full);
        let ids: Vec<i64> = sources.unregistered_ids().into_iter().map(|id| id.0).collect();
        assert_eq!(ids, vec![7, 9]);

        let without_registry = Sources {
            devices: None,
            ..sources
        };
        assert!(without_registry.unregistered_ids().is_empty());
    }

    #[test]
    fn loop_follows_triggers_until_stop() {
        let fetcher = fetcher_with_realtime(&[1, 7]);
        let mut sources = Sources::default();
        let (tx, rx) = mpsc::channel();
        tx.send(Trigger::Manual).unwrap();
        tx.send(Trigger::Stop).unwrap();

        let mut seen = Vec::new();
        run_loop(&fetcher, &mut sources, &rx, Duration::from_secs(60), |_, _, trigger| {
            seen.push(trigger)
        })
        .unwrap();

        // device 7 was already unknown after a full refresh; nothing to refetch
        assert_eq!(seen, vec![Trigger::Initial, Trigger::Manual]);
        assert_eq!(fetcher.device_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn new_device_in_realtime_triggers_full_refetch() {
        let fetcher = fetcher_with_realtime(&[1]);
        let mut sources = Sources::default();
        let (tx, rx) = mpsc::channel();

        let mut seen = Vec::new();
        run_loop(&fetcher, &mut sources, &rx, Duration::from_millis(10), |_, _, trigger| {
            seen.push(trigger);
            match trigger {
                Trigger::Initial => fetcher.realtime_ids.lock().unwrap().push(7),
                Trigger::DataChanged => tx.send(Trigger::Stop).unwrap(),
                _ => {}
            }
        })
        .unwrap();

        // once per newly seen id, not once per cycle
        assert_eq!(seen, vec![Trigger::Initial, Trigger::Tick, Trigger::DataChanged]);
        assert_eq!(fetcher.device_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn loop_ticks_between_commands() {
        let fetcher = fetcher_with_realtime(&[1]);
        let mut sources = Sources::default();
        let (tx, rx) = mpsc::channel();

        let mut seen = Vec::new();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            tx.send(Trigger::Stop).unwrap();
        });
        run_loop(&fetcher, &mut sources, &rx, Duration::from_millis(20), |_, _, trigger| {
            seen.push(trigger)
        })
        .unwrap();
        sender.join().unwrap();

        assert_eq!(seen[0], Trigger::Initial);
        assert!(seen[1..].iter().all(|t| *t == Trigger::Tick));
        assert!(seen.len() >= 2, "{seen:?}");
        assert_eq!(fetcher.device_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn commands() {
        assert_eq!(parse_command(""), Some(Trigger::Manual));
        assert_eq!(parse_command(" R "), Some(Trigger::Manual));
        assert_eq!(parse_command("refresh"), Some(Trigger::Manual));
        assert_eq!(parse_command("quit"), Some(Trigger::Stop));
        assert_eq!(parse_command("bogus"), None);

        let (tx, rx) = mpsc::channel();
        forward_commands(Cursor::new("r\nwhat\nq\n"), tx);
        let received: Vec<Trigger> = rx.iter().collect();
        assert_eq!(received, vec![Trigger::Manual, Trigger::Stop]);
    }
}
