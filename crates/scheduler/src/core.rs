use std::{collections::HashSet, net::Ipv4Addr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use batch::{BatchPlugin, resolver};
use cloud::CloudDriver;
use ekacore::clock::Clock;
use rand::seq::SliceRandom;
use tracing::{error, info, instrument, warn};

use crate::{config::SchedulerConfig, event::Event, state::InternalState};

/// Owns the event queue and the decision functions. A single instance is
/// driven by repeated [`Scheduler::tick`] calls from the main driver; nothing
/// else touches [`InternalState`], so no internal locking is needed.
pub struct Scheduler {
    pub config: SchedulerConfig,
    pub batch: Arc<dyn BatchPlugin>,
    pub cloud: Arc<dyn CloudDriver>,
    pub clock: Arc<dyn Clock>,
    pub state: InternalState,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        batch: Arc<dyn BatchPlugin>,
        cloud: Arc<dyn CloudDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = InternalState::new(clock.as_ref());
        Self {
            config,
            batch,
            cloud,
            clock,
            state,
        }
    }

    /// Processes every event currently due, re-enqueuing whatever each
    /// handler returns. Does not sleep; the main driver owns the cadence
    /// between ticks.
    pub async fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();

        let mut due = Vec::new();
        let mut remaining = std::collections::VecDeque::with_capacity(self.state.event_queue.len());
        while let Some(evt) = self.state.event_queue.pop_front() {
            if evt.when().as_secs_f64() <= now.as_secs_f64() {
                due.push(evt);
            } else {
                remaining.push_back(evt);
            }
        }
        self.state.event_queue = remaining;

        for evt in due {
            if let Some(next) = self.dispatch(evt).await? {
                self.state.event_queue.push_back(next);
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, event: Event) -> Result<Option<Event>> {
        match event {
            Event::CheckQueue { .. } => self.check_queue().await,
            Event::CheckVms { .. } => self.check_vms().await,
            Event::DecayAllegedlyRunning { delta, .. } => {
                self.decay_allegedly_running(delta);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    async fn check_queue(&mut self) -> Result<Option<Event>> {
        let now = self.clock.now();
        info!("checking queue...");

        let batch = self.batch.clone();
        let n_waiting = tokio::task::spawn_blocking(move || batch.poll_queue())
            .await
            .context("poll_queue task panicked")??;

        let Some(n_waiting) = n_waiting else {
            error!("cannot get number of waiting jobs this time, sorry");
            return Ok(Some(Event::CheckQueue {
                when: now + Duration::from_secs(self.config.check_queue_every_s),
            }));
        };

        let corr = self.state.vms_allegedly_running * self.config.n_jobs_per_vm;
        let effective = n_waiting as i64 - corr as i64;
        info!(
            waiting = n_waiting,
            allegedly_running_correction = corr,
            effective,
            "evaluated queue pressure"
        );

        if effective > self.config.waiting_jobs_threshold as i64 {
            match self.state.first_seen_above_threshold {
                None => {
                    info!("queue above threshold: arming hysteresis timer");
                    self.state.first_seen_above_threshold = Some(now);
                }
                Some(first_seen) => {
                    if now.since(first_seen) > self.config.waiting_jobs_time_s as f64 {
                        let quantity = (effective as f64 / self.config.n_jobs_per_vm as f64)
                            .round()
                            .max(0.0) as u64;
                        info!(quantity, "queue above threshold past hysteresis window: scaling up");
                        let n_ok = self.scale_up(quantity).await?;
                        self.change_vms_allegedly_running(n_ok as i64);
                        self.state.first_seen_above_threshold = None;
                    } else {
                        info!("queue above threshold but still within hysteresis window");
                    }
                }
            }
        } else {
            if self.state.first_seen_above_threshold.is_some() {
                info!("queue back below threshold: disarming hysteresis timer");
            }
            self.state.first_seen_above_threshold = None;
        }

        Ok(Some(Event::CheckQueue {
            when: now + Duration::from_secs(self.config.check_queue_every_s),
        }))
    }

    #[instrument(skip(self))]
    async fn check_vms(&mut self) -> Result<Option<Event>> {
        let now = self.clock.now();
        info!("checking batch system's VMs...");

        let running = self.cloud.list_running(None).await?;
        let all_ips: Option<HashSet<Ipv4Addr>> = running
            .map(|instances| instances.iter().map(|i| i.private_ipv4).collect())
            .filter(|ips: &HashSet<Ipv4Addr>| !ips.is_empty());

        let previous = self.state.workers_status.clone();
        let batch = self.batch.clone();
        let new_status =
            tokio::task::spawn_blocking(move || batch.poll_status(&previous, all_ips.as_ref()))
                .await
                .context("poll_status task panicked")??;

        let Some(mut new_status) = new_status else {
            error!("cannot get batch system's VM status this time, sorry");
            return Ok(Some(Event::CheckVms { when: now }));
        };

        let mut shutdown_batch = Vec::new();
        for (host, status) in new_status.iter_mut() {
            if status.is_idle() && now.since(status.unchanged_since) > self.config.idle_for_time_s as f64 {
                info!(host, "idle for more than configured grace period: requesting shutdown");
                status.unchanged_since = now;
                shutdown_batch.push(host.clone());
            }
        }
        self.state.workers_status = new_status;

        if !shutdown_batch.is_empty() {
            let valid_hostnames: Vec<String> = self.state.workers_status.keys().cloned().collect();
            let k = self.scale_down(&shutdown_batch, &valid_hostnames).await?;
            self.change_vms_allegedly_running(-(k as i64));
        }

        if self.config.min_vms >= 1 {
            let known_ips = resolve_known_hosts(self.state.workers_status.keys());
            match self.cloud.list_running(Some(&known_ips)).await? {
                Some(filtered) => {
                    let considered = filtered.len() as i64 + self.state.vms_allegedly_running as i64;
                    let shortfall = self.config.min_vms - considered;
                    info!(considered, min_vms = self.config.min_vms, shortfall, "checked minimum quota");
                    if shortfall > 0 {
                        let n_ok = self.scale_up(shortfall as u64).await?;
                        self.change_vms_allegedly_running(n_ok as i64);
                    }
                }
                None => warn!("cannot list running instances to honor minimum quota this time"),
            }
        }

        Ok(Some(Event::CheckVms {
            when: now + Duration::from_secs(self.config.check_vms_every_s),
        }))
    }

    fn decay_allegedly_running(&mut self, delta: i64) {
        self.change_vms_allegedly_running(delta);
    }

    /// Adjusts the credit and, for a positive delta, schedules its own
    /// compensating decay. Never schedules one for a negative delta, see
    /// design notes on unconditional decay.
    fn change_vms_allegedly_running(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }

        let updated = self.state.vms_allegedly_running as i64 + delta;
        self.state.vms_allegedly_running = updated.max(0) as u64;
        info!(value = self.state.vms_allegedly_running, delta, "allegedly-running credit changed");

        if delta > 0 {
            let when = self.clock.now() + Duration::from_secs(self.config.estimated_vm_deploy_time_s);
            self.state
                .event_queue
                .push_back(Event::DecayAllegedlyRunning { when, delta: -delta });
        }
    }

    /// Requests up to `requested` new instances. The max quota is enforced
    /// against the total running count, unfiltered: a misconfigured image
    /// that never registers with the batch system still burns quota.
    async fn scale_up(&self, requested: u64) -> Result<u64> {
        if requested == 0 {
            return Ok(0);
        }
        info!(requested, "requesting more VMs");

        let n_to_start = if self.config.max_vms >= 1 {
            let total = match self.cloud.list_running(None).await? {
                Some(instances) => instances.len() as i64,
                None => {
                    error!("no list of instances can be retrieved from the cloud driver");
                    return Ok(0);
                }
            };
            let budget = self.config.max_vms - total;
            if budget <= 0 {
                warn!(total, max_vms = self.config.max_vms, "over quota: cannot launch any more VMs");
                0
            } else {
                (requested as i64).min(budget)
            }
        } else {
            requested as i64
        };

        let mut n_ok = 0_u64;
        for _ in 0..n_to_start {
            let ok = if self.config.dry_run_boot_vms {
                true
            } else {
                match self.cloud.launch().await {
                    Ok(instance) => {
                        info!(id = %instance.id, "VM launched");
                        true
                    }
                    Err(err) => {
                        error!(%err, "cannot launch VM via cloud driver");
                        false
                    }
                }
            };
            if ok {
                n_ok += 1;
            }
        }
        Ok(n_ok)
    }

    /// Terminates up to `floor_budget = intersection - min_vms` of the
    /// shuffled candidates that are both cloud-visible and batch-known.
    async fn scale_down(&self, candidates: &[String], valid_hostnames: &[String]) -> Result<u64> {
        let known_ips = resolve_known_hosts(valid_hostnames.iter());
        let Some(intersection) = self.cloud.list_running(Some(&known_ips)).await? else {
            warn!("no list of instances can be retrieved from the cloud driver, cannot scale down");
            return Ok(0);
        };

        let candidate_ips: Vec<Ipv4Addr> = candidates
            .iter()
            .filter_map(|host| match resolver::resolve(host) {
                Ok(ip) => Some(ip),
                Err(err) => {
                    warn!(host, %err, "cannot resolve shutdown candidate, skipping");
                    None
                }
            })
            .collect();

        let mut matched: Vec<_> = intersection
            .iter()
            .filter(|inst| candidate_ips.contains(&inst.private_ipv4))
            .collect();
        matched.shuffle(&mut rand::thread_rng());

        let floor_budget = if self.config.min_vms >= 1 {
            (intersection.len() as i64 - self.config.min_vms).max(0)
        } else {
            matched.len() as i64
        };

        let mut n_ok = 0_u64;
        for instance in matched.into_iter().take(floor_budget.max(0) as usize) {
            let ok = if self.config.dry_run_shutdown_vms {
                true
            } else {
                match self.cloud.terminate(instance).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!(%err, ip = %instance.private_ipv4, "cannot terminate VM via cloud driver");
                        false
                    }
                }
            };
            if ok {
                n_ok += 1;
            }
        }
        Ok(n_ok)
    }
}

fn resolve_known_hosts<'a>(hosts: impl Iterator<Item = &'a String>) -> HashSet<Ipv4Addr> {
    hosts
        .filter_map(|host| match resolver::resolve(host) {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!(host, %err, "cannot resolve known worker, excluding from quota check");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque as Deque;

    use async_trait::async_trait;
    use batch::WorkerStatus;
    use cloud::{Instance, InstanceState};
    use ekacore::clock::{FakeClock, Timestamp};
    use std::sync::Mutex;

    use super::*;

    struct FakeBatch {
        queue: Mutex<Deque<Option<u64>>>,
    }

    impl FakeBatch {
        fn with_queue(responses: Vec<Option<u64>>) -> Self {
            Self {
                queue: Mutex::new(responses.into()),
            }
        }
    }

    impl BatchPlugin for FakeBatch {
        fn poll_queue(&self) -> Result<Option<u64>> {
            Ok(self.queue.lock().unwrap().pop_front().unwrap_or(None))
        }

        fn poll_status(
            &self,
            previous: &batch::WorkerMap,
            _valid_ips: Option<&HashSet<Ipv4Addr>>,
        ) -> Result<Option<batch::WorkerMap>> {
            Ok(Some(previous.clone()))
        }
    }

    struct FakeStatusBatch {
        map: batch::WorkerMap,
    }

    impl FakeStatusBatch {
        fn new(map: batch::WorkerMap) -> Self {
            Self { map }
        }
    }

    impl BatchPlugin for FakeStatusBatch {
        fn poll_queue(&self) -> Result<Option<u64>> {
            Ok(None)
        }

        fn poll_status(
            &self,
            _previous: &batch::WorkerMap,
            _valid_ips: Option<&HashSet<Ipv4Addr>>,
        ) -> Result<Option<batch::WorkerMap>> {
            Ok(Some(self.map.clone()))
        }
    }

    struct FakeCloud {
        running: Mutex<Vec<Instance>>,
        launches: Mutex<u32>,
        terminated: Mutex<Vec<String>>,
    }

    impl FakeCloud {
        fn new(running: Vec<Instance>) -> Self {
            Self {
                running: Mutex::new(running),
                launches: Mutex::new(0),
                terminated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CloudDriver for FakeCloud {
        async fn list_running(&self, filter_ips: Option<&HashSet<Ipv4Addr>>) -> Result<Option<Vec<Instance>>> {
            let all = self.running.lock().unwrap().clone();
            match filter_ips {
                None => Ok(Some(all)),
                Some(ips) => Ok(Some(all.into_iter().filter(|i| ips.contains(&i.private_ipv4)).collect())),
            }
        }

        async fn launch(&self) -> Result<Instance> {
            let mut n = self.launches.lock().unwrap();
            *n += 1;
            let inst = Instance {
                id: format!("i-fake-{n}"),
                private_ipv4: Ipv4Addr::new(10, 99, 0, *n as u8),
                state: InstanceState::Running,
            };
            self.running.lock().unwrap().push(inst.clone());
            Ok(inst)
        }

        async fn terminate(&self, instance: &Instance) -> Result<()> {
            self.terminated.lock().unwrap().push(instance.id.clone());
            self.running.lock().unwrap().retain(|i| i.id != instance.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn scenario_a_hysteresis_arm_and_fire() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![Some(12), Some(12), Some(12)]));
        let cloud = Arc::new(FakeCloud::new(vec![]));
        let config = SchedulerConfig {
            waiting_jobs_threshold: 10,
            waiting_jobs_time_s: 100,
            n_jobs_per_vm: 4,
            max_vms: 100,
            ..Default::default()
        };
        let mut sched = Scheduler::new(config, batch, cloud.clone(), clock.clone());

        sched.check_queue().await.unwrap();
        assert!(sched.state.first_seen_above_threshold.is_some());
        assert_eq!(*cloud.launches.lock().unwrap(), 0);

        clock.set(50.0);
        sched.check_queue().await.unwrap();
        assert!(sched.state.first_seen_above_threshold.is_some());
        assert_eq!(*cloud.launches.lock().unwrap(), 0);

        clock.set(150.0);
        sched.check_queue().await.unwrap();
        assert_eq!(*cloud.launches.lock().unwrap(), 3);
        assert!(sched.state.first_seen_above_threshold.is_none());
    }

    #[tokio::test]
    async fn scenario_b_below_threshold_disarm() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![Some(12), Some(8)]));
        let cloud = Arc::new(FakeCloud::new(vec![]));
        let config = SchedulerConfig {
            waiting_jobs_threshold: 10,
            waiting_jobs_time_s: 100,
            n_jobs_per_vm: 4,
            max_vms: 100,
            ..Default::default()
        };
        let mut sched = Scheduler::new(config, batch, cloud.clone(), clock.clone());

        sched.check_queue().await.unwrap();
        assert!(sched.state.first_seen_above_threshold.is_some());

        clock.set(50.0);
        sched.check_queue().await.unwrap();
        assert!(sched.state.first_seen_above_threshold.is_none());
        assert_eq!(*cloud.launches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn scenario_c_max_quota_clamp() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![]));
        let running = (1..=4)
            .map(|n| Instance {
                id: format!("i-{n}"),
                private_ipv4: Ipv4Addr::new(10, 0, 0, n),
                state: InstanceState::Running,
            })
            .collect();
        let cloud = Arc::new(FakeCloud::new(running));
        let config = SchedulerConfig {
            max_vms: 5,
            ..Default::default()
        };
        let sched = Scheduler::new(config, batch, cloud.clone(), clock);

        let n_ok = sched.scale_up(10).await.unwrap();
        assert_eq!(n_ok, 1);
    }

    #[tokio::test]
    async fn scenario_d_min_quota_floor() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![]));
        let running = vec![
            Instance {
                id: "i-1".into(),
                private_ipv4: Ipv4Addr::new(10, 0, 0, 1),
                state: InstanceState::Running,
            },
            Instance {
                id: "i-2".into(),
                private_ipv4: Ipv4Addr::new(10, 0, 0, 2),
                state: InstanceState::Running,
            },
        ];
        let cloud = Arc::new(FakeCloud::new(running));
        let config = SchedulerConfig {
            min_vms: 2,
            ..Default::default()
        };
        let sched = Scheduler::new(config, batch, cloud.clone(), clock);

        let candidates = vec![
            "10-0-0-1.example".to_string(),
            "10-0-0-2.example".to_string(),
            "10-0-0-9.example".to_string(),
        ];
        let n_ok = sched.scale_down(&candidates, &candidates).await.unwrap();
        assert_eq!(n_ok, 0);
        assert!(cloud.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_e_idle_eviction_resets_timer() {
        let clock = Arc::new(FakeClock::at(10_000.0));
        let mut returned = batch::WorkerMap::new();
        returned.insert(
            "10-0-0-5.example".to_string(),
            WorkerStatus {
                jobs: 0,
                unchanged_since: Timestamp::from_secs_f64(10_000.0 - 3601.0),
            },
        );
        let batch = Arc::new(FakeStatusBatch::new(returned));
        let cloud = Arc::new(FakeCloud::new(vec![]));
        let config = SchedulerConfig {
            idle_for_time_s: 3600,
            ..Default::default()
        };
        let mut sched = Scheduler::new(config, batch, cloud, clock.clone());

        sched.check_vms().await.unwrap();

        let status = sched.state.workers_status.get("10-0-0-5.example").unwrap();
        assert_eq!(status.unchanged_since.as_secs_f64(), 10_000.0);
    }

    #[tokio::test]
    async fn scenario_f_credit_decay() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![]));
        let cloud = Arc::new(FakeCloud::new(vec![]));
        let config = SchedulerConfig {
            estimated_vm_deploy_time_s: 600,
            ..Default::default()
        };
        let mut sched = Scheduler::new(config, batch, cloud, clock.clone());
        sched.state.event_queue.clear();

        sched.change_vms_allegedly_running(2);
        assert_eq!(sched.state.vms_allegedly_running, 2);
        assert_eq!(sched.state.event_queue.len(), 1);
        match sched.state.event_queue.front().unwrap() {
            Event::DecayAllegedlyRunning { when, delta } => {
                assert_eq!(when.as_secs_f64(), 600.0);
                assert_eq!(*delta, -2);
            }
            other => panic!("expected a decay event, got {other:?}"),
        }

        clock.set(599.0);
        sched.tick().await.unwrap();
        assert_eq!(sched.state.vms_allegedly_running, 2);

        clock.set(600.0);
        sched.tick().await.unwrap();
        assert_eq!(sched.state.vms_allegedly_running, 0);
    }

    #[tokio::test]
    async fn credit_never_goes_negative() {
        let clock = Arc::new(FakeClock::at(0.0));
        let batch = Arc::new(FakeBatch::with_queue(vec![]));
        let cloud = Arc::new(FakeCloud::new(vec![]));
        let mut sched = Scheduler::new(SchedulerConfig::default(), batch, cloud, clock);

        sched.change_vms_allegedly_running(-100);
        assert_eq!(sched.state.vms_allegedly_running, 0);
    }
}
