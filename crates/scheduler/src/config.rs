/// Cadences, thresholds and quotas the scheduler decision functions read on
/// every tick, sourced from the `[elastiq]` and `[quota]` config sections.
///
/// Immutable after load: nothing in the scheduler mutates a `SchedulerConfig`
/// once built.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sleep_s: u64,
    pub check_queue_every_s: u64,
    pub check_vms_every_s: u64,
    pub estimated_vm_deploy_time_s: u64,

    pub waiting_jobs_threshold: u64,
    pub waiting_jobs_time_s: u64,
    pub n_jobs_per_vm: u64,

    pub idle_for_time_s: u64,

    /// `<= 0` disables the bound.
    pub min_vms: i64,
    /// `<= 0` disables the bound.
    pub max_vms: i64,

    pub dry_run_boot_vms: bool,
    pub dry_run_shutdown_vms: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_s: 5,
            check_queue_every_s: 60,
            check_vms_every_s: 60,
            estimated_vm_deploy_time_s: 600,
            waiting_jobs_threshold: 0,
            waiting_jobs_time_s: 60,
            n_jobs_per_vm: 1,
            idle_for_time_s: 3600,
            min_vms: 0,
            max_vms: 0,
            dry_run_boot_vms: false,
            dry_run_shutdown_vms: false,
        }
    }
}
