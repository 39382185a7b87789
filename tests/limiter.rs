//! End-to-end runs of the limiter over simulated cgroup layouts.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use memlimit::collector::{CgroupProvider, FileSystem, MockFs, SystemMemoryProvider};
use memlimit::env::{ENV_MEMLIMIT, ENV_MEMLIMIT_RATIO, MapEnv};
use memlimit::provider::ProviderExt;
use memlimit::{CancellationToken, Config, Error, MemoryBudget, SoftLimit};

const GIB: u64 = 1024 * 1024 * 1024;
const PAGE_SIZE: u64 = 4096;

/// Budget that records every real mutation.
#[derive(Default)]
struct CountingBudget {
    inner: SoftLimit,
    sets: AtomicUsize,
}

impl CountingBudget {
    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

impl MemoryBudget for CountingBudget {
    fn set_memory_limit(&self, limit: i64) -> i64 {
        if limit >= 0 {
            self.sets.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set_memory_limit(limit)
    }
}

/// Mock filesystem that tests can change while a refresh thread reads it.
#[derive(Clone, Default)]
struct SharedFs(Arc<Mutex<MockFs>>);

impl SharedFs {
    fn new(fs: MockFs) -> Self {
        Self(Arc::new(Mutex::new(fs)))
    }

    fn set_file(&self, path: &str, content: &str) {
        self.0.lock().unwrap().add_file(path, content);
    }
}

impl FileSystem for SharedFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.0.lock().unwrap().read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.lock().unwrap().exists(path)
    }
}

fn cgroup<F: FileSystem>(fs: F) -> CgroupProvider<F> {
    CgroupProvider::new(fs, "/proc").with_page_size(PAGE_SIZE)
}

fn config(budget: Arc<dyn MemoryBudget>) -> Config {
    Config::new().with_budget(budget).with_env(MapEnv::new())
}

fn wait_for(budget: &CountingBudget, expected: i64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if budget.memory_limit() == expected {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn v2_container_limit_is_applied_with_ratio() {
    let budget = Arc::new(CountingBudget::default());
    let got = config(budget.clone())
        .with_provider(cgroup(MockFs::cgroup_v2_container(Some(GIB))))
        .with_ratio(0.5)
        .apply()
        .unwrap();

    assert_eq!(got, 536870912);
    assert_eq!(budget.memory_limit(), 536870912);
    assert_eq!(budget.sets(), 1);
}

#[test]
fn v2_host_nested_scope_uses_default_ratio() {
    let budget = Arc::new(CountingBudget::default());
    let got = config(budget.clone())
        .with_provider(cgroup(MockFs::cgroup_v2_host(Some(GIB))))
        .apply()
        .unwrap();

    assert_eq!(got, 966367641);
}

#[test]
fn v1_container_uses_smaller_of_direct_and_hierarchical() {
    let budget = Arc::new(CountingBudget::default());
    let got = config(budget.clone())
        .with_provider(cgroup(MockFs::cgroup_v1_container(2 * GIB, Some(GIB))))
        .with_ratio(1.0)
        .apply()
        .unwrap();

    assert_eq!(got, GIB as i64);
}

#[test]
fn hybrid_host_falls_back_to_v1() {
    let budget = Arc::new(CountingBudget::default());
    let got = config(budget.clone())
        .with_provider(cgroup(MockFs::cgroup_hybrid_host(GIB, None)))
        .with_ratio(1.0)
        .apply()
        .unwrap();

    assert_eq!(got, GIB as i64);
}

#[test]
fn unlimited_cgroup_leaves_budget_untouched() {
    let unlimited_v1 = i64::MAX as u64 / PAGE_SIZE * PAGE_SIZE;
    let cases = [
        MockFs::cgroup_v2_container(None),
        MockFs::cgroup_v1_container(unlimited_v1, Some(unlimited_v1)),
    ];

    for fs in cases {
        let budget = Arc::new(CountingBudget::default());
        budget.inner.set_memory_limit(12345);

        let got = config(budget.clone())
            .with_provider(cgroup(fs))
            .apply()
            .unwrap();

        assert_eq!(got, 12345);
        assert_eq!(budget.sets(), 0);
    }
}

#[test]
fn missing_cgroup_is_an_error() {
    let budget = Arc::new(CountingBudget::default());
    let err = config(budget.clone())
        .with_provider(cgroup(MockFs::no_cgroup_system()))
        .apply()
        .unwrap_err();

    assert!(matches!(err.root_cause(), Error::NoCgroup));
    assert_eq!(budget.sets(), 0);
}

#[test]
fn missing_cgroup_falls_back_to_system_memory() {
    let budget = Arc::new(CountingBudget::default());
    let provider = cgroup(MockFs::no_cgroup_system())
        .fallback(SystemMemoryProvider::new(MockFs::no_cgroup_system(), "/proc"));

    let got = config(budget.clone())
        .with_provider(provider)
        .with_ratio(1.0)
        .apply()
        .unwrap();

    assert_eq!(got, 16384000 * 1024);
}

#[test]
fn environment_overrides() {
    let budget = Arc::new(CountingBudget::default());
    let got = config(budget.clone())
        .with_env(MapEnv::new().with(ENV_MEMLIMIT, "512MiB"))
        .with_provider(cgroup(MockFs::cgroup_v2_container(Some(GIB))))
        .apply()
        .unwrap();
    assert_eq!(got, i64::MAX);
    assert_eq!(budget.sets(), 0);

    let got = config(budget.clone())
        .with_env(MapEnv::new().with(ENV_MEMLIMIT_RATIO, "0.25"))
        .with_provider(cgroup(MockFs::cgroup_v2_container(Some(GIB))))
        .apply()
        .unwrap();
    assert_eq!(got, 268435456);
}

#[test]
fn repeated_application_is_idempotent() {
    let budget = Arc::new(CountingBudget::default());
    for _ in 0..3 {
        config(budget.clone())
            .with_provider(cgroup(MockFs::cgroup_v2_container(Some(GIB))))
            .apply()
            .unwrap();
    }
    assert_eq!(budget.sets(), 1);
}

#[test]
fn refresh_follows_cgroup_changes_until_cancelled() {
    let fs = SharedFs::new(MockFs::cgroup_v2_container(Some(GIB)));
    let budget = Arc::new(CountingBudget::default());
    let token = CancellationToken::new();

    let got = config(budget.clone())
        .with_provider(cgroup(fs.clone()))
        .with_ratio(1.0)
        .with_refresh_interval(Duration::from_millis(10), token.clone())
        .apply()
        .unwrap();
    assert_eq!(got, GIB as i64);

    fs.set_file("/sys/fs/cgroup/memory.max", "2147483648\n");
    assert!(wait_for(&budget, 2 * GIB as i64));

    fs.set_file("/sys/fs/cgroup/memory.max", "max\n");
    assert!(wait_for(&budget, i64::MAX));

    token.cancel();
    token.wait();

    let sets = budget.sets();
    fs.set_file("/sys/fs/cgroup/memory.max", "1073741824\n");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(budget.sets(), sets);
    assert_eq!(budget.memory_limit(), i64::MAX);
}

#[test]
fn refresh_starts_even_when_first_read_fails() {
    let fs = SharedFs::new(MockFs::cgroup_v2_container(Some(GIB)));
    fs.set_file("/sys/fs/cgroup/memory.max", "garbage\n");
    let budget = Arc::new(CountingBudget::default());
    let token = CancellationToken::new();

    let result = config(budget.clone())
        .with_provider(cgroup(fs.clone()))
        .with_ratio(1.0)
        .with_refresh_interval(Duration::from_millis(10), token.clone())
        .apply();
    assert!(result.is_err());

    fs.set_file("/sys/fs/cgroup/memory.max", "1073741824\n");
    assert!(wait_for(&budget, GIB as i64));

    token.cancel();
    token.wait();
}

#[test]
fn zero_interval_does_not_refresh() {
    let fs = SharedFs::new(MockFs::cgroup_v2_container(Some(GIB)));
    let budget = Arc::new(CountingBudget::default());
    let token = CancellationToken::new();

    config(budget.clone())
        .with_provider(cgroup(fs.clone()))
        .with_ratio(1.0)
        .with_refresh_interval(Duration::ZERO, token.clone())
        .apply()
        .unwrap();

    fs.set_file("/sys/fs/cgroup/memory.max", "2147483648\n");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(budget.memory_limit(), GIB as i64);

    token.cancel();
    token.wait();
}
