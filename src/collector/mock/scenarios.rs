//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc/self` and cgroup controller
//! trees for the cgroup layouts found in the wild.

use super::filesystem::MockFs;

const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
";

const ROOT_MOUNTS: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw,errors=remount-ro
23 22 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
24 22 0:22 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw
";

impl MockFs {
    /// Creates a host without any cgroup filesystem mounted.
    pub fn no_cgroup_system() -> Self {
        let mut fs = Self::new();
        fs.add_self_cgroup(ROOT_MOUNTS, "");
        fs.add_file("/proc/meminfo", MEMINFO);
        fs
    }

    /// Creates a container on a unified (v2 only) hierarchy.
    ///
    /// The container sees its own cgroup as `/` through a cgroup namespace.
    /// `limit` of `None` writes `max` to `memory.max`.
    pub fn cgroup_v2_container(limit: Option<u64>) -> Self {
        let mut fs = Self::new();
        fs.add_self_cgroup(
            "\
1339 1284 0:28 / / rw,relatime master:1 - overlay overlay rw,lowerdir=/var/lib/docker/l1,upperdir=/var/lib/docker/u1
1340 1339 0:30 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw
1343 1339 0:27 / /sys/fs/cgroup ro,nosuid,nodev,noexec,relatime - cgroup2 cgroup rw,nsdelegate,memory_recursiveprot
",
            "0::/\n",
        );
        fs.add_file("/sys/fs/cgroup/memory.max", limit_text(limit));
        fs.add_file("/proc/meminfo", MEMINFO);
        fs
    }

    /// Creates a systemd host on a unified hierarchy, with the process in a
    /// nested session scope.
    pub fn cgroup_v2_host(limit: Option<u64>) -> Self {
        let mut fs = Self::new();
        let scope = "/sys/fs/cgroup/user.slice/user-1000.slice/session-3.scope";
        fs.add_self_cgroup(
            &format!(
                "{ROOT_MOUNTS}35 24 0:30 / /sys/fs/cgroup rw,nosuid,nodev,noexec,relatime shared:9 - cgroup2 cgroup2 rw,nsdelegate,memory_recursiveprot\n"
            ),
            "0::/user.slice/user-1000.slice/session-3.scope\n",
        );
        fs.add_file(format!("{scope}/memory.max"), limit_text(limit));
        fs.add_file("/proc/meminfo", MEMINFO);
        fs
    }

    /// Creates a Docker container on a legacy (v1 only) hierarchy.
    ///
    /// # Arguments
    /// * `limit_in_bytes` - Content of `memory.limit_in_bytes`
    /// * `hierarchical` - `hierarchical_memory_limit` value in `memory.stat`,
    ///   or `None` to omit `memory.stat` entirely
    pub fn cgroup_v1_container(limit_in_bytes: u64, hierarchical: Option<u64>) -> Self {
        let mut fs = Self::new();
        fs.add_self_cgroup(
            "\
1069 1051 0:110 / / rw,relatime master:1 - overlay overlay rw,lowerdir=/var/lib/docker/l1
1087 1069 0:111 / /sys/fs/cgroup ro,nosuid,nodev,noexec,relatime - tmpfs tmpfs rw,mode=755
1094 1087 0:32 /docker/4a5b6c /sys/fs/cgroup/memory ro,nosuid,nodev,noexec,relatime master:15 - cgroup cgroup rw,memory
1095 1087 0:33 /docker/4a5b6c /sys/fs/cgroup/cpu,cpuacct ro,nosuid,nodev,noexec,relatime master:16 - cgroup cgroup rw,cpu,cpuacct
",
            "\
12:memory:/docker/4a5b6c
11:cpu,cpuacct:/docker/4a5b6c
1:name=systemd:/docker/4a5b6c
",
        );
        add_v1_files(&mut fs, "/sys/fs/cgroup/memory", limit_in_bytes, hierarchical);
        fs.add_file("/proc/meminfo", MEMINFO);
        fs
    }

    /// Creates a systemd host in hybrid mode: the memory controller lives on
    /// a legacy hierarchy while an empty unified hierarchy is also mounted.
    pub fn cgroup_hybrid_host(limit_in_bytes: u64, hierarchical: Option<u64>) -> Self {
        let mut fs = Self::new();
        fs.add_self_cgroup(
            &format!(
                "{ROOT_MOUNTS}\
30 24 0:26 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
31 30 0:27 / /sys/fs/cgroup/unified rw,nosuid,nodev,noexec,relatime shared:10 - cgroup2 cgroup2 rw,nsdelegate
32 30 0:28 / /sys/fs/cgroup/systemd rw,nosuid,nodev,noexec,relatime shared:11 - cgroup cgroup rw,xattr,name=systemd
40 30 0:36 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:19 - cgroup cgroup rw,memory
"
            ),
            "\
10:memory:/system.slice/app.service
1:name=systemd:/system.slice/app.service
0::/system.slice/app.service
",
        );
        fs.add_dir("/sys/fs/cgroup/unified/system.slice/app.service");
        add_v1_files(
            &mut fs,
            "/sys/fs/cgroup/memory/system.slice/app.service",
            limit_in_bytes,
            hierarchical,
        );
        fs.add_file("/proc/meminfo", MEMINFO);
        fs
    }
}

fn limit_text(limit: Option<u64>) -> String {
    match limit {
        Some(bytes) => format!("{bytes}\n"),
        None => "max\n".to_string(),
    }
}

fn add_v1_files(fs: &mut MockFs, dir: &str, limit_in_bytes: u64, hierarchical: Option<u64>) {
    fs.add_file(
        format!("{dir}/memory.limit_in_bytes"),
        format!("{limit_in_bytes}\n"),
    );
    if let Some(hml) = hierarchical {
        fs.add_file(
            format!("{dir}/memory.stat"),
            format!(
                "cache 2416640\nrss 1036288\nmapped_file 0\nhierarchical_memory_limit {hml}\nhierarchical_memsw_limit 9223372036854771712\ntotal_cache 2416640\n"
            ),
        );
    }
}
