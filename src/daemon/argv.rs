use crate::client::ConnectionMode;
use std::path::{Path, PathBuf};

/// Subcommand that starts the daemon
pub const DEFAULT_DAEMON_COMMAND: &str = "daemon";

const DEBUG_OVERRIDES: [&str; 3] = ["--log-level", "-D", "--debug"];
const STORAGE_DRIVER_FLAG: &str = "--storage-driver";

/// Inputs for one daemon command line.
#[derive(Debug, Clone)]
pub struct DaemonArgs<'a> {
    pub global_flags: &'a [String],
    pub command: &'a str,
    pub containerd_socket: &'a Path,
    pub root: &'a Path,
    pub folder: &'a Path,
    pub userland_proxy: bool,
    pub mode: ConnectionMode,
    pub userns_remap: Option<&'a str>,
    pub storage_driver: Option<&'a str>,
}

pub fn socket_path(folder: &Path) -> PathBuf {
    folder.join("docker.sock")
}

pub fn pid_file(folder: &Path) -> PathBuf {
    folder.join("docker.pid")
}

pub fn exec_root(folder: &Path) -> PathBuf {
    folder.join("exec-root")
}

/// `--host` value for an instance socket
pub fn host_flag(folder: &Path) -> String {
    format!("unix://{}", socket_path(folder).display())
}

impl DaemonArgs<'_> {
    /// Full argument vector; `provided` is appended last so it can override.
    pub fn build(&self, provided: &[String]) -> Vec<String> {
        let mut args: Vec<String> = self.global_flags.to_vec();
        args.push(self.command.to_string());
        args.extend([
            "--containerd".to_string(),
            self.containerd_socket.display().to_string(),
            "--graph".to_string(),
            self.root.display().to_string(),
            "--exec-root".to_string(),
            exec_root(self.folder).display().to_string(),
            "--pidfile".to_string(),
            pid_file(self.folder).display().to_string(),
            format!("--userland-proxy={}", self.userland_proxy),
        ]);

        if !self.mode.uses_default_host() {
            args.push("--host".to_string());
            args.push(host_flag(self.folder));
        }

        if let Some(remap) = self.userns_remap {
            args.push("--userns-remap".to_string());
            args.push(remap.to_string());
        }

        let overrides_debug = provided
            .iter()
            .any(|arg| DEBUG_OVERRIDES.iter().any(|flag| arg.contains(flag)));
        if !overrides_debug {
            args.push("--debug".to_string());
        }

        if let Some(driver) = self.storage_driver {
            if !provided.iter().any(|arg| arg.contains(STORAGE_DRIVER_FLAG)) {
                args.push(STORAGE_DRIVER_FLAG.to_string());
                args.push(driver.to_string());
            }
        }

        args.extend(provided.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base<'a>(folder: &'a Path, root: &'a Path, sock: &'a Path) -> DaemonArgs<'a> {
        DaemonArgs {
            global_flags: &[],
            command: DEFAULT_DAEMON_COMMAND,
            containerd_socket: sock,
            root,
            folder,
            userland_proxy: true,
            mode: ConnectionMode::UnixEphemeral,
            userns_remap: None,
            storage_driver: None,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_ephemeral_defaults() {
        let folder = Path::new("/tmp/d1");
        let root = folder.join("root");
        let sock = Path::new("/run/containerd.sock");
        let args = base(folder, &root, sock).build(&[]);

        assert_eq!(args[0], "daemon");
        assert!(args.contains(&"--debug".to_string()));
        assert!(has_pair(&args, "--host", "unix:///tmp/d1/docker.sock"));
        assert!(has_pair(&args, "--graph", "/tmp/d1/root"));
        assert!(has_pair(&args, "--exec-root", "/tmp/d1/exec-root"));
        assert!(has_pair(&args, "--pidfile", "/tmp/d1/docker.pid"));
        assert!(has_pair(&args, "--containerd", "/run/containerd.sock"));
        assert!(args.contains(&"--userland-proxy=true".to_string()));
    }

    #[test]
    fn test_log_level_suppresses_debug() {
        let folder = Path::new("/tmp/d1");
        let root = folder.join("root");
        let args = base(folder, &root, Path::new("/c.sock")).build(&["--log-level=warn".to_string()]);

        assert!(!args.contains(&"--debug".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--log-level=warn"));
    }

    #[test]
    fn test_short_debug_flag_is_not_duplicated() {
        let folder = Path::new("/tmp/d1");
        let root = folder.join("root");
        let args = base(folder, &root, Path::new("/c.sock")).build(&["-D".to_string()]);

        assert_eq!(args.iter().filter(|a| a.as_str() == "--debug").count(), 0);
        assert_eq!(args.iter().filter(|a| a.as_str() == "-D").count(), 1);
    }

    #[test]
    fn test_default_host_modes_omit_host() {
        let folder = Path::new("/tmp/d1");
        let root = folder.join("root");
        let mut spec = base(folder, &root, Path::new("/c.sock"));
        spec.mode = ConnectionMode::TlsDefault;

        assert!(!spec.build(&[]).contains(&"--host".to_string()));
    }

    #[test]
    fn test_storage_driver_and_remap() {
        let folder = Path::new("/tmp/d1");
        let root = folder.join("root");
        let flags = vec!["--config".to_string(), "/etc/cfg".to_string()];
        let mut spec = base(folder, &root, Path::new("/c.sock"));
        spec.global_flags = &flags;
        spec.storage_driver = Some("vfs");
        spec.userns_remap = Some("default");
        spec.userland_proxy = false;

        let args = spec.build(&[]);
        assert_eq!(&args[..3], ["--config", "/etc/cfg", "daemon"]);
        assert!(has_pair(&args, "--storage-driver", "vfs"));
        assert!(has_pair(&args, "--userns-remap", "default"));
        assert!(args.contains(&"--userland-proxy=false".to_string()));

        let args = spec.build(&["--storage-driver=overlay2".to_string()]);
        assert!(!args.contains(&"--storage-driver".to_string()));
    }
}
