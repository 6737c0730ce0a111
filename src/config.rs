// System
use std::{ffi::OsString, path::PathBuf, time::Duration};

// Third Party
use anyhow::Context;
use clap::Parser;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    runtime::watcher,
    Client, Config,
};
use tracing::{debug, info, warn};

// Local
use crate::utils::{DEFAULT_KUBECONFIG, DEFAULT_NAMESPACE};

/// Watch Services in a namespace and print one line per observed event.
#[derive(Debug, Clone, Parser)]
#[command(name = "watcher")]
pub struct Args {
    /// Location of kubeconfig
    #[arg(long, default_value = DEFAULT_KUBECONFIG)]
    pub kubeconfig: String,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Namespace whose Services are watched
    #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Label selector narrowing the watch, e.g. `app=web,tier!=cache`
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value_t = 30)]
    pub sync_timeout: u64,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value_t = tracing::Level::INFO)]
    pub log_level: tracing::Level,
}

impl Args {
    /// Parses the process arguments, accepting Go-style `-kubeconfig` as well.
    pub fn from_env() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// The kubeconfig path with a leading `~` expanded against `HOME`.
    pub fn kubeconfig_path(&self) -> PathBuf {
        expand_home(&self.kubeconfig, std::env::var_os("HOME"))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout)
    }

    pub fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match &self.selector {
            Some(selector) => config.labels(selector),
            None => config,
        }
    }

    fn kubeconfig_options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        }
    }

    /// Builds a client from `--kubeconfig`, falling back to the default client inference when
    /// that file cannot be used.
    pub async fn build_client(&self) -> Result<Client, anyhow::Error> {
        let config = self.resolve_config().await?;
        info!("Using cluster {}", config.cluster_url);
        Client::try_from(config).context("Failed to create cluster client")
    }

    async fn resolve_config(&self) -> Result<Config, anyhow::Error> {
        match self.load_kubeconfig().await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(
                    "Could not use kubeconfig {}: {:#}, trying default locations",
                    self.kubeconfig_path().display(),
                    e
                );
                self.infer_config().await
            }
        }
    }

    async fn load_kubeconfig(&self) -> Result<Config, anyhow::Error> {
        let path = self.kubeconfig_path();
        debug!("Reading kubeconfig {}", path.display());
        let kubeconfig = Kubeconfig::read_from(&path)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &self.kubeconfig_options()).await?;
        Ok(config)
    }

    async fn infer_config(&self) -> Result<Config, anyhow::Error> {
        if self.context.is_some() {
            return Config::from_kubeconfig(&self.kubeconfig_options())
                .await
                .context("Failed to load default kubeconfig");
        }
        Config::infer()
            .await
            .context("Failed to infer cluster configuration")
    }
}

fn expand_home(path: &str, home: Option<OsString>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            PathBuf::from(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

/// Options that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &[
    "-kubeconfig",
    "--kubeconfig",
    "--context",
    "-n",
    "--namespace",
    "-l",
    "--selector",
    "--sync-timeout",
    "--log-level",
];

/// Rewrites the single-dash `-kubeconfig` spelling into the long flag clap expects. Arguments in
/// value position, or after `--`, are left alone.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut expects_value = false;
    let mut after_separator = false;
    args.into_iter()
        .map(|arg| {
            let flag_position = !expects_value && !after_separator;
            let s = arg.to_str();
            expects_value = flag_position && s.map_or(false, |s| VALUE_FLAGS.contains(&s));
            after_separator |= flag_position && s == Some("--");
            match s {
                Some("-kubeconfig") if flag_position => OsString::from("--kubeconfig"),
                Some(s) if flag_position && s.starts_with("-kubeconfig=") => {
                    OsString::from(format!("-{}", s))
                }
                _ => arg,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{ffi::OsString, io::Write, path::PathBuf};

    use clap::Parser;

    use super::{expand_home, normalize_args, Args};

    const TWO_CONTEXT_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: one
clusters:
  - name: one
    cluster:
      server: https://one.example.com:6443
  - name: two
    cluster:
      server: https://two.example.com:6443
users:
  - name: tester
    user:
      token: not-a-real-token
contexts:
  - name: one
    context:
      cluster: one
      user: tester
      namespace: default
  - name: two
    context:
      cluster: two
      user: tester
      namespace: kube-system
"#;

    fn write_kubeconfig() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_CONTEXT_KUBECONFIG.as_bytes()).unwrap();
        file
    }

    fn parse(args: &[&str]) -> Args {
        let args = std::iter::once("watcher")
            .chain(args.iter().copied())
            .map(OsString::from);
        Args::try_parse_from(normalize_args(args)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.kubeconfig, "~/.kube/config");
        assert_eq!(args.namespace, "kube-system");
        assert_eq!(args.context, None);
        assert_eq!(args.selector, None);
        assert_eq!(args.sync_timeout().as_secs(), 30);
        assert_eq!(args.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_single_dash_kubeconfig() {
        assert_eq!(parse(&["-kubeconfig", "/tmp/a"]).kubeconfig, "/tmp/a");
        assert_eq!(parse(&["-kubeconfig=/tmp/b"]).kubeconfig, "/tmp/b");
        assert_eq!(parse(&["--kubeconfig", "/tmp/c"]).kubeconfig, "/tmp/c");
    }

    #[test]
    fn test_namespace_and_selector() {
        let args = parse(&["-n", "default", "-l", "app=web", "--log-level", "debug"]);
        assert_eq!(args.namespace, "default");
        assert_eq!(args.selector.as_deref(), Some("app=web"));
        assert_eq!(args.log_level, tracing::Level::DEBUG);
        assert_eq!(
            args.watcher_config().label_selector.as_deref(),
            Some("app=web")
        );
        assert_eq!(parse(&[]).watcher_config().label_selector, None);
    }

    #[test]
    fn test_expand_home() {
        let home = Some(OsString::from("/home/alice"));
        assert_eq!(
            expand_home("~/.kube/config", home.clone()),
            PathBuf::from("/home/alice/.kube/config")
        );
        assert_eq!(expand_home("~", home.clone()), PathBuf::from("/home/alice"));
        assert_eq!(
            expand_home("/etc/kubeconfig", home.clone()),
            PathBuf::from("/etc/kubeconfig")
        );
        // Other users' homes are not resolved.
        assert_eq!(expand_home("~bob/config", home), PathBuf::from("~bob/config"));
        assert_eq!(
            expand_home("~/.kube/config", None),
            PathBuf::from("~/.kube/config")
        );
    }

    #[test]
    fn test_kubeconfig_as_flag_value_is_kept() {
        let normalized = normalize_args(
            ["watcher", "-l", "-kubeconfig", "-kubeconfig", "-kubeconfig"]
                .iter()
                .map(OsString::from),
        );
        assert_eq!(
            normalized,
            ["watcher", "-l", "-kubeconfig", "--kubeconfig", "-kubeconfig"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );

        let normalized = normalize_args(
            ["watcher", "--", "-kubeconfig"]
                .iter()
                .map(OsString::from),
        );
        assert_eq!(normalized[2], OsString::from("-kubeconfig"));
    }

    #[tokio::test]
    async fn test_context_selects_cluster() {
        let file = write_kubeconfig();
        let path = file.path().to_str().unwrap();

        let current = parse(&["--kubeconfig", path]).resolve_config().await.unwrap();
        assert_eq!(current.cluster_url.host(), Some("one.example.com"));
        assert_eq!(current.default_namespace, "default");

        let two = parse(&["--kubeconfig", path, "--context", "two"])
            .resolve_config()
            .await
            .unwrap();
        assert_eq!(two.cluster_url.host(), Some("two.example.com"));
        assert_eq!(two.default_namespace, "kube-system");

        assert!(parse(&["--kubeconfig", path, "--context", "three"])
            .load_kubeconfig()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_falls_back() {
        let file = write_kubeconfig();
        let missing = file.path().with_extension("missing");
        let args = parse(&[
            "--kubeconfig",
            missing.to_str().unwrap(),
            "--context",
            "two",
        ]);
        assert!(args.load_kubeconfig().await.is_err());

        // The fallback reads the default kubeconfig locations, which honour KUBECONFIG.
        std::env::set_var("KUBECONFIG", file.path());
        let config = args.resolve_config().await.unwrap();
        std::env::remove_var("KUBECONFIG");
        assert_eq!(config.cluster_url.host(), Some("two.example.com"));
    }
}
