//! Kubeconfig session control
//!
//! Implements [`ClusterControl`] over the user's kubeconfig and the external
//! login binary. Context switches rewrite the kubeconfig atomically (write to
//! a sibling temp file, then rename); a failed switch leaves the file
//! untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::config::Kubeconfig;
use tokio::process::Command;

use envctl_domain::context::ContextScheme;
use envctl_domain::error::{Error, Result};
use envctl_domain::ports::{ClusterCatalog, ClusterControl, LoginOutput};

/// How the external login binary is invoked
#[derive(Debug, Clone)]
pub struct LoginCommand {
    /// Binary name or path, e.g. `tsh`
    pub binary: String,
    /// Arguments placed before the cluster name, e.g. `["kube", "login"]`
    pub args: Vec<String>,
}

impl Default for LoginCommand {
    fn default() -> Self {
        Self {
            binary: "tsh".to_owned(),
            args: vec!["kube".to_owned(), "login".to_owned()],
        }
    }
}

/// Cluster session operations over kubeconfig + login binary
pub struct ContextManager {
    scheme: ContextScheme,
    login: LoginCommand,
    kubeconfig_path: PathBuf,
}

impl ContextManager {
    /// New manager; `kubeconfig_path` of `None` resolves `$KUBECONFIG` or the
    /// default `~/.kube/config`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when no kubeconfig location can be resolved.
    pub fn new(
        scheme: ContextScheme,
        login: LoginCommand,
        kubeconfig_path: Option<PathBuf>,
    ) -> Result<Self> {
        let kubeconfig_path = match kubeconfig_path {
            Some(path) => path,
            None => default_kubeconfig_path()?,
        };
        Ok(Self {
            scheme,
            login,
            kubeconfig_path,
        })
    }

    /// The kubeconfig this manager reads and rewrites.
    #[must_use]
    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    fn read_kubeconfig(&self) -> Result<Kubeconfig> {
        Kubeconfig::read_from(&self.kubeconfig_path).map_err(|e| {
            Error::config(format!(
                "cannot read kubeconfig {}: {e}",
                self.kubeconfig_path.display()
            ))
        })
    }
}

/// `$KUBECONFIG` (first entry) or `~/.kube/config`.
fn default_kubeconfig_path() -> Result<PathBuf> {
    if let Some(raw) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&raw).next() {
            return Ok(first);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or_else(|| Error::config("cannot resolve a kubeconfig location (no home directory)"))
}

#[async_trait]
impl ClusterControl for ContextManager {
    async fn login(&self, cluster: &str) -> Result<LoginOutput> {
        let output = Command::new(&self.login.binary)
            .args(&self.login.args)
            .arg(cluster)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Login {
                cluster: cluster.to_owned(),
                message: format!("cannot run {}: {e}", self.login.binary),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::Login {
                cluster: cluster.to_owned(),
                message: stderr_tail(&stderr, output.status.code()),
            });
        }
        Ok(LoginOutput { stdout, stderr })
    }

    async fn current_context(&self) -> Result<String> {
        self.read_kubeconfig()?
            .current_context
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::config("kubeconfig has no current context"))
    }

    async fn switch_context(&self, name: &str) -> Result<()> {
        let mut kubeconfig = self.read_kubeconfig().map_err(|e| Error::ContextSwitch {
            context: name.to_owned(),
            message: e.to_string(),
        })?;

        if !kubeconfig.contexts.iter().any(|c| c.name == name) {
            return Err(Error::ContextSwitch {
                context: name.to_owned(),
                message: "context not present in kubeconfig".to_owned(),
            });
        }
        kubeconfig.current_context = Some(name.to_owned());

        let rendered =
            serde_yaml::to_string(&kubeconfig).map_err(|e| Error::ContextSwitch {
                context: name.to_owned(),
                message: format!("cannot serialize kubeconfig: {e}"),
            })?;
        let tmp = self.kubeconfig_path.with_extension("envctl.tmp");
        tokio::fs::write(&tmp, rendered)
            .await
            .map_err(|e| Error::ContextSwitch {
                context: name.to_owned(),
                message: format!("cannot write {}: {e}", tmp.display()),
            })?;
        tokio::fs::rename(&tmp, &self.kubeconfig_path)
            .await
            .map_err(|e| Error::ContextSwitch {
                context: name.to_owned(),
                message: format!("cannot replace kubeconfig: {e}"),
            })
    }

    async fn list_clusters(&self) -> Result<ClusterCatalog> {
        let kubeconfig = self.read_kubeconfig()?;
        let mut managed: Vec<String> = kubeconfig
            .contexts
            .iter()
            .filter_map(|c| self.scheme.strip(&c.name))
            .map(str::to_owned)
            .collect();
        managed.sort();
        managed.dedup();

        // A name that extends another managed name with `-<suffix>` is a
        // workload cluster of it; prefer the longest matching MC.
        let mut catalog = ClusterCatalog::default();
        for name in &managed {
            let mc = managed
                .iter()
                .filter(|mc| {
                    name.len() > mc.len() && name.starts_with(&format!("{mc}-"))
                })
                .max_by_key(|mc| mc.len());
            match mc {
                Some(mc) => {
                    let wc = name[mc.len() + 1..].to_owned();
                    catalog.wcs_by_mc.entry(mc.clone()).or_default().push(wc);
                }
                None => catalog.mcs.push(name.clone()),
            }
        }
        Ok(catalog)
    }
}

fn stderr_tail(stderr: &str, code: Option<i32>) -> String {
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    match code {
        Some(code) => format!("exit status {code}: {}", tail.join(" | ")),
        None => format!("killed by signal: {}", tail.join(" | ")),
    }
}
