//! Bootstrap wiring and subcommand entry points
//!
//! Everything is constructed once here and injected explicitly — no globals,
//! no init-time side effects. Exit codes: 0 clean shutdown, 1 configuration
//! error, 2 unrecoverable orchestrator error, 130 signal-driven cancellation.

use std::process::ExitCode;
use std::sync::Arc;

use envctl_application::endpoint::aggregator_endpoint_config;
use envctl_application::orchestrator::{Orchestrator, OrchestratorDeps};
use envctl_domain::context::{ContextScheme, EnvironmentTarget};
use envctl_domain::error::{Error, Result};
use envctl_domain::ports::{
    ClusterControl, ClusterGateway, ConfigSource, EventBus, StateStore, SupervisorFactory,
};
use envctl_infrastructure::bus::BoundedBus;
use envctl_infrastructure::config::ConfigLoader;
use envctl_infrastructure::kube::{ContextManager, KubeGateway, LoginCommand};
use envctl_infrastructure::logging::{init_logging, spawn_log_renderer};
use envctl_infrastructure::state::InMemoryStateStore;
use envctl_infrastructure::supervisors::EnvSupervisorFactory;

use crate::cli::{Cli, Command};

/// Exit code used when a signal ends the run.
const EXIT_SIGNALLED: u8 = 130;

/// Dispatch the parsed CLI.
pub async fn run(cli: Cli) -> ExitCode {
    init_logging(cli.log_level.as_deref(), cli.log_json);
    let outcome = match &cli.command {
        Command::Up { mc, wc, no_login } => {
            run_up(&cli, mc.clone(), wc.clone(), *no_login).await
        }
        Command::Endpoint => run_endpoint(&cli),
        Command::Clusters => run_clusters(&cli).await,
    };
    match outcome {
        Ok(code) => code,
        Err(err @ Error::Config { .. }) => {
            tracing::error!(error = %err, "configuration error");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!(error = %err, "unrecoverable error");
            ExitCode::from(2)
        }
    }
}

fn config_loader(cli: &Cli) -> ConfigLoader {
    match &cli.config {
        Some(path) => ConfigLoader::new().with_config_path(path),
        None => ConfigLoader::new(),
    }
}

fn context_manager(cli: &Cli) -> Result<ContextManager> {
    ContextManager::new(
        ContextScheme::new(cli.context_prefix.clone()),
        LoginCommand {
            binary: cli.login_binary.clone(),
            args: vec!["kube".to_owned(), "login".to_owned()],
        },
        cli.kubeconfig.clone(),
    )
}

async fn run_up(
    cli: &Cli,
    mc: String,
    wc: Option<String>,
    no_login: bool,
) -> Result<ExitCode> {
    let target = match wc {
        Some(wc) => EnvironmentTarget::with_wc(mc, wc),
        None => EnvironmentTarget::mc_only(mc),
    };
    let scheme = ContextScheme::new(cli.context_prefix.clone());

    let bus: Arc<dyn EventBus> = BoundedBus::new();
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(Arc::clone(&bus)));
    let control: Arc<dyn ClusterControl> = Arc::new(context_manager(cli)?);
    let gateway: Arc<dyn ClusterGateway> = Arc::new(KubeGateway::new(cli.kubeconfig.clone()));
    let factory: Arc<dyn SupervisorFactory> = Arc::new(EnvSupervisorFactory::new(
        Arc::clone(&gateway),
        cli.container_runtime.clone(),
    ));
    let config_source: Arc<dyn ConfigSource> = Arc::new(config_loader(cli));

    let renderer = spawn_log_renderer(&bus);

    if !no_login {
        establish_session(control.as_ref(), &scheme, &target).await?;
    }

    let orchestrator = Orchestrator::new(OrchestratorDeps {
        bus,
        store,
        control,
        gateway,
        factory,
        config_source,
        scheme,
    });
    let handle = orchestrator.start(target).await?;
    tracing::info!("environment up; press Ctrl-C to stop");

    let signalled = wait_for_shutdown_signal().await;
    handle.stop().await;
    renderer.abort();

    if signalled {
        Ok(ExitCode::from(EXIT_SIGNALLED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Initial login(s) and context switch, mirroring the switch workflow.
async fn establish_session(
    control: &dyn ClusterControl,
    scheme: &ContextScheme,
    target: &EnvironmentTarget,
) -> Result<()> {
    control.login(&target.mc).await?;
    if let Some(wc_cluster) = target.wc_login_name() {
        control.login(&wc_cluster).await?;
    }
    control.switch_context(&scheme.target_context(target)).await
}

/// True when a signal (rather than an internal shutdown) ended the wait.
async fn wait_for_shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::warn!(error = %err, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return true;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = sigterm.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        true
    }
}

fn run_endpoint(cli: &Cli) -> Result<ExitCode> {
    let config = config_loader(cli).load()?;
    let document = aggregator_endpoint_config(config.aggregator.port);
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_clusters(cli: &Cli) -> Result<ExitCode> {
    let manager = context_manager(cli)?;
    let catalog = manager.list_clusters().await?;
    for mc in &catalog.mcs {
        println!("{mc}");
        if let Some(wcs) = catalog.wcs_by_mc.get(mc) {
            for wc in wcs {
                println!("  {mc}-{wc}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
