// System
use std::process::ExitCode;

// Third Party
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info};

// Local
use kube_service_watcher::{
    informer::{wait_for_sync, SyncOutcome},
    utils::{init_tracing, setup_exit_hooks},
    Args, ServiceInformer, ServicePrinter,
};

#[tokio::main]
async fn main() -> Result<ExitCode, anyhow::Error> {
    let args = Args::from_env();
    init_tracing("kube_service_watcher", args.log_level);
    let mut exit_signal = setup_exit_hooks()?;
    let client = args.build_client().await?;
    let informer = ServiceInformer::new(&client, &args.namespace, args.watcher_config());

    let (events_tx, mut events) = mpsc::channel(1);
    let (synced_tx, synced_rx) = oneshot::channel();
    let informer_handle = tokio::spawn(informer.run(events_tx, synced_tx));

    match wait_for_sync(synced_rx, args.sync_timeout(), &mut exit_signal).await {
        SyncOutcome::Synced => {}
        SyncOutcome::InformerStopped => {
            error!("Service informer stopped before the cache synced");
            report_informer_exit(informer_handle).await;
            return Ok(ExitCode::FAILURE);
        }
        SyncOutcome::TimedOut => {
            error!(
                "Timed out after {}s waiting for the service cache to sync",
                args.sync_timeout
            );
            informer_handle.abort();
            return Ok(ExitCode::FAILURE);
        }
        SyncOutcome::Interrupted => {
            info!("Shutting down before the service cache synced");
            informer_handle.abort();
            return Ok(ExitCode::SUCCESS);
        }
    }

    let mut printer = ServicePrinter::stdout();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => printer.print(&event)?,
                None => break,
            },
            _ = &mut exit_signal => {
                info!("Shutting down");
                informer_handle.abort();
                return Ok(ExitCode::SUCCESS);
            }
        }
    }

    error!("Service informer stopped");
    report_informer_exit(informer_handle).await;
    Ok(ExitCode::FAILURE)
}

async fn report_informer_exit(handle: JoinHandle<Result<(), anyhow::Error>>) {
    match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Error watching services: {:#}", e),
        Err(e) => error!("Service informer task failed: {}", e),
    }
}
