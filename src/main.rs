// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    anyhow::Error,
    argh::FromArgs,
    fshost::{
        boot_args::BootArgs,
        config::{apply_boot_args_to_config, load_config},
        environment::{dry_run::DryRunEnvironment, FilesystemMounter},
        manager::Manager,
        manifest::Manifest,
        service::{self, FshostShutdownResponder},
        watcher::Watcher,
    },
    futures::channel::mpsc,
    std::{path::PathBuf, sync::Arc},
    tracing_subscriber::EnvFilter,
};

/// Replays a device manifest against the block device policy and prints the actions that
/// would be taken.
#[derive(FromArgs)]
struct Args {
    /// path to an fshost options file; the default option set is used if absent
    #[argh(option)]
    config: Option<PathBuf>,

    /// path to a file of kernel command line style boot arguments
    #[argh(option)]
    boot_args: Option<PathBuf>,

    /// path to the JSON device manifest
    #[argh(option)]
    devices: PathBuf,

    /// topological path prefix of the ramdisk, if one was set up
    #[argh(option)]
    ramdisk_prefix: Option<String>,
}

fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    futures::executor::block_on(run(argh::from_env()))
}

async fn run(args: Args) -> Result<(), Error> {
    let boot_args = match &args.boot_args {
        Some(path) => BootArgs::from_path(path)?,
        None => BootArgs::default(),
    };
    let mut config = load_config(args.config.as_deref())?;
    apply_boot_args_to_config(&mut config, &boot_args);
    let config = Arc::new(config);
    tracing::info!(?config, "fshost started");

    let manifest = Manifest::from_path(&args.devices)?;
    let environment = Arc::new(DryRunEnvironment::new());
    let mounter = Arc::new(FilesystemMounter::new(
        environment.clone(),
        config,
        Arc::new(boot_args),
        args.ramdisk_prefix,
    ));

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<FshostShutdownResponder>(1);
    let watcher = Watcher::new();
    let (block_watcher, block_watcher_requests) = service::block_watcher_channel();
    let device_stream = watcher.watch(manifest.into_device_stream(block_watcher, shutdown_tx));

    // Run the main loop, handling devices as they appear according to the filesystem policy.
    // The block watcher service stops once the device stream, which owns its only client, is
    // dropped.
    let mut fs_manager = Manager::new(mounter.clone());
    let ((), shutdown_responder) = futures::join!(
        service::fshost_block_watcher(watcher, block_watcher_requests),
        fs_manager.device_handler(device_stream, shutdown_rx),
    );
    let shutdown_responder = shutdown_responder?;
    match shutdown_responder {
        Some(_) => tracing::info!("shutdown signal received"),
        None => tracing::info!("all devices handled"),
    }
    mounter.wait_for_workers().await;

    for action in environment.actions() {
        println!("{}", action);
    }

    if let Some(responder) = shutdown_responder {
        responder.close()?;
    }
    Ok(())
}
