//! Device identity probe
//!
//! Walks one identity session against the simulated backend:
//! init → create → sign → destroy → deinit, printing what comes back.
//!
//! Run with: RUST_LOG=debug cargo run --bin x509-probe -- --data "hello"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use hsm_x509::{CryptoBackend, SimulatedBackend, X509Config, X509Context};

#[derive(Parser, Debug)]
#[command(name = "x509-probe", about = "Exercise the device identity certificate adapter")]
struct Args {
    /// JSON config file; defaults are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data to sign with the device identity key
    #[arg(long, default_value = "x509-probe")]
    data: String,

    /// Write the effective config to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => X509Config::load_or_default(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => X509Config::default(),
    };

    if let Some(path) = &args.write_config {
        config
            .save(path)
            .with_context(|| format!("writing config to {}", path.display()))?;
        println!("Wrote config to {}", path.display());
        return Ok(());
    }

    let backend = Arc::new(SimulatedBackend::new());
    let ctx = X509Context::from_lookup(|| backend.clone() as Arc<dyn CryptoBackend>, config);

    ctx.init().context("initializing x509 interface")?;
    let info = ctx.create().context("creating device identity certificate")?;

    println!("Common name: {}", X509Context::get_common_name(Some(&info)).unwrap_or("<none>"));
    println!("Thumbprint:  {}", info.thumbprint());
    match info.valid_to_datetime() {
        Some(valid_to) => println!("Valid to:    {}", valid_to.to_rfc3339()),
        None => println!("Valid to:    {}", info.valid_to()),
    }
    println!(
        "Private key: {} bytes ({:?})",
        X509Context::get_key(Some(&info)).map_or(0, <[u8]>::len),
        info.private_key_type()
    );
    if let Some(cert) = X509Context::get_cert(Some(&info)) {
        print!("{}", cert);
    }

    let digest = ctx
        .sign_with_private_key(ctx.device_ca_alias(), args.data.as_bytes())
        .context("signing with device identity key")?;
    println!("Signature:   {}", hex::encode(digest.as_bytes()));
    println!(
        "Verified:    {}",
        backend.verify(ctx.device_ca_alias(), args.data.as_bytes(), digest.as_bytes())
    );
    ctx.free_buffer(Some(digest));

    ctx.destroy(Some(info));
    ctx.deinit();
    Ok(())
}
