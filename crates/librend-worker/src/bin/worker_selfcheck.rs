use std::path::Path;
use std::process::Command;

use librend_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with storage_dir={} screens_dir={}",
        config.storage_dir.display(),
        config.screens_dir.display()
    );
    ensure_dir(&config.storage_dir).await?;
    ensure_dir(&config.screens_dir).await?;
    ensure_ffmpeg(&config.capture.ffmpeg_bin)?;
    ensure_binary(&config.display.server_bin)?;
    ensure_binary(&config.synthesis.executable)?;
    ensure_env_present(&["REDIS_URL"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;
    Ok(())
}

fn ensure_ffmpeg(bin: &str) -> anyhow::Result<()> {
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", bin, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", bin, output.status));
    }
    Ok(())
}

fn ensure_binary<P: AsRef<Path>>(bin: P) -> anyhow::Result<()> {
    let bin = bin.as_ref();
    which::which(bin).map_err(|e| anyhow::anyhow!("{} not found: {}", bin.display(), e))?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
