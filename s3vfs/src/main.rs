use anyhow::Context;
use clap::{Parser, Subcommand};
use s3vfs::cadapter::client::{ObjectBackend, ObjectClient};
use s3vfs::cadapter::localfs::LocalFsBackend;
use s3vfs::cadapter::s3::{S3Backend, S3Config};
use s3vfs::vfs::{Node, S3Vfs, VfsConfig};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// S3 endpoint url; the default AWS endpoint when absent
    #[arg(long, env = "S3VFS_ENDPOINT")]
    endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "S3VFS_ACCESS_KEY")]
    access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3VFS_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// S3 region
    #[arg(long, env = "S3VFS_REGION", default_value = "us-east-1")]
    region: String,

    /// Serve buckets from subdirectories of this directory instead of S3
    #[arg(long, env = "S3VFS_LOCAL_ROOT")]
    local_root: Option<String>,

    /// Volume label
    #[arg(long, default_value = "S3 Volume")]
    volume_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Continue after this entry name
        #[arg(long)]
        after: Option<String>,
    },
    /// Print an object to stdout
    Cat { path: String },
    /// Upload a local file as an object
    Put { local: String, path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Move a file or directory
    Mv {
        from: String,
        to: String,
        #[arg(long)]
        replace: bool,
    },
    /// Delete a file or directory
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show node metadata
    Stat { path: String },
    /// Show volume information
    Df,
}

async fn build_backend(args: &Args) -> anyhow::Result<Arc<dyn ObjectBackend>> {
    if let Some(root) = &args.local_root {
        return Ok(ObjectClient::new(LocalFsBackend::new(root)).into_dyn());
    }
    let config = S3Config {
        endpoint: args.endpoint.clone(),
        region: args.region.clone(),
        access_key: args.access_key.clone(),
        secret_key: args.secret_key.clone(),
        ..Default::default()
    };
    let backend = S3Backend::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create S3 backend: {e}"))?;
    Ok(ObjectClient::new(backend).into_dyn())
}

fn print_node(node: &Node) {
    let info = node.file_info();
    let kind = if node.is_directory() { 'd' } else { '-' };
    let mtime = info
        .last_write_time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("{kind} {:>12} {mtime:>11} {}", info.file_size, node.name());
}

async fn run(vfs: &S3Vfs, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ls { path, after } => {
            for node in vfs.list(&path, after.as_deref()).await? {
                print_node(&node);
            }
        }
        Command::Cat { path } => {
            let node = vfs.lookup(&path).await?;
            let file = node.as_file()?;
            let data = vfs.read_file(file, 0, file.file_size() as usize).await?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
        Command::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {local}"))?;
            let file = match vfs.lookup(&path).await {
                Ok(node) => node.as_file()?.clone(),
                Err(_) => vfs.create_file(&path).await?,
            };
            file.set_file_size(0, false).await?;
            vfs.write_file(&file, 0, &data).await?;
            file.persist_changes().await?;
        }
        Command::Mkdir { path } => {
            vfs.create_directory(&path).await?;
        }
        Command::Mv { from, to, replace } => {
            vfs.rename(&from, &to, replace).await?;
        }
        Command::Rm { path, recursive } => {
            vfs.remove(&path, recursive).await?;
        }
        Command::Stat { path } => {
            let node = vfs.lookup(&path).await?;
            println!("{:#?}", node.file_info());
            println!("status: {:?}", node.status());
        }
        Command::Df => {
            let info = vfs.volume_info();
            println!("{}: {} bytes free of {}", info.volume_label, info.free_size, info.total_size);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn"))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args = Args::parse();
    let backend = build_backend(&args).await?;
    let config = VfsConfig::default().volume_name(args.volume_name.clone());
    let vfs = S3Vfs::new(backend, config);

    run(&vfs, args.command).await?;
    vfs.flush().await?;
    Ok(())
}
