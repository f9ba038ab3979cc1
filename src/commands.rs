use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::io::AsyncWriteExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{info, instrument};
use wheelhouse_config::{Config, StorageConfig};
use wheelhouse_index::{PackageIndex, SimpleRenderer, UploadForm};
use wheelhouse_registry::{Database, ReleaseStore};
use wheelhouse_storage::BackendHandle;
use wheelhouse_storage::backend::LocalBackend;

/// Arguments of `wheelhouse upload`.
#[derive(Debug, clap::Args)]
pub struct UploadArgs {
    /// Artifact to upload (sdist or wheel).
    pub file: PathBuf,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub version: String,
    /// Defaults to `bdist_wheel` for `.whl` files and `sdist` otherwise.
    #[arg(long)]
    pub filetype: Option<String>,
    #[arg(long, default_value = "source")]
    pub pyversion: String,
    #[arg(long, default_value = "2.1")]
    pub metadata_version: String,
    #[arg(long)]
    pub summary: Option<String>,
    #[arg(long)]
    pub requires_python: Option<String>,
    /// May be repeated.
    #[arg(long)]
    pub requires_dist: Vec<String>,
    /// Hex digest to record instead of computing one.
    #[arg(long)]
    pub sha256: Option<String>,
}

/// An opened index, plus the database it runs against (if any).
pub struct Wheelhouse {
    pub index: PackageIndex,
    database: Option<Database>,
}
impl Wheelhouse {
    pub async fn open(config: &Config) -> Result<Self> {
        let storage = open_storage(&config.storage).await?;
        let Some(path) = &config.database.path else {
            return Ok(Self { index: PackageIndex::without_metadata(storage), database: None });
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.display().to_string()))?;
        }
        let database = Database::connect(path).await.or_raise(|| ErrorKind::Database)?;
        info!(path = %path.display(), "opened metadata database");
        let index = PackageIndex::new(storage, ReleaseStore::from(&database));
        Ok(Self { index, database: Some(database) })
    }

    pub async fn close(self) {
        if let Some(database) = self.database {
            database.close().await;
        }
    }
}

async fn open_storage(config: &StorageConfig) -> Result<BackendHandle> {
    match config {
        StorageConfig::Local { path } => {
            tokio::fs::create_dir_all(path).await.or_raise(|| ErrorKind::Io(path.display().to_string()))?;
            let root = std::path::absolute(path).or_raise(|| ErrorKind::Io(path.display().to_string()))?;
            info!(root = %root.display(), "using local storage");
            Ok(Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?))
        },
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3) => {
            info!(bucket = %s3.bucket, endpoint = ?s3.endpoint, "using s3 storage");
            let backend = wheelhouse_storage::backend::S3Backend::new(
                "s3",
                &s3.bucket,
                s3.prefix.clone(),
                &s3.region,
                s3.endpoint.clone(),
                &s3.access_key,
                &s3.secret_key,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3(_) => exn::bail!(ErrorKind::Config),
    }
}

pub async fn packages(index: &PackageIndex) -> Result<()> {
    for name in index.list_packages().await.or_raise(|| ErrorKind::Index)? {
        println!("{name}");
    }
    Ok(())
}

pub async fn files(index: &PackageIndex, package: &str) -> Result<()> {
    for file in index.list_package_files(package).await.or_raise(|| ErrorKind::Index)? {
        match &file.hash {
            Some(hash) => println!("{}\t{}={}", file.file_name, hash.hash_type, hash.value),
            None => println!("{}", file.file_name),
        }
    }
    Ok(())
}

pub async fn show(index: &PackageIndex, package: &str, version: Option<&str>) -> Result<()> {
    let Some(found) = index.package(package).await.or_raise(|| ErrorKind::Index)? else {
        exn::bail!(ErrorKind::NotFound(format!("package {package:?} not found")));
    };
    println!("name:    {}", found.name);
    println!("latest:  {}", found.latest_version.as_deref().unwrap_or("-"));
    if let Some(summary) = &found.summary {
        println!("summary: {summary}");
    }
    let releases = index.releases(package, version).await.or_raise(|| ErrorKind::Index)?;
    if let Some(version) = version
        && releases.is_empty()
    {
        exn::bail!(ErrorKind::NotFound(format!("release {package}=={version} not found")));
    }
    for release in releases {
        println!("release: {} (metadata {})", release.version, release.metadata_version);
    }
    Ok(())
}

pub async fn download(index: &PackageIndex, package: &str, file: &str, output: Option<&Path>) -> Result<()> {
    let Some(mut reader) = index.download_file(package, file).await.or_raise(|| ErrorKind::Index)? else {
        exn::bail!(ErrorKind::NotFound(format!("{package}/{file} not found")));
    };
    let copied = match output {
        Some(path) => {
            let target = || ErrorKind::Io(path.display().to_string());
            let mut out = tokio::fs::File::create(path).await.or_raise(target)?.compat_write();
            let copied = futures::io::copy(&mut reader, &mut out).await.or_raise(target)?;
            out.close().await.or_raise(target)?;
            copied
        },
        None => {
            let mut out = tokio::io::stdout().compat_write();
            let copied = futures::io::copy(&mut reader, &mut out).await.or_raise(|| ErrorKind::Io("stdout".into()))?;
            out.flush().await.or_raise(|| ErrorKind::Io("stdout".into()))?;
            copied
        },
    };
    info!(bytes = copied, "downloaded {package}/{file}");
    Ok(())
}

#[instrument(skip_all, fields(file = %args.file.display()))]
pub async fn upload(index: &PackageIndex, args: UploadArgs) -> Result<()> {
    let io = || ErrorKind::Io(args.file.display().to_string());
    let Some(file_name) = args.file.file_name().and_then(|name| name.to_str()).map(ToString::to_string) else {
        exn::bail!(io());
    };
    let sha256 = match args.sha256.clone() {
        Some(digest) => digest,
        None => sha256_file(&args.file).await?,
    };
    let filetype = args.filetype.clone().unwrap_or_else(|| match file_name.ends_with(".whl") {
        true => "bdist_wheel".to_string(),
        false => "sdist".to_string(),
    });

    let mut fields = vec![
        (":action", "file_upload".to_string()),
        ("protocol_version", "1".to_string()),
        ("name", args.name.clone()),
        ("version", args.version.clone()),
        ("filetype", filetype),
        ("pyversion", args.pyversion.clone()),
        ("metadata_version", args.metadata_version.clone()),
        ("sha256_digest", sha256),
    ];
    fields.extend(args.summary.clone().map(|summary| ("summary", summary)));
    fields.extend(args.requires_python.clone().map(|requires| ("requires_python", requires)));
    fields.extend(args.requires_dist.iter().map(|requires| ("requires_dist", requires.clone())));
    let request = UploadForm::from_fields(fields).into_request(&file_name).or_raise(|| ErrorKind::Index)?;

    let content = tokio::fs::File::open(&args.file).await.or_raise(io)?;
    let uploaded = index.upload_file(&request, Box::pin(content.compat())).await.or_raise(|| ErrorKind::Index)?;
    println!("{}/{} ({} bytes) -> {}", uploaded.package_name, uploaded.file_name, uploaded.size, uploaded.storage_path);
    Ok(())
}

pub async fn simple(index: &PackageIndex, package: Option<&str>) -> Result<()> {
    let renderer = SimpleRenderer::new().or_raise(|| ErrorKind::Index)?;
    let html = match package {
        Some(package) => {
            let files = index.list_package_files(package).await.or_raise(|| ErrorKind::Index)?;
            let normalized = wheelhouse_version::normalize(package);
            renderer.render_package(&normalized, &files)
        },
        None => renderer.render_index(&index.list_packages().await.or_raise(|| ErrorKind::Index)?),
    }
    .or_raise(|| ErrorKind::Index)?;
    println!("{html}");
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<String> {
    let io = || ErrorKind::Io(path.display().to_string());
    let mut file = tokio::fs::File::open(path).await.or_raise(io)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await.or_raise(io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
