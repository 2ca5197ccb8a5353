//! Service configuration. Built once in `main` from the environment and
//! shared through `AppState`; nothing else reads environment variables.
mod s3;
mod secrets;

pub use s3::S3Config;
pub use secrets::Secret;

use core::str::FromStr;
use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 8;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_MAX_IMAGE_PIXELS: u64 = 100_000_000;
const DEFAULT_MAX_CANVAS_PIXELS: u64 = 50_000_000;
const DEFAULT_JOB_HISTORY: usize = 1024;
const DEFAULT_TINIFY_URL: &str = "https://api.tinify.com";
const DEFAULT_TINIFY_CONCURRENCY: usize = 4;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Top level configuration for the API.
#[derive(Debug, Clone)]
pub struct Config {
    /// The address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// A prefix to prepend to any API paths to make them externally accessible.
    pub api_uri_prefix: String,
    /// Shared secret required in `X-Api-Token` on `/api` routes. Routes are
    /// open when unset.
    pub api_token: Option<Secret>,
    pub s3: S3Config,
    pub collage: CollageConfig,
    /// Compression through the Tinify API. The route is unavailable when no
    /// token is configured.
    pub tinify: Option<TinifyConfig>,
    /// Body size limit for image uploads.
    pub max_upload_bytes: usize,
}

/// Credentials and limits for the Tinify compression API.
#[derive(Debug, Clone)]
pub struct TinifyConfig {
    /// Base URL of the API, without a trailing slash.
    pub endpoint: String,
    pub token: Secret,
    /// How many images are sent to the API at once.
    pub concurrency: usize,
}

/// Settings for the collage workers and their scratch space.
#[derive(Debug, Clone)]
pub struct CollageConfig {
    /// Directory under which each job gets its own scratch directory.
    pub scratch_root: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    /// How many staged objects are downloaded at once.
    pub download_concurrency: usize,
    pub jpeg_quality: u8,
    /// Decoder limit, larger images are rejected as undecodable.
    pub max_image_pixels: u64,
    /// Largest collage (width x height) a job may allocate.
    pub max_canvas_pixels: u64,
    /// How many job statuses are remembered before the oldest finished
    /// ones are forgotten.
    pub job_history: usize,
}

#[cfg(test)]
impl CollageConfig {
    /// Default worker settings using `scratch_root` for scratch space.
    pub const fn new(scratch_root: PathBuf) -> Self {
        Self {
            scratch_root,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            job_history: DEFAULT_JOB_HISTORY,
        }
    }
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, errors::ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, errors::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let scratch_root = vars
            .optional("SCRATCH_DIR")
            .map_or_else(|| env::temp_dir().join("graphic-tools"), PathBuf::from);
        let collage = CollageConfig {
            scratch_root,
            workers: vars.positive("COLLAGE_WORKERS", DEFAULT_WORKERS)?,
            queue_capacity: vars.positive("COLLAGE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            download_concurrency: vars
                .positive("DOWNLOAD_CONCURRENCY", DEFAULT_DOWNLOAD_CONCURRENCY)?,
            jpeg_quality: vars.jpeg_quality()?,
            max_image_pixels: vars.parsed("MAX_IMAGE_PIXELS", DEFAULT_MAX_IMAGE_PIXELS)?,
            max_canvas_pixels: vars.parsed("MAX_CANVAS_PIXELS", DEFAULT_MAX_CANVAS_PIXELS)?,
            job_history: vars.positive("JOB_HISTORY", DEFAULT_JOB_HISTORY)?,
        };
        let tinify = match vars.secret("TINIFY_TOKEN")? {
            Some(token) => Some(TinifyConfig {
                endpoint: vars
                    .optional("TINIFY_URL")
                    .unwrap_or_else(|| DEFAULT_TINIFY_URL.to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
                token,
                concurrency: vars.positive("TINIFY_CONCURRENCY", DEFAULT_TINIFY_CONCURRENCY)?,
            }),
            None => None,
        };
        let s3 = S3Config {
            host: vars.required("S3_HOST")?,
            port: vars.parsed_required("S3_PORT")?,
            bucket: vars.required("S3_BUCKET")?,
            region: vars
                .optional("S3_REGION")
                .unwrap_or_else(|| DEFAULT_S3_REGION.to_owned()),
            access_key: vars
                .secret("S3_ACCESS_KEY")?
                .ok_or(errors::ConfigError::Missing("S3_ACCESS_KEY"))?,
            secret_key: vars
                .secret("S3_SECRET_KEY")?
                .ok_or(errors::ConfigError::Missing("S3_SECRET_KEY"))?,
        };
        Ok(Self {
            bind_addr: vars.parsed("BIND_ADDR", DEFAULT_BIND_ADDR)?,
            api_uri_prefix: normalise_uri_prefix(vars.optional("API_URI_PREFIX")),
            api_token: vars.secret("API_TOKEN")?,
            s3,
            collage,
            tinify,
            max_upload_bytes: vars.positive("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

/// Ensure the prefix starts with a slash and has no trailing slash, except
/// for the root prefix itself.
fn normalise_uri_prefix(prefix: Option<String>) -> String {
    let trimmed = prefix.as_deref().unwrap_or("/").trim_matches('/');
    format!("/{trimmed}")
}

/// Typed access to configuration variables.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Empty values count as unset.
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, errors::ConfigError> {
        self.optional(name).ok_or(errors::ConfigError::Missing(name))
    }

    fn parsed<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, errors::ConfigError> {
        self.optional(name)
            .map_or(Ok(default), |value| parse_value(name, value))
    }

    fn parsed_required<T: FromStr>(&self, name: &'static str) -> Result<T, errors::ConfigError> {
        parse_value(name, self.required(name)?)
    }

    fn positive(&self, name: &'static str, default: usize) -> Result<usize, errors::ConfigError> {
        match self.parsed(name, default)? {
            0 => Err(errors::ConfigError::Invalid {
                name,
                value: "0".to_owned(),
            }),
            value => Ok(value),
        }
    }

    fn jpeg_quality(&self) -> Result<u8, errors::ConfigError> {
        let quality = self.parsed("JPEG_QUALITY", DEFAULT_JPEG_QUALITY)?;
        if (1..=100).contains(&quality) {
            Ok(quality)
        } else {
            Err(errors::ConfigError::Invalid {
                name: "JPEG_QUALITY",
                value: quality.to_string(),
            })
        }
    }

    /// Read `name` directly, or fall back to the Docker secret named by
    /// `{name}_DOCKER_SECRET`.
    fn secret(&self, name: &'static str) -> Result<Option<Secret>, errors::ConfigError> {
        if let Some(value) = self.optional(name) {
            return Ok(Some(Secret::new(value)));
        }
        let Some(secret_name) = self.optional(&format!("{name}_DOCKER_SECRET")) else {
            return Ok(None);
        };
        secrets::read_secret(&secret_name)
            .map(|value| Some(Secret::new(value)))
            .map_err(|source| errors::ConfigError::Secret { name, source })
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: String) -> Result<T, errors::ConfigError> {
    value
        .parse()
        .map_err(|_err| errors::ConfigError::Invalid { name, value })
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("{0} not provided in environment variables")]
        Missing(&'static str),
        #[error("{name} has an invalid value: {value:?}")]
        Invalid { name: &'static str, value: String },
        #[error("Failed to read {name} docker secret")]
        Secret {
            name: &'static str,
            #[source]
            source: std::io::Error,
        },
    }
}
