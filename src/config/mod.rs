// ABOUTME: Compose file loading into the canonical service graph.
// ABOUTME: Handles YAML parsing, the x-kube-compose block, validation and service selection.

mod deserialize;
mod env_value;
mod graph;
mod healthcheck;
mod port;
mod restart_policy;
mod user;
mod volume;

pub use env_value::{EnvValue, resolve_env_map};
pub use graph::{topological_order, transitive_closure};
pub use healthcheck::{
    Healthcheck, HealthcheckConfig, HealthcheckOverride, HealthcheckTest, from_image_config,
};
pub use port::{PortSpec, Protocol};
pub use restart_policy::RestartPolicy;
pub use user::{IdSpec, UserSpec};
pub use volume::BindMount;

use crate::error::{Error, Result};
use crate::types::{ImageRef, ImageSource, ServiceName};
use deserialize::{
    deserialize_command, deserialize_depends_on, deserialize_environment,
    deserialize_image_ref, deserialize_image_source, deserialize_ports, deserialize_volumes,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

const MAX_ENVIRONMENT_ID_LEN: usize = 20;

/// Condition a dependent waits for before its Pod is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCondition {
    /// `service_started`: every container of the dependency is running.
    Started,
    /// `service_healthy`: the dependency's Pod reports Ready.
    Healthy,
}

/// Where Pod images come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageStorage {
    /// The cluster's nodes share the local Docker daemon; images are re-tagged.
    Docker,
    /// Images are pushed to a registry the cluster can pull from.
    DockerRegistry { host: String },
}

/// The `x-kube-compose` extension block.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment_id: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_environment_label")]
    pub environment_label: String,

    /// Absent: Pods reference each service's image as written.
    #[serde(default)]
    pub cluster_image_storage: Option<ImageStorage>,

    #[serde(
        default = "default_volume_init_base_image",
        deserialize_with = "deserialize_image_ref"
    )]
    pub volume_init_base_image: ImageRef,

    #[serde(default)]
    pub run_as_user: bool,

    #[serde(default = "default_true")]
    pub bind_mount_emulation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            environment_id: None,
            namespace: default_namespace(),
            environment_label: default_environment_label(),
            cluster_image_storage: None,
            volume_init_base_image: default_volume_init_base_image(),
            run_as_user: false,
            bind_mount_emulation: true,
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_environment_label() -> String {
    "env".to_string()
}

fn default_volume_init_base_image() -> ImageRef {
    ImageRef::new(None, "busybox", "latest").expect("static image reference is valid")
}

fn default_true() -> bool {
    true
}

/// One compose service after parsing and validation.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: ServiceName,
    pub image: ImageSource,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: BTreeMap<String, EnvValue>,
    pub ports: Vec<PortSpec>,
    pub depends_on: BTreeMap<ServiceName, DependencyCondition>,
    pub healthcheck: HealthcheckOverride,
    pub restart: RestartPolicy,
    pub user: Option<UserSpec>,
    pub volumes: Vec<BindMount>,
    pub privileged: bool,
    pub working_dir: Option<String>,
}

impl Service {
    pub fn has_ports(&self) -> bool {
        !self.ports.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, RawService>,

    #[serde(rename = "x-kube-compose", default)]
    settings: Settings,
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(default, deserialize_with = "deserialize_image_source")]
    image: Option<ImageSource>,

    #[serde(default)]
    build: Option<serde_yaml::Value>,

    #[serde(default, deserialize_with = "deserialize_command")]
    command: Option<Vec<String>>,

    #[serde(default, deserialize_with = "deserialize_command")]
    entrypoint: Option<Vec<String>>,

    #[serde(default, deserialize_with = "deserialize_environment")]
    environment: BTreeMap<String, EnvValue>,

    #[serde(default, deserialize_with = "deserialize_ports")]
    ports: Vec<PortSpec>,

    #[serde(default, deserialize_with = "deserialize_depends_on")]
    depends_on: BTreeMap<String, DependencyCondition>,

    #[serde(default)]
    healthcheck: Option<HealthcheckConfig>,

    #[serde(default)]
    restart: RestartPolicy,

    #[serde(default)]
    user: Option<String>,

    #[serde(default, deserialize_with = "deserialize_volumes")]
    volumes: Vec<BindMount>,

    #[serde(default)]
    privileged: bool,

    #[serde(default)]
    working_dir: Option<String>,
}

/// The canonical service graph plus deployment settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub services: BTreeMap<ServiceName, Service>,
    pub settings: Settings,
}

impl Config {
    /// Parse compose YAML; relative bind mounts resolve against `base_dir`.
    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self> {
        let file: ComposeFile = serde_yaml::from_str(yaml)?;
        let mut services = BTreeMap::new();

        for (name, raw) in file.services {
            let service = Self::convert_service(&name, raw, base_dir)
                .map_err(|e| Error::InvalidConfig(format!("service {name}: {e}")))?;
            services.insert(service.name.clone(), service);
        }

        let config = Config {
            services,
            settings: file.settings,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_yaml(&content, &base_dir)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .map(|path| Self::load(&path))
            .unwrap_or_else(|| Err(Error::ConfigNotFound(dir.to_path_buf())))
    }

    fn convert_service(
        name: &str,
        raw: RawService,
        base_dir: &Path,
    ) -> std::result::Result<Service, String> {
        let name = ServiceName::new(name).map_err(|e| e.to_string())?;

        let image = match (raw.image, raw.build) {
            (Some(image), _) => image,
            (None, Some(_)) => return Err("building images is not supported".to_string()),
            (None, None) => return Err("image is required".to_string()),
        };

        let depends_on = raw
            .depends_on
            .into_iter()
            .map(|(dep, condition)| {
                ServiceName::new(&dep)
                    .map(|dep| (dep, condition))
                    .map_err(|e| format!("depends_on {dep}: {e}"))
            })
            .collect::<std::result::Result<_, _>>()?;

        let healthcheck = raw
            .healthcheck
            .as_ref()
            .map(HealthcheckConfig::resolve)
            .transpose()?
            .unwrap_or_default();

        let user = raw.user.as_deref().map(UserSpec::parse).transpose()?;

        let mut volumes = raw.volumes;
        for volume in &mut volumes {
            volume.resolve_host_path(base_dir);
        }

        Ok(Service {
            name,
            image,
            command: raw.command,
            entrypoint: raw.entrypoint,
            environment: raw.environment,
            ports: raw.ports,
            depends_on,
            healthcheck,
            restart: raw.restart,
            user,
            volumes,
            privileged: raw.privileged,
            working_dir: raw.working_dir,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(Error::InvalidConfig("no services defined".to_string()));
        }

        let mut escaped = BTreeMap::new();
        for (name, service) in &self.services {
            for dep in service.depends_on.keys() {
                if !self.services.contains_key(dep) {
                    return Err(Error::InvalidConfig(format!(
                        "service {name} depends on undefined service {dep}"
                    )));
                }
            }
            if service.has_ports() && !name.is_service_label() {
                return Err(Error::InvalidConfig(format!(
                    "service {name} publishes ports, so its name must start with a letter"
                )));
            }
            if let Some(other) = escaped.insert(name.escaped(), name) {
                return Err(Error::InvalidConfig(format!(
                    "services {other} and {name} map to the same Kubernetes name"
                )));
            }
        }

        topological_order(&self.dependency_edges())?;
        Ok(())
    }

    /// service -> names it depends on.
    pub fn dependency_edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.services
            .iter()
            .map(|(name, service)| {
                (
                    name.to_string(),
                    service.depends_on.keys().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Keep only `names` and their transitive dependencies. Empty keeps everything.
    pub fn select(mut self, names: &[String]) -> Result<Config> {
        if names.is_empty() {
            return Ok(self);
        }
        for name in names {
            if !self.services.contains_key(name.as_str()) {
                return Err(Error::UnknownService(name.clone()));
            }
        }
        let keep = transitive_closure(&self.dependency_edges(), names.iter().cloned());
        self.services.retain(|name, _| keep.contains(name.as_str()));
        Ok(self)
    }

    /// Apply command-line overrides on top of the `x-kube-compose` block.
    pub fn with_overrides(
        mut self,
        environment_id: Option<String>,
        namespace: Option<String>,
    ) -> Config {
        if environment_id.is_some() {
            self.settings.environment_id = environment_id;
        }
        if let Some(namespace) = namespace {
            self.settings.namespace = namespace;
        }
        self
    }

    /// The environment ID, validated for use in object names and label values.
    pub fn environment_id(&self) -> Result<&str> {
        let id = self
            .settings
            .environment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingEnvironmentId)?;

        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if id.len() > MAX_ENVIRONMENT_ID_LEN
            || !valid_chars
            || id.starts_with('-')
            || id.ends_with('-')
        {
            return Err(Error::InvalidConfig(format!(
                "environment ID {id:?} must be a lowercase RFC 1123 label of at most {MAX_ENVIRONMENT_ID_LEN} characters"
            )));
        }
        Ok(id)
    }
}
