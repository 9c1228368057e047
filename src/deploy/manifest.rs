// ABOUTME: Pod and Service manifests plus the object naming and labeling conventions.
// ABOUTME: Objects are named <escaped service>-<environment ID> and labeled for selection.

use super::app::{App, ImageInfo, PodImage};
use super::error::DeployError;
use super::host_alias::HostAlias;
use super::volume_init::{SNAPSHOT_SUBPATH, init_mount_path, volume_name};
use crate::config::{Healthcheck, resolve_env_map};
use crate::types::ServiceName;
use k8s_openapi::api::core::v1::{Pod, Service};
use serde_json::{Value, json};
use std::collections::BTreeSet;

pub const APP_LABEL: &str = "app";
/// Maps an object back to its compose service name.
pub const SERVICE_ANNOTATION: &str = "kube-compose/service";
pub const VOLUME_INIT_CONTAINER: &str = "volume-init";

pub fn object_name(service: &ServiceName, environment_id: &str) -> String {
    format!("{}-{}", service.escaped(), environment_id)
}

/// Label selector matching every object of an environment.
pub fn selector(environment_label: &str, environment_id: &str) -> String {
    format!("{}={}", environment_label, environment_id)
}

/// The compose service an object belongs to, from its annotation.
pub fn service_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(SERVICE_ANNOTATION))
        .map(String::as_str)
}

/// Naming and labeling shared by every object of a run.
#[derive(Debug, Clone)]
pub struct Environment {
    pub label: String,
    pub id: String,
}

impl Environment {
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
        }
    }

    pub fn selector(&self) -> String {
        selector(&self.label, &self.id)
    }

    fn labels(&self, app: &App) -> Value {
        let mut labels = serde_json::Map::new();
        labels.insert(APP_LABEL.to_string(), json!(app.name().escaped()));
        labels.insert(self.label.clone(), json!(self.id));
        Value::Object(labels)
    }

    fn metadata(&self, app: &App) -> Value {
        json!({
            "name": app.object_name(),
            "labels": self.labels(app),
            "annotations": { SERVICE_ANNOTATION: app.name().as_str() },
        })
    }

    /// The ClusterIP Service for an app with ports.
    pub fn service(&self, app: &App) -> Result<Service, DeployError> {
        let mut seen = BTreeSet::new();
        let ports: Vec<Value> = app
            .service()
            .ports
            .iter()
            .filter(|p| seen.insert((p.container_port, p.protocol)))
            .map(|p| {
                json!({
                    "name": format!("{}-{}", p.protocol.as_k8s().to_ascii_lowercase(), p.container_port),
                    "port": p.container_port,
                    "targetPort": p.container_port,
                    "protocol": p.protocol.as_k8s(),
                })
            })
            .collect();

        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": self.metadata(app),
            "spec": {
                "type": "ClusterIP",
                "selector": self.labels(app),
                "ports": ports,
            },
        });
        from_manifest(manifest)
    }

    /// The Pod running an app.
    pub fn pod(
        &self,
        app: &App,
        image: &ImageInfo,
        volume_init: Option<&PodImage>,
        host_aliases: &[HostAlias],
    ) -> Result<Pod, DeployError> {
        let service = app.service();

        let env: Vec<Value> = resolve_env_map(&service.environment)
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let mut seen = BTreeSet::new();
        let ports: Vec<Value> = service
            .ports
            .iter()
            .filter(|p| seen.insert((p.container_port, p.protocol)))
            .map(|p| json!({ "containerPort": p.container_port, "protocol": p.protocol.as_k8s() }))
            .collect();

        let mut security_context = json!({ "privileged": service.privileged });
        if let Some((uid, gid)) = image.user {
            security_context["runAsUser"] = json!(uid);
            security_context["runAsGroup"] = json!(gid);
        }

        let mut container = json!({
            "name": app.name().escaped(),
            "image": image.pod_image.reference,
            "imagePullPolicy": image.pod_image.pull_policy.as_str(),
            "command": image.command.iter().collect::<Vec<_>>(),
            "env": env,
            "ports": ports,
            "securityContext": security_context,
        });
        if let Some(dir) = service.working_dir.as_ref().or(image.working_dir.as_ref()) {
            container["workingDir"] = json!(dir);
        }
        if let Some(healthcheck) = &image.healthcheck {
            container["readinessProbe"] = readiness_probe(healthcheck);
        }

        let mut spec = json!({
            "automountServiceAccountToken": false,
            "restartPolicy": service.restart.as_pod_restart_policy(),
        });

        if !host_aliases.is_empty() {
            spec["hostAliases"] = json!(
                host_aliases
                    .iter()
                    .map(|alias| json!({ "ip": alias.ip, "hostnames": alias.hostnames }))
                    .collect::<Vec<_>>()
            );
        }

        if let Some(init_image) = volume_init {
            let mounts = &service.volumes;
            spec["volumes"] = json!(
                (0..mounts.len())
                    .map(|i| json!({ "name": volume_name(i), "emptyDir": {} }))
                    .collect::<Vec<_>>()
            );
            spec["initContainers"] = json!([{
                "name": VOLUME_INIT_CONTAINER,
                "image": init_image.reference,
                "imagePullPolicy": init_image.pull_policy.as_str(),
                "volumeMounts": (0..mounts.len())
                    .map(|i| json!({ "name": volume_name(i), "mountPath": init_mount_path(i) }))
                    .collect::<Vec<_>>(),
            }]);
            container["volumeMounts"] = json!(
                mounts
                    .iter()
                    .enumerate()
                    .map(|(i, mount)| json!({
                        "name": volume_name(i),
                        "mountPath": mount.container_path,
                        "subPath": SNAPSHOT_SUBPATH,
                        "readOnly": mount.read_only,
                    }))
                    .collect::<Vec<_>>()
            );
        }

        spec["containers"] = json!([container]);

        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": self.metadata(app),
            "spec": spec,
        });
        from_manifest(manifest)
    }
}

fn readiness_probe(healthcheck: &Healthcheck) -> Value {
    let seconds = |d: std::time::Duration| d.as_secs().max(1);
    json!({
        "exec": { "command": healthcheck.test.to_exec_command() },
        "periodSeconds": seconds(healthcheck.interval),
        "timeoutSeconds": seconds(healthcheck.timeout),
        "failureThreshold": healthcheck.retries.max(1),
        "initialDelaySeconds": healthcheck.start_period.as_secs(),
    })
}

fn from_manifest<K: serde::de::DeserializeOwned>(manifest: Value) -> Result<K, DeployError> {
    serde_json::from_value(manifest)
        .map_err(|e| DeployError::Config(format!("invalid manifest: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, HealthcheckTest};
    use crate::deploy::app::PullPolicy;
    use crate::types::ImageId;
    use nonempty::nonempty;
    use std::path::Path;
    use std::time::Duration;

    fn app(yaml: &str) -> App {
        let config = Config::from_yaml(yaml, Path::new("/srv")).unwrap();
        App::new(config.services.values().next().unwrap().clone(), "dev")
    }

    fn image_info() -> ImageInfo {
        ImageInfo {
            source_id: ImageId::new("sha256:abc"),
            pod_image: PodImage {
                reference: "web_app:dev".into(),
                pull_policy: PullPolicy::Never,
            },
            command: nonempty!["nginx".to_string(), "-g".to_string()],
            healthcheck: Some(Healthcheck {
                test: HealthcheckTest::Shell("curl -f localhost".into()),
                interval: Duration::from_secs(5),
                timeout: Duration::from_millis(500),
                retries: 3,
                start_period: Duration::from_secs(10),
            }),
            user: Some((1000, 1000)),
            working_dir: None,
        }
    }

    #[test]
    fn pod_carries_labels_annotation_and_probe() {
        let app = app("services:\n  Web_App:\n    image: nginx\n    ports: [\"8080:80\"]\n    environment:\n      MODE: prod\n");
        let env = Environment::new("env", "dev");
        let aliases = vec![HostAlias {
            ip: "10.0.0.7".into(),
            hostnames: vec!["db".into()],
        }];
        let pod = env.pod(&app, &image_info(), None, &aliases).unwrap();
        let value = serde_json::to_value(&pod).unwrap();

        assert_eq!(value["metadata"]["name"], "web-app-dev");
        assert_eq!(value["metadata"]["labels"]["app"], "web-app");
        assert_eq!(value["metadata"]["labels"]["env"], "dev");
        assert_eq!(value["metadata"]["annotations"][SERVICE_ANNOTATION], "Web_App");
        assert_eq!(value["spec"]["automountServiceAccountToken"], false);
        assert_eq!(value["spec"]["restartPolicy"], "Never");
        assert_eq!(value["spec"]["hostAliases"][0]["ip"], "10.0.0.7");

        let container = &value["spec"]["containers"][0];
        assert_eq!(container["imagePullPolicy"], "Never");
        assert_eq!(container["command"], json!(["nginx", "-g"]));
        assert_eq!(container["env"][0], json!({ "name": "MODE", "value": "prod" }));
        assert_eq!(container["ports"][0]["containerPort"], 80);
        assert_eq!(container["securityContext"]["runAsUser"], 1000);

        let probe = &container["readinessProbe"];
        assert_eq!(probe["exec"]["command"], json!(["/bin/sh", "-c", "curl -f localhost"]));
        assert_eq!(probe["periodSeconds"], 5);
        assert_eq!(probe["timeoutSeconds"], 1);
        assert_eq!(probe["initialDelaySeconds"], 10);
    }

    #[test]
    fn volume_init_adds_init_container_and_sub_path_mounts() {
        let app = app("services:\n  web:\n    image: nginx\n    volumes:\n      - ./html:/usr/share/nginx/html:ro\n");
        let env = Environment::new("env", "dev");
        let init = PodImage {
            reference: "web-init:dev".into(),
            pull_policy: PullPolicy::Never,
        };
        let pod = env.pod(&app, &image_info(), Some(&init), &[]).unwrap();
        let value = serde_json::to_value(&pod).unwrap();

        assert_eq!(value["spec"]["volumes"][0], json!({ "name": "vol1", "emptyDir": {} }));
        let init_container = &value["spec"]["initContainers"][0];
        assert_eq!(init_container["name"], VOLUME_INIT_CONTAINER);
        assert_eq!(init_container["volumeMounts"][0]["mountPath"], "/mnt/vol1");

        let mount = &value["spec"]["containers"][0]["volumeMounts"][0];
        assert_eq!(mount["mountPath"], "/usr/share/nginx/html");
        assert_eq!(mount["subPath"], "root");
        assert_eq!(mount["readOnly"], true);
        assert!(value["spec"].get("hostAliases").is_none());
    }

    #[test]
    fn service_is_cluster_ip_with_named_ports() {
        let app = app("services:\n  db:\n    image: postgres\n    ports: [\"5432\", \"5432\", \"53/udp\"]\n");
        let service = Environment::new("env", "dev").service(&app).unwrap();
        let value = serde_json::to_value(&service).unwrap();

        assert_eq!(value["spec"]["type"], "ClusterIP");
        assert_eq!(value["spec"]["selector"]["app"], "db");
        let ports = value["spec"]["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["name"], "tcp-5432");
        assert_eq!(ports[1]["name"], "udp-53");
    }
}
