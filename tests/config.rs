// ABOUTME: Integration tests for compose file parsing and validation.
// ABOUTME: Tests the service graph, x-kube-compose settings, selection and overrides.

use kube_compose::config::*;
use kube_compose::error::Error;
use kube_compose::types::ImageSource;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn parse(yaml: &str) -> Config {
    Config::from_yaml(yaml, Path::new("/srv/app")).unwrap()
}

fn parse_err(yaml: &str) -> Error {
    Config::from_yaml(yaml, Path::new("/srv/app")).unwrap_err()
}

fn service<'a>(config: &'a Config, name: &str) -> &'a Service {
    &config.services[name]
}

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = parse("services:\n  web:\n    image: nginx:1.25\n");
        let web = service(&config, "web");
        assert_eq!(web.name.as_str(), "web");
        assert!(matches!(&web.image, ImageSource::Named(r) if r.name() == "nginx"));
        assert_eq!(web.restart, RestartPolicy::No);
        assert_eq!(web.healthcheck, HealthcheckOverride::Inherit);
        assert!(!web.has_ports());
    }

    #[test]
    fn parse_full_service() {
        let config = parse(
            r#"
services:
  api:
    image: ghcr.io/org/api:v1.2.3
    command: bundle exec puma
    entrypoint: ["/entry.sh"]
    environment:
      RAILS_ENV: production
      WORKERS: 4
    ports:
      - "3000"
      - 8080
      - "127.0.0.1:5353:53/udp"
    restart: on-failure:3
    user: "1000:1000"
    privileged: true
    working_dir: /app
    volumes:
      - ./public:/app/public:ro
      - /var/data:/data
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost:3000/up"]
      interval: 10s
      timeout: 2s
      retries: 5
      start_period: 1m
"#,
        );
        let api = service(&config, "api");

        assert_eq!(
            api.command.as_deref(),
            Some(&["bundle".to_string(), "exec".to_string(), "puma".to_string()][..])
        );
        assert_eq!(api.entrypoint.as_deref(), Some(&["/entry.sh".to_string()][..]));
        assert_eq!(
            api.environment.get("WORKERS"),
            Some(&EnvValue::Literal("4".to_string()))
        );
        assert_eq!(api.ports.len(), 3);
        assert_eq!(api.ports[1].container_port, 8080);
        assert_eq!(api.ports[2].protocol, Protocol::Udp);
        assert_eq!(api.restart, RestartPolicy::OnFailure { max_retries: Some(3) });
        assert_eq!(api.user.as_ref().and_then(UserSpec::numeric), Some((1000, 1000)));
        assert!(api.privileged);
        assert_eq!(api.working_dir.as_deref(), Some("/app"));

        assert_eq!(api.volumes[0].host_path, PathBuf::from("/srv/app/./public"));
        assert!(api.volumes[0].read_only);
        assert_eq!(api.volumes[1].host_path, PathBuf::from("/var/data"));
        assert!(!api.volumes[1].read_only);

        let HealthcheckOverride::Explicit(healthcheck) = &api.healthcheck else {
            panic!("expected an explicit healthcheck, got {:?}", api.healthcheck);
        };
        assert_eq!(
            healthcheck.test.to_exec_command(),
            vec!["curl", "-f", "http://localhost:3000/up"]
        );
        assert_eq!(healthcheck.interval, Duration::from_secs(10));
        assert_eq!(healthcheck.timeout, Duration::from_secs(2));
        assert_eq!(healthcheck.retries, 5);
        assert_eq!(healthcheck.start_period, Duration::from_secs(60));
    }

    #[test]
    fn bare_image_ids_are_sources_not_references() {
        let id = "a".repeat(64);
        let config = parse(&format!("services:\n  web:\n    image: \"{id}\"\n"));
        assert_eq!(
            service(&config, "web").image,
            ImageSource::Id(format!("sha256:{id}"))
        );
    }

    #[test]
    fn depends_on_list_and_map_forms() {
        let config = parse(
            r#"
services:
  web:
    image: nginx
    depends_on: [cache]
  worker:
    image: app
    depends_on:
      db:
        condition: service_healthy
      cache: {}
  db:
    image: postgres
  cache:
    image: redis
"#,
        );
        let web = service(&config, "web");
        assert_eq!(web.depends_on.len(), 1);
        assert_eq!(
            web.depends_on.values().next(),
            Some(&DependencyCondition::Started)
        );

        let worker = service(&config, "worker");
        let conditions: Vec<_> = worker
            .depends_on
            .iter()
            .map(|(name, c)| (name.as_str(), *c))
            .collect();
        assert_eq!(
            conditions,
            vec![
                ("cache", DependencyCondition::Started),
                ("db", DependencyCondition::Healthy),
            ]
        );
    }

    #[test]
    fn healthcheck_none_disables() {
        let config = parse(
            "services:\n  web:\n    image: nginx\n    healthcheck:\n      test: [\"NONE\"]\n  db:\n    image: postgres\n    healthcheck:\n      disable: true\n",
        );
        assert_eq!(service(&config, "web").healthcheck, HealthcheckOverride::Disabled);
        assert_eq!(service(&config, "db").healthcheck, HealthcheckOverride::Disabled);
    }

    #[test]
    fn settings_defaults() {
        let config = parse("services:\n  web:\n    image: nginx\n");
        let settings = &config.settings;
        assert_eq!(settings.environment_id, None);
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.environment_label, "env");
        assert_eq!(settings.cluster_image_storage, None);
        assert_eq!(settings.volume_init_base_image.to_string(), "busybox:latest");
        assert!(!settings.run_as_user);
        assert!(settings.bind_mount_emulation);
    }

    #[test]
    fn settings_block() {
        let config = parse(
            r#"
services:
  web:
    image: nginx
x-kube-compose:
  environment_id: ci-42
  namespace: staging
  environment_label: stack
  run_as_user: true
  bind_mount_emulation: false
  volume_init_base_image: alpine:3.20
  cluster_image_storage:
    type: docker_registry
    host: registry.local:5000
"#,
        );
        let settings = &config.settings;
        assert_eq!(config.environment_id().unwrap(), "ci-42");
        assert_eq!(settings.namespace, "staging");
        assert_eq!(settings.environment_label, "stack");
        assert!(settings.run_as_user);
        assert!(!settings.bind_mount_emulation);
        assert_eq!(settings.volume_init_base_image.to_string(), "alpine:3.20");
        assert_eq!(
            settings.cluster_image_storage,
            Some(ImageStorage::DockerRegistry {
                host: "registry.local:5000".to_string()
            })
        );
    }

    #[test]
    fn load_resolves_mounts_against_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.yaml");
        std::fs::write(&path, "services:\n  web:\n    image: nginx\n    volumes: [\"./html:/html\"]\n").unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(
            service(&config, "web").volumes[0].host_path,
            dir.path().join("./html")
        );
    }

    #[test]
    fn discover_finds_standard_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services:\n  web:\n    image: nginx\n").unwrap();
        assert!(Config::discover(dir.path()).is_ok());

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(empty.path()),
            Err(Error::ConfigNotFound(_))
        ));
    }
}

mod environment {
    use super::*;

    #[test]
    fn list_form_inherits_from_host() {
        temp_env::with_vars(
            [("KC_TEST_TOKEN", Some("s3cret")), ("KC_TEST_UNSET", None::<&str>)],
            || {
                let config = parse(
                    "services:\n  web:\n    image: nginx\n    environment:\n      - MODE=dev\n      - KC_TEST_TOKEN\n      - KC_TEST_UNSET\n",
                );
                let resolved = resolve_env_map(&service(&config, "web").environment);
                assert_eq!(resolved.get("MODE").map(String::as_str), Some("dev"));
                assert_eq!(resolved.get("KC_TEST_TOKEN").map(String::as_str), Some("s3cret"));
                assert!(!resolved.contains_key("KC_TEST_UNSET"));
            },
        );
    }

    #[test]
    fn map_form_null_inherits_from_host() {
        temp_env::with_var("KC_TEST_REGION", Some("eu-west-1"), || {
            let config = parse(
                "services:\n  web:\n    image: nginx\n    environment:\n      KC_TEST_REGION:\n      DEBUG: true\n",
            );
            let resolved = resolve_env_map(&service(&config, "web").environment);
            assert_eq!(resolved.get("KC_TEST_REGION").map(String::as_str), Some("eu-west-1"));
            assert_eq!(resolved.get("DEBUG").map(String::as_str), Some("true"));
        });
    }
}

mod validation {
    use super::*;

    #[test]
    fn no_services() {
        assert!(matches!(parse_err("services: {}\n"), Error::InvalidConfig(_)));
    }

    #[test]
    fn missing_image() {
        let err = parse_err("services:\n  web:\n    command: [\"true\"]\n");
        assert!(err.to_string().contains("image is required"));
    }

    #[test]
    fn build_is_not_supported() {
        let err = parse_err("services:\n  web:\n    build: .\n");
        assert!(err.to_string().contains("building images is not supported"));
    }

    #[test]
    fn undefined_dependency() {
        let err = parse_err("services:\n  web:\n    image: nginx\n    depends_on: [db]\n");
        assert!(err.to_string().contains("undefined service db"));
    }

    #[test]
    fn dependency_cycle() {
        let err = parse_err(
            "services:\n  a:\n    image: x\n    depends_on: [b]\n  b:\n    image: x\n    depends_on: [a]\n",
        );
        assert!(matches!(err, Error::DependencyCycle(_)));
    }

    #[test]
    fn names_colliding_after_escaping() {
        let err = parse_err("services:\n  my_db:\n    image: x\n  my.db:\n    image: x\n");
        assert!(err.to_string().contains("same Kubernetes name"));
    }

    #[test]
    fn named_volumes_are_rejected() {
        let err = parse_err("services:\n  db:\n    image: postgres\n    volumes: [\"pgdata:/var/lib/postgresql\"]\n");
        assert!(err.to_string().contains("named volumes"));
    }

    #[test]
    fn unknown_depends_on_condition() {
        let err = parse_err(
            "services:\n  web:\n    image: x\n    depends_on:\n      db:\n        condition: service_completed_successfully\n  db:\n    image: x\n",
        );
        assert!(err.to_string().contains("unsupported depends_on condition"));
    }

    #[test]
    fn published_service_must_start_with_a_letter() {
        let err = parse_err("services:\n  3proxy:\n    image: nginx\n    ports: [\"80\"]\n");
        assert!(err.to_string().contains("must start with a letter"));
    }

    #[test]
    fn unpublished_service_may_start_with_a_digit() {
        parse("services:\n  3proxy:\n    image: nginx\n");
    }

    #[test]
    fn invalid_service_name() {
        let err = parse_err("services:\n  _web:\n    image: nginx\n");
        assert!(err.to_string().contains("service _web"));
    }
}

mod selection {
    use super::*;

    const STACK: &str = r#"
services:
  web:
    image: nginx
    depends_on: [api]
  api:
    image: app
    depends_on: [db]
  db:
    image: postgres
  docs:
    image: docs
"#;

    fn names(config: &Config) -> Vec<&str> {
        config.services.keys().map(|n| n.as_str()).collect()
    }

    #[test]
    fn empty_selection_keeps_everything() {
        let config = parse(STACK).select(&[]).unwrap();
        assert_eq!(names(&config), vec!["api", "db", "docs", "web"]);
    }

    #[test]
    fn selection_pulls_in_transitive_dependencies() {
        let config = parse(STACK).select(&["web".to_string()]).unwrap();
        assert_eq!(names(&config), vec!["api", "db", "web"]);
    }

    #[test]
    fn unknown_service_is_rejected() {
        let err = parse(STACK).select(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, Error::UnknownService(name) if name == "nope"));
    }
}

mod environment_id {
    use super::*;

    fn with_id(id: Option<&str>) -> Config {
        parse("services:\n  web:\n    image: nginx\nx-kube-compose:\n  environment_id: from-file\n")
            .with_overrides(id.map(str::to_string), None)
    }

    #[test]
    fn override_wins_over_file() {
        assert_eq!(with_id(Some("cli")).environment_id().unwrap(), "cli");
        assert_eq!(with_id(None).environment_id().unwrap(), "from-file");
    }

    #[test]
    fn namespace_override() {
        let config = with_id(None).with_overrides(None, Some("team".to_string()));
        assert_eq!(config.settings.namespace, "team");
    }

    #[test]
    fn missing_id() {
        let config = parse("services:\n  web:\n    image: nginx\n");
        assert!(matches!(
            config.environment_id(),
            Err(Error::MissingEnvironmentId)
        ));
    }

    #[test]
    fn ids_must_be_short_lowercase_labels() {
        for bad in ["Dev", "dev_1", "-dev", "dev-", "a-very-long-environment-id"] {
            assert!(
                with_id(Some(bad)).environment_id().is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(with_id(Some("pr-1234")).environment_id().is_ok());
    }
}
