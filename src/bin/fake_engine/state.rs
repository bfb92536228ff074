//! In-memory Engine state derived from fixtures (§6 "FakeEngine"), plus the
//! `/_mock/*` admin mutations and log-line synthesis. Kept deliberately
//! separate from the real `docker_client`/`world_view` modules: the fixture
//! schema is a test-only concept, not a production one.

use crate::fixtures::{self, LogTemplate, RootFixture, StackFixture};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::info;

const LABEL_PROJECT: &str = "com.docker.compose.project";
const LABEL_SERVICE: &str = "com.docker.compose.service";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub project: Option<String>,
    pub service: Option<String>,
    pub image_running: String,
    pub digest: Option<String>,
    pub state: String,
    pub health: Option<String>,
    pub created_at: i64,
    pub exit_code: Option<i64>,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub mounts: Vec<String>,
    pub labels: HashMap<String, String>,
    pub log_template: Option<String>,
}

impl FakeContainer {
    fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn to_summary_json(&self) -> serde_json::Value {
        json!({
            "Id": self.id,
            "Names": [format!("/{}", self.name)],
            "Image": self.image_running,
            "ImageID": self.digest.clone().unwrap_or_default(),
            "Command": "/entrypoint.sh",
            "Created": self.created_at,
            "State": self.state,
            "Status": self.docker_status_text(),
            "Ports": self.ports_json(),
            "Labels": self.labels,
            "SizeRw": 0,
            "SizeRootFs": 0,
            "NetworkSettings": { "Networks": self.networks_json() },
            "Mounts": self.mounts.iter().map(|d| json!({ "Destination": d })).collect::<Vec<_>>(),
        })
    }

    pub fn to_inspect_json(&self) -> serde_json::Value {
        json!({
            "Id": self.id,
            "Created": Utc.timestamp_opt(self.created_at, 0).single()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
            "Name": format!("/{}", self.name),
            "Image": self.digest.clone().unwrap_or_default(),
            "RestartCount": 0,
            "State": {
                "Status": self.state,
                "Running": self.is_running(),
                "Paused": self.state == "paused",
                "Restarting": self.state == "restarting",
                "OOMKilled": false,
                "Dead": self.state == "dead",
                "Pid": if self.is_running() { 4242 } else { 0 },
                "ExitCode": self.exit_code.unwrap_or(0),
                "Error": "",
                "Health": self.health.as_ref().map(|h| json!({ "Status": h, "FailingStreak": 0 })),
            },
            "Config": {
                "Image": self.image_running,
                "Labels": self.labels,
            },
            "Mounts": self.mounts.iter().map(|d| json!({ "Destination": d })).collect::<Vec<_>>(),
            "NetworkSettings": { "Networks": self.networks_json() },
        })
    }

    pub fn to_stats_json(&self) -> serde_json::Value {
        json!({
            "read": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "cpu_stats": { "cpu_usage": { "total_usage": 1_000_000 }, "system_cpu_usage": 100_000_000 },
            "precpu_stats": { "cpu_usage": { "total_usage": 900_000 }, "system_cpu_usage": 90_000_000 },
            "memory_stats": { "usage": 32 * 1024 * 1024, "limit": 512 * 1024 * 1024 },
        })
    }

    pub fn to_top_json(&self) -> serde_json::Value {
        json!({
            "Titles": ["PID", "USER", "TIME", "COMMAND"],
            "Processes": if self.is_running() {
                vec![["1", "root", "0:00", "/entrypoint.sh"]]
            } else {
                vec![]
            },
        })
    }

    fn docker_status_text(&self) -> String {
        match self.state.as_str() {
            "running" => "Up 5 minutes".to_string(),
            "exited" => format!("Exited ({}) 2 minutes ago", self.exit_code.unwrap_or(0)),
            "paused" => "Up 5 minutes (Paused)".to_string(),
            "created" => "Created".to_string(),
            other => other.to_string(),
        }
    }

    fn ports_json(&self) -> Vec<serde_json::Value> {
        self.ports
            .iter()
            .filter_map(|p| {
                let (host, rest) = p.split_once(':')?;
                let (container_port, typ) = rest.split_once('/').unwrap_or((rest, "tcp"));
                Some(json!({
                    "PrivatePort": container_port.parse::<u16>().unwrap_or(0),
                    "PublicPort": host.parse::<u16>().ok(),
                    "Type": typ,
                }))
            })
            .collect()
    }

    fn networks_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for net in &self.networks {
            map.insert(net.clone(), json!({ "NetworkID": format!("net-{net}") }));
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone)]
pub struct FakeImage {
    pub reference: String,
    pub id: String,
    pub digest: Option<String>,
    pub size: i64,
    pub created_at: i64,
}

impl FakeImage {
    pub fn to_summary_json(&self) -> serde_json::Value {
        json!({
            "Id": self.id,
            "RepoTags": [self.reference],
            "RepoDigests": self.digest.clone().map(|d| vec![format!("{}@{}", self.base_name(), d)]).unwrap_or_default(),
            "Size": self.size,
            "Created": self.created_at,
        })
    }

    pub fn to_inspect_json(&self) -> serde_json::Value {
        json!({
            "Id": self.id,
            "RepoDigests": self.digest.clone().map(|d| vec![format!("{}@{}", self.base_name(), d)]).unwrap_or_default(),
            "Size": self.size,
            "Created": Utc.timestamp_opt(self.created_at, 0).single()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
        })
    }

    pub fn to_history_json(&self) -> Vec<serde_json::Value> {
        vec![json!({
            "Id": self.id,
            "Created": self.created_at,
            "CreatedBy": format!("/bin/sh -c #(nop) CMD [\"{}\"]", self.reference),
            "Size": self.size,
        })]
    }

    fn base_name(&self) -> String {
        self.reference
            .split(':')
            .next()
            .unwrap_or(&self.reference)
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FakeNetwork {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub project: Option<String>,
    pub subnet: Option<String>,
}

impl FakeNetwork {
    pub fn to_json(&self) -> serde_json::Value {
        let mut labels = serde_json::Map::new();
        if let Some(project) = &self.project {
            labels.insert(LABEL_PROJECT.to_string(), json!(project));
        }
        json!({
            "Id": self.id,
            "Name": self.name,
            "Driver": self.driver,
            "Labels": labels,
            "IPAM": { "Config": self.subnet.as_ref().map(|s| vec![json!({"Subnet": s})]).unwrap_or_default() },
            "Containers": {},
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeVolume {
    pub name: String,
    pub driver: String,
    pub project: Option<String>,
}

impl FakeVolume {
    pub fn to_json(&self) -> serde_json::Value {
        let mut labels = serde_json::Map::new();
        if let Some(project) = &self.project {
            labels.insert(LABEL_PROJECT.to_string(), json!(project));
        }
        json!({
            "Name": self.name,
            "Driver": self.driver,
            "Labels": labels,
            "UsageData": { "RefCount": 0, "Size": 0 },
        })
    }
}

pub struct EngineState {
    fixtures_dir: PathBuf,
    root: RootFixture,
    stacks: HashMap<String, StackFixture>,
    log_templates: HashMap<String, LogTemplate>,
    base_time: i64,

    pub containers: Vec<FakeContainer>,
    pub images: Vec<FakeImage>,
    pub networks: Vec<FakeNetwork>,
    pub volumes: Vec<FakeVolume>,
    pub events: broadcast::Sender<serde_json::Value>,
}

impl EngineState {
    pub fn load(fixtures_dir: &Path) -> anyhow::Result<Self> {
        let root = fixtures::load_root_fixture(fixtures_dir)?;
        let stacks = fixtures::load_stack_fixtures(fixtures_dir)?;
        let log_templates = fixtures::load_log_templates(fixtures_dir)?;
        let (tx, _rx) = broadcast::channel(1024);
        let base_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        let mut state = Self {
            fixtures_dir: fixtures_dir.to_path_buf(),
            root,
            stacks,
            log_templates,
            base_time,
            containers: Vec::new(),
            images: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
            events: tx,
        };
        state.rebuild();
        Ok(state)
    }

    /// Recompute the derived `containers`/`images`/`networks`/`volumes`
    /// vectors from the current fixtures. Called at startup and by
    /// `/_mock/reset`.
    fn rebuild(&mut self) {
        let mut containers = Vec::new();
        let mut networks = Vec::new();
        let mut images: HashMap<String, FakeImage> = HashMap::new();

        for (stack_name, fixture) in &self.stacks {
            for (service_name, service) in &fixture.services {
                let state = service.state.clone().unwrap_or_else(|| "running".to_string());
                let image = service
                    .image
                    .clone()
                    .unwrap_or_else(|| format!("{stack_name}-{service_name}:latest"));
                let digest = format!("sha256:{:x}", md5ish(&image));

                images.entry(image.clone()).or_insert_with(|| FakeImage {
                    reference: image.clone(),
                    id: format!("sha256:{:x}", md5ish(&format!("id:{image}"))),
                    digest: Some(digest.clone()),
                    size: 50_000_000,
                    created_at: self.base_time - 86_400,
                });

                for replica in 1..=service.replicas.max(1) {
                    let name = format!("{stack_name}-{service_name}-{replica}");
                    let mut labels = HashMap::new();
                    labels.insert(LABEL_PROJECT.to_string(), stack_name.clone());
                    labels.insert(LABEL_SERVICE.to_string(), service_name.clone());

                    containers.push(FakeContainer {
                        id: format!("c-{:x}", md5ish(&name)),
                        name: name.clone(),
                        project: Some(stack_name.clone()),
                        service: Some(service_name.clone()),
                        image_running: image.clone(),
                        digest: Some(digest.clone()),
                        state: state.clone(),
                        health: service.health.clone(),
                        created_at: self.base_time - 3_600,
                        exit_code: if state == "exited" { Some(0) } else { None },
                        ports: Vec::new(),
                        networks: vec![format!("{stack_name}_default")],
                        mounts: Vec::new(),
                        labels,
                        log_template: service.log_template.clone(),
                    });
                }
            }

            networks.push(FakeNetwork {
                id: format!("net-{:x}", md5ish(&format!("{stack_name}_default"))),
                name: format!("{stack_name}_default"),
                driver: "bridge".to_string(),
                project: Some(stack_name.clone()),
                subnet: None,
            });

            for (net_name, net_id) in &fixture.networks {
                networks.push(FakeNetwork {
                    id: net_id.clone(),
                    name: format!("{stack_name}_{net_name}"),
                    driver: "bridge".to_string(),
                    project: Some(stack_name.clone()),
                    subnet: None,
                });
            }
        }

        for c in &self.root.containers {
            let digest = format!("sha256:{:x}", md5ish(&c.image));
            images.entry(c.image.clone()).or_insert_with(|| FakeImage {
                reference: c.image.clone(),
                id: format!("sha256:{:x}", md5ish(&format!("id:{}", c.image))),
                digest: Some(digest.clone()),
                size: 20_000_000,
                created_at: self.base_time - 86_400,
            });

            containers.push(FakeContainer {
                id: format!("c-{:x}", md5ish(&c.name)),
                name: c.name.clone(),
                project: None,
                service: None,
                image_running: c.image.clone(),
                digest: Some(digest),
                state: c.state.clone(),
                health: None,
                created_at: self.base_time - 3_600,
                exit_code: if c.state == "exited" { Some(0) } else { None },
                ports: Vec::new(),
                networks: Vec::new(),
                mounts: Vec::new(),
                labels: HashMap::new(),
                log_template: None,
            });
        }

        for n in &self.root.networks {
            networks.push(FakeNetwork {
                id: format!("net-{:x}", md5ish(&n.name)),
                name: n.name.clone(),
                driver: n.driver.clone(),
                project: None,
                subnet: n.subnet.clone(),
            });
        }

        for img in &self.root.dangling_images {
            images.entry(img.id.clone()).or_insert_with(|| FakeImage {
                reference: String::new(),
                id: img.id.clone(),
                digest: None,
                size: img.size,
                created_at: self.base_time - 200_000,
            });
        }

        self.containers = containers;
        self.networks = networks;
        self.images = images.into_values().collect();
        self.volumes = Vec::new();
    }

    pub fn find_container(&self, id_or_name: &str) -> Option<&FakeContainer> {
        self.containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name || c.id.starts_with(id_or_name))
    }

    pub fn find_image(&self, reference: &str) -> Option<&FakeImage> {
        self.images
            .iter()
            .find(|i| i.reference == reference || i.id == reference || i.id.trim_start_matches("sha256:").starts_with(reference))
    }

    /// §6 log-template expansion: startup line once, heartbeat lines at
    /// `interval_secs` spacing since the container was created, shutdown
    /// lines appended if the container has since exited.
    pub fn render_logs(&self, container: &FakeContainer) -> Vec<u8> {
        let base_image = container
            .image_running
            .split(':')
            .next()
            .unwrap_or(&container.image_running);
        let template_key = container.log_template.as_deref().unwrap_or(base_image);
        let Some(template) = self.log_templates.get(template_key) else {
            return Vec::new();
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let elapsed = (now - container.created_at).max(0);
        let interval = template.interval_secs.max(1);
        let beats = elapsed / interval;

        let mut out = Vec::new();
        for line in &template.startup {
            push_frame(&mut out, expand(line, 0, container.created_at, interval, &container.image_running));
        }
        for n in 1..=beats {
            for line in &template.heartbeat {
                push_frame(&mut out, expand(line, n, container.created_at, interval, &container.image_running));
            }
        }
        if container.state == "exited" {
            for line in &template.shutdown {
                push_frame(&mut out, expand(line, beats + 1, container.created_at, interval, &container.image_running));
            }
        }
        out
    }

    pub fn set_stack_status(&mut self, stack: &str, status: &str) {
        let derived_state = status_to_container_state(status);
        for c in self.containers.iter_mut().filter(|c| c.project.as_deref() == Some(stack)) {
            c.state = derived_state.to_string();
            if derived_state == "exited" {
                c.exit_code = Some(0);
            }
            let _ = self.events.send(synthetic_event(&derived_state, c));
        }
        if let Some(fixture) = self.stacks.get_mut(stack) {
            fixture.status = Some(status.to_string());
        }
    }

    pub fn set_service_status(&mut self, stack: &str, service: &str, status: &str) {
        let derived_state = status_to_container_state(status);
        for c in self
            .containers
            .iter_mut()
            .filter(|c| c.project.as_deref() == Some(stack) && c.service.as_deref() == Some(service))
        {
            c.state = derived_state.to_string();
            if derived_state == "exited" {
                c.exit_code = Some(0);
            }
            let _ = self.events.send(synthetic_event(&derived_state, c));
        }
        if let Some(fixture) = self.stacks.get_mut(stack) {
            if let Some(svc) = fixture.services.get_mut(service) {
                svc.state = Some(status.to_string());
            }
        }
    }

    pub fn remove_stack(&mut self, stack: &str) {
        let removed: Vec<FakeContainer> = self
            .containers
            .iter()
            .filter(|c| c.project.as_deref() == Some(stack))
            .cloned()
            .collect();
        self.containers.retain(|c| c.project.as_deref() != Some(stack));
        self.networks.retain(|n| n.project.as_deref() != Some(stack));
        self.stacks.remove(stack);

        for c in &removed {
            let _ = self.events.send(synthetic_event("destroy", c));
        }
    }

    /// `/_mock/reset`: reload fixtures from disk, emitting `destroy` for
    /// every stack present before the reload but absent after.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        let previously_present: std::collections::HashSet<String> =
            self.containers.iter().filter_map(|c| c.project.clone()).collect();

        self.root = fixtures::load_root_fixture(&self.fixtures_dir)?;
        self.stacks = fixtures::load_stack_fixtures(&self.fixtures_dir)?;
        self.log_templates = fixtures::load_log_templates(&self.fixtures_dir)?;
        self.rebuild();

        let now_present: std::collections::HashSet<String> =
            self.containers.iter().filter_map(|c| c.project.clone()).collect();

        for gone in previously_present.difference(&now_present) {
            info!("mock reset: stack {} no longer present", gone);
        }

        Ok(())
    }
}

fn status_to_container_state(status: &str) -> &'static str {
    match status {
        "running" | "created_stack" => "running",
        "exited" | "running_and_exited" => "exited",
        "unhealthy" => "running",
        "created_file" | "inactive" => "created",
        _ => "running",
    }
}

fn synthetic_event(kind: &str, container: &FakeContainer) -> serde_json::Value {
    let action = match kind {
        "running" => "start",
        "exited" => "die",
        "destroy" => "destroy",
        _ => "start",
    };
    json!({
        "Type": "container",
        "Action": action,
        "Actor": {
            "ID": container.id,
            "Attributes": {
                "name": container.name,
                LABEL_PROJECT: container.project.clone().unwrap_or_default(),
                LABEL_SERVICE: container.service.clone().unwrap_or_default(),
            }
        },
        "time": SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs(),
    })
}

fn expand(template: &str, n: i64, base_time: i64, interval: i64, image: &str) -> String {
    let timestamp = Utc
        .timestamp_opt(base_time + n * interval, 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();

    template
        .replace("{{.Timestamp}}", &timestamp)
        .replace("{{.N}}", &n.to_string())
        .replace("{{.Image}}", image)
}

fn push_frame(out: &mut Vec<u8>, mut line: String) {
    line.push('\n');
    let payload = line.as_bytes();
    out.push(1); // stdout
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// A small dependency-free fixture-id hash; FakeEngine only needs stable,
/// distinct-looking ids across a run, not cryptographic properties.
fn md5ish(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}
