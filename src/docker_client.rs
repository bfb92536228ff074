//! DockerClient (§4.1, C1) — the one seam through which every other
//! component talks to a Docker Engine. Read-only inventory (containers,
//! images, networks, volumes, events, registry digests) goes through
//! `bollard`; compose lifecycle mutations are shelled out to the `docker
//! compose` CLI from `stack.rs` and are deliberately *not* duplicated here —
//! this module only ever reads.
//!
//! Per design note 9 ("tagged variants, not superclass"), `Container`,
//! `Image`, `Network` and `Volume` are four independent structs, not
//! subtypes of one `DockerEntity`.

use crate::errors::{CoreError, CoreResult};
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogsOptions, StatsOptions,
};
use bollard::image::ListImagesOptions;
use bollard::network::ListNetworksOptions;
use bollard::system::EventsOptions;
use bollard::volume::ListVolumesOptions;
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

pub const LABEL_PROJECT: &str = crate::utils::constants::LABEL_PROJECT;
pub const LABEL_SERVICE: &str = crate::utils::constants::LABEL_SERVICE;

/// How the client reaches the Engine (§4.1 "Endpoint selection"). `Auto`
/// resolves to the platform default socket; `Unix`/`Tcp` let a test harness
/// point the same client at `FakeEngine`.
#[derive(Debug, Clone)]
pub enum DockerEndpoint {
    Auto,
    Unix(PathBuf),
    Tcp(String),
}

impl DockerEndpoint {
    pub fn from_env() -> Self {
        match std::env::var("DOCKRU_DOCKER_HOST") {
            Ok(v) if v.starts_with("unix://") => {
                DockerEndpoint::Unix(PathBuf::from(v.trim_start_matches("unix://")))
            }
            Ok(v) if !v.is_empty() => DockerEndpoint::Tcp(v),
            _ => DockerEndpoint::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Paused,
    Exited,
    Dead,
    Created,
    Restarting,
    Removing,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            _ => ContainerState::Created,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerHealth {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl ContainerHealth {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.to_lowercase()).as_deref() {
            Some("starting") => ContainerHealth::Starting,
            Some("healthy") => ContainerHealth::Healthy,
            Some("unhealthy") => ContainerHealth::Unhealthy,
            _ => ContainerHealth::None,
        }
    }
}

/// Container (§3 Data Model). `image_declared` is left for WorldView to
/// fill in from StackIndex; this struct only carries what the Engine
/// itself reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub project: Option<String>,
    pub service: Option<String>,
    pub image_running: String,
    pub image_digest: Option<String>,
    pub state: ContainerState,
    pub health: ContainerHealth,
    pub created_at: i64,
    pub exit_code: Option<i64>,
    pub ports: Vec<String>,
    pub mounts: Vec<String>,
    pub networks: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// One frame from `container_stats` (§4.1). `cpu_percent` is derived the
/// same way `docker stats` computes it: the delta in total CPU usage over
/// the delta in system CPU usage, scaled by the online CPU count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub reference: String,
    pub id: String,
    pub digest: Option<String>,
    pub size: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageHistoryLayer {
    pub id: String,
    pub created: i64,
    pub size: i64,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub project: Option<String>,
    pub in_use: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub driver: String,
    pub project: Option<String>,
    pub in_use: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerEventKind {
    Start,
    Die,
    Pause,
    Unpause,
    Destroy,
    HealthStatus,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerEvent {
    pub kind: DockerEventKind,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub project: Option<String>,
    pub time: i64,
}

/// §8 property 7: the project-label filter must be accepted whether it was
/// emitted as a JSON array of `key=value` strings (the form this client
/// sends) or as a map of `key=value` → bool (the form echoed back by some
/// Engine-compatible proxies, including `FakeEngine`'s own request log).
pub fn encode_project_filter(project: &str) -> serde_json::Value {
    serde_json::json!({ "label": [format!("{}={}", LABEL_PROJECT, project)] })
}

/// Parse a `filters` query parameter's `label` entry in either accepted
/// shape, returning the flattened `key=value` strings.
pub fn parse_label_filter(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(_, v)| v.as_bool().unwrap_or(true))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// Docker's length-prefixed multiplex of stdout/stderr (§6 "Stdcopy
/// framing"). `bollard::container::logs` already decodes this for us on the
/// read side; this module keeps an independent encode/decode pair both
/// because `FakeEngine` must *emit* frames in this exact shape and because
/// §8 property 6 asks for the codec to be directly testable.
pub mod stdcopy {
    pub const STDOUT: u8 = 1;
    pub const STDERR: u8 = 2;

    /// Encode one frame: `[stream, 0, 0, 0, size_be_u32, ...payload]`.
    pub fn encode_frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.push(stream);
        buf.extend_from_slice(&[0, 0, 0]);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Decode one frame from the front of `buf`. Returns
    /// `(stream, payload, bytes_consumed)`, or `None` if `buf` doesn't yet
    /// hold a complete frame.
    pub fn decode_frame(buf: &[u8]) -> Option<(u8, &[u8], usize)> {
        if buf.len() < 8 {
            return None;
        }
        let stream = buf[0];
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if buf.len() < 8 + len {
            return None;
        }
        Some((stream, &buf[8..8 + len], 8 + len))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn round_trips_for_varied_payload_lengths() {
            for len in [0usize, 1, 7, 8, 255, 4096, 70_000] {
                let payload = vec![0xABu8; len];
                for stream in [STDOUT, STDERR] {
                    let frame = encode_frame(stream, &payload);
                    let (decoded_stream, decoded_payload, consumed) =
                        decode_frame(&frame).expect("complete frame");
                    assert_eq!(decoded_stream, stream);
                    assert_eq!(decoded_payload, payload.as_slice());
                    assert_eq!(consumed, frame.len());
                }
            }
        }

        #[test]
        fn header_always_zeroes_the_three_reserved_bytes() {
            let frame = encode_frame(STDOUT, b"hi");
            assert_eq!(&frame[1..4], &[0, 0, 0]);
        }

        #[test]
        fn incomplete_frame_yields_none() {
            let frame = encode_frame(STDOUT, b"hello world");
            assert!(decode_frame(&frame[..8]).is_none());
            assert!(decode_frame(&frame[..frame.len() - 1]).is_none());
        }
    }
}

pub struct DockerClient {
    docker: Docker,
    endpoint: DockerEndpoint,
}

impl DockerClient {
    pub fn connect(endpoint: DockerEndpoint) -> CoreResult<Self> {
        let docker = match &endpoint {
            DockerEndpoint::Auto => Docker::connect_with_local_defaults(),
            DockerEndpoint::Unix(path) => Docker::connect_with_unix(
                &path.display().to_string(),
                120,
                bollard::API_DEFAULT_VERSION,
            ),
            DockerEndpoint::Tcp(addr) => {
                Docker::connect_with_http(addr, 120, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| CoreError::UnreachableEngine.context_err(e))?;

        Ok(Self { docker, endpoint })
    }

    /// `GET /_ping` — used by EventRouter to probe reconnection.
    pub async fn ping(&self) -> CoreResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|_| CoreError::UnreachableEngine)
    }

    pub async fn list_containers(
        &self,
        include_stopped: bool,
        project_filter: Option<&str>,
    ) -> CoreResult<Vec<Container>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(project) = project_filter {
            filters.insert(
                "label".to_string(),
                vec![format!("{}={}", LABEL_PROJECT, project)],
            );
        }

        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|_| CoreError::UnreachableEngine)?;

        Ok(summaries.into_iter().map(summary_to_container).collect())
    }

    pub async fn inspect_container(&self, id_or_name: &str) -> CoreResult<Container> {
        let detail = self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| inspect_err(e, id_or_name))?;

        Ok(inspect_to_container(detail))
    }

    /// A lazy sequence of `(stream, bytes)` tuples. `follow=true` against a
    /// stopped container fails with `NotRunning` per §4.1 — modelled here
    /// as `CoreError::InvalidArgument` since the taxonomy in §7 has no
    /// dedicated `NotRunning` variant; callers check the container's state
    /// first in the common path (TerminalHub's log-follow terminal does).
    pub fn container_logs(
        &self,
        id_or_name: &str,
        follow: bool,
        since: Option<i64>,
    ) -> Pin<Box<dyn Stream<Item = CoreResult<(u8, Vec<u8>)>> + Send>> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            since: since.unwrap_or(0),
            timestamps: false,
            ..Default::default()
        };

        let stream = self.docker.logs(id_or_name, Some(options)).map(|item| {
            item.map(|log| match log {
                bollard::container::LogOutput::StdOut { message } => {
                    (stdcopy::STDOUT, message.to_vec())
                }
                bollard::container::LogOutput::StdErr { message } => {
                    (stdcopy::STDERR, message.to_vec())
                }
                bollard::container::LogOutput::StdIn { message } => {
                    (stdcopy::STDOUT, message.to_vec())
                }
                bollard::container::LogOutput::Console { message } => {
                    (stdcopy::STDOUT, message.to_vec())
                }
            })
            .map_err(|_| CoreError::UnreachableEngine)
        });

        Box::pin(stream)
    }

    /// `GET /containers/{id}/stats` — a single snapshot when `stream` is
    /// false, otherwise a lazy sequence of frames that ends when the
    /// container stops or the caller drops the stream (§4.1).
    pub fn container_stats(
        &self,
        id: &str,
        stream: bool,
    ) -> Pin<Box<dyn Stream<Item = CoreResult<ContainerStats>> + Send>> {
        let options = StatsOptions {
            stream,
            one_shot: !stream,
        };

        let mapped = self
            .docker
            .stats(id, Some(options))
            .map(|item| item.map(stats_to_view).map_err(|_| CoreError::UnreachableEngine));

        Box::pin(mapped)
    }

    pub async fn list_images(&self) -> CoreResult<Vec<Image>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|_| CoreError::UnreachableEngine)?;

        Ok(images
            .into_iter()
            .map(|img| Image {
                reference: img.repo_tags.into_iter().next().unwrap_or_default(),
                id: img.id,
                digest: img.repo_digests.into_iter().next(),
                size: img.size,
                created_at: img.created,
            })
            .collect())
    }

    pub async fn inspect_image(&self, reference: &str) -> CoreResult<Image> {
        let img = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| inspect_err(e, reference))?;

        Ok(Image {
            reference: reference.to_string(),
            id: img.id.unwrap_or_default(),
            digest: img.repo_digests.unwrap_or_default().into_iter().next(),
            size: img.size.unwrap_or_default(),
            created_at: 0,
        })
    }

    pub async fn image_history(&self, reference: &str) -> CoreResult<Vec<ImageHistoryLayer>> {
        let history = self
            .docker
            .image_history(reference)
            .await
            .map_err(|e| inspect_err(e, reference))?;

        Ok(history
            .into_iter()
            .map(|h| ImageHistoryLayer {
                id: if h.id.is_empty() {
                    "<missing>".to_string()
                } else {
                    h.id
                },
                created: h.created,
                size: h.size,
                created_by: h.created_by,
            })
            .collect())
    }

    pub async fn list_networks(&self) -> CoreResult<Vec<Network>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|_| CoreError::UnreachableEngine)?;

        Ok(networks
            .into_iter()
            .map(|n| {
                let labels = n.labels.unwrap_or_default();
                Network {
                    id: n.id.unwrap_or_default(),
                    name: n.name.unwrap_or_default(),
                    driver: n.driver.unwrap_or_default(),
                    project: labels.get(LABEL_PROJECT).cloned(),
                    in_use: n.containers.map(|c| c.len()).unwrap_or(0),
                }
            })
            .collect())
    }

    pub async fn list_volumes(&self) -> CoreResult<Vec<Volume>> {
        let resp = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(|_| CoreError::UnreachableEngine)?;

        Ok(resp
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| {
                let labels = v.labels;
                Volume {
                    name: v.name,
                    driver: v.driver,
                    project: labels.get(LABEL_PROJECT).cloned(),
                    in_use: v
                        .usage_data
                        .map(|u| u.ref_count > 0)
                        .unwrap_or(false),
                }
            })
            .collect())
    }

    pub async fn inspect_network(&self, name: &str) -> CoreResult<Network> {
        let n = self
            .docker
            .inspect_network(name, None::<bollard::network::InspectNetworkOptions<String>>)
            .await
            .map_err(|e| inspect_err(e, name))?;

        let labels = n.labels.unwrap_or_default();
        Ok(Network {
            id: n.id.unwrap_or_default(),
            name: n.name.unwrap_or_default(),
            driver: n.driver.unwrap_or_default(),
            project: labels.get(LABEL_PROJECT).cloned(),
            in_use: n.containers.map(|c| c.len()).unwrap_or(0),
        })
    }

    pub async fn inspect_volume(&self, name: &str) -> CoreResult<Volume> {
        let v = self
            .docker
            .inspect_volume(name)
            .await
            .map_err(|e| inspect_err(e, name))?;

        let labels = v.labels;
        Ok(Volume {
            name: v.name,
            driver: v.driver,
            project: labels.get(LABEL_PROJECT).cloned(),
            in_use: v.usage_data.map(|u| u.ref_count > 0).unwrap_or(false),
        })
    }

    /// Lazy infinite sequence of typed events (§4.1). Reconnection and
    /// backoff live in `EventRouter`, not here — this is a thin, honest
    /// wrapper over `GET /events`.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = CoreResult<DockerEvent>> + Send>> {
        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters: HashMap::new(),
        };

        let stream = self.docker.events(Some(options)).map(|item| {
            item.map(docker_event_to_event)
                .map_err(|_| CoreError::UnreachableEngine)
        });

        Box::pin(stream)
    }

    /// `GET /distribution/{ref}/json` — not wrapped by `bollard`, so this
    /// speaks the minimal amount of raw HTTP needed over whichever
    /// transport the client was configured with.
    pub async fn registry_descriptor(&self, image_ref: &str) -> CoreResult<String> {
        let path = format!("/distribution/{}/json", image_ref);
        let body = raw_get(&self.endpoint, &path)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| CoreError::Transient(format!("bad distribution response: {e}")))?;

        value
            .get("Descriptor")
            .and_then(|d| d.get("digest"))
            .and_then(|d| d.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::NotFound(format!("no digest for {}", image_ref)))
    }
}

fn inspect_err(e: bollard::errors::Error, what: &str) -> CoreError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => CoreError::NotFound(what.to_string()),
        _ => CoreError::UnreachableEngine,
    }
}

impl CoreError {
    fn context_err(self, e: impl std::fmt::Display) -> CoreError {
        warn!("docker connect error: {}", e);
        self
    }
}

fn summary_to_container(s: bollard::models::ContainerSummary) -> Container {
    let labels = s.labels.unwrap_or_default();
    let name = s
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    let ports = s
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| match (p.public_port, p.private_port, p.typ) {
            (Some(pub_port), priv_port, typ) => format!(
                "{}:{}/{}",
                pub_port,
                priv_port,
                typ.map(|t| format!("{:?}", t).to_lowercase())
                    .unwrap_or_else(|| "tcp".to_string())
            ),
            (None, priv_port, _) => format!("{}", priv_port),
        })
        .collect();

    let networks = s
        .network_settings
        .and_then(|ns| ns.networks)
        .map(|n| n.into_keys().collect())
        .unwrap_or_default();

    let mounts = s
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.destination)
        .collect();

    Container {
        id: s.id.unwrap_or_default(),
        project: labels.get(LABEL_PROJECT).cloned(),
        service: labels.get(LABEL_SERVICE).cloned(),
        image_running: s.image.unwrap_or_default(),
        image_digest: s.image_id,
        state: ContainerState::parse(&s.state.unwrap_or_default()),
        health: ContainerHealth::parse(
            s.status.as_deref().filter(|st| st.contains("health")),
        ),
        created_at: s.created.unwrap_or_default(),
        exit_code: None,
        ports,
        mounts,
        networks,
        labels,
        name,
    }
}

fn inspect_to_container(d: bollard::models::ContainerInspectResponse) -> Container {
    let config = d.config.clone().unwrap_or_default();
    let labels = config.labels.unwrap_or_default();
    let state = d.state.clone().unwrap_or_default();
    let name = d
        .name
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    let health_status = state
        .health
        .as_ref()
        .and_then(|h| h.status)
        .map(|s| format!("{:?}", s).to_lowercase());

    let container_state = if state.running.unwrap_or(false) {
        ContainerState::Running
    } else if state.paused.unwrap_or(false) {
        ContainerState::Paused
    } else if state.restarting.unwrap_or(false) {
        ContainerState::Restarting
    } else if state.dead.unwrap_or(false) {
        ContainerState::Dead
    } else if state.status.as_deref() == Some("exited") {
        ContainerState::Exited
    } else {
        ContainerState::Created
    };

    let networks = d
        .network_settings
        .and_then(|ns| ns.networks)
        .map(|n| n.into_keys().collect())
        .unwrap_or_default();

    let mounts = d
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.destination)
        .collect();

    Container {
        id: d.id.unwrap_or_default(),
        project: labels.get(LABEL_PROJECT).cloned(),
        service: labels.get(LABEL_SERVICE).cloned(),
        image_running: config.image.unwrap_or_default(),
        image_digest: d.image,
        state: container_state,
        health: ContainerHealth::parse(health_status.as_deref()),
        created_at: 0,
        exit_code: state.exit_code,
        ports: Vec::new(),
        mounts,
        networks,
        labels,
        name,
    }
}

fn stats_to_view(s: bollard::container::Stats) -> ContainerStats {
    let cpu_delta =
        s.cpu_stats.cpu_usage.total_usage as f64 - s.precpu_stats.cpu_usage.total_usage as f64;
    let system_delta = s.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
        - s.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
    let online_cpus = s.cpu_stats.online_cpus.unwrap_or_else(|| {
        s.cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|v| v.len() as u64)
            .unwrap_or(1)
    });

    let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
        (cpu_delta / system_delta) * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    ContainerStats {
        cpu_percent,
        memory_usage: s.memory_stats.usage.unwrap_or(0),
        memory_limit: s.memory_stats.limit.unwrap_or(0),
    }
}

fn docker_event_to_event(m: bollard::system::EventMessage) -> DockerEvent {
    let actor = m.actor.unwrap_or_default();
    let attrs = actor.attributes.unwrap_or_default();
    let kind = match m.action.as_deref() {
        Some(a) if a == "start" => DockerEventKind::Start,
        Some(a) if a == "die" => DockerEventKind::Die,
        Some(a) if a == "pause" => DockerEventKind::Pause,
        Some(a) if a == "unpause" => DockerEventKind::Unpause,
        Some(a) if a == "destroy" => DockerEventKind::Destroy,
        Some(a) if a.starts_with("health_status") => DockerEventKind::HealthStatus,
        _ => DockerEventKind::Other,
    };

    DockerEvent {
        kind,
        container_id: actor.id,
        container_name: attrs.get("name").cloned(),
        project: attrs.get(LABEL_PROJECT).cloned(),
        time: m.time.unwrap_or_default(),
    }
}

/// Minimal raw HTTP/1.1 GET used only for the one Engine endpoint
/// `bollard` doesn't wrap (`/distribution/{ref}/json`). Reuses whichever
/// transport the client is already configured with so it transparently
/// works against `FakeEngine`'s Unix socket in tests.
async fn raw_get(endpoint: &DockerEndpoint, path: &str) -> anyhow::Result<Vec<u8>> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );

    let raw = match endpoint {
        DockerEndpoint::Unix(socket_path) => {
            let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
            stream.write_all(request.as_bytes()).await?;
            let mut buf = Vec::new();
            tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf)).await??;
            buf
        }
        DockerEndpoint::Tcp(addr) => {
            let addr = addr
                .trim_start_matches("tcp://")
                .trim_start_matches("http://");
            let mut stream = tokio::net::TcpStream::connect(addr).await?;
            stream.write_all(request.as_bytes()).await?;
            let mut buf = Vec::new();
            tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf)).await??;
            buf
        }
        DockerEndpoint::Auto => {
            #[cfg(unix)]
            {
                let mut stream = tokio::net::UnixStream::connect("/var/run/docker.sock").await?;
                stream.write_all(request.as_bytes()).await?;
                let mut buf = Vec::new();
                tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
                    .await??;
                buf
            }
            #[cfg(not(unix))]
            {
                anyhow::bail!("no default docker endpoint on this platform")
            }
        }
    };

    split_http_body(&raw)
}

fn split_http_body(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
    let marker = b"\r\n\r\n";
    let pos = raw
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| anyhow::anyhow!("malformed HTTP response"))?;

    let header = String::from_utf8_lossy(&raw[..pos]);
    debug!("registry probe response head: {}", header.lines().next().unwrap_or(""));

    Ok(raw[pos + marker.len()..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_round_trips_array_form() {
        let encoded = encode_project_filter("demo");
        let label = encoded.get("label").unwrap();
        let parsed = parse_label_filter(label);
        assert_eq!(parsed, vec!["com.docker.compose.project=demo".to_string()]);
    }

    #[test]
    fn filter_accepts_map_form_echo() {
        let echoed = serde_json::json!({ "com.docker.compose.project=demo": true });
        let parsed = parse_label_filter(&echoed);
        assert_eq!(parsed, vec!["com.docker.compose.project=demo".to_string()]);
    }

    #[test]
    fn container_state_parses_known_values() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("Exited"), ContainerState::Exited);
        assert_eq!(ContainerState::parse("bogus"), ContainerState::Created);
    }

    #[test]
    fn container_health_defaults_to_none() {
        assert_eq!(ContainerHealth::parse(None), ContainerHealth::None);
        assert_eq!(
            ContainerHealth::parse(Some("unhealthy")),
            ContainerHealth::Unhealthy
        );
    }
}
