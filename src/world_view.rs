//! WorldView (§4.3, C3) — the join of `StackIndex` (on-disk stacks) with
//! `DockerClient` (the live container inventory) into one immutable,
//! atomically-published projection. Readers call `current()` and never
//! block; the single background publisher `refresh()`s and swaps the
//! pointer (design note "Shared mutable state → snapshot swap").

use crate::docker_client::{Container, ContainerHealth, ContainerState, DockerClient};
use crate::server::ServerContext;
use crate::stack::{ParsedService, Stack};
use crate::utils::constants::{
    CREATED_FILE, CREATED_STACK, EXITED, INACTIVE, RUNNING, RUNNING_AND_EXITED, UNHEALTHY,
};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// A service's health-aware reduction across its replica containers
/// (§4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unhealthy,
    Running,
    Paused,
    Created,
    Exited,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContainerView {
    pub id: String,
    pub name: String,
    pub service: String,
    pub image_declared: Option<String>,
    pub image_running: String,
    pub state: ContainerState,
    pub health: ContainerHealth,
    pub created_at: i64,
    pub exit_code: Option<i64>,
    pub ports: Vec<String>,
    pub image_update_available: bool,
    pub recreate_needed: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub state: ServiceState,
    pub ignored: bool,
    pub containers: Vec<ContainerView>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StackView {
    pub name: String,
    pub managed: bool,
    pub status: i32,
    pub recreate_necessary: bool,
    pub services: HashMap<String, ServiceView>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct WorldSnapshot {
    pub stacks: HashMap<String, StackView>,
    /// Containers with no compose project label (§4.3 step 2, "_standalone").
    pub standalone: Vec<ContainerView>,
    pub tick: u64,
}

impl WorldSnapshot {
    pub fn stack(&self, name: &str) -> Option<&StackView> {
        self.stacks.get(name)
    }
}

/// Reduce one service's containers into a `ServiceState` (§4.3 step 5).
fn reduce_service(containers: &[ContainerView]) -> ServiceState {
    if containers
        .iter()
        .any(|c| c.health == ContainerHealth::Unhealthy)
    {
        ServiceState::Unhealthy
    } else if containers
        .iter()
        .any(|c| c.state == ContainerState::Running)
    {
        ServiceState::Running
    } else if containers.iter().any(|c| c.state == ContainerState::Paused) {
        ServiceState::Paused
    } else if containers.iter().any(|c| c.state == ContainerState::Created) {
        ServiceState::Created
    } else {
        ServiceState::Exited
    }
}

/// Reduce a stack's non-ignored services into one `StackStatus` int
/// (§3 StackStatus precedence).
fn reduce_stack(services: &HashMap<String, ServiceView>, managed: bool, has_any_container: bool) -> i32 {
    let considered: Vec<&ServiceView> = services.values().filter(|s| !s.ignored).collect();

    if considered.is_empty() {
        return if has_any_container {
            // Every non-ignored service's containers vanished but something
            // else (an ignored service, say) is still present; treat as
            // exited rather than silently "inactive".
            EXITED
        } else if managed {
            CREATED_FILE
        } else {
            INACTIVE
        };
    }

    if considered
        .iter()
        .any(|s| s.state == ServiceState::Unhealthy)
    {
        return UNHEALTHY;
    }

    let running = considered
        .iter()
        .filter(|s| s.state == ServiceState::Running)
        .count();
    let exited = considered
        .iter()
        .filter(|s| s.state == ServiceState::Exited)
        .count();

    if running > 0 && exited > 0 {
        return RUNNING_AND_EXITED;
    }
    if running > 0 {
        return RUNNING;
    }
    if exited == considered.len() {
        return EXITED;
    }
    if considered
        .iter()
        .any(|s| !s.containers.is_empty())
    {
        return CREATED_STACK;
    }

    if managed {
        CREATED_FILE
    } else {
        INACTIVE
    }
}

/// Heuristically extract a service name from a bare container name when
/// the compose-project label is missing (§4.3 step 4): compose names
/// containers `<project>-<service>-<replica>` (or `<project>_<service>_<replica>`
/// on older CLI versions).
fn guess_service_name(container_name: &str) -> String {
    let normalized = container_name.replace('_', "-");
    let parts: Vec<&str> = normalized.split('-').collect();
    if parts.len() >= 3 && parts.last().map(|p| p.parse::<u32>().is_ok()).unwrap_or(false) {
        parts[parts.len() - 2].to_string()
    } else if parts.len() >= 2 {
        parts[parts.len() - 1].to_string()
    } else {
        container_name.to_string()
    }
}

pub struct WorldView {
    snapshot: ArcSwap<WorldSnapshot>,
    docker: Arc<DockerClient>,
    tick_counter: std::sync::atomic::AtomicU64,
    /// Serializes `refresh()` so concurrent invalidations collapse into one
    /// join/reduce pass instead of racing each other.
    refresh_lock: AsyncMutex<()>,
    notify: tokio::sync::Notify,
}

impl WorldView {
    pub fn new(docker: Arc<DockerClient>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(WorldSnapshot::default()),
            docker,
            tick_counter: std::sync::atomic::AtomicU64::new(0),
            refresh_lock: AsyncMutex::new(()),
            notify: tokio::sync::Notify::new(),
        }
    }

    pub fn current(&self) -> Arc<WorldSnapshot> {
        self.snapshot.load_full()
    }

    /// Resolved after every successful `refresh()`; SessionGateway's push
    /// loop awaits this instead of polling.
    pub async fn wait_for_update(&self) {
        self.notify.notified().await;
    }

    /// The §4.3 algorithm, steps 1–8. `image_update_map` is the persisted
    /// registry-probe cache (digest per reference); this function never
    /// performs probes itself — that's a separate background loop that
    /// writes into the key-value store and lets WorldView do a pure read.
    pub async fn refresh(
        &self,
        ctx: &Arc<ServerContext>,
        image_update_map: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let (stacks, containers) = tokio::join!(
            Stack::get_stack_list(ctx.clone(), String::new(), false),
            self.docker.list_containers(true, None)
        );

        let mut stacks = stacks.unwrap_or_default();
        let containers: Vec<Container> = match containers {
            Ok(c) => c,
            Err(e) => {
                warn!("WorldView refresh: container inventory unavailable: {}", e);
                Vec::new()
            }
        };

        // step 2: group by compose project label
        let mut by_project: HashMap<String, Vec<Container>> = HashMap::new();
        let mut standalone_raw: Vec<Container> = Vec::new();
        for c in containers {
            match c.project.clone() {
                Some(project) => by_project.entry(project).or_default().push(c),
                None => standalone_raw.push(c),
            }
        }

        let mut stack_views: HashMap<String, StackView> = HashMap::new();

        // Parsed service maps, one disk read per managed stack.
        let mut parsed_services: HashMap<String, HashMap<String, ParsedService>> = HashMap::new();
        for (name, stack) in stacks.iter_mut() {
            match stack.parse_services().await {
                Ok(services) => {
                    parsed_services.insert(name.clone(), services);
                }
                Err(e) => {
                    debug!("parse_services failed for {}: {} (keeping prior)", name, e);
                }
            }
        }

        let managed_names: std::collections::HashSet<String> = stacks.keys().cloned().collect();

        for (project, group) in by_project {
            let managed = managed_names.contains(&project);
            let declared = parsed_services.get(&project).cloned().unwrap_or_default();

            // step 4: group containers by service
            let mut by_service: HashMap<String, Vec<Container>> = HashMap::new();
            for c in group {
                let service = c
                    .service
                    .clone()
                    .unwrap_or_else(|| guess_service_name(&c.name));
                by_service.entry(service).or_default().push(c);
            }

            let mut services = HashMap::new();
            let mut any_container = false;
            for (service_name, containers) in by_service {
                any_container = true;
                let declared_service = declared.get(&service_name);
                let ignored = declared_service.map(|s| s.status_ignored()).unwrap_or(false);
                let declared_image = declared_service.and_then(|s| s.image.clone());

                let views: Vec<ContainerView> = containers
                    .into_iter()
                    .map(|c| {
                        let update_check = declared_service
                            .map(|s| s.update_check_enabled())
                            .unwrap_or(true);
                        let newer_digest = c
                            .image_digest
                            .as_ref()
                            .and_then(|running| {
                                image_update_map
                                    .get(&c.image_running)
                                    .filter(|stored| *stored != running)
                            })
                            .is_some();
                        let recreate_needed = declared_image
                            .as_ref()
                            .map(|d| d != &c.image_running)
                            .unwrap_or(false);

                        ContainerView {
                            id: c.id,
                            name: c.name,
                            service: service_name.clone(),
                            image_declared: declared_image.clone(),
                            image_running: c.image_running,
                            state: c.state,
                            health: c.health,
                            created_at: c.created_at,
                            exit_code: c.exit_code,
                            ports: c.ports,
                            image_update_available: newer_digest && update_check,
                            recreate_needed,
                        }
                    })
                    .collect();

                let state = reduce_service(&views);
                services.insert(
                    service_name.clone(),
                    ServiceView {
                        name: service_name,
                        state,
                        ignored,
                        containers: views,
                    },
                );
            }

            let status = reduce_stack(&services, managed, any_container);
            let recreate_necessary = services
                .values()
                .flat_map(|s| s.containers.iter())
                .any(|c| c.recreate_needed);

            stack_views.insert(
                project.clone(),
                StackView {
                    name: project,
                    managed,
                    status,
                    recreate_necessary,
                    services,
                },
            );
        }

        // Managed stacks with literally zero containers anywhere (never
        // deployed, or fully downed) still need an entry so the gateway can
        // show them as `created_file`/`inactive`.
        for name in managed_names {
            stack_views.entry(name.clone()).or_insert_with(|| StackView {
                name: name.clone(),
                managed: true,
                status: CREATED_FILE,
                recreate_necessary: false,
                services: HashMap::new(),
            });
        }

        let standalone = standalone_raw
            .into_iter()
            .map(|c| ContainerView {
                id: c.id,
                name: c.name.clone(),
                service: guess_service_name(&c.name),
                image_declared: None,
                image_running: c.image_running,
                state: c.state,
                health: c.health,
                created_at: c.created_at,
                exit_code: c.exit_code,
                ports: c.ports,
                image_update_available: false,
                recreate_needed: false,
            })
            .collect();

        let tick = self
            .tick_counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;

        self.snapshot.store(Arc::new(WorldSnapshot {
            stacks: stack_views,
            standalone,
            tick,
        }));

        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker_client::ContainerState;

    fn view(name: &str, state: ContainerState, health: ContainerHealth) -> ContainerView {
        ContainerView {
            id: name.to_string(),
            name: name.to_string(),
            service: "svc".to_string(),
            image_declared: None,
            image_running: "img".to_string(),
            state,
            health,
            created_at: 0,
            exit_code: None,
            ports: Vec::new(),
            image_update_available: false,
            recreate_needed: false,
        }
    }

    #[test]
    fn service_reduction_prioritizes_unhealthy() {
        let containers = vec![
            view("a", ContainerState::Running, ContainerHealth::None),
            view("b", ContainerState::Running, ContainerHealth::Unhealthy),
        ];
        assert_eq!(reduce_service(&containers), ServiceState::Unhealthy);
    }

    #[test]
    fn service_reduction_picks_running_over_exited() {
        let containers = vec![
            view("a", ContainerState::Exited, ContainerHealth::None),
            view("b", ContainerState::Running, ContainerHealth::None),
        ];
        assert_eq!(reduce_service(&containers), ServiceState::Running);
    }

    #[test]
    fn stack_reduction_ignores_ignored_service() {
        // scenario (a) from §8: web=exited+ignored, db=running, cache=running
        let mut services = HashMap::new();
        services.insert(
            "web".to_string(),
            ServiceView {
                name: "web".to_string(),
                state: ServiceState::Exited,
                ignored: true,
                containers: vec![view("web-1", ContainerState::Exited, ContainerHealth::None)],
            },
        );
        services.insert(
            "db".to_string(),
            ServiceView {
                name: "db".to_string(),
                state: ServiceState::Running,
                ignored: false,
                containers: vec![view("db-1", ContainerState::Running, ContainerHealth::None)],
            },
        );
        services.insert(
            "cache".to_string(),
            ServiceView {
                name: "cache".to_string(),
                state: ServiceState::Running,
                ignored: false,
                containers: vec![view("cache-1", ContainerState::Running, ContainerHealth::None)],
            },
        );

        assert_eq!(reduce_stack(&services, true, true), RUNNING);
    }

    #[test]
    fn stack_reduction_all_exited_is_exited() {
        let mut services = HashMap::new();
        services.insert(
            "web".to_string(),
            ServiceView {
                name: "web".to_string(),
                state: ServiceState::Exited,
                ignored: false,
                containers: vec![view("web-1", ContainerState::Exited, ContainerHealth::None)],
            },
        );
        assert_eq!(reduce_stack(&services, true, true), EXITED);
    }

    #[test]
    fn stack_reduction_no_containers_managed_is_created_file() {
        let services = HashMap::new();
        assert_eq!(reduce_stack(&services, true, false), CREATED_FILE);
    }

    #[test]
    fn stack_reduction_no_containers_unmanaged_is_inactive() {
        let services = HashMap::new();
        assert_eq!(reduce_stack(&services, false, false), INACTIVE);
    }

    #[test]
    fn service_name_guessed_from_replica_suffix() {
        assert_eq!(guess_service_name("demo-web-1"), "web");
        assert_eq!(guess_service_name("demo_web_1"), "web");
        assert_eq!(guess_service_name("standalone-box"), "box");
    }
}
