//! EventRouter (§4.4, C4) — turns the Docker event stream and filesystem
//! watch notifications into a single coalesced "refresh WorldView" signal.
//! Bursts within a 200ms window collapse into one tick; a Docker
//! disconnect reconnects with exponential backoff bounded at 30s and is
//! surfaced as a synthetic `engine_available`/`engine_unavailable`
//! meta-event SessionGateway can push to clients.

use crate::docker_client::{DockerClient, DockerEventKind};
use crate::server::ServerContext;
use crate::world_view::WorldView;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(200);
const HIGH_WATERMARK: usize = 64;
const SAFETY_TICK: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One raw invalidation cause fed into the aggregator.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Docker(crate::docker_client::DockerEvent),
    FsChange { stack: String },
    ExplicitRefresh { stack: Option<String> },
    EngineAvailable,
    EngineUnavailable,
}

pub struct EventRouter {
    sender: mpsc::Sender<RawEvent>,
    dirty: Mutex<HashSet<String>>,
    engine_available: AtomicBool,
}

impl EventRouter {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<RawEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        (
            Arc::new(Self {
                sender: tx,
                dirty: Mutex::new(HashSet::new()),
                engine_available: AtomicBool::new(true),
            }),
            rx,
        )
    }

    pub fn engine_available(&self) -> bool {
        self.engine_available.load(Ordering::SeqCst)
    }

    /// Mark a stack dirty so the next tick prioritises it (§4.4). Called
    /// directly by SessionGateway mutation handlers right after a compose
    /// subcommand completes.
    pub fn mark_dirty(&self, stack: &str) {
        self.dirty.lock().unwrap().insert(stack.to_string());
        let _ = self.sender.try_send(RawEvent::ExplicitRefresh {
            stack: Some(stack.to_string()),
        });
    }

    pub fn notify_fs_change(&self, stack: &str) {
        let _ = self.sender.try_send(RawEvent::FsChange {
            stack: stack.to_string(),
        });
    }

    /// Drain and clear the set of stacks invalidated since the last tick.
    fn take_dirty(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.lock().unwrap())
    }

    /// Spawn the aggregator task (consumes bursty `RawEvent`s, fires one
    /// `WorldView::refresh` per window) plus the Docker event-stream
    /// ingestion task (with reconnect backoff). Returns immediately;
    /// both tasks run until the process exits.
    pub fn spawn(
        self: Arc<Self>,
        rx: mpsc::Receiver<RawEvent>,
        docker: Arc<DockerClient>,
        world_view: Arc<WorldView>,
        ctx: Arc<ServerContext>,
        on_tick: impl Fn() + Send + Sync + 'static,
    ) {
        let router = self.clone();
        tokio::spawn(Self::ingest_docker_events(router, docker));

        let router = self.clone();
        tokio::spawn(Self::aggregate(router, rx, world_view, ctx, on_tick));
    }

    async fn ingest_docker_events(router: Arc<Self>, docker: Arc<DockerClient>) {
        let mut backoff = Duration::from_millis(500);

        loop {
            let mut stream = docker.events();
            if !router.engine_available.swap(true, Ordering::SeqCst) {
                info!("Docker engine reachable again");
                let _ = router.sender.send(RawEvent::EngineAvailable).await;
            }
            backoff = Duration::from_millis(500);

            use futures_util::StreamExt;
            loop {
                match stream.next().await {
                    Some(Ok(event)) => {
                        if matches!(
                            event.kind,
                            DockerEventKind::Start
                                | DockerEventKind::Die
                                | DockerEventKind::Destroy
                        ) {
                            if let Some(project) = &event.project {
                                router.mark_dirty(project);
                            }
                        }
                        let _ = router.sender.send(RawEvent::Docker(event)).await;
                    }
                    Some(Err(e)) => {
                        warn!("Docker event stream error: {}", e);
                        break;
                    }
                    None => {
                        warn!("Docker event stream ended");
                        break;
                    }
                }
            }

            if router.engine_available.swap(false, Ordering::SeqCst) {
                warn!("Docker engine unreachable, reconnecting with backoff");
                let _ = router.sender.send(RawEvent::EngineUnavailable).await;
            }

            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    async fn aggregate(
        router: Arc<Self>,
        mut rx: mpsc::Receiver<RawEvent>,
        world_view: Arc<WorldView>,
        ctx: Arc<ServerContext>,
        on_tick: impl Fn() + Send + Sync + 'static,
    ) {
        let mut safety_tick = tokio::time::interval(SAFETY_TICK);
        safety_tick.tick().await; // consume the immediate first tick

        loop {
            let mut batch = 0usize;

            tokio::select! {
                _ = safety_tick.tick() => {
                    debug!("EventRouter safety tick");
                }
                event = rx.recv() => {
                    match event {
                        Some(_) => {
                            batch += 1;
                            // Drain the debounce window, coalescing bursts.
                            let deadline = tokio::time::sleep(DEBOUNCE);
                            tokio::pin!(deadline);
                            loop {
                                tokio::select! {
                                    _ = &mut deadline => break,
                                    maybe = rx.recv() => {
                                        match maybe {
                                            Some(_) => {
                                                batch += 1;
                                                if batch >= HIGH_WATERMARK {
                                                    break;
                                                }
                                            }
                                            None => break,
                                        }
                                    }
                                }
                            }
                        }
                        None => {
                            warn!("EventRouter input channel closed");
                            return;
                        }
                    }
                }
            }

            let dirty = router.take_dirty();
            if !dirty.is_empty() {
                debug!("EventRouter tick, dirty stacks: {:?}", dirty);
            }

            let image_update_map = crate::db::models::image_update::image_update_digests(&ctx.db)
                .await
                .unwrap_or_default();

            if let Err(e) = world_view.refresh(&ctx, &image_update_map).await {
                warn!("WorldView refresh failed: {}", e);
            }

            on_tick();
        }
    }
}
