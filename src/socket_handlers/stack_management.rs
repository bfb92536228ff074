use crate::server::ServerContext;
use crate::socket_handlers::{callback_error, callback_ok, check_login, get_endpoint};
use crate::stack::{ServiceStatus, Stack};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use socketioxide::extract::{AckSender, Data, SocketRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DeployStackData {
    name: String,
    #[serde(rename = "composeYAML")]
    compose_yaml: String,
    #[serde(rename = "composeENV")]
    compose_env: String,
    #[serde(rename = "isAdd")]
    is_add: bool,
}

#[derive(Debug, Deserialize)]
struct SaveStackData {
    name: String,
    #[serde(rename = "composeYAML")]
    compose_yaml: String,
    #[serde(rename = "composeENV")]
    compose_env: String,
    #[serde(rename = "isAdd")]
    is_add: bool,
}

/// Setup stack management event handlers
pub fn setup_stack_handlers(socket: SocketRef, ctx: Arc<ServerContext>) {
    // deployStack
    let ctx_clone = ctx.clone();
    socket.on(
        "deployStack",
        move |socket: SocketRef, Data::<DeployStackData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                let name = data.name.clone();
                match handle_deploy_stack(&socket, &ctx, data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Deployed", true);
                        broadcast_stack_list(&ctx, Some(&name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // saveStack
    let ctx_clone = ctx.clone();
    socket.on(
        "saveStack",
        move |socket: SocketRef, Data::<SaveStackData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                let name = data.name.clone();
                match handle_save_stack(&socket, &ctx, data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Saved", true);
                        broadcast_stack_list(&ctx, Some(&name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // deleteStack
    let ctx_clone = ctx.clone();
    socket.on(
        "deleteStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_delete_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Deleted", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // getStack
    let ctx_clone = ctx.clone();
    socket.on(
        "getStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_get_stack(&socket, &ctx, &stack_name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // requestStackList
    let ctx_clone = ctx.clone();
    socket.on(
        "requestStackList",
        move |socket: SocketRef, ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                if check_login(&socket).is_ok() {
                    broadcast_stack_list(&ctx, None).await;
                    callback_ok(Some(ack), "Updated", true);
                }
            });
        },
    );

    // startStack
    let ctx_clone = ctx.clone();
    socket.on(
        "startStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_start_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Started", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // stopStack
    let ctx_clone = ctx.clone();
    socket.on(
        "stopStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_stop_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Stopped", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // restartStack
    let ctx_clone = ctx.clone();
    socket.on(
        "restartStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_restart_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Restarted", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // updateStack
    let ctx_clone = ctx.clone();
    socket.on(
        "updateStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_update_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Updated", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // downStack
    let ctx_clone = ctx.clone();
    socket.on(
        "downStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_down_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Downed", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // serviceStatusList
    let ctx_clone = ctx.clone();
    socket.on(
        "serviceStatusList",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_service_status_list(&socket, &ctx, &stack_name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // getDockerNetworkList
    let ctx_clone = ctx.clone();
    socket.on(
        "getDockerNetworkList",
        move |socket: SocketRef, ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_get_docker_network_list(&socket, &ctx).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // listContainers
    let ctx_clone = ctx.clone();
    socket.on(
        "listContainers",
        move |socket: SocketRef, Data::<Option<String>>(project), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_list_containers(&socket, &ctx, project).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // listImages
    let ctx_clone = ctx.clone();
    socket.on("listImages", move |socket: SocketRef, ack: AckSender| {
        let ctx = ctx_clone.clone();
        tokio::spawn(async move {
            match handle_list_images(&socket, &ctx).await {
                Ok(response) => {
                    ack.send(&response).ok();
                }
                Err(e) => callback_error(Some(ack), e),
            };
        });
    });

    // listNetworks
    let ctx_clone = ctx.clone();
    socket.on("listNetworks", move |socket: SocketRef, ack: AckSender| {
        let ctx = ctx_clone.clone();
        tokio::spawn(async move {
            match handle_get_docker_network_list_full(&socket, &ctx).await {
                Ok(response) => {
                    ack.send(&response).ok();
                }
                Err(e) => callback_error(Some(ack), e),
            };
        });
    });

    // listVolumes
    let ctx_clone = ctx.clone();
    socket.on("listVolumes", move |socket: SocketRef, ack: AckSender| {
        let ctx = ctx_clone.clone();
        tokio::spawn(async move {
            match handle_list_volumes(&socket, &ctx).await {
                Ok(response) => {
                    ack.send(&response).ok();
                }
                Err(e) => callback_error(Some(ack), e),
            };
        });
    });

    // inspectContainer
    let ctx_clone = ctx.clone();
    socket.on(
        "inspectContainer",
        move |socket: SocketRef, Data::<String>(name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_inspect_container(&socket, &ctx, &name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // inspectImage
    let ctx_clone = ctx.clone();
    socket.on(
        "inspectImage",
        move |socket: SocketRef, Data::<String>(reference), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_inspect_image(&socket, &ctx, &reference).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // inspectNetwork
    let ctx_clone = ctx.clone();
    socket.on(
        "inspectNetwork",
        move |socket: SocketRef, Data::<String>(name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_inspect_network(&socket, &ctx, &name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // inspectVolume
    let ctx_clone = ctx.clone();
    socket.on(
        "inspectVolume",
        move |socket: SocketRef, Data::<String>(name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_inspect_volume(&socket, &ctx, &name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // forceDeleteStack
    let ctx_clone = ctx.clone();
    socket.on(
        "forceDeleteStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_force_delete_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Deleted", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // checkImageUpdates
    let ctx_clone = ctx.clone();
    socket.on(
        "checkImageUpdates",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                if check_login(&socket).is_err() {
                    callback_error(Some(ack), anyhow!("Not logged in"));
                    return;
                }
                crate::server::run_image_update_probe_for_stack(&ctx, &stack_name).await;
                callback_ok(Some(ack), "Checked", true);
                crate::server::broadcast_stack_list_to_authenticated(&ctx).await;
            });
        },
    );

    // startService
    let ctx_clone = ctx.clone();
    socket.on(
        "startService",
        move |socket: SocketRef, Data::<ServiceCommandData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                let stack_name = data.stack.clone();
                match handle_start_service(&socket, &ctx, &data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Started", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // stopService
    let ctx_clone = ctx.clone();
    socket.on(
        "stopService",
        move |socket: SocketRef, Data::<ServiceCommandData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                let stack_name = data.stack.clone();
                match handle_stop_service(&socket, &ctx, &data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Stopped", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // restartService
    let ctx_clone = ctx.clone();
    socket.on(
        "restartService",
        move |socket: SocketRef, Data::<ServiceCommandData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                let stack_name = data.stack.clone();
                match handle_restart_service(&socket, &ctx, &data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Restarted", true);
                        broadcast_stack_list(&ctx, Some(&stack_name)).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );
}

#[derive(Debug, Deserialize)]
struct ServiceCommandData {
    stack: String,
    service: String,
}

async fn handle_deploy_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: DeployStackData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::new_with_content(
        ctx.clone().into(),
        data.name.clone(),
        endpoint,
        data.compose_yaml,
        data.compose_env,
    );

    // Validate YAML is parseable
    stack.compose_yaml().await?;
    stack.save(data.is_add).await?;
    stack.deploy(Some(socket.clone())).await?;

    // Join combined terminal to see logs
    stack.join_combined_terminal(socket.clone()).await?;

    Ok(())
}

async fn handle_save_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: SaveStackData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::new_with_content(
        ctx.clone().into(),
        data.name,
        endpoint,
        data.compose_yaml,
        data.compose_env,
    );

    // Validate YAML is parseable
    stack.compose_yaml().await?;
    stack.save(data.is_add).await?;

    Ok(())
}

async fn handle_delete_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.delete(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_get_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint.clone()).await?;

    // Join combined terminal if managed by dockru
    if stack.is_managed_by_dockru().await {
        stack.join_combined_terminal(socket.clone()).await.ok();
    }

    let stack_json = stack.to_json().await?;

    Ok(json!({
        "ok": true,
        "stack": stack_json
    }))
}

async fn handle_start_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.start(Some(socket.clone())).await?;
    stack.join_combined_terminal(socket.clone()).await?;

    Ok(())
}

async fn handle_stop_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.stop(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_restart_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.restart(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_update_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.update(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_down_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.down(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_service_status_list(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    let service_status_list = stack.get_service_status_list().await?;

    // Convert HashMap to JSON
    let status_map: HashMap<String, ServiceStatus> = service_status_list;

    Ok(json!({
        "ok": true,
        "serviceStatusList": status_map
    }))
}

async fn handle_get_docker_network_list(
    socket: &SocketRef,
    ctx: &ServerContext,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let networks = ctx
        .docker
        .list_networks()
        .await
        .map_err(|e| anyhow!("Failed to list Docker networks: {}", e))?;

    let names: Vec<String> = networks.into_iter().map(|n| n.name).collect();

    Ok(json!({
        "ok": true,
        "dockerNetworkList": names
    }))
}

async fn handle_list_containers(
    socket: &SocketRef,
    ctx: &ServerContext,
    project_filter: Option<String>,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let containers = ctx
        .docker
        .list_containers(true, project_filter.as_deref())
        .await
        .map_err(|e| anyhow!("Failed to list containers: {}", e))?;

    Ok(json!({ "ok": true, "containers": containers }))
}

async fn handle_list_images(socket: &SocketRef, ctx: &ServerContext) -> Result<serde_json::Value> {
    check_login(socket)?;

    let images = ctx
        .docker
        .list_images()
        .await
        .map_err(|e| anyhow!("Failed to list images: {}", e))?;

    Ok(json!({ "ok": true, "images": images }))
}

async fn handle_get_docker_network_list_full(
    socket: &SocketRef,
    ctx: &ServerContext,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let networks = ctx
        .docker
        .list_networks()
        .await
        .map_err(|e| anyhow!("Failed to list Docker networks: {}", e))?;

    Ok(json!({ "ok": true, "networks": networks }))
}

async fn handle_list_volumes(socket: &SocketRef, ctx: &ServerContext) -> Result<serde_json::Value> {
    check_login(socket)?;

    let volumes = ctx
        .docker
        .list_volumes()
        .await
        .map_err(|e| anyhow!("Failed to list volumes: {}", e))?;

    Ok(json!({ "ok": true, "volumes": volumes }))
}

async fn handle_inspect_container(
    socket: &SocketRef,
    ctx: &ServerContext,
    name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let container = ctx
        .docker
        .inspect_container(name)
        .await
        .map_err(|e| anyhow!("Failed to inspect container {}: {}", name, e))?;

    Ok(json!({ "ok": true, "container": container }))
}

async fn handle_inspect_image(
    socket: &SocketRef,
    ctx: &ServerContext,
    reference: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let image = ctx
        .docker
        .inspect_image(reference)
        .await
        .map_err(|e| anyhow!("Failed to inspect image {}: {}", reference, e))?;

    Ok(json!({ "ok": true, "image": image }))
}

async fn handle_inspect_network(
    socket: &SocketRef,
    ctx: &ServerContext,
    name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let network = ctx
        .docker
        .inspect_network(name)
        .await
        .map_err(|e| anyhow!("Failed to inspect network {}: {}", name, e))?;

    Ok(json!({ "ok": true, "network": network }))
}

async fn handle_inspect_volume(
    socket: &SocketRef,
    ctx: &ServerContext,
    name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let volume = ctx
        .docker
        .inspect_volume(name)
        .await
        .map_err(|e| anyhow!("Failed to inspect volume {}: {}", name, e))?;

    Ok(json!({ "ok": true, "volume": volume }))
}

async fn handle_force_delete_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.force_delete(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_start_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: &ServiceCommandData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), &data.stack, endpoint).await?;
    stack
        .start_service(&data.service, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_stop_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: &ServiceCommandData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), &data.stack, endpoint).await?;
    stack
        .stop_service(&data.service, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_restart_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: &ServiceCommandData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), &data.stack, endpoint).await?;
    stack
        .restart_service(&data.service, Some(socket.clone()))
        .await?;

    Ok(())
}

/// Mark a stack dirty in EventRouter (C4), then synchronously rebuild and
/// publish a new WorldView snapshot before telling callers the mutation
/// happened. Waiting out EventRouter's own debounce would let the ack and
/// the pushed stack list race ahead of the snapshot that reflects them.
async fn broadcast_stack_list(ctx: &Arc<ServerContext>, stack_name: Option<&str>) {
    if let Some(name) = stack_name {
        debug!("Marking stack {} dirty after mutation", name);
        ctx.event_router.mark_dirty(name);
    }

    let image_update_map = crate::db::models::image_update::image_update_digests(&ctx.db)
        .await
        .unwrap_or_default();
    if let Err(e) = ctx.world_view.refresh(ctx, &image_update_map).await {
        debug!("WorldView refresh after mutation failed: {}", e);
    }

    crate::server::broadcast_stack_list_to_authenticated(ctx).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_stack_data_deserialize() {
        let json = r#"{
            "name": "test-stack",
            "composeYAML": "version: '3'\nservices:\n  web:\n    image: nginx",
            "composeENV": "FOO=bar",
            "isAdd": true
        }"#;
        let data: DeployStackData = serde_json::from_str(json).unwrap();
        assert_eq!(data.name, "test-stack");
        assert!(data.is_add);
    }

    #[test]
    fn test_service_command_data_deserialize() {
        let json = r#"{"stack": "my-stack", "service": "web"}"#;
        let data: ServiceCommandData = serde_json::from_str(json).unwrap();
        assert_eq!(data.stack, "my-stack");
        assert_eq!(data.service, "web");
    }
}
