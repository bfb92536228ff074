//! YAML fixture schemas and loading (§6 "FakeEngine"). Parsed with
//! `yaml_rust2`, the same library `stack.rs` uses for compose files, rather
//! than pulling in `serde_yaml` for a second YAML stack.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use yaml_rust2::{Yaml, YamlLoader};

#[derive(Debug, Clone, Default)]
pub struct ServiceFixture {
    pub state: Option<String>,
    pub health: Option<String>,
    pub image: Option<String>,
    pub replicas: usize,
    pub log_template: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StackFixture {
    pub status: Option<String>,
    pub services: HashMap<String, ServiceFixture>,
    pub networks: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NetworkFixture {
    pub name: String,
    pub driver: String,
    pub subnet: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerFixture {
    pub name: String,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct DanglingImageFixture {
    pub id: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RootFixture {
    pub networks: Vec<NetworkFixture>,
    pub containers: Vec<ContainerFixture>,
    pub external_stacks: Vec<String>,
    pub dangling_images: Vec<DanglingImageFixture>,
}

#[derive(Debug, Clone, Default)]
pub struct LogTemplate {
    pub interval_secs: i64,
    pub startup: Vec<String>,
    pub heartbeat: Vec<String>,
    pub shutdown: Vec<String>,
}

fn load_yaml(path: &Path) -> Result<Yaml> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let mut docs = YamlLoader::load_from_str(&text)
        .with_context(|| format!("parsing fixture {}", path.display()))?;
    Ok(docs.drain(..).next().unwrap_or(Yaml::Null))
}

fn as_str(y: &Yaml) -> Option<String> {
    match y {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Integer(i) => Some(i.to_string()),
        Yaml::Boolean(b) => Some(b.to_string()),
        Yaml::Real(r) => Some(r.clone()),
        _ => None,
    }
}

fn as_usize(y: &Yaml) -> Option<usize> {
    match y {
        Yaml::Integer(i) => Some(*i as usize),
        Yaml::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Root-level `mock.yaml`: standalone networks/containers, external
/// stacks, dangling images. Absent file yields an empty fixture rather
/// than an error — most test fixture sets only care about managed stacks.
pub fn load_root_fixture(fixtures_dir: &Path) -> Result<RootFixture> {
    let path = fixtures_dir.join("mock.yaml");
    if !path.exists() {
        return Ok(RootFixture::default());
    }
    let doc = load_yaml(&path)?;

    let mut fixture = RootFixture::default();

    if let Some(networks) = doc["networks"].as_vec() {
        for n in networks {
            fixture.networks.push(NetworkFixture {
                name: as_str(&n["name"]).unwrap_or_default(),
                driver: as_str(&n["driver"]).unwrap_or_else(|| "bridge".to_string()),
                subnet: as_str(&n["subnet"]),
            });
        }
    }

    if let Some(containers) = doc["containers"].as_vec() {
        for c in containers {
            fixture.containers.push(ContainerFixture {
                name: as_str(&c["name"]).unwrap_or_default(),
                image: as_str(&c["image"]).unwrap_or_default(),
                state: as_str(&c["state"]).unwrap_or_else(|| "running".to_string()),
            });
        }
    }

    if let Some(stacks) = doc["external_stacks"].as_vec() {
        for s in stacks {
            if let Some(name) = as_str(s) {
                fixture.external_stacks.push(name);
            }
        }
    }

    if let Some(images) = doc["dangling_images"].as_vec() {
        for img in images {
            fixture.dangling_images.push(DanglingImageFixture {
                id: as_str(&img["id"]).unwrap_or_default(),
                size: img["size"].as_i64().unwrap_or(0),
            });
        }
    }

    Ok(fixture)
}

/// Per-stack `<stack>/mock.yaml`: one directory per managed stack, matching
/// how `StackIndex` lays out real compose directories under `stacks_dir`.
pub fn load_stack_fixtures(fixtures_dir: &Path) -> Result<HashMap<String, StackFixture>> {
    let mut out = HashMap::new();
    if !fixtures_dir.exists() {
        return Ok(out);
    }

    for entry in std::fs::read_dir(fixtures_dir)
        .with_context(|| format!("reading fixtures dir {}", fixtures_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let stack_name = entry.file_name().to_string_lossy().to_string();
        let mock_path = entry.path().join("mock.yaml");
        if !mock_path.exists() {
            continue;
        }

        let doc = load_yaml(&mock_path)?;
        let mut fixture = StackFixture {
            status: as_str(&doc["status"]),
            ..Default::default()
        };

        if let Yaml::Hash(services) = &doc["services"] {
            for (key, value) in services {
                let Some(service_name) = as_str(key) else { continue };
                fixture.services.insert(
                    service_name,
                    ServiceFixture {
                        state: as_str(&value["state"]),
                        health: as_str(&value["health"]),
                        image: as_str(&value["image"]),
                        replicas: as_usize(&value["replicas"]).unwrap_or(1),
                        log_template: as_str(&value["log_template"]),
                    },
                );
            }
        }

        if let Yaml::Hash(networks) = &doc["networks"] {
            for (key, value) in networks {
                if let (Some(k), Some(v)) = (as_str(key), as_str(value)) {
                    fixture.networks.insert(k, v);
                }
            }
        }

        out.insert(stack_name, fixture);
    }

    Ok(out)
}

/// Global `log-templates.yaml`: per-image-base line templates. Keys are
/// matched against a container's image name stripped of its tag, the way
/// `{{.Image}}` expansion wants it (`nginx:1.25` → `nginx`).
pub fn load_log_templates(fixtures_dir: &Path) -> Result<HashMap<String, LogTemplate>> {
    let path = fixtures_dir.join("log-templates.yaml");
    let mut out = HashMap::new();
    if !path.exists() {
        return Ok(out);
    }
    let doc = load_yaml(&path)?;

    let Yaml::Hash(entries) = &doc else {
        return Ok(out);
    };

    for (key, value) in entries {
        let Some(name) = as_str(key) else { continue };
        let lines = |field: &str| -> Vec<String> {
            value[field]
                .as_vec()
                .map(|v| v.iter().filter_map(as_str).collect())
                .unwrap_or_default()
        };
        out.insert(
            name,
            LogTemplate {
                interval_secs: value["interval_secs"].as_i64().unwrap_or(30),
                startup: lines("startup"),
                heartbeat: lines("heartbeat"),
                shutdown: lines("shutdown"),
            },
        );
    }

    Ok(out)
}
