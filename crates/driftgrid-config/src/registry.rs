//! Builder registry for the configurable seams.
//!
//! Config documents name providers, hooks, and configurators by a
//! discriminator string; the registry maps each discriminator to a
//! builder. Unknown discriminators are configuration errors at load
//! time, before any backend is contacted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use drift_core::Protocol;
use driftgrid_cloud::{
    CloudApi, CloudNodeProvider, HealthCheck, Listener, LoadBalancerHook, LoadBalancerSpec,
};
use driftgrid_file::FileBackedProvider;
use driftgrid_host::HostNodeProvider;
use driftgrid_provider::{NodeProvider, ServiceLifecycleHook, TransportFactory};
use driftgrid_reconciler::{FakeConfigurator, ScriptConfigurator, ServiceConfigurator};
use serde_yaml::Mapping;

use crate::error::{ConfigError, ConfigResult};

pub type ProviderBuilder = dyn Fn(&Mapping) -> ConfigResult<Box<dyn NodeProvider>>;
pub type HookBuilder = dyn Fn(&Mapping) -> ConfigResult<Arc<dyn ServiceLifecycleHook>>;

pub struct Registry {
    providers: BTreeMap<String, Box<ProviderBuilder>>,
    hooks: BTreeMap<String, Box<HookBuilder>>,
    configurators: BTreeMap<String, Arc<dyn ServiceConfigurator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            hooks: BTreeMap::new(),
            configurators: BTreeMap::new(),
        }
    }

    /// The full built-in set: `file`, `host`, and `cloud` providers,
    /// the `load_balancer` hook, and the `script`/`fake` configurators.
    /// Cloud bindings come from the embedder.
    pub fn with_defaults(
        config_root: &Path,
        cloud: Arc<dyn CloudApi>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let mut registry = Self::new();

        registry.register_provider("file", |block| {
            let path = str_key(block, "path").unwrap_or("deployment_state.yml");
            Ok(Box::new(FileBackedProvider::new(path)))
        });

        let api = Arc::clone(&cloud);
        let factory = Arc::clone(&transports);
        registry.register_provider("cloud", move |block| {
            let regions: Vec<String> = match block.get("regions") {
                Some(value) => serde_yaml::from_value(value.clone())?,
                None => vec!["us-east-1".to_string()],
            };
            Ok(Box::new(
                CloudNodeProvider::new(Arc::clone(&api), Arc::clone(&factory))
                    .with_regions(regions),
            ))
        });

        let factory = Arc::clone(&transports);
        let key_root = config_root.to_path_buf();
        registry.register_provider("host", move |block| {
            let host = require_str(block, "host", "host provider")?;
            let user = require_str(block, "user", "host provider")?;
            let private_key = require_str(block, "private_key", "host provider")?;
            let session = factory.connect(host, user, &key_root.join(private_key))?;
            Ok(Box::new(HostNodeProvider::new(Arc::from(session), host)))
        });

        let api = Arc::clone(&cloud);
        registry.register_hook("load_balancer", move |block| {
            let spec = LoadBalancerSpec {
                name: require_str(block, "name", "load_balancer hook")?.to_string(),
                listeners: vec![Listener {
                    protocol: Protocol::Tcp,
                    app_port: require_port(block, "app_port")?,
                    balancer_port: require_port(block, "balancer_port")?,
                }],
            };
            let health_check = HealthCheck {
                target: require_str(block, "health_check_target", "load_balancer hook")?
                    .to_string(),
                interval: 10,
                timeout: 5,
                healthy_threshold: 2,
                unhealthy_threshold: 3,
            };
            let region = str_key(block, "region").unwrap_or("us-east-1").to_string();
            Ok(Arc::new(LoadBalancerHook::new(
                Arc::clone(&api),
                region,
                spec,
                health_check,
            )))
        });

        registry.register_configurator("script", Arc::new(ScriptConfigurator::new(config_root)));
        registry.register_configurator("fake", Arc::new(FakeConfigurator));
        registry
    }

    pub fn register_provider(
        &mut self,
        kind: impl Into<String>,
        builder: impl Fn(&Mapping) -> ConfigResult<Box<dyn NodeProvider>> + 'static,
    ) {
        self.providers.insert(kind.into(), Box::new(builder));
    }

    pub fn register_hook(
        &mut self,
        kind: impl Into<String>,
        builder: impl Fn(&Mapping) -> ConfigResult<Arc<dyn ServiceLifecycleHook>> + 'static,
    ) {
        self.hooks.insert(kind.into(), Box::new(builder));
    }

    pub fn register_configurator(
        &mut self,
        kind: impl Into<String>,
        configurator: Arc<dyn ServiceConfigurator>,
    ) {
        self.configurators.insert(kind.into(), configurator);
    }

    pub fn has_provider(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    pub fn has_hook(&self, kind: &str) -> bool {
        self.hooks.contains_key(kind)
    }

    pub fn build_provider(
        &self,
        kind: &str,
        block: &Mapping,
    ) -> ConfigResult<Box<dyn NodeProvider>> {
        let builder = self
            .providers
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownProvider(kind.to_string()))?;
        builder(block)
    }

    pub fn build_hook(
        &self,
        kind: &str,
        block: &Mapping,
    ) -> ConfigResult<Arc<dyn ServiceLifecycleHook>> {
        let builder = self
            .hooks
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownHook(kind.to_string()))?;
        builder(block)
    }

    pub fn configurator(&self, kind: &str) -> ConfigResult<Arc<dyn ServiceConfigurator>> {
        self.configurators
            .get(kind)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownConfigurator(kind.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn str_key<'a>(block: &'a Mapping, key: &str) -> Option<&'a str> {
    match block.get(key) {
        Some(serde_yaml::Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

fn require_str<'a>(block: &'a Mapping, key: &str, context: &str) -> ConfigResult<&'a str> {
    str_key(block, key)
        .ok_or_else(|| ConfigError::Validation(format!("Key '{key}' not set for {context}")))
}

fn require_port(block: &Mapping, key: &str) -> ConfigResult<u16> {
    block
        .get(key)
        .and_then(serde_yaml::Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| {
            ConfigError::Validation(format!("Key '{key}' must be a port number"))
        })
}
