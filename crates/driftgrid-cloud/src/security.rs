//! Convergent security-group management.
//!
//! Group names are derived as `env_def_name/env_name/service`, so one
//! environment's groups never collide with another's. Group creation
//! and rule authorization are both safe to repeat: creation is
//! list-then-create, and an already-exists authorization failure is
//! downgraded to a warning.

use std::sync::{Arc, LazyLock};

use drift_core::{Connectivity, WORLD};
use driftgrid_provider::{ProviderError, ProviderResult};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::api::{CloudApi, IngressSource};

static CIDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(\.\d{1,3}){3}(/\d{1,2})?$").unwrap()
});

/// Security-group operations for one (env, env_def, region) scope.
pub struct SecurityGroups {
    api: Arc<dyn CloudApi>,
    region: String,
    env_name: String,
    env_def_name: String,
}

impl SecurityGroups {
    pub fn new(
        api: Arc<dyn CloudApi>,
        region: impl Into<String>,
        env_name: impl Into<String>,
        env_def_name: impl Into<String>,
    ) -> Self {
        Self {
            api,
            region: region.into(),
            env_name: env_name.into(),
            env_def_name: env_def_name.into(),
        }
    }

    pub fn group_name(&self, service: &str) -> String {
        format!("{}/{}/{}", self.env_def_name, self.env_name, service)
    }

    /// List-then-create. Returns the group name either way.
    pub fn create_group_if_absent(&self, service: &str) -> ProviderResult<String> {
        let name = self.group_name(service);
        let existing = self.api.security_group_names(&self.region)?;
        if existing.contains(&name) {
            debug!(group = %name, "security group already exists");
        } else {
            info!(group = %name, "creating security group");
            self.api.create_security_group(
                &self.region,
                &name,
                &format!("{} in {}", service, self.env_name),
            )?;
        }
        Ok(name)
    }

    /// Authorize every (port, source) pair of the connectivity spec on
    /// the service's group. Authorization failures are warnings; an
    /// unresolvable source is not.
    pub fn open_ports(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        let group = self.create_group_if_absent(service)?;
        for spec in connectivity {
            for allowed in &spec.allowed {
                let source = self.resolve_source(allowed)?;
                for port in &spec.ports {
                    let (from, to) = port.bounds();
                    if let Err(err) = self.api.authorize_ingress(
                        &self.region,
                        &group,
                        spec.protocol,
                        from,
                        to,
                        &source,
                    ) {
                        warn!(
                            group = %group,
                            from, to,
                            error = %err,
                            "ingress authorization failed, continuing"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// `WORLD` opens to everyone, an IPv4 address/CIDR is used verbatim,
    /// anything else names another service whose group must already
    /// exist.
    fn resolve_source(&self, allowed: &str) -> ProviderResult<IngressSource> {
        if allowed == WORLD {
            return Ok(IngressSource::Cidr("0.0.0.0/0".to_string()));
        }
        if CIDR_RE.is_match(allowed) {
            return Ok(IngressSource::Cidr(allowed.to_string()));
        }
        let group = self.group_name(allowed);
        if !self.api.security_group_names(&self.region)?.contains(&group) {
            return Err(ProviderError::Lookup(format!(
                "security group '{group}' for allowed service '{allowed}' does not exist"
            )));
        }
        Ok(IngressSource::Group(group))
    }
}
